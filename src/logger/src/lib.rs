// Copyright 2022 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Minimal ambient logging façade shared by every crate in the workspace.
//!
//! Re-exports the [`log`] crate's level macros (`info!`, `warn!`, `error!`,
//! `debug!`) so call sites only ever need `use logger::{info, warn, error};`,
//! and installs a small `Log` implementation that writes to stderr with a
//! timestamp and level prefix. There is no metrics subsystem here: nothing in
//! this workspace reports counters, so one was not built.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

pub use log::{debug, error, info, trace, warn, Level, LevelFilter};
use thiserror::Error;

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Errors raised while installing the global logger.
#[derive(Debug, Error)]
pub enum InitLoggerError {
    /// `init` was called more than once.
    #[error("the logger has already been initialized")]
    AlreadyInitialized,
    /// The underlying `log` crate rejected the logger.
    #[error("failed to set the global logger: {0}")]
    SetLogger(#[from] log::SetLoggerError),
}

struct StderrLogger {
    level: LevelFilter,
}

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            let mut stderr = std::io::stderr();
            // Best-effort: a logging failure must never panic the caller.
            let _ = writeln!(
                stderr,
                "[{level}] {target}: {args}",
                level = record.level(),
                target = record.target(),
                args = record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Installs the global logger at the given level.
///
/// # Errors
///
/// Returns [`InitLoggerError::AlreadyInitialized`] if called more than once
/// in the process lifetime.
pub fn init(level: LevelFilter) -> Result<(), InitLoggerError> {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return Err(InitLoggerError::AlreadyInitialized);
    }
    log::set_max_level(level);
    log::set_boxed_logger(Box::new(StderrLogger { level }))?;
    Ok(())
}
