// Copyright 2022 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The `nodeData(arch)` vtable operation of spec.md §6: "freshly-measured
//! host CPUID data (platform-specific; omitted when unavailable)".
//!
//! The `cpuid` crate cannot run the `CPUID` instruction itself (spec.md §1
//! names this an external collaborator), so the contract lives here as a
//! named seam instead: [`HostCpuidSource`], implemented on `x86_64` by
//! actually issuing the instruction, and unimplemented everywhere else.

use cpuid::{Cpuid, X86Data, CPUX86_EXTENDED};
use thiserror::Error;

/// Errors reading CPUID straight off the running host.
#[derive(Debug, Error)]
pub enum HostCpuidError {
    /// This binary was not built for an architecture that can execute the
    /// `CPUID` instruction.
    #[error("host CPUID reads are not supported on this architecture")]
    UnsupportedArch,
}

/// A source of freshly-measured host CPUID data.
pub trait HostCpuidSource {
    /// Reads every basic and extended CPUID leaf from the running host.
    ///
    /// # Errors
    ///
    /// Returns [`HostCpuidError`] if the host cannot be queried.
    fn read(&self) -> Result<X86Data, HostCpuidError>;
}

/// Reads CPUID leaves via `core::arch::x86_64::__cpuid_count`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeHostCpuid;

#[cfg(target_arch = "x86_64")]
impl HostCpuidSource for NativeHostCpuid {
    fn read(&self) -> Result<X86Data, HostCpuidError> {
        let mut data = X86Data::new();
        read_range(&mut data, 0);
        read_range(&mut data, CPUX86_EXTENDED);
        Ok(data)
    }
}

#[cfg(target_arch = "x86_64")]
fn read_range(data: &mut X86Data, base: u32) {
    // SAFETY: `__cpuid_count` is available whenever `target_arch = "x86_64"`
    // and `target_feature = "sse"` (guaranteed on every x86_64 target triple
    // Rust ships); it has no preconditions beyond that.
    let max_leaf = unsafe { core::arch::x86_64::__cpuid_count(base, 0) }.eax;
    for function in base..=max_leaf {
        // SAFETY: same as above. Some leaves (e.g. cache leaves) read their
        // sub-leaf index from `ecx`; zeroing it is the documented
        // "no sub-leaf requested" input per spec.md §6.
        let leaf = unsafe { core::arch::x86_64::__cpuid_count(function, 0) };
        data.add_cpuid(Cpuid {
            function,
            eax: leaf.eax,
            ebx: leaf.ebx,
            ecx: leaf.ecx,
            edx: leaf.edx,
        });
    }
}

#[cfg(not(target_arch = "x86_64"))]
impl HostCpuidSource for NativeHostCpuid {
    fn read(&self) -> Result<X86Data, HostCpuidError> {
        Err(HostCpuidError::UnsupportedArch)
    }
}
