// Copyright 2022 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A CLI driving the `cpuid` engine end-to-end: loads a catalog from an XML
//! document and one or more `CpuDef` JSON documents, runs one of
//! compare/decode/encode/baseline/update, and prints the result as JSON.
//!
//! This is where the two external collaborators spec.md §1 names (the XML
//! catalog loader and the `CPUID` instruction) are actually wired up; the
//! `cpuid` crate itself never touches either.

mod host_cpuid;
mod xml_catalog;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use cpuid::{CpuDef, DecodeFlags, EncodeRequest, X86Data, X86Map};
use host_cpuid::{HostCpuidSource, NativeHostCpuid};
use logger::{info, LevelFilter};
use thiserror::Error;

#[derive(Debug, Parser)]
#[command(name = "cpu-template-helper", about = "x86 CPU feature-compatibility engine CLI")]
struct Cli {
    /// Path to the catalog XML document (vendors/features/models).
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Log level: off, error, warn, info, debug, trace.
    #[arg(long, global = true, default_value = "info")]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Classifies `--guest` against `--host` (spec.md §4.E, `compare`).
    Compare {
        /// Host `CpuDef` JSON document.
        #[arg(long)]
        host: PathBuf,
        /// Guest `CpuDef` JSON document.
        #[arg(long)]
        guest: PathBuf,
    },
    /// Decodes `--data` against the catalog, naming the closest model
    /// (spec.md §4.F).
    Decode {
        /// Base `CpuDef` JSON document (type/fallback/preferred context).
        #[arg(long)]
        cpu: PathBuf,
        /// Raw `X86Data` JSON document to decode.
        #[arg(long)]
        data: PathBuf,
        /// Restrict candidates to these model names (repeatable).
        #[arg(long = "allow-model")]
        allow_models: Vec<String>,
        /// Preferred model name.
        #[arg(long)]
        preferred: Option<String>,
        /// Render the residual as an explicit feature list.
        #[arg(long)]
        expand_features: bool,
    },
    /// Produces per-policy `X86Data` for `--cpu` (spec.md §4.G, Encode).
    Encode {
        /// `CpuDef` JSON document.
        #[arg(long)]
        cpu: PathBuf,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        require: bool,
        #[arg(long)]
        optional: bool,
        #[arg(long)]
        disable: bool,
        #[arg(long)]
        forbid: bool,
        #[arg(long)]
        vendor: bool,
    },
    /// Computes the common-denominator CPU across `--cpu` (repeatable)
    /// (spec.md §4.G, Baseline).
    Baseline {
        /// One `CpuDef` JSON document per host; repeat for each host.
        #[arg(long = "cpu", required = true)]
        cpus: Vec<PathBuf>,
        #[arg(long = "allow-model")]
        allow_models: Vec<String>,
    },
    /// Rewrites `--guest` against `--host` per `guest.mode` (spec.md §4.G,
    /// Update).
    Update {
        #[arg(long)]
        host: PathBuf,
        #[arg(long)]
        guest: PathBuf,
    },
    /// Reads the running host's CPUID leaves and prints them as `X86Data`
    /// JSON (spec.md §6, `nodeData`).
    NodeData,
}

#[derive(Debug, Error)]
enum MainError {
    #[error("missing --catalog (required by every subcommand except node-data)")]
    MissingCatalog,
    #[error("failed to read `{0}`: {1}")]
    ReadFile(PathBuf, std::io::Error),
    #[error("failed to parse catalog: {0}")]
    Catalog(#[from] xml_catalog::XmlCatalogError),
    #[error("failed to parse `{0}` as JSON: {1}")]
    Json(PathBuf, serde_json::Error),
    #[error("failed to render output as JSON: {0}")]
    Render(#[from] serde_json::Error),
    #[error(transparent)]
    Bridge(#[from] cpuid::BridgeError),
    #[error(transparent)]
    Decode(#[from] cpuid::DecodeError),
    #[error(transparent)]
    Encode(#[from] cpuid::EncodeError),
    #[error(transparent)]
    Baseline(#[from] cpuid::BaselineError),
    #[error(transparent)]
    Update(#[from] cpuid::UpdateError),
    #[error(transparent)]
    HostCpuid(#[from] host_cpuid::HostCpuidError),
    #[error("could not initialize logger: {0}")]
    Logger(#[from] logger::InitLoggerError),
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, MainError> {
    let contents = fs::read_to_string(path).map_err(|e| MainError::ReadFile(path.to_owned(), e))?;
    serde_json::from_str(&contents).map_err(|e| MainError::Json(path.to_owned(), e))
}

fn load_catalog(path: &Path) -> Result<X86Map, MainError> {
    let contents = fs::read_to_string(path).map_err(|e| MainError::ReadFile(path.to_owned(), e))?;
    Ok(xml_catalog::load_catalog(&contents)?)
}

fn run(cli: Cli) -> Result<(), MainError> {
    if matches!(&cli.command, Command::NodeData) {
        let data = NativeHostCpuid.read()?;
        print_json(&data)?;
        return Ok(());
    }

    let catalog_path = cli.catalog.ok_or(MainError::MissingCatalog)?;
    let catalog = load_catalog(&catalog_path)?;
    info!("loaded catalog `{}`: {} models", catalog_path.display(), catalog.models().len());

    match cli.command {
        Command::NodeData => unreachable!("handled above"),
        Command::Compare { host, guest } => {
            let host: CpuDef = read_json(&host)?;
            let guest: CpuDef = read_json(&guest)?;
            let outcome = cpuid::compute(&host, &guest, true, &catalog)?;
            print_json(&DebugOutcome {
                result: format!("{:?}", outcome.result),
                message: outcome.message,
                guest_data: outcome.guest_data,
            })?;
        }
        Command::Decode {
            cpu,
            data,
            allow_models,
            preferred,
            expand_features,
        } => {
            let mut cpu: CpuDef = read_json(&cpu)?;
            let data: X86Data = read_json(&data)?;
            let flags = if expand_features {
                DecodeFlags::EXPAND_FEATURES
            } else {
                DecodeFlags::empty()
            };
            cpuid::decode(&mut cpu, &data, &allow_models, preferred.as_deref(), flags, &catalog)?;
            print_json(&cpu)?;
        }
        Command::Encode {
            cpu,
            force,
            require,
            optional,
            disable,
            forbid,
            vendor,
        } => {
            let cpu: CpuDef = read_json(&cpu)?;
            let request = EncodeRequest {
                force,
                require,
                optional,
                disable,
                forbid,
                vendor,
            };
            let result = cpuid::encode(&cpu, request, &catalog)?;
            print_json(&result)?;
        }
        Command::Baseline { cpus, allow_models } => {
            let cpus: Vec<CpuDef> = cpus.iter().map(|p| read_json(p)).collect::<Result<_, _>>()?;
            let result = cpuid::baseline(&cpus, &allow_models, DecodeFlags::empty(), &catalog)?;
            print_json(&result)?;
        }
        Command::Update { host, guest } => {
            let host: CpuDef = read_json(&host)?;
            let mut guest: CpuDef = read_json(&guest)?;
            cpuid::update(&mut guest, &host, &catalog)?;
            print_json(&guest)?;
        }
    }

    Ok(())
}

/// `EncodeResult` and `X86Data` serialize fine on their own; `ComputeOutcome`
/// does not derive `Serialize` (it is a library-internal carrier, not a
/// wire type) so the CLI renders its fields through this adapter instead of
/// adding a serde dependency to the engine's own result type.
#[derive(Debug, serde::Serialize)]
struct DebugOutcome {
    result: String,
    message: Option<String>,
    guest_data: Option<X86Data>,
}

fn print_json(value: &impl serde::Serialize) -> Result<(), MainError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn try_main() -> Result<(), MainError> {
    let cli = Cli::parse();
    logger::init(cli.log_level)?;
    run(cli)
}

fn main() -> ExitCode {
    match try_main() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
