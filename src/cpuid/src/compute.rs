// Copyright 2022 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The host/guest compatibility pipeline (spec.md §4.E).

use logger::debug;

use crate::bridge::{feature_names, model_from_cpu};
use crate::catalog::X86Map;
use crate::compare::{compare, CompareResult};
use crate::cpudef::{CpuDef, MatchMode, Policy};
use crate::data::X86Data;
use crate::errors::BridgeError;

/// The compatibility classification (spec.md §6 vtable: `compare`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompatResult {
    /// Host and guest resolve to identical CPUID data.
    Identical,
    /// The host provides everything the guest needs and more.
    Superset,
    /// The guest cannot run on the host.
    Incompatible,
}

/// The full result of [`compute`]: the classification, the synthesized
/// guest CPUID data (only populated if the caller asked and the result
/// was not `Incompatible`), and a human-readable message (populated only
/// on `Incompatible`, per spec.md §7: "messages for incompatibility use a
/// separate `message` out-parameter rather than the error channel, since
/// incompatibility is a normal outcome").
#[derive(Debug, Clone)]
pub struct ComputeOutcome {
    /// The classification.
    pub result: CompatResult,
    /// Synthesized guest CPUID data, if requested and compatible.
    pub guest_data: Option<X86Data>,
    /// Human-readable explanation, populated only when `result ==
    /// CompatResult::Incompatible`.
    pub message: Option<String>,
}

fn incompatible(message: impl Into<String>) -> ComputeOutcome {
    ComputeOutcome {
        result: CompatResult::Incompatible,
        guest_data: None,
        message: Some(message.into()),
    }
}

/// Given `host` and a requested guest `cpu`, classifies compatibility and,
/// if `want_guest_data`, synthesizes guest CPUID data (spec.md §4.E).
///
/// The arch precondition of spec.md §4.E ("if `cpu.arch` is set, it must
/// equal one of the x86 architectures") is enforced by [`crate::cpudef::Arch`]
/// being a closed enum with exactly those two variants — an unsupported
/// architecture string can only arrive at a system boundary (e.g.
/// deserializing a [`CpuDef`] from JSON), where it is rejected by `serde`
/// before it ever reaches this function, so there is no runtime arch check
/// here to duplicate that.
///
/// # Errors
///
/// Returns [`BridgeError`] if a named model/feature on `host` or `cpu` does
/// not resolve in `catalog`.
pub fn compute(
    host: &CpuDef,
    cpu: &CpuDef,
    want_guest_data: bool,
    catalog: &X86Map,
) -> Result<ComputeOutcome, BridgeError> {
    if let Some(wanted_vendor) = &cpu.vendor {
        if host.vendor.as_deref() != Some(wanted_vendor.as_str()) {
            return Ok(incompatible(format!(
                "Host CPU vendor does not match required CPU vendor {wanted_vendor}"
            )));
        }
    }

    let host_model = model_from_cpu(host, Policy::Require, catalog)?;
    let cpu_force = model_from_cpu(cpu, Policy::Force, catalog)?;
    let cpu_require = model_from_cpu(cpu, Policy::Require, catalog)?;
    let cpu_optional = model_from_cpu(cpu, Policy::Optional, catalog)?;
    let cpu_disable = model_from_cpu(cpu, Policy::Disable, catalog)?;
    let cpu_forbid = model_from_cpu(cpu, Policy::Forbid, catalog)?;

    // Step 1: forbid check.
    let forbidden_present = host_model.data.intersect(&cpu_forbid.data);
    if !forbidden_present.is_empty() {
        return Ok(incompatible(format!(
            "Host CPU provides forbidden features: {}",
            feature_names(&forbidden_present, catalog, ", ")
        )));
    }

    // Step 2: require normalization. Features of the base model explicitly
    // reclassified (force/optional/disable) no longer need to be required
    // from the host.
    let reclassified = cpu_force.data.union(&cpu_optional.data).union(&cpu_disable.data);
    let cpu_require_normalized = cpu_require.data.minus(&reclassified);

    // Step 3: require check.
    let require_comparison = compare(&host_model.data, &cpu_require_normalized);
    if matches!(
        require_comparison,
        CompareResult::Subset | CompareResult::Unrelated
    ) {
        let missing = cpu_require_normalized.minus(&host_model.data);
        return Ok(incompatible(format!(
            "Host CPU does not provide required features: {}",
            feature_names(&missing, catalog, ", ")
        )));
    }

    // Step 4: superset check.
    let diff = host_model
        .data
        .minus(&cpu_optional.data)
        .minus(&cpu_require_normalized)
        .minus(&cpu_disable.data)
        .minus(&cpu_force.data);
    let result = if diff.is_empty() {
        CompatResult::Identical
    } else {
        CompatResult::Superset
    };
    debug!("compute: classified as {result:?}");

    if result == CompatResult::Superset && cpu.match_mode == MatchMode::Strict {
        return Ok(incompatible(format!(
            "Host CPU provides extra features strict matching does not allow: {}",
            feature_names(&diff, catalog, ", ")
        )));
    }

    // Step 5: guest data synthesis.
    let guest_data = if want_guest_data {
        let mut synthesized = host_model.data.clone();
        if cpu.match_mode == MatchMode::Exact {
            synthesized.subtract(&diff);
        }
        synthesized.union_into(&cpu_force.data);
        synthesized.subtract(&cpu_disable.data);
        Some(synthesized)
    } else {
        None
    };

    Ok(ComputeOutcome {
        result,
        guest_data,
        message: None,
    })
}

/// Scans `catalog`'s features in catalog order, greedily accumulating every
/// feature fully contained in the remaining residual and subtracting its
/// bits as it goes. Shared by [`crate::bridge::data_to_cpu`]'s residual
/// rendering and the decoder's `EXPAND_FEATURES` post-processing (spec.md
/// §4.C step 6 / §4.F).
pub(crate) fn greedy_cover(residual: &X86Data, catalog: &X86Map) -> Vec<String> {
    let mut remaining = residual.clone();
    let mut covered = Vec::new();
    for feature in catalog.features() {
        if !feature.data.is_empty() && feature.data.is_subset_of(&remaining) {
            covered.push(feature.name.clone());
            remaining.subtract(&feature.data);
        }
    }
    covered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CpuidSpec;
    use crate::cpudef::{CpuFeature, CpuType, Fallback, Mode};

    fn catalog() -> X86Map {
        let mut builder = X86Map::builder();
        builder.add_vendor("Intel", b"GenuineIntel").unwrap();
        builder
            .add_feature(
                "sse4.2",
                [CpuidSpec {
                    function: 0x1,
                    eax: 0,
                    ebx: 0,
                    ecx: 1 << 20,
                    edx: 0,
                }],
            )
            .unwrap();
        builder
            .add_feature(
                "lm",
                [CpuidSpec {
                    function: 0x8000_0001,
                    eax: 0,
                    ebx: 0,
                    ecx: 0,
                    edx: 1 << 29,
                }],
            )
            .unwrap();
        builder
            .add_feature(
                "avx",
                [CpuidSpec {
                    function: 0x1,
                    eax: 0,
                    ebx: 0,
                    ecx: 1 << 28,
                    edx: 0,
                }],
            )
            .unwrap();
        builder
            .add_feature(
                "svm",
                [CpuidSpec {
                    function: 0x8000_0001,
                    eax: 0,
                    ebx: 0,
                    ecx: 1 << 2,
                    edx: 0,
                }],
            )
            .unwrap();
        builder
            .add_model("Nehalem", None, Some("Intel"), ["sse4.2", "lm"])
            .unwrap();
        builder.build()
    }

    fn base_cpu(model: &str, match_mode: MatchMode) -> CpuDef {
        CpuDef {
            arch: None,
            cpu_type: CpuType::Guest,
            model: Some(model.to_owned()),
            vendor: None,
            match_mode,
            mode: Mode::Custom,
            fallback: Fallback::Allow,
            features: Vec::new(),
        }
    }

    fn host_cpu(model: &str) -> CpuDef {
        CpuDef {
            cpu_type: CpuType::Host,
            vendor: Some("Intel".to_owned()),
            ..base_cpu(model, MatchMode::Exact)
        }
    }

    // S1 — Identical match.
    #[test]
    fn s1_identical_match() {
        let catalog = catalog();
        let host = host_cpu("Nehalem");
        let guest = base_cpu("Nehalem", MatchMode::Exact);
        let outcome = compute(&host, &guest, true, &catalog).unwrap();
        assert_eq!(outcome.result, CompatResult::Identical);
        let nehalem = catalog.find_model("Nehalem").unwrap();
        assert_eq!(outcome.guest_data.unwrap(), nehalem.data);
    }

    // S2 — Missing required feature: host lacks sse4.2.
    #[test]
    fn s2_missing_required_feature() {
        let catalog = catalog();
        let mut host = host_cpu("Nehalem");
        host.model = None;
        host.features.push(CpuFeature::new("lm", Policy::Require));
        let guest = base_cpu("Nehalem", MatchMode::Exact);
        let outcome = compute(&host, &guest, false, &catalog).unwrap();
        assert_eq!(outcome.result, CompatResult::Incompatible);
        assert!(outcome
            .message
            .unwrap()
            .contains("Host CPU does not provide required features: sse4.2"));
    }

    // S3 — Host extras under STRICT vs EXACT matching.
    #[test]
    fn s3_host_extras_strict_vs_exact() {
        let catalog = catalog();
        let mut host = host_cpu("Nehalem");
        host.features.push(CpuFeature::new("avx", Policy::Require));

        let strict_guest = base_cpu("Nehalem", MatchMode::Strict);
        let strict_outcome = compute(&host, &strict_guest, false, &catalog).unwrap();
        assert_eq!(strict_outcome.result, CompatResult::Incompatible);
        assert!(strict_outcome.message.unwrap().contains("avx"));

        let exact_guest = base_cpu("Nehalem", MatchMode::Exact);
        let exact_outcome = compute(&host, &exact_guest, true, &catalog).unwrap();
        assert_eq!(exact_outcome.result, CompatResult::Superset);
        let nehalem = catalog.find_model("Nehalem").unwrap();
        assert_eq!(exact_outcome.guest_data.unwrap(), nehalem.data);
    }

    // S5 — Forbidden feature present on host.
    #[test]
    fn s5_forbidden_feature_present() {
        let catalog = catalog();
        let mut host = host_cpu("Nehalem");
        host.features.push(CpuFeature::new("svm", Policy::Require));
        let mut guest = base_cpu("Nehalem", MatchMode::Exact);
        guest.features.push(CpuFeature::new("svm", Policy::Forbid));
        let outcome = compute(&host, &guest, false, &catalog).unwrap();
        assert_eq!(outcome.result, CompatResult::Incompatible);
        assert!(outcome.message.unwrap().contains("svm"));
    }

    #[test]
    fn vendor_mismatch_is_incompatible() {
        let catalog = catalog();
        let host = host_cpu("Nehalem");
        let mut guest = base_cpu("Nehalem", MatchMode::Exact);
        guest.vendor = Some("AMD".to_owned());
        let outcome = compute(&host, &guest, false, &catalog).unwrap();
        assert_eq!(outcome.result, CompatResult::Incompatible);
    }
}
