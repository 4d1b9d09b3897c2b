// Copyright 2022 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-policy encoding, N-host baselining, and guest-definition update
//! (spec.md §4.G).

use logger::{debug, warn};
use serde::Serialize;

use crate::bridge::model_from_cpu;
use crate::catalog::X86Map;
use crate::cpudef::{CpuDef, CpuFeature, CpuType, Fallback, MatchMode, Mode, Policy};
use crate::data::X86Data;
use crate::decode::{decode, DecodeFlags};
use crate::errors::{BaselineError, EncodeError, UpdateError};

/// Which per-policy outputs [`encode`] should produce.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncodeRequest {
    /// Emit the `Force` policy model's data.
    pub force: bool,
    /// Emit the `Require` policy model's data.
    pub require: bool,
    /// Emit the `Optional` policy model's data.
    pub optional: bool,
    /// Emit the `Disable` policy model's data.
    pub disable: bool,
    /// Emit the `Forbid` policy model's data.
    pub forbid: bool,
    /// Emit a single-leaf `X86Data` holding `cpu.vendor`'s `Cpuid`, if it
    /// resolves.
    pub vendor: bool,
}

/// The per-policy `X86Data` outputs requested by an [`EncodeRequest`]. Each
/// field is populated only if the corresponding request flag was set.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EncodeResult {
    /// `Force` policy data.
    pub force: Option<X86Data>,
    /// `Require` policy data.
    pub require: Option<X86Data>,
    /// `Optional` policy data.
    pub optional: Option<X86Data>,
    /// `Disable` policy data.
    pub disable: Option<X86Data>,
    /// `Forbid` policy data.
    pub forbid: Option<X86Data>,
    /// Single-leaf vendor data, if requested and `cpu.vendor` resolved.
    pub vendor: Option<X86Data>,
}

/// Produces per-policy `X86Data` for `cpu` (spec.md §4.G, Encode).
///
/// For each flag set on `request`, calls [`model_from_cpu`] with the
/// matching [`Policy`] and takes its data. Any requested output that fails
/// to resolve aborts the whole call — partial results are dropped with it,
/// since they are only ever owned locally until the final `Ok`.
///
/// # Errors
///
/// Returns [`EncodeError`] if a named model/feature referenced by `cpu`
/// does not resolve in `catalog`.
pub fn encode(cpu: &CpuDef, request: EncodeRequest, catalog: &X86Map) -> Result<EncodeResult, EncodeError> {
    let mut result = EncodeResult::default();

    if request.force {
        result.force = Some(model_from_cpu(cpu, Policy::Force, catalog)?.data);
    }
    if request.require {
        result.require = Some(model_from_cpu(cpu, Policy::Require, catalog)?.data);
    }
    if request.optional {
        result.optional = Some(model_from_cpu(cpu, Policy::Optional, catalog)?.data);
    }
    if request.disable {
        result.disable = Some(model_from_cpu(cpu, Policy::Disable, catalog)?.data);
    }
    if request.forbid {
        result.forbid = Some(model_from_cpu(cpu, Policy::Forbid, catalog)?.data);
    }
    if request.vendor {
        if let Some(vendor_name) = &cpu.vendor {
            if let Some(vendor) = catalog.find_vendor(vendor_name) {
                let mut data = X86Data::new();
                data.add_cpuid(vendor.cpuid);
                result.vendor = Some(data);
            }
        }
    }

    Ok(result)
}

/// Computes the common-denominator CPU definition across `cpus` (spec.md
/// §4.G, Baseline).
///
/// 1. Builds `base_model` from `cpus[0]`'s `Require` features; remembers
///    `cpus[0].vendor`.
/// 2. For each subsequent cpu: builds its model, verifies its declared
///    vendor (if any) matches its own model's declared vendor, maintains a
///    running vendor (first non-null wins; later non-nulls must agree, else
///    [`BaselineError::VendorMismatch`]), and intersects its data into
///    `base_model`.
/// 3. An empty `base_model` at the end is [`BaselineError::Incompatible`].
/// 4. If a running vendor survived, its leaf is injected back into the
///    merged data.
/// 5. [`crate::decode::decode`] names the result; `arch` is cleared on the
///    output, and the vendor is suppressed if any input lacked one.
///
/// # Errors
///
/// Returns [`BaselineError`] per the steps above, or if `cpus` is empty.
pub fn baseline(
    cpus: &[CpuDef],
    allow_models: &[String],
    flags: DecodeFlags,
    catalog: &X86Map,
) -> Result<CpuDef, BaselineError> {
    let (first, rest) = cpus.split_first().ok_or(BaselineError::Incompatible)?;

    let mut merged = model_from_cpu(first, Policy::Require, catalog)?.data;
    let mut running_vendor = first.vendor.clone();
    let mut every_input_has_vendor = first.vendor.is_some();

    for cpu in rest {
        let model = model_from_cpu(cpu, Policy::Require, catalog)?;
        if let Some(declared) = &cpu.vendor {
            if model.vendor.as_deref() != Some(declared.as_str()) {
                return Err(BaselineError::VendorDoesNotMatchModel(declared.clone()));
            }
        } else {
            every_input_has_vendor = false;
        }

        match (&running_vendor, &cpu.vendor) {
            (None, Some(v)) => running_vendor = Some(v.clone()),
            (Some(running), Some(v)) if running != v => {
                return Err(BaselineError::VendorMismatch);
            }
            _ => {}
        }

        merged.intersect_into(&model.data);
    }

    if merged.is_empty() {
        return Err(BaselineError::Incompatible);
    }

    if let Some(vendor_name) = &running_vendor {
        if let Some(vendor) = catalog.find_vendor(vendor_name) {
            merged.add_cpuid(vendor.cpuid);
        }
    }

    let mut result = CpuDef {
        arch: None,
        cpu_type: CpuType::Guest,
        model: None,
        vendor: None,
        match_mode: MatchMode::Exact,
        mode: Mode::Custom,
        fallback: Fallback::Allow,
        features: Vec::new(),
    };
    decode(&mut result, &merged, allow_models, None, flags, catalog)?;
    result.arch = None;
    if !every_input_has_vendor {
        result.vendor = None;
    }

    debug!("baseline: resolved to model {:?}", result.model);
    Ok(result)
}

/// Rewrites `guest` against `host` according to `guest.mode` (spec.md §4.G,
/// Update).
///
/// - `Mode::Custom`: builds `host_model`'s `Require` data. Every `Optional`
///   feature on `guest` is promoted to `Require` if the host provides it,
///   else `Disable`. If `guest.match_mode == MatchMode::Minimum`, the
///   guest's own footprint is subtracted from `host_model`'s data and the
///   remaining host bits are emitted as additional `Require` features, with
///   `match_mode` forced to `Exact`.
/// - `Mode::HostModel`: the guest's existing feature names and policies are
///   preserved, the model is replaced by the host's, and the saved features
///   are reapplied with their original policies.
/// - `Mode::HostPassthrough`: the guest's model is replaced wholesale by the
///   host's, with `match_mode` forced to `Minimum`.
///
/// # Errors
///
/// Returns [`UpdateError`] if a named model/feature on `host` or `guest`
/// does not resolve in `catalog`.
pub fn update(guest: &mut CpuDef, host: &CpuDef, catalog: &X86Map) -> Result<(), UpdateError> {
    match guest.mode {
        Mode::Custom => update_custom(guest, host, catalog),
        Mode::HostModel => update_host_model(guest, host, catalog),
        Mode::HostPassthrough => update_host_passthrough(guest, host, catalog),
    }
}

fn update_custom(guest: &mut CpuDef, host: &CpuDef, catalog: &X86Map) -> Result<(), UpdateError> {
    let host_model = model_from_cpu(host, Policy::Require, catalog)?;

    for feature in &mut guest.features {
        if feature.policy != Some(Policy::Optional) {
            continue;
        }
        let provided = catalog
            .find_feature(&feature.name)
            .ok_or_else(|| UpdateError::Bridge(crate::errors::BridgeError::UnknownFeature(feature.name.clone())))?
            .data
            .is_subset_of(&host_model.data);
        feature.policy = Some(if provided { Policy::Require } else { Policy::Disable });
    }

    if guest.match_mode == MatchMode::Minimum {
        let guest_model = model_from_cpu(guest, Policy::Require, catalog)?;
        let remaining = host_model.data.minus(&guest_model.data);
        let additional = crate::compute::greedy_cover(&remaining, catalog);
        for name in additional {
            guest.features.push(CpuFeature::new(name, Policy::Require));
        }
        guest.match_mode = MatchMode::Exact;
    }

    Ok(())
}

fn update_host_model(guest: &mut CpuDef, host: &CpuDef, catalog: &X86Map) -> Result<(), UpdateError> {
    // Validate the saved features still resolve before committing anything.
    for feature in &guest.features {
        if catalog.find_feature(&feature.name).is_none() {
            return Err(UpdateError::Bridge(crate::errors::BridgeError::UnknownFeature(
                feature.name.clone(),
            )));
        }
    }
    if let Some(name) = &host.model {
        if catalog.find_model(name).is_none() {
            return Err(UpdateError::Bridge(crate::errors::BridgeError::UnknownModel(name.clone())));
        }
    }

    guest.model = host.model.clone();
    guest.vendor = host.vendor.clone();
    Ok(())
}

fn update_host_passthrough(guest: &mut CpuDef, host: &CpuDef, catalog: &X86Map) -> Result<(), UpdateError> {
    if let Some(name) = &host.model {
        if catalog.find_model(name).is_none() {
            return Err(UpdateError::Bridge(crate::errors::BridgeError::UnknownModel(name.clone())));
        }
    }
    guest.model = host.model.clone();
    guest.vendor = host.vendor.clone();
    guest.features.clear();
    guest.match_mode = MatchMode::Minimum;
    warn!("host-passthrough update: guest {:?} now mirrors host verbatim", guest.model);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CpuidSpec;
    use crate::cpudef::{CpuFeature, CpuType};

    fn catalog() -> X86Map {
        let mut builder = X86Map::builder();
        builder.add_vendor("Intel", b"GenuineIntel").unwrap();
        builder.add_vendor("AMD", b"AuthenticAMD").unwrap();
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
                "aes",
                [CpuidSpec {
                    function: 0x1,
                    eax: 0,
                    ebx: 0,
                    ecx: 1 << 25,
                    edx: 0,
                }],
            )
            .unwrap();
        builder
            .add_model("Nehalem", None, Some("Intel"), ["sse4.2", "lm"])
            .unwrap();
        builder.build()
    }

    fn base_cpu(model: &str) -> CpuDef {
        CpuDef {
            arch: None,
            cpu_type: CpuType::Guest,
            model: Some(model.to_owned()),
            vendor: None,
            match_mode: MatchMode::Exact,
            mode: Mode::Custom,
            fallback: Fallback::Allow,
            features: Vec::new(),
        }
    }

    #[test]
    fn encode_emits_only_requested_policies() {
        let catalog = catalog();
        let cpu = base_cpu("Nehalem");
        let request = EncodeRequest {
            require: true,
            ..Default::default()
        };
        let result = encode(&cpu, request, &catalog).unwrap();
        assert!(result.require.is_some());
        assert!(result.force.is_none());
        assert!(result.vendor.is_none());
    }

    #[test]
    fn encode_emits_vendor_leaf_when_resolved() {
        let catalog = catalog();
        let mut cpu = base_cpu("Nehalem");
        cpu.vendor = Some("Intel".to_owned());
        let request = EncodeRequest {
            vendor: true,
            ..Default::default()
        };
        let result = encode(&cpu, request, &catalog).unwrap();
        let vendor_data = result.vendor.unwrap();
        let intel = catalog.find_vendor("Intel").unwrap();
        assert_eq!(vendor_data.lookup(0).unwrap(), &intel.cpuid);
    }

    // S6 — Baseline of two hosts.
    #[test]
    fn s6_baseline_of_two_hosts() {
        let catalog = catalog();
        let mut a = base_cpu("Nehalem");
        a.cpu_type = CpuType::Host;
        a.vendor = Some("Intel".to_owned());
        a.features.push(CpuFeature::new("avx", Policy::Require));
        let mut b = base_cpu("Nehalem");
        b.cpu_type = CpuType::Host;
        b.vendor = Some("Intel".to_owned());
        b.features.push(CpuFeature::new("aes", Policy::Require));

        let result = baseline(&[a, b], &[], DecodeFlags::empty(), &catalog).unwrap();
        assert_eq!(result.model.as_deref(), Some("Nehalem"));
        assert_eq!(result.vendor.as_deref(), Some("Intel"));
        assert!(result.features.is_empty());
        assert!(result.arch.is_none());
    }

    #[test]
    fn baseline_commutative_modulo_order() {
        let catalog = catalog();
        let mut a = base_cpu("Nehalem");
        a.cpu_type = CpuType::Host;
        a.vendor = Some("Intel".to_owned());
        let mut b = base_cpu("Nehalem");
        b.cpu_type = CpuType::Host;
        b.vendor = Some("Intel".to_owned());

        let ab = baseline(&[a.clone(), b.clone()], &[], DecodeFlags::empty(), &catalog).unwrap();
        let ba = baseline(&[b, a], &[], DecodeFlags::empty(), &catalog).unwrap();
        assert_eq!(ab.model, ba.model);
        assert_eq!(ab.vendor, ba.vendor);
    }

    #[test]
    fn baseline_mismatched_vendors_is_an_error() {
        let catalog = catalog();
        let mut a = base_cpu("Nehalem");
        a.cpu_type = CpuType::Host;
        a.vendor = Some("Intel".to_owned());
        let mut b = base_cpu("Nehalem");
        b.cpu_type = CpuType::Host;
        b.vendor = Some("AMD".to_owned());

        let result = baseline(&[a, b], &[], DecodeFlags::empty(), &catalog);
        assert!(matches!(result, Err(BaselineError::VendorMismatch)));
    }

    #[test]
    fn baseline_disjoint_inputs_is_incompatible() {
        let catalog = catalog();
        let mut a = base_cpu("Nehalem");
        a.cpu_type = CpuType::Host;
        a.model = None;
        a.features.push(CpuFeature::new("avx", Policy::Require));
        let mut b = base_cpu("Nehalem");
        b.cpu_type = CpuType::Host;
        b.model = None;
        b.features.push(CpuFeature::new("aes", Policy::Require));

        let result = baseline(&[a, b], &[], DecodeFlags::empty(), &catalog);
        assert!(matches!(result, Err(BaselineError::Incompatible)));
    }

    // S4 — Vendor bit on host-passthrough.
    #[test]
    fn s4_host_passthrough_mirrors_host() {
        let catalog = catalog();
        let mut host = base_cpu("Nehalem");
        host.cpu_type = CpuType::Host;
        host.vendor = Some("Intel".to_owned());

        let mut guest = base_cpu("Nehalem");
        guest.mode = Mode::HostPassthrough;

        update(&mut guest, &host, &catalog).unwrap();
        assert_eq!(guest.model.as_deref(), Some("Nehalem"));
        assert_eq!(guest.vendor.as_deref(), Some("Intel"));
        assert_eq!(guest.match_mode, MatchMode::Minimum);
        assert!(guest.features.is_empty());
    }

    #[test]
    fn update_custom_promotes_optional_feature_when_host_provides_it() {
        let catalog = catalog();
        let mut host = base_cpu("Nehalem");
        host.cpu_type = CpuType::Host;
        host.features.push(CpuFeature::new("avx", Policy::Require));

        let mut guest = base_cpu("Nehalem");
        guest.features.push(CpuFeature::new("avx", Policy::Optional));
        guest.features.push(CpuFeature::new("aes", Policy::Optional));

        update(&mut guest, &host, &catalog).unwrap();
        let avx = guest.features.iter().find(|f| f.name == "avx").unwrap();
        let aes = guest.features.iter().find(|f| f.name == "aes").unwrap();
        assert_eq!(avx.policy, Some(Policy::Require));
        assert_eq!(aes.policy, Some(Policy::Disable));
    }

    #[test]
    fn update_custom_minimum_match_emits_remaining_host_bits_and_forces_exact() {
        let catalog = catalog();
        let mut host = base_cpu("Nehalem");
        host.cpu_type = CpuType::Host;
        host.features.push(CpuFeature::new("avx", Policy::Require));

        let mut guest = base_cpu("Nehalem");
        guest.match_mode = MatchMode::Minimum;

        update(&mut guest, &host, &catalog).unwrap();
        assert_eq!(guest.match_mode, MatchMode::Exact);
        assert!(guest
            .features
            .iter()
            .any(|f| f.name == "avx" && f.policy == Some(Policy::Require)));
    }

    #[test]
    fn update_host_model_preserves_feature_policies_under_new_model() {
        let catalog = catalog();
        let mut host = base_cpu("Nehalem");
        host.cpu_type = CpuType::Host;
        host.vendor = Some("Intel".to_owned());

        let mut guest = base_cpu("Nehalem");
        guest.mode = Mode::HostModel;
        guest.features.push(CpuFeature::new("avx", Policy::Disable));

        update(&mut guest, &host, &catalog).unwrap();
        assert_eq!(guest.model.as_deref(), Some("Nehalem"));
        assert_eq!(guest.vendor.as_deref(), Some("Intel"));
        assert_eq!(
            guest.features,
            vec![CpuFeature::new("avx", Policy::Disable)]
        );
    }
}
