// Copyright 2022 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Conversions between a named model (plus feature list and policy) and
//! CPUID data (spec.md §4.C).

use crate::catalog::{Model, X86Map};
use crate::compute::greedy_cover;
use crate::cpudef::{CpuDef, CpuFeature, CpuType, Policy};
use crate::data::X86Data;
use crate::errors::BridgeError;

/// Builds a [`Model`] from `cpu`'s declared model and features, filtered by
/// `policy` (spec.md §4.C, CPU → Data).
///
/// If `policy == Require`, starts from a copy of the named model (`cpu.model`
/// must resolve); otherwise starts from an empty model, except that a
/// `CpuType::Host` definition with no explicit `policy` filtering returns
/// empty immediately once its model contribution is already accounted for by
/// the `Require` pass — callers build all five non-host policy models from
/// the same `cpu` to get the full picture (spec.md §4.E's `cpu_force`,
/// `cpu_require`, `cpu_optional`, `cpu_disable`, `cpu_forbid`).
///
/// For each feature on `cpu.features`: when `cpu.cpu_type == Guest`, features
/// whose policy does not match `policy` are skipped; when `cpu.cpu_type ==
/// Host`, every feature is included regardless of its (sentinel `None`)
/// policy, since a host's feature list is never filtered by policy.
pub fn model_from_cpu(cpu: &CpuDef, policy: Policy, catalog: &X86Map) -> Result<Model, BridgeError> {
    let mut data = if policy == Policy::Require {
        match &cpu.model {
            Some(name) => {
                let model = catalog
                    .find_model(name)
                    .ok_or_else(|| BridgeError::UnknownModel(name.clone()))?;
                model.data.clone()
            }
            None => X86Data::new(),
        }
    } else {
        X86Data::new()
    };

    let include_feature = |feature: &CpuFeature| match cpu.cpu_type {
        CpuType::Host => true,
        CpuType::Guest => feature.policy == Some(policy),
    };

    for feature in cpu.features.iter().filter(|f| include_feature(f)) {
        let catalog_feature = catalog
            .find_feature(&feature.name)
            .ok_or_else(|| BridgeError::UnknownFeature(feature.name.clone()))?;
        data.union_into(&catalog_feature.data);
    }

    Ok(Model {
        name: cpu.model.clone().unwrap_or_default(),
        vendor: cpu.vendor.clone(),
        data,
    })
}

/// Converts raw CPUID `data`, explained by `model`, back into a [`CpuDef`]
/// (spec.md §4.C, Data → CPU).
///
/// 1. Copies `data` and `model.data`.
/// 2. Strips vendor bits from the data copy via [`data_to_vendor`]; if a
///    vendor matches, its name is recorded on the result.
/// 3. `residual_require = data - model.data`.
/// 4. `residual_disable = model.data - data`.
/// 5. The result is `CpuType::Guest`.
/// 6. Emits features covered by `residual_require` with `Policy::Require`
///    and features covered by `residual_disable` with `Policy::Disable`,
///    using the same greedy feature-covering as the decoder's
///    `EXPAND_FEATURES` rendering.
pub fn data_to_cpu(data: &X86Data, model: &Model, catalog: &X86Map) -> CpuDef {
    let mut data_copy = data.clone();
    let model_data_copy = model.data.clone();

    let vendor = data_to_vendor(&mut data_copy, catalog);

    let residual_require = data_copy.minus(&model_data_copy);
    let residual_disable = model_data_copy.minus(&data_copy);

    let mut features: Vec<CpuFeature> = greedy_cover(&residual_require, catalog)
        .into_iter()
        .map(|name| CpuFeature::new(name, Policy::Require))
        .collect();
    features.extend(
        greedy_cover(&residual_disable, catalog)
            .into_iter()
            .map(|name| CpuFeature::new(name, Policy::Disable)),
    );

    CpuDef {
        arch: None,
        cpu_type: CpuType::Guest,
        model: Some(model.name.clone()),
        vendor,
        match_mode: crate::cpudef::MatchMode::Exact,
        mode: crate::cpudef::Mode::Custom,
        fallback: crate::cpudef::Fallback::Allow,
        features,
    }
}

/// Scans vendors in catalog order; returns the first whose `cpuid` masked-
/// subset-matches the same-function leaf in `data`, clearing those bits from
/// `data` in place. Used to prevent vendor bits from being reported as
/// "features" by [`data_to_cpu`] and the decoder.
pub fn data_to_vendor(data: &mut X86Data, catalog: &X86Map) -> Option<String> {
    let found = catalog.vendors().iter().find(|vendor| {
        match data.lookup(vendor.cpuid.function) {
            Some(leaf) => leaf.covers(&vendor.cpuid),
            None => false,
        }
    })?;
    if let Some(leaf) = data.lookup_mut(found.cpuid.function) {
        leaf.subtract_regs(&found.cpuid);
    }
    Some(found.name.clone())
}

/// Renders every catalog feature fully contained in `data`, in catalog
/// order, joined by `sep`. Used for `compute`'s human-readable
/// incompatibility messages and the decoder's `EXPAND_FEATURES` rendering
/// (via [`crate::compute::greedy_cover`], which this shares its ordering
/// with).
#[must_use]
pub fn feature_names(data: &X86Data, catalog: &X86Map, sep: &str) -> String {
    catalog
        .features()
        .iter()
        .filter(|feature| feature.data.is_subset_of(data) && !feature.data.is_empty())
        .map(|feature| feature.name.as_str())
        .collect::<Vec<_>>()
        .join(sep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CpuidSpec;
    use crate::cpudef::{CpuType, Fallback, MatchMode, Mode};

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
            .add_model("Nehalem", None, Some("Intel"), ["sse4.2", "lm"])
            .unwrap();
        builder.build()
    }

    fn require_cpu(model: &str) -> CpuDef {
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
    fn model_from_cpu_require_copies_named_model() {
        let catalog = catalog();
        let cpu = require_cpu("Nehalem");
        let model = model_from_cpu(&cpu, Policy::Require, &catalog).unwrap();
        let nehalem = catalog.find_model("Nehalem").unwrap();
        assert_eq!(model.data, nehalem.data);
    }

    #[test]
    fn model_from_cpu_non_require_policy_starts_empty() {
        let catalog = catalog();
        let cpu = require_cpu("Nehalem");
        let model = model_from_cpu(&cpu, Policy::Force, &catalog).unwrap();
        assert!(model.data.is_empty());
    }

    #[test]
    fn data_to_cpu_round_trips_with_empty_residual() {
        let catalog = catalog();
        let nehalem = catalog.find_model("Nehalem").unwrap().clone();
        let cpu = data_to_cpu(&nehalem.data, &nehalem, &catalog);
        assert_eq!(cpu.model.as_deref(), Some("Nehalem"));
        assert!(cpu.features_with_policy(Policy::Require).next().is_none());
        assert!(cpu.features_with_policy(Policy::Disable).next().is_none());
    }

    #[test]
    fn data_to_vendor_strips_bits_and_reports_name() {
        let catalog = catalog();
        let mut data = X86Data::new();
        let intel = catalog.find_vendor("Intel").unwrap();
        data.add_cpuid(intel.cpuid);
        let name = data_to_vendor(&mut data, &catalog);
        assert_eq!(name.as_deref(), Some("Intel"));
        assert!(data.is_empty());
    }

    #[test]
    fn feature_names_renders_in_catalog_order() {
        let catalog = catalog();
        let nehalem = catalog.find_model("Nehalem").unwrap();
        assert_eq!(feature_names(&nehalem.data, &catalog, ","), "sse4.2,lm");
    }
}
