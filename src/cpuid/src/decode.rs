// Copyright 2022 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Closest-named-model decoding of raw CPUID data (spec.md §4.F).

use bitflags::bitflags;
use logger::warn;

use crate::bridge::data_to_cpu;
use crate::catalog::X86Map;
use crate::compute::greedy_cover;
use crate::cpudef::{CpuDef, CpuFeature, CpuType, Fallback, Policy};
use crate::data::X86Data;
use crate::errors::DecodeError;

bitflags! {
    /// Decoder behavior flags.
    pub struct DecodeFlags: u32 {
        /// After picking the best candidate, emit every bit of `data` not
        /// explained by the candidate model as explicit `Require` features
        /// (the "explicit-feature-list rendering mode" of spec.md §4.F).
        const EXPAND_FEATURES = 0b01;
    }
}

/// Picks the catalog model that best explains `data`, writing the result
/// into `cpu` (spec.md §4.F).
///
/// Iterates `catalog`'s models in insertion order:
///
/// 1. If `allow_models` is non-empty and the candidate's name is absent from
///    it, the candidate is skipped — unless it equals `preferred`, in which
///    case `cpu.fallback == Fallback::Forbid` makes this a hard
///    [`DecodeError::PreferredModelNotAllowed`] and `Fallback::Allow` just
///    warns and skips.
/// 2. Builds a candidate [`CpuDef`] via [`data_to_cpu`].
/// 3. Skips the candidate if its declared vendor and its data-derived
///    vendor disagree.
/// 4. For a HOST-typed `cpu`: sets the candidate's type to `Host`; skips it
///    entirely if any of its features carry `Policy::Disable`; otherwise
///    erases every feature's policy to `None` (spec.md's sentinel "policy
///    not applicable for host-type CPUs").
/// 5. A candidate whose model name equals `preferred` is accepted
///    immediately.
/// 6. Otherwise the candidate is kept only if it has *strictly* fewer
///    residual features than the current best — ties keep the
///    earlier-inserted candidate (do not change to `>=`).
///
/// If `flags` contains [`DecodeFlags::EXPAND_FEATURES`], the chosen
/// candidate's model is replaced by its residual `Require` feature list
/// instead.
///
/// # Errors
///
/// Returns [`DecodeError::NoSuitableModel`] if every candidate was skipped,
/// or [`DecodeError::PreferredModelNotAllowed`] per step 1 above.
pub fn decode(
    cpu: &mut CpuDef,
    data: &X86Data,
    allow_models: &[String],
    preferred: Option<&str>,
    flags: DecodeFlags,
    catalog: &X86Map,
) -> Result<(), DecodeError> {
    let mut best: Option<CpuDef> = None;
    let mut best_feature_count = usize::MAX;

    for candidate_model in catalog.models() {
        if !allow_models.is_empty() && !allow_models.iter().any(|n| n == &candidate_model.name) {
            if preferred == Some(candidate_model.name.as_str()) {
                if cpu.fallback == Fallback::Forbid {
                    return Err(DecodeError::PreferredModelNotAllowed(
                        candidate_model.name.clone(),
                    ));
                }
                warn!(
                    "preferred model `{}` is not in the allowed list; skipping",
                    candidate_model.name
                );
            }
            continue;
        }

        let mut candidate_cpu = data_to_cpu(data, candidate_model, catalog);

        let derived_vendor_matches = match (&candidate_model.vendor, &candidate_cpu.vendor) {
            (Some(declared), Some(derived)) => declared == derived,
            (None, _) => true,
            (Some(_), None) => false,
        };
        if !derived_vendor_matches {
            continue;
        }

        if cpu.cpu_type == CpuType::Host {
            candidate_cpu.cpu_type = CpuType::Host;
            if candidate_cpu
                .features
                .iter()
                .any(|f| f.policy == Some(Policy::Disable))
            {
                continue;
            }
            for feature in &mut candidate_cpu.features {
                feature.policy = None;
            }
        }

        if candidate_cpu.model.as_deref() == preferred {
            best = Some(candidate_cpu);
            break;
        }

        let feature_count = candidate_cpu.features.len();
        if feature_count < best_feature_count {
            best_feature_count = feature_count;
            best = Some(candidate_cpu);
        }
    }

    let mut chosen = best.ok_or(DecodeError::NoSuitableModel)?;

    if flags.contains(DecodeFlags::EXPAND_FEATURES) {
        if let Some(model_name) = &chosen.model {
            if let Some(model) = catalog.find_model(model_name) {
                let residual = data.minus(&model.data);
                chosen.features = greedy_cover(&residual, catalog)
                    .into_iter()
                    .map(|name| CpuFeature::new(name, Policy::Require))
                    .collect();
            }
        }
    }

    *cpu = chosen;
    Ok(())
}
