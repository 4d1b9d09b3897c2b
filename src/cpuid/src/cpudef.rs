// Copyright 2022 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The narrow `virCPUDef`-equivalent contract (spec.md §6): the CPU
//! definition record every other module consumes and mutates. The crate
//! does not own the *full* generic record used throughout a hypervisor
//! layer — only this slice of it.

use serde::{Deserialize, Serialize};

/// Supported architectures (spec.md §6, "Data format notes").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    /// `i686`.
    I686,
    /// `x86_64`.
    X86_64,
}

/// Whether a [`CpuDef`] describes a host or a guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CpuType {
    /// Describes the physical host CPU.
    Host,
    /// Describes a requested or synthesized guest CPU.
    Guest,
}

/// Per-feature classification on a CPU definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    /// Always include, regardless of the host.
    Force,
    /// The host must provide this feature.
    Require,
    /// Promoted to `Require` or `Disable` depending on the host.
    Optional,
    /// Always exclude.
    Disable,
    /// The host must *not* provide this feature.
    Forbid,
}

/// How strictly a guest must match a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// The host may have more than the guest asks for.
    Minimum,
    /// Ignore host extras when synthesizing guest data.
    Exact,
    /// The host may not have any extras beyond what the guest asks for.
    Strict,
}

/// How a guest model is derived (spec.md §4.G, `update`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// The guest definition is taken as given, with `Optional` features
    /// resolved against the host.
    Custom,
    /// The guest definition is replaced by the host's resolved model.
    HostModel,
    /// The guest definition is replaced wholesale by the host's model, with
    /// `match_mode` forced to `Minimum`.
    HostPassthrough,
}

/// Whether the decoder may fall back past a `preferred` model excluded by
/// the allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fallback {
    /// Skip the excluded preferred model with a warning and keep scanning.
    Allow,
    /// Treat an excluded preferred model as a hard error.
    Forbid,
}

/// One named feature on a [`CpuDef`] and its policy.
///
/// `policy` is `None` only as the decoder's HOST-type sentinel: spec.md
/// §4.F step 4 erases policies on HOST-typed results ("policy not
/// applicable for host-type CPUs"). A `Guest`-typed [`CpuDef`] always has
/// `Some` policy on every feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuFeature {
    /// Feature name; must resolve in the catalog wherever it is consumed.
    pub name: String,
    /// Classification, or `None` for the HOST-type sentinel.
    pub policy: Option<Policy>,
}

impl CpuFeature {
    /// A feature with an explicit policy.
    #[must_use]
    pub fn new(name: impl Into<String>, policy: Policy) -> Self {
        Self {
            name: name.into(),
            policy: Some(policy),
        }
    }
}

/// The CPU definition record (spec.md §6). Callers supply this plus,
/// optionally, raw CPUID data; the engine reads and mutates it through this
/// narrow contract only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuDef {
    /// Target architecture, if constrained.
    pub arch: Option<Arch>,
    /// Host or guest.
    pub cpu_type: CpuType,
    /// Named catalog model this definition is based on, if any.
    pub model: Option<String>,
    /// Named catalog vendor this definition declares, if any.
    pub vendor: Option<String>,
    /// How strictly a guest must match the host.
    pub match_mode: MatchMode,
    /// How the guest model is derived.
    pub mode: Mode,
    /// Whether a preferred-but-excluded model is a hard decode error.
    pub fallback: Fallback,
    /// Explicitly classified features, in addition to `model`.
    pub features: Vec<CpuFeature>,
}

impl CpuDef {
    /// A minimal guest definition requesting `model` with `Require` policy
    /// and no extra features, `match_mode == Exact`.
    #[must_use]
    pub fn guest_requiring(model: impl Into<String>) -> Self {
        Self {
            arch: None,
            cpu_type: CpuType::Guest,
            model: Some(model.into()),
            vendor: None,
            match_mode: MatchMode::Exact,
            mode: Mode::Custom,
            fallback: Fallback::Allow,
            features: Vec::new(),
        }
    }

    /// A host definition resolving to `model` with no extra features.
    #[must_use]
    pub fn host(model: impl Into<String>) -> Self {
        Self {
            arch: None,
            cpu_type: CpuType::Host,
            model: Some(model.into()),
            vendor: None,
            match_mode: MatchMode::Exact,
            mode: Mode::Custom,
            fallback: Fallback::Allow,
            features: Vec::new(),
        }
    }

    /// Features whose policy equals `policy`. Always empty for HOST-typed
    /// definitions, since their features carry `policy: None`.
    pub fn features_with_policy(&self, policy: Policy) -> impl Iterator<Item = &CpuFeature> {
        self.features
            .iter()
            .filter(move |f| f.policy == Some(policy))
    }
}
