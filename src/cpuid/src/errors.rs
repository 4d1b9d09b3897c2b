// Copyright 2022 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Error types shared across the catalog, bridge, comparator and pipeline
//! modules. Compatibility outcomes (`INCOMPATIBLE`, `SUPERSET`, ...) are
//! *not* errors — spec.md §7 treats them as a structured result with a
//! human-readable `message`, carried by [`crate::compute::ComputeOutcome`]
//! instead of a `Result::Err`.

use thiserror::Error;

/// Catalog-construction errors (spec.md §7, "Catalog error"): malformed
/// element, duplicate name, or unresolved reference. The loader decides
/// whether to treat one of these as fatal to the whole load or to discard
/// just the offending element and continue — the catalog itself never ends
/// up in a partially-constructed, unusable state either way.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    /// A vendor with this name was already registered.
    #[error("duplicate vendor name: {0}")]
    DuplicateVendor(String),
    /// A feature with this name was already registered.
    #[error("duplicate feature name: {0}")]
    DuplicateFeature(String),
    /// A model with this name was already registered.
    #[error("duplicate model name: {0}")]
    DuplicateModel(String),
    /// A vendor id string was not exactly 12 bytes.
    #[error("vendor `{0}` has an id of length {1}, expected 12")]
    InvalidVendorIdLength(String, usize),
    /// A model's `ancestor="..."` did not name an already-loaded model.
    #[error("unknown ancestor model: {0}")]
    UnknownAncestorModel(String),
    /// A model's `vendor="..."` did not name an already-loaded vendor.
    #[error("unknown vendor: {0}")]
    UnknownVendor(String),
    /// A model's `<feature name="...">` did not name an already-loaded
    /// feature, or a lookup (e.g. `has_feature`) named an unknown feature.
    #[error("unknown feature: {0}")]
    UnknownFeature(String),
    /// A CPUID register in a feature's element list was present but not
    /// valid hexadecimal.
    #[error("malformed register value for feature `{0}`: {1}")]
    MalformedRegister(String, String),
}

/// Errors from the model ↔ CPU-definition bridge (component C).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    /// `cpu.model` did not resolve in the catalog.
    #[error("unknown CPU model: {0}")]
    UnknownModel(String),
    /// A feature named on the CPU definition did not resolve in the
    /// catalog.
    #[error("unknown CPU feature: {0}")]
    UnknownFeature(String),
}

/// Errors from [`crate::decode::decode`] (component F).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// No candidate model in the catalog was acceptable.
    #[error("cannot find suitable CPU model for given data")]
    NoSuitableModel,
    /// `preferred` named a model excluded by `allow_models` while
    /// `cpu.fallback == Fallback::Forbid`.
    #[error("preferred model `{0}` is not in the allowed list and fallback is forbidden")]
    PreferredModelNotAllowed(String),
    /// A model/feature lookup failed while evaluating a candidate.
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Errors from [`crate::encode::encode`] (component G).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EncodeError {
    /// A model/feature lookup failed while building one of the requested
    /// policy outputs.
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Errors from [`crate::encode::baseline`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BaselineError {
    /// Two input hosts declared different vendors.
    #[error("CPU vendors do not match")]
    VendorMismatch,
    /// A host's declared vendor did not match its own resolved model's
    /// vendor.
    #[error("CPU vendor {0} does not match model vendor")]
    VendorDoesNotMatchModel(String),
    /// The intersection of every host's data was empty.
    #[error("CPUs are incompatible")]
    Incompatible,
    /// A model/feature lookup failed while building a host's model.
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    /// Naming the merged result via `decode` failed.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Errors from [`crate::encode::update`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpdateError {
    /// A model/feature lookup failed while resolving the host or guest
    /// model.
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}
