// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
//
// Portions Copyright 2017 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the THIRD-PARTY file.

#![warn(clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::similar_names,
    clippy::missing_errors_doc
)]

//! x86 CPU feature-compatibility engine.
//!
//! Given a host CPU description and a catalog of named vendors, features and
//! models, this crate answers: is a requested guest CPU compatible with a
//! host, what named model plus residual features best describes a raw
//! CPUID dump, what CPUID bits does a named model with per-feature policies
//! produce, and what is the common-denominator CPU across N hosts.
//!
//! The crate is single-threaded and stateless between calls: every
//! top-level operation takes a [`catalog::X86Map`] by reference and returns
//! freshly-owned values. It never touches hardware and never parses a
//! catalog document itself — both of those are external collaborators the
//! crate only ever sees through [`data::X86Data`] and [`catalog::X86MapBuilder`].

/// The sparse per-leaf CPUID bit-set and its algebra (union/intersect/
/// subtract/subset).
pub mod data;

/// The in-memory vendor/feature/model registry and its loader.
pub mod catalog;

/// The narrow `virCPUDef`-equivalent contract the rest of the crate consumes
/// and mutates.
pub mod cpudef;

/// Conversions between a named model (plus policy) and CPUID data.
pub mod bridge;

/// The three-way (subset/equal/superset/unrelated) comparator.
pub mod compare;

/// The host/guest compatibility pipeline.
pub mod compute;

/// Closest-named-model decoding of raw CPUID data.
pub mod decode;

/// Per-policy encoding, N-host baselining, and guest-definition update.
pub mod encode;

/// Error types shared across the above modules.
pub mod errors;

pub use bridge::{data_to_cpu, data_to_vendor, feature_names, model_from_cpu};
pub use catalog::{Feature, Model, Vendor, X86Map, X86MapBuilder};
pub use compare::{compare, CompareResult};
pub use compute::{compute, CompatResult, ComputeOutcome};
pub use cpudef::{Arch, CpuDef, CpuFeature, CpuType, Fallback, MatchMode, Mode, Policy};
pub use data::{Cpuid, X86Data, CPUX86_EXTENDED};
pub use decode::{decode, DecodeFlags};
pub use encode::{baseline, encode, update, EncodeRequest, EncodeResult};
pub use errors::*;
