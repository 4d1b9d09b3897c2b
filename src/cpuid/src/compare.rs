// Copyright 2022 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The three-way (four-outcome) relation between two models' CPUID data
//! (spec.md §4.D).

use crate::data::X86Data;

/// The outcome of [`compare`]: a symmetric relation between two `X86Data`
/// values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareResult {
    /// `m1` and `m2` have identical bits on every shared leaf.
    Equal,
    /// `m1`'s bits are entirely covered by `m2`, with `m2` carrying strictly
    /// more somewhere.
    Subset,
    /// `m2`'s bits are entirely covered by `m1`, with `m1` carrying strictly
    /// more somewhere.
    Superset,
    /// Neither covers the other.
    Unrelated,
}

impl CompareResult {
    /// Folds a running result with a per-leaf contribution: `Equal` is the
    /// identity, a contribution equal to the running result is absorbed,
    /// and two conflicting non-`Equal` contributions collapse to
    /// `Unrelated`.
    fn fold(self, contribution: Self) -> Self {
        match (self, contribution) {
            (Self::Equal, x) => x,
            (x, Self::Equal) => x,
            (x, y) if x == y => x,
            _ => Self::Unrelated,
        }
    }
}

/// Two-pass walk over `m1` and `m2`'s non-empty leaves (spec.md §4.D):
///
/// 1. Starts at `Equal`.
/// 2. For each non-empty leaf of `m1`: a leaf absent from `m2` contributes
///    `Superset`; an equal leaf contributes nothing; otherwise the leaf
///    contributes `Superset` if `m2`'s leaf is a masked subset of `m1`'s,
///    else `Subset`.
/// 3. Mirrors the walk over `m2` versus `m1`, with `Superset`/`Subset`
///    swapped.
/// 4. Folds every contribution into the running result, short-circuiting to
///    `Unrelated` the moment two contributions disagree.
#[must_use]
pub fn compare(m1: &X86Data, m2: &X86Data) -> CompareResult {
    let mut result = CompareResult::Equal;

    for leaf in m1.iter() {
        let contribution = match m2.lookup(leaf.function) {
            None => CompareResult::Superset,
            Some(other) if other.regs_eq(leaf) => CompareResult::Equal,
            Some(other) if other.covers(leaf) => CompareResult::Superset,
            Some(_) => CompareResult::Subset,
        };
        result = result.fold(contribution);
        if result == CompareResult::Unrelated {
            return result;
        }
    }

    for leaf in m2.iter() {
        let contribution = match m1.lookup(leaf.function) {
            None => CompareResult::Subset,
            Some(other) if other.regs_eq(leaf) => CompareResult::Equal,
            Some(other) if other.covers(leaf) => CompareResult::Subset,
            Some(_) => CompareResult::Superset,
        };
        result = result.fold(contribution);
        if result == CompareResult::Unrelated {
            return result;
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Cpuid;

    fn with(function: u32, bits: u32) -> X86Data {
        let mut data = X86Data::new();
        data.add_cpuid(Cpuid {
            function,
            eax: bits,
            ebx: 0,
            ecx: 0,
            edx: 0,
        });
        data
    }

    #[test]
    fn compare_self_is_equal() {
        let a = with(0x1, 0b1010);
        assert_eq!(compare(&a, &a), CompareResult::Equal);
    }

    #[test]
    fn compare_polarity() {
        let small = with(0x1, 0b0010);
        let big = with(0x1, 0b1010);
        assert_eq!(compare(&big, &small), CompareResult::Superset);
        assert_eq!(compare(&small, &big), CompareResult::Subset);
    }

    #[test]
    fn compare_unrelated_when_leaves_diverge_in_both_directions() {
        let mut a = X86Data::new();
        a.add_cpuid(Cpuid {
            function: 0x1,
            eax: 0b01,
            ebx: 0,
            ecx: 0,
            edx: 0,
        });
        a.add_cpuid(Cpuid {
            function: 0x2,
            eax: 0b11,
            ebx: 0,
            ecx: 0,
            edx: 0,
        });
        let mut b = X86Data::new();
        b.add_cpuid(Cpuid {
            function: 0x1,
            eax: 0b11,
            ebx: 0,
            ecx: 0,
            edx: 0,
        });
        b.add_cpuid(Cpuid {
            function: 0x2,
            eax: 0b01,
            ebx: 0,
            ecx: 0,
            edx: 0,
        });
        assert_eq!(compare(&a, &b), CompareResult::Unrelated);
    }

    #[test]
    fn compare_empty_sets_are_equal() {
        let a = X86Data::new();
        let b = X86Data::new();
        assert_eq!(compare(&a, &b), CompareResult::Equal);
    }
}
