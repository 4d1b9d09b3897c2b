// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The CPUID leaf quartet and the sparse bit-set built on top of it.

use serde::{Deserialize, Serialize};

/// The first extended CPUID function. Basic leaves occupy
/// `[0, CPUX86_EXTENDED)`, extended leaves occupy `[CPUX86_EXTENDED, ..)`.
pub const CPUX86_EXTENDED: u32 = 0x8000_0000;

/// One CPUID leaf: the four output registers for a single `function` input.
///
/// Semantically the four output registers of the `CPUID` instruction for one
/// leaf. A leaf whose four registers are all zero is considered *empty* and
/// is skipped by [`X86Data::iter`] and ignored by subset/union/intersect —
/// a missing leaf and an all-zero leaf are equivalent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cpuid {
    /// The CPUID function (leaf) number this entry belongs to.
    pub function: u32,
    /// EAX output register.
    pub eax: u32,
    /// EBX output register.
    pub ebx: u32,
    /// ECX output register.
    pub ecx: u32,
    /// EDX output register.
    pub edx: u32,
}

impl Cpuid {
    /// A leaf with all registers zeroed for the given function.
    #[must_use]
    pub fn empty(function: u32) -> Self {
        Self {
            function,
            eax: 0,
            ebx: 0,
            ecx: 0,
            edx: 0,
        }
    }

    /// Whether all four registers are zero. `function` does not count:
    /// a zeroed leaf is empty regardless of which function it is slotted at.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.eax == 0 && self.ebx == 0 && self.ecx == 0 && self.edx == 0
    }

    /// Bitwise-ORs `other`'s registers into `self`. `function` is untouched.
    pub fn union_regs(&mut self, other: &Self) {
        self.eax |= other.eax;
        self.ebx |= other.ebx;
        self.ecx |= other.ecx;
        self.edx |= other.edx;
    }

    /// Bitwise-ANDs `self`'s registers with `other`'s. `function` is untouched.
    pub fn intersect_regs(&mut self, other: &Self) {
        self.eax &= other.eax;
        self.ebx &= other.ebx;
        self.ecx &= other.ecx;
        self.edx &= other.edx;
    }

    /// Clears every bit in `self` that is also set in `other` (AND-NOT).
    /// `function` is untouched.
    pub fn subtract_regs(&mut self, other: &Self) {
        self.eax &= !other.eax;
        self.ebx &= !other.ebx;
        self.ecx &= !other.ecx;
        self.edx &= !other.edx;
    }

    /// Whether every bit set in `other` is also set in `self`
    /// (`(self & other) == other`).
    #[must_use]
    pub fn covers(&self, other: &Self) -> bool {
        (self.eax & other.eax) == other.eax
            && (self.ebx & other.ebx) == other.ebx
            && (self.ecx & other.ecx) == other.ecx
            && (self.edx & other.edx) == other.edx
    }

    /// Whether `self` and `other` have identical register values (ignoring
    /// `function`).
    #[must_use]
    pub fn regs_eq(&self, other: &Self) -> bool {
        self.eax == other.eax
            && self.ebx == other.ebx
            && self.ecx == other.ecx
            && self.edx == other.edx
    }
}

/// A sparse bit-set over CPUID leaves, represented as two dense arrays
/// indexed by function: `basic` for `[0, CPUX86_EXTENDED)` and `extended`
/// for `[CPUX86_EXTENDED, ..)`. Both arrays grow only, never shrink, and
/// every stored entry satisfies `entry.function == base + index`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct X86Data {
    basic: Vec<Cpuid>,
    extended: Vec<Cpuid>,
}

/// Which of the two leaf ranges a function falls in, and its offset within
/// that range's backing array.
enum Region {
    Basic(usize),
    Extended(usize),
}

fn region_of(function: u32) -> Region {
    if function >= CPUX86_EXTENDED {
        Region::Extended((function - CPUX86_EXTENDED) as usize)
    } else {
        Region::Basic(function as usize)
    }
}

impl X86Data {
    /// An empty data set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn array_for(&self, region: &Region) -> &Vec<Cpuid> {
        match region {
            Region::Basic(_) => &self.basic,
            Region::Extended(_) => &self.extended,
        }
    }

    fn array_for_mut(&mut self, region: &Region) -> &mut Vec<Cpuid> {
        match region {
            Region::Basic(_) => &mut self.basic,
            Region::Extended(_) => &mut self.extended,
        }
    }

    /// Grows the backing array for `region` so that its index exists,
    /// zero-filling newly materialized slots except for their `function`
    /// field, which is set to the correct leaf number.
    fn ensure(&mut self, function: u32) -> &mut Cpuid {
        let region = region_of(function);
        let index = match region {
            Region::Basic(i) | Region::Extended(i) => i,
        };
        let array = self.array_for_mut(&region);
        if index >= array.len() {
            let base = if matches!(region, Region::Extended(_)) {
                CPUX86_EXTENDED
            } else {
                0
            };
            let old_len = array.len();
            array.resize_with(index + 1, || Cpuid::empty(0));
            for (i, slot) in array.iter_mut().enumerate().skip(old_len) {
                slot.function = base + i as u32;
            }
        }
        &mut array[index]
    }

    /// Returns the stored leaf if present and non-empty.
    #[must_use]
    pub fn lookup(&self, function: u32) -> Option<&Cpuid> {
        let region = region_of(function);
        let index = match region {
            Region::Basic(i) | Region::Extended(i) => i,
        };
        self.array_for(&region)
            .get(index)
            .filter(|leaf| !leaf.is_empty())
    }

    /// Returns a mutable reference to the stored leaf if present and
    /// non-empty, without expanding the backing array.
    pub fn lookup_mut(&mut self, function: u32) -> Option<&mut Cpuid> {
        let region = region_of(function);
        let index = match region {
            Region::Basic(i) | Region::Extended(i) => i,
        };
        let array = self.array_for_mut(&region);
        if index < array.len() && !array[index].is_empty() {
            Some(&mut array[index])
        } else {
            None
        }
    }

    /// Yields all non-empty leaves in order: all basic leaves ascending,
    /// then all extended leaves ascending. Zero leaves are skipped.
    pub fn iter(&self) -> impl Iterator<Item = &Cpuid> {
        self.basic
            .iter()
            .chain(self.extended.iter())
            .filter(|leaf| !leaf.is_empty())
    }

    /// Expands the array if needed so `leaf.function`'s slot exists, then
    /// ORs `leaf`'s registers into that slot.
    pub fn add_cpuid(&mut self, leaf: Cpuid) {
        let slot = self.ensure(leaf.function);
        slot.union_regs(&leaf);
    }

    /// Bitwise-ORs every leaf of `src` into `self`, expanding `self` as
    /// needed.
    pub fn union_into(&mut self, src: &Self) {
        for leaf in src.iter() {
            self.add_cpuid(*leaf);
        }
    }

    /// AND-NOTs every leaf of `src` out of the matching leaf of `self`, but
    /// only over the overlap of the two backing arrays: leaves beyond
    /// `min(len)` are untouched. This means subtracting a leaf not present
    /// in `self` is a no-op, and subtracting from a shorter `self` ignores
    /// `src`'s tail — both are intentional (see DESIGN.md).
    pub fn subtract(&mut self, src: &Self) {
        for (dst_array, src_array) in
            [(&mut self.basic, &src.basic), (&mut self.extended, &src.extended)]
        {
            let n = dst_array.len().min(src_array.len());
            for i in 0..n {
                dst_array[i].subtract_regs(&src_array[i]);
            }
        }
    }

    /// For every non-empty leaf of `self`, ANDs with the same-function leaf
    /// of `src`, or clears it entirely if `src` has no such leaf.
    pub fn intersect_into(&mut self, src: &Self) {
        for array in [&mut self.basic, &mut self.extended] {
            for slot in array.iter_mut() {
                if slot.is_empty() {
                    continue;
                }
                match src.lookup(slot.function) {
                    Some(other) => slot.intersect_regs(other),
                    None => *slot = Cpuid::empty(slot.function),
                }
            }
        }
    }

    /// Whether [`X86Data::iter`] yields nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Whether every non-empty leaf of `self` has a corresponding leaf in
    /// `whole` whose bits cover it. `self` is "part", `whole` is "whole" —
    /// matches spec.md's `is_subset(whole, part)` with the arguments
    /// flipped to a method receiver.
    #[must_use]
    pub fn is_subset_of(&self, whole: &Self) -> bool {
        self.iter()
            .all(|leaf| whole.lookup(leaf.function).map_or(false, |w| w.covers(leaf)))
    }

    /// The union of `self` and `other` as a new value.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut out = self.clone();
        out.union_into(other);
        out
    }

    /// `self` with every bit in `other` cleared, as a new value.
    #[must_use]
    pub fn minus(&self, other: &Self) -> Self {
        let mut out = self.clone();
        out.subtract(other);
        out
    }

    /// The intersection of `self` and `other` as a new value.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Self {
        let mut out = self.clone();
        out.intersect_into(other);
        out
    }
}
