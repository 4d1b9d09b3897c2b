// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The in-memory vendor/feature/model registry.
//!
//! The catalog itself never parses a document — it is populated by a
//! visitor-driven [`X86MapBuilder`] that an external XML (or any other
//! format) walker calls once per element, exactly as spec.md §4.B and §6
//! describe. This keeps the catalog parsing-format-agnostic.

use logger::warn;

use crate::data::{Cpuid, X86Data};
use crate::errors::CatalogError;

/// `(name, cpuid)` where `cpuid` is the 12-byte vendor identifier packed
/// into `ebx | edx | ecx` of leaf 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vendor {
    /// Vendor name, unique within a catalog.
    pub name: String,
    /// Leaf-0 vendor-id CPUID entry.
    pub cpuid: Cpuid,
}

/// `(name, data)`. `data` describes which CPUID bits must be set for the
/// feature to be considered present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feature {
    /// Feature name, unique within a catalog.
    pub name: String,
    /// CPUID bits this feature requires.
    pub data: X86Data,
}

/// `(name, vendor, data)`. A model's `data` is the union of its ancestor's
/// data (if any) plus all features it declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    /// Model name, unique within a catalog.
    pub name: String,
    /// The vendor this model declares (inherited from its ancestor unless
    /// overridden), if any.
    pub vendor: Option<String>,
    /// The union of the ancestor model's data (if any) and every declared
    /// feature's data.
    pub data: X86Data,
}

/// One raw `(function, eax, ebx, ecx, edx)` tuple as read from a feature's
/// element list, before it is OR-merged into the feature's data.
#[derive(Debug, Clone, Copy)]
pub struct CpuidSpec {
    /// CPUID function (mandatory).
    pub function: u32,
    /// EAX (defaults to 0 if absent from the source element).
    pub eax: u32,
    /// EBX (defaults to 0 if absent from the source element).
    pub ebx: u32,
    /// ECX (defaults to 0 if absent from the source element).
    pub ecx: u32,
    /// EDX (defaults to 0 if absent from the source element).
    pub edx: u32,
}

/// Owns the three catalog tables. Lookup by name is linear; insertion order
/// is preserved (append) and is observable through [`X86Map::models`]
/// iteration order, the decoder's tie-break, and `feature_names` rendering.
#[derive(Debug, Clone, Default)]
pub struct X86Map {
    vendors: Vec<Vendor>,
    features: Vec<Feature>,
    models: Vec<Model>,
}

impl X86Map {
    /// Starts building a catalog.
    #[must_use]
    pub fn builder() -> X86MapBuilder {
        X86MapBuilder {
            map: Self::default(),
        }
    }

    /// Vendors in catalog (insertion) order.
    #[must_use]
    pub fn vendors(&self) -> &[Vendor] {
        &self.vendors
    }

    /// Features in catalog (insertion) order.
    #[must_use]
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    /// Models in catalog (insertion) order.
    #[must_use]
    pub fn models(&self) -> &[Model] {
        &self.models
    }

    /// Looks up a vendor by name.
    #[must_use]
    pub fn find_vendor(&self, name: &str) -> Option<&Vendor> {
        self.vendors.iter().find(|v| v.name == name)
    }

    /// Looks up a feature by name.
    #[must_use]
    pub fn find_feature(&self, name: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.name == name)
    }

    /// Looks up a model by name.
    #[must_use]
    pub fn find_model(&self, name: &str) -> Option<&Model> {
        self.models.iter().find(|m| m.name == name)
    }

    /// `0`/`1`/error form of "is this named feature present in `data`":
    /// a feature is present when its declared bits are a subset of `data`.
    pub fn has_feature(&self, data: &X86Data, name: &str) -> Result<bool, CatalogError> {
        let feature = self
            .find_feature(name)
            .ok_or_else(|| CatalogError::UnknownFeature(name.to_owned()))?;
        Ok(feature.data.is_subset_of(data))
    }
}

/// Builder populated by a visitor-driven loader. Each `add_*` method
/// corresponds to one of the three callbacks spec.md §4.B and §6 describe:
/// invoked once per catalog element, returning an error rather than a raw
/// `-1`/`0` sentinel (the loader decides whether a [`CatalogError`] is fatal
/// to the whole load or merely causes that one element to be skipped — the
/// catalog itself is always left usable).
#[derive(Debug, Default)]
pub struct X86MapBuilder {
    map: X86Map,
}

impl X86MapBuilder {
    /// Registers a vendor. `id` must be exactly 12 ASCII bytes; they are
    /// packed little-endian into `(ebx, edx, ecx)` of a leaf-0 entry (bytes
    /// `0..4` into `ebx`, `4..8` into `edx`, `8..12` into `ecx`).
    pub fn add_vendor(&mut self, name: &str, id: &[u8]) -> Result<(), CatalogError> {
        if self.map.find_vendor(name).is_some() {
            return Err(CatalogError::DuplicateVendor(name.to_owned()));
        }
        let id: [u8; 12] = id
            .try_into()
            .map_err(|_| CatalogError::InvalidVendorIdLength(name.to_owned(), id.len()))?;
        let ebx = u32::from_le_bytes([id[0], id[1], id[2], id[3]]);
        let edx = u32::from_le_bytes([id[4], id[5], id[6], id[7]]);
        let ecx = u32::from_le_bytes([id[8], id[9], id[10], id[11]]);
        self.map.vendors.push(Vendor {
            name: name.to_owned(),
            cpuid: Cpuid {
                function: 0,
                eax: 0,
                ebx,
                ecx,
                edx,
            },
        });
        Ok(())
    }

    /// Registers a feature. Each `cpuids` tuple is OR-merged into the
    /// feature's data via [`X86Data::add_cpuid`].
    pub fn add_feature(
        &mut self,
        name: &str,
        cpuids: impl IntoIterator<Item = CpuidSpec>,
    ) -> Result<(), CatalogError> {
        if self.map.find_feature(name).is_some() {
            return Err(CatalogError::DuplicateFeature(name.to_owned()));
        }
        let mut data = X86Data::new();
        for spec in cpuids {
            data.add_cpuid(Cpuid {
                function: spec.function,
                eax: spec.eax,
                ebx: spec.ebx,
                ecx: spec.ecx,
                edx: spec.edx,
            });
        }
        self.map.features.push(Feature {
            name: name.to_owned(),
            data,
        });
        Ok(())
    }

    /// Registers a model. If `ancestor` is given it must already be loaded;
    /// its data is deep-copied as the starting point and its vendor is
    /// inherited unless `vendor` overrides it. Every name in `features` must
    /// already be loaded; its data is unioned in.
    pub fn add_model<'a>(
        &mut self,
        name: &str,
        ancestor: Option<&str>,
        vendor: Option<&str>,
        features: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), CatalogError> {
        if self.map.find_model(name).is_some() {
            return Err(CatalogError::DuplicateModel(name.to_owned()));
        }

        let (mut data, mut resolved_vendor) = match ancestor {
            Some(ancestor_name) => {
                let ancestor_model = self
                    .map
                    .find_model(ancestor_name)
                    .ok_or_else(|| CatalogError::UnknownAncestorModel(ancestor_name.to_owned()))?;
                (ancestor_model.data.clone(), ancestor_model.vendor.clone())
            }
            None => (X86Data::new(), None),
        };

        if let Some(vendor_name) = vendor {
            if self.map.find_vendor(vendor_name).is_none() {
                return Err(CatalogError::UnknownVendor(vendor_name.to_owned()));
            }
            resolved_vendor = Some(vendor_name.to_owned());
        }

        for feature_name in features {
            let feature = self
                .map
                .find_feature(feature_name)
                .ok_or_else(|| CatalogError::UnknownFeature(feature_name.to_owned()))?;
            data.union_into(&feature.data);
        }

        self.map.models.push(Model {
            name: name.to_owned(),
            vendor: resolved_vendor,
            data,
        });
        Ok(())
    }

    /// Registers a model, logging and skipping it instead of aborting the
    /// whole load on error. Mirrors the loader-level contract of spec.md
    /// §4.B: "failures during load free the partial element and surface a
    /// structured error; the catalog remains usable."
    pub fn add_model_lenient<'a>(
        &mut self,
        name: &str,
        ancestor: Option<&str>,
        vendor: Option<&str>,
        features: impl IntoIterator<Item = &'a str>,
    ) {
        if let Err(err) = self.add_model(name, ancestor, vendor, features) {
            warn!("discarding malformed model `{name}`: {err}");
        }
    }

    /// Finishes building the catalog.
    #[must_use]
    pub fn build(self) -> X86Map {
        self.map
    }
}
