// Copyright 2022 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Walks a catalog XML document and feeds [`cpuid::X86MapBuilder`]'s three
//! visitor callbacks (spec.md §4.B / §6's loader contract). This is the
//! "external XML walker" the `cpuid` crate deliberately does not implement
//! itself.
//!
//! Expected document shape (one root `<cpus>` holding any number of
//! `<vendor>`, `<feature>` and `<model>` elements, in the order they should
//! be loaded in):
//!
//! ```xml
//! <cpus>
//!   <vendor name="Intel" string="GenuineIntel"/>
//!   <feature name="sse4.2">
//!     <cpuid eax_in="0x01" ecx="0x00100000"/>
//!   </feature>
//!   <feature name="lm">
//!     <cpuid eax_in="0x80000001" edx="0x20000000"/>
//!   </feature>
//!   <model name="Westmere">
//!     <vendor name="Intel"/>
//!     <feature name="sse4.2"/>
//!   </model>
//!   <model name="Nehalem">
//!     <model name="Westmere"/>
//!     <feature name="lm"/>
//!   </model>
//! </cpus>
//! ```

use cpuid::catalog::CpuidSpec;
use cpuid::{CatalogError, X86Map, X86MapBuilder};
use logger::warn;
use roxmltree::{Document, Node};
use thiserror::Error;

/// Errors walking the XML document itself, as opposed to [`CatalogError`]s
/// raised for individual malformed elements (which are logged and skipped,
/// per spec.md §4.B — they never abort the whole load).
#[derive(Debug, Error)]
pub enum XmlCatalogError {
    /// The document failed to parse as XML at all.
    #[error("failed to parse catalog XML: {0}")]
    Parse(#[from] roxmltree::Error),
    /// The document had no `<cpus>` root element.
    #[error("catalog XML has no `<cpus>` root element")]
    MissingRoot,
}

/// Parses `xml` and loads every `<vendor>`, `<feature>` and `<model>` child
/// of the root `<cpus>` element into a freshly built [`X86Map`], in
/// document order. A malformed individual element is logged via
/// [`logger::warn`] and discarded; the rest of the document still loads.
pub fn load_catalog(xml: &str) -> Result<X86Map, XmlCatalogError> {
    let document = Document::parse(xml)?;
    let root = document
        .descendants()
        .find(|n| n.has_tag_name("cpus"))
        .ok_or(XmlCatalogError::MissingRoot)?;

    let mut builder = X86Map::builder();
    for child in root.children().filter(Node::is_element) {
        match child.tag_name().name() {
            "vendor" => {
                if let Err(err) = load_vendor(&mut builder, child) {
                    warn!("discarding malformed vendor element: {err}");
                }
            }
            "feature" => {
                if let Err(err) = load_feature(&mut builder, child) {
                    warn!("discarding malformed feature element: {err}");
                }
            }
            "model" => {
                if let Err(err) = load_model(&mut builder, child) {
                    warn!("discarding malformed model element: {err}");
                }
            }
            other => warn!("ignoring unrecognized catalog element `<{other}>`"),
        }
    }
    Ok(builder.build())
}

fn required_attr<'a, 'input>(node: Node<'a, 'input>, attr: &str) -> Result<&'input str, CatalogError> {
    node.attribute(attr)
        .ok_or_else(|| CatalogError::MalformedRegister(node.tag_name().name().to_owned(), format!("missing `{attr}`")))
}

fn load_vendor(builder: &mut X86MapBuilder, node: Node) -> Result<(), CatalogError> {
    let name = required_attr(node, "name")?;
    let id = required_attr(node, "string")?;
    builder.add_vendor(name, id.as_bytes())
}

fn parse_hex_reg(node: Node, attr: &str, feature_name: &str) -> Result<u32, CatalogError> {
    match node.attribute(attr) {
        None => Ok(0),
        Some(value) => {
            let trimmed = value.trim_start_matches("0x").trim_start_matches("0X");
            u32::from_str_radix(trimmed, 16)
                .map_err(|_| CatalogError::MalformedRegister(feature_name.to_owned(), value.to_owned()))
        }
    }
}

fn load_feature(builder: &mut X86MapBuilder, node: Node) -> Result<(), CatalogError> {
    let name = required_attr(node, "name")?.to_owned();
    let mut specs = Vec::new();
    for cpuid_node in node.children().filter(|n| n.is_element() && n.has_tag_name("cpuid")) {
        let function_str = required_attr(cpuid_node, "eax_in")?;
        let trimmed = function_str.trim_start_matches("0x").trim_start_matches("0X");
        let function = u32::from_str_radix(trimmed, 16)
            .map_err(|_| CatalogError::MalformedRegister(name.clone(), function_str.to_owned()))?;
        specs.push(CpuidSpec {
            function,
            eax: parse_hex_reg(cpuid_node, "eax", &name)?,
            ebx: parse_hex_reg(cpuid_node, "ebx", &name)?,
            ecx: parse_hex_reg(cpuid_node, "ecx", &name)?,
            edx: parse_hex_reg(cpuid_node, "edx", &name)?,
        });
    }
    builder.add_feature(&name, specs)
}

fn load_model(builder: &mut X86MapBuilder, node: Node) -> Result<(), CatalogError> {
    let name = required_attr(node, "name")?.to_owned();
    let mut ancestor = None;
    let mut vendor = None;
    let mut features = Vec::new();

    for child in node.children().filter(Node::is_element) {
        match child.tag_name().name() {
            "model" => ancestor = Some(required_attr(child, "name")?.to_owned()),
            "vendor" => vendor = Some(required_attr(child, "name")?.to_owned()),
            "feature" => features.push(required_attr(child, "name")?.to_owned()),
            other => warn!("ignoring unrecognized child `<{other}>` of model `{name}`"),
        }
    }

    builder.add_model(
        &name,
        ancestor.as_deref(),
        vendor.as_deref(),
        features.iter().map(String::as_str),
    )
}
