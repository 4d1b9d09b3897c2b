// Copyright 2022 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Black-box end-to-end coverage of the CLI against the fixture catalog,
//! grounded in the teacher's `Command`-based placement convention
//! (`src/firecracker/tests/integration_tests.rs`).

use std::path::{Path, PathBuf};
use std::process::Command;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_cpu-template-helper"))
}

fn write_json(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn compare_identical_host_and_guest() {
    let output = bin()
        .args(["--catalog"])
        .arg(fixture("catalog.xml"))
        .args(["compare", "--host"])
        .arg(fixture("host.json"))
        .args(["--guest"])
        .arg(fixture("guest.json"))
        .output()
        .expect("failed to run cpu-template-helper");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"Identical\""), "stdout: {stdout}");
}

#[test]
fn decode_names_the_closest_model() {
    // Synthesize a raw-data fixture by round-tripping through `encode` first.
    let encode_output = bin()
        .args(["--catalog"])
        .arg(fixture("catalog.xml"))
        .args(["encode", "--cpu"])
        .arg(fixture("guest.json"))
        .args(["--require"])
        .output()
        .expect("failed to run encode");
    assert!(encode_output.status.success());

    let encoded: serde_json::Value = serde_json::from_slice(&encode_output.stdout).unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let data_path = write_json(&scratch, "nehalem_data.json", &encoded["require"].to_string());

    let decode_output = bin()
        .args(["--catalog"])
        .arg(fixture("catalog.xml"))
        .args(["decode", "--cpu"])
        .arg(fixture("guest.json"))
        .args(["--data"])
        .arg(&data_path)
        .output()
        .expect("failed to run decode");

    assert!(decode_output.status.success(), "stderr: {}", String::from_utf8_lossy(&decode_output.stderr));
    let stdout = String::from_utf8_lossy(&decode_output.stdout);
    assert!(stdout.contains("\"Nehalem\""), "stdout: {stdout}");
}

#[test]
fn unknown_model_is_a_nonzero_exit() {
    let scratch = tempfile::tempdir().unwrap();
    let bad_guest: &Path = &write_json(
        &scratch,
        "bad_guest.json",
        r#"{"arch":null,"cpu_type":"guest","model":"DoesNotExist","vendor":null,"match_mode":"exact","mode":"custom","fallback":"allow","features":[]}"#,
    );

    let output = bin()
        .args(["--catalog"])
        .arg(fixture("catalog.xml"))
        .args(["compare", "--host"])
        .arg(fixture("host.json"))
        .args(["--guest"])
        .arg(bad_guest)
        .output()
        .expect("failed to run cpu-template-helper");

    assert!(!output.status.success());
}
