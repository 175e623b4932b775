// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 blockflow contributors

//! Command-line behaviour

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

const SHELL_PIPELINE: &str = r#"
name: shell-demo
description: Produce a file reference and consume it
blocks:
  - id: produce
    inputs: [TRIGGER]
    outputs: [S3_FILE]
    execution_kind: shell
  - id: consume
    inputs: [S3_FILE]
    outputs: []
    execution_kind: shell
nodes:
  - id: make
    block: produce
    config:
      command: 'echo making; echo "::output {\"kind\":\"S3_FILE\",\"payload\":\"s3://demo/out.csv\"}"'
  - id: use
    block: consume
    config:
      command: 'echo "got $BLOCKFLOW_INPUT_0"; test "$BLOCKFLOW_INPUT_0" = "\"s3://demo/out.csv\""'
edges:
  - source: make
    target: use
"#;

const INCOMPATIBLE_PIPELINE: &str = r#"
name: bad
nodes:
  - id: data
    block: extract
  - id: load
    block: db_load
  - id: score
    block: predict
  - id: files
    block: extract
edges:
  - { source: data, target: load }
  - { source: load, target: score, input: 0 }
  - { source: files, target: score, input: 1 }
"#;

fn blockflow() -> Command {
    let mut cmd = Command::cargo_bin("blockflow").unwrap();
    cmd.env("NO_COLOR", "1").env("RUST_LOG", "off");
    cmd
}

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn validate_accepts_a_valid_pipeline() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "pipeline.yaml", SHELL_PIPELINE);

    blockflow()
        .arg("validate")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Pipeline is valid!"));
}

#[test]
fn validate_reports_incompatible_edges_with_a_fix() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "pipeline.yaml", INCOMPATIBLE_PIPELINE);

    blockflow()
        .arg("validate")
        .arg(&path)
        .assert()
        .failure()
        .stdout(predicate::str::contains("edge 'load.0->score.0'"))
        .stdout(predicate::str::contains("DB_TABLE"))
        .stdout(predicate::str::contains("conversion block"));
}

#[test]
fn validate_missing_file_fails() {
    let dir = TempDir::new().unwrap();

    blockflow()
        .arg("validate")
        .arg(dir.path().join("nope.yaml"))
        .assert()
        .failure();
}

#[test]
fn graph_renders_mermaid() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "pipeline.yaml", SHELL_PIPELINE);

    blockflow()
        .args(["graph", "--format", "mermaid"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::starts_with("graph TD"))
        .stdout(predicate::str::contains("make -->|S3_FILE| use"));
}

#[test]
fn blocks_lists_the_catalog() {
    blockflow()
        .arg("blocks")
        .assert()
        .success()
        .stdout(predicate::str::contains("db_unload"))
        .stdout(predicate::str::contains("DB_TABLE -> S3_FILE"));

    blockflow()
        .args(["blocks", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"execution_kind\": \"model_training\""));
}

#[test]
fn run_executes_shell_blocks_and_passes_metadata() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "pipeline.yaml", SHELL_PIPELINE);

    blockflow()
        .args(["run", "--verbose"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("got \"s3://demo/out.csv\""))
        .stdout(predicate::str::contains("SUCCESS"));
}

#[test]
fn run_reports_failure_and_skips() {
    let dir = TempDir::new().unwrap();
    let pipeline = SHELL_PIPELINE.replace("echo making;", "echo broken >&2; exit 4;");
    let path = write(&dir, "pipeline.yaml", &pipeline);

    blockflow()
        .arg("run")
        .arg(&path)
        .assert()
        .failure()
        .stdout(predicate::str::contains("broken"))
        .stdout(predicate::str::contains("upstream node 'make' failed"))
        .stdout(predicate::str::contains("FAILED"));
}

#[test]
fn run_dry_run_prints_plan_only() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "pipeline.yaml", SHELL_PIPELINE);

    blockflow()
        .args(["run", "--dry-run"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("1. make (produce: TRIGGER -> S3_FILE)"))
        .stdout(predicate::str::contains("2. use (consume: S3_FILE -> ()) [depends: make]"))
        .stdout(predicate::str::contains("Dry run"));
}

#[test]
fn run_refuses_kinds_without_executor() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "pipeline.yaml",
        "name: etl\nnodes:\n  - { id: e, block: extract }\n  - { id: l, block: load }\nedges:\n  - { source: e, target: l }\n",
    );

    blockflow()
        .arg("run")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Missing executors"));
}

#[test]
fn run_rejects_bad_config() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "pipeline.yaml", SHELL_PIPELINE);
    let config = write(&dir, "blockflow.toml", "max_in_flight = 0\n");

    blockflow()
        .arg("run")
        .arg(&path)
        .arg("--config")
        .arg(&config)
        .assert()
        .failure();
}
