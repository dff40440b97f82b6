//! End-to-end tests against the built `weft` binary.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::{json, Value};
use tempfile::TempDir;

use weft_core::types::Workflow;
use weft_test_utils::{cyclic_workflow, doubling_workflow, llm_workflow, throwing_workflow};

fn weft(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_weft"))
        .arg("--config")
        .arg(dir.join("weft.toml"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("spawn weft")
}

fn write_workflow(dir: &TempDir, workflow: &Workflow) -> PathBuf {
    let path = dir.path().join(format!("{}.json", workflow.name));
    std::fs::write(&path, serde_json::to_string(workflow).unwrap()).unwrap();
    path
}

fn stdout_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not JSON ({}): {}\nstderr: {}",
            e,
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        )
    })
}

#[test]
fn test_run_with_process_sandbox() {
    let dir = TempDir::new().unwrap();
    let wf = write_workflow(&dir, &doubling_workflow());

    let output = weft(dir.path(), &["run", wf.to_str().unwrap(), "--input", "[1,2,3]"]);
    assert!(output.status.success());

    let result = stdout_json(&output);
    assert_eq!(result["status"], "completed");
    assert_eq!(result["results"]["out"]["output"], json!([2, 4, 6]));
}

#[test]
fn test_run_with_inline_sandbox_and_analytics() {
    let dir = TempDir::new().unwrap();
    let wf = write_workflow(&dir, &throwing_workflow());

    let output = weft(
        dir.path(),
        &["run", wf.to_str().unwrap(), "--inline-sandbox", "--analyze"],
    );
    assert!(output.status.success());

    let body = stdout_json(&output);
    assert_eq!(body["result"]["status"], "partial");
    assert!(body["result"]["results"]["boom"]["error"]
        .as_str()
        .unwrap()
        .contains("kaboom"));
    assert_eq!(body["analytics"]["quality"]["failed_nodes"], 1);
    assert!(body["suggestions"]
        .as_array()
        .unwrap()
        .iter()
        .any(|s| s.as_str().unwrap().contains("Error rate")));
}

#[test]
fn test_run_with_mock_providers() {
    let dir = TempDir::new().unwrap();
    let wf = write_workflow(&dir, &llm_workflow("acme"));

    let output = weft(
        dir.path(),
        &["run", wf.to_str().unwrap(), "--input", "hello", "--mock-providers"],
    );
    assert!(output.status.success());

    let result = stdout_json(&output);
    assert_eq!(result["status"], "completed");
    let answer = result["results"]["out"]["output"].as_str().unwrap();
    assert!(answer.contains("Mock response to: hello"));
}

#[test]
fn test_cycle_exits_nonzero() {
    let dir = TempDir::new().unwrap();
    let wf = write_workflow(&dir, &cyclic_workflow());

    let output = weft(dir.path(), &["run", wf.to_str().unwrap()]);
    assert!(!output.status.success());
    let result = stdout_json(&output);
    assert_eq!(result["status"], "failed");
    assert_eq!(result["results"], json!({}));

    let output = weft(dir.path(), &["validate", wf.to_str().unwrap()]);
    assert!(!output.status.success());
}

#[test]
fn test_validate_prints_order() {
    let dir = TempDir::new().unwrap();
    let wf = write_workflow(&dir, &doubling_workflow());

    let output = weft(dir.path(), &["validate", wf.to_str().unwrap()]);
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("Execution order: in -> double -> out"));
    assert!(text.contains("Level 1: double (npm)"));
}

#[test]
fn test_analyze_saved_result() {
    let dir = TempDir::new().unwrap();
    let wf = write_workflow(&dir, &doubling_workflow());

    let run = weft(
        dir.path(),
        &["run", wf.to_str().unwrap(), "--input", "[5]", "--inline-sandbox"],
    );
    assert!(run.status.success());
    let saved = dir.path().join("result.json");
    std::fs::write(&saved, &run.stdout).unwrap();

    let output = weft(dir.path(), &["analyze", saved.to_str().unwrap()]);
    assert!(output.status.success());
    let body = stdout_json(&output);
    assert_eq!(body["analytics"]["quality"]["total_nodes"], 3);
    assert_eq!(body["analytics"]["quality"]["completed"], true);
}

#[test]
fn test_templates() {
    let dir = TempDir::new().unwrap();

    let list = weft(dir.path(), &["templates"]);
    assert!(list.status.success());
    let text = String::from_utf8_lossy(&list.stdout);
    for name in ["data-transform", "summarize", "enrich"] {
        assert!(text.contains(name));
    }

    let one = weft(dir.path(), &["templates", "summarize"]);
    assert!(one.status.success());
    let wf: Workflow = serde_json::from_slice(&one.stdout).unwrap();
    assert_eq!(wf.name, "summarize");

    let unknown = weft(dir.path(), &["templates", "nope"]);
    assert!(!unknown.status.success());
}

#[test]
fn test_snippet_timeout_in_worker() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("weft.toml"), "[sandbox]\ntimeout_ms = 300\nloop_iteration_limit = 100000000000\n").unwrap();

    let output = weft(
        dir.path(),
        &["snippet", "--package", "lodash", "--code", "while (true) {}"],
    );
    assert!(!output.status.success());
    let outcome = stdout_json(&output);
    assert_eq!(outcome["success"], false);
    assert!(outcome["error"].as_str().unwrap().to_lowercase().contains("timeout"));
}

#[test]
fn test_snippet_not_allowed() {
    let dir = TempDir::new().unwrap();
    let output = weft(dir.path(), &["snippet", "--package", "left-pad"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Package not allowed"));
}
