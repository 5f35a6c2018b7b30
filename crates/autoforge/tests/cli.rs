//! Binary-level CLI smoke tests that don't require a real CMake/Ninja/Make toolchain.
//!
//! The `make` builder dispatches through a toolchain named `build_system = "make"`
//! (so the Module Registry resolves it to `MakeBuilder`), but its declared
//! `required_tools` entry for `make` overrides the executable path to `/bin/sh` so
//! these tests don't depend on a real `make`/`Makefile` being present — `compiler_options`
//! then reads as `sh -c '<command>'`.

use assert_cmd::Command;
use predicates::str::contains;
use std::fs;
use std::io::Write;
use tempfile::TempDir;

fn write_solution(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("solution.jsonc");
    let mut f = fs::File::create(&path).unwrap();
    f.write_all(body.as_bytes()).unwrap();
    path
}

fn sample_solution() -> &'static str {
    r#"{
        "solutions": [{
            "name": "demo",
            "projects": [{
                "name": "zephyr",
                "tool_chain": {
                    "name": "host", "architecture": "host",
                    "required_tools": { "make": { "path": "/bin/sh" } },
                    "build_system": "make"
                },
                "configurations": [{
                    "name": "debug",
                    "build_path": "<$ref_BUILD_DIR>",
                    "compiler_options": ["-c", "touch <$ref_BUILD_DIR>/out.bin"],
                    "artifacts": ["<$ref_BUILD_DIR>/out.bin"]
                }]
            }]
        }],
        "variables": [
            { "name": "BUILD_DIR", "value": "build" }
        ]
    }"#
}

#[test]
fn vars_list_prints_expanded_values() {
    let dir = TempDir::new().unwrap();
    let path = write_solution(&dir, sample_solution());

    Command::cargo_bin("autoforge")
        .unwrap()
        .current_dir(dir.path())
        .args(["--config", path.to_str().unwrap(), "vars", "list"])
        .assert()
        .success()
        .stdout(contains("BUILD_DIR = build"));
}

#[test]
fn vars_get_unknown_key_fails_with_generic_exit_code() {
    let dir = TempDir::new().unwrap();
    let path = write_solution(&dir, sample_solution());

    Command::cargo_bin("autoforge")
        .unwrap()
        .current_dir(dir.path())
        .args(["--config", path.to_str().unwrap(), "vars", "get", "MISSING"])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn solution_show_lists_projects_and_configurations() {
    let dir = TempDir::new().unwrap();
    let path = write_solution(&dir, sample_solution());

    Command::cargo_bin("autoforge")
        .unwrap()
        .current_dir(dir.path())
        .args(["--config", path.to_str().unwrap(), "solution", "show"])
        .assert()
        .success()
        .stdout(contains("zephyr"))
        .stdout(contains("debug"));
}

#[test]
fn solution_show_json_emits_machine_readable_tree() {
    let dir = TempDir::new().unwrap();
    let path = write_solution(&dir, sample_solution());

    let output = Command::cargo_bin("autoforge")
        .unwrap()
        .current_dir(dir.path())
        .args(["--config", path.to_str().unwrap(), "--json", "solution", "show"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["name"], "demo");
    assert_eq!(value["projects"][0]["name"], "zephyr");
}

#[test]
fn build_runs_make_backend_and_reports_success() {
    let dir = TempDir::new().unwrap();
    let path = write_solution(&dir, sample_solution());

    Command::cargo_bin("autoforge")
        .unwrap()
        .current_dir(dir.path())
        .args(["--config", path.to_str().unwrap(), "build", "demo", "zephyr", "debug"])
        .assert()
        .success()
        .stdout(contains("succeeded"));

    assert!(dir.path().join("build/out.bin").exists());
}

#[test]
fn build_clean_only_stops_before_artifact_verification() {
    let dir = TempDir::new().unwrap();
    let body = r#"{
        "solutions": [{
            "name": "demo",
            "projects": [{
                "name": "zephyr",
                "tool_chain": {
                    "name": "host", "architecture": "host",
                    "required_tools": { "make": { "path": "/bin/sh" } },
                    "build_system": "make"
                },
                "configurations": [{
                    "name": "debug",
                    "build_path": "build",
                    "compiler_options": ["-c", "exit 1"],
                    "artifacts": ["build/never-created.bin"],
                    "clean": "!true"
                }]
            }]
        }],
        "variables": []
    }"#;
    let path = write_solution(&dir, body);

    Command::cargo_bin("autoforge")
        .unwrap()
        .current_dir(dir.path())
        .args([
            "--config",
            path.to_str().unwrap(),
            "build",
            "demo",
            "zephyr",
            "debug",
            "--clean",
        ])
        .assert()
        .success()
        .stdout(contains("stopped after clean"));
}

#[test]
fn build_missing_artifact_exits_with_code_three() {
    let dir = TempDir::new().unwrap();
    let body = r#"{
        "solutions": [{
            "name": "demo",
            "projects": [{
                "name": "zephyr",
                "tool_chain": {
                    "name": "host", "architecture": "host",
                    "required_tools": { "make": { "path": "/bin/sh" } },
                    "build_system": "make"
                },
                "configurations": [{
                    "name": "debug",
                    "build_path": "build",
                    "compiler_options": ["-c", "true"],
                    "artifacts": ["build/never-created.bin"]
                }]
            }]
        }],
        "variables": []
    }"#;
    let path = write_solution(&dir, body);

    Command::cargo_bin("autoforge")
        .unwrap()
        .current_dir(dir.path())
        .args(["--config", path.to_str().unwrap(), "build", "demo", "zephyr", "debug"])
        .assert()
        .failure()
        .code(3);
}

#[test]
fn build_missing_toolchain_exits_with_code_two() {
    let dir = TempDir::new().unwrap();
    let body = r#"{
        "solutions": [{
            "name": "demo",
            "projects": [{
                "name": "zephyr",
                "tool_chain": {
                    "name": "host", "architecture": "host",
                    "required_tools": { "make": { "path": "/definitely/not/a/real/path-xyz" } },
                    "build_system": "make"
                },
                "configurations": [{
                    "name": "debug",
                    "build_path": "build",
                    "compiler_options": [],
                    "artifacts": []
                }]
            }]
        }],
        "variables": []
    }"#;
    let path = write_solution(&dir, body);

    Command::cargo_bin("autoforge")
        .unwrap()
        .current_dir(dir.path())
        .args(["--config", path.to_str().unwrap(), "build", "demo", "zephyr", "debug"])
        .assert()
        .failure()
        .code(2);
}
