//! Integration tests for the attr-vae CLI binary.
//!
//! Each test drives the compiled binary against a synthetic dataset in a
//! temporary directory, on the default NdArray backend.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn attr_vae(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_attr-vae"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to spawn attr-vae")
}

fn path_arg(path: &Path) -> &str {
    path.to_str().expect("temp paths are UTF-8")
}

fn write_toml_config(dir: &Path, z_dim: usize) -> PathBuf {
    let path = dir.join("run.toml");
    let toml = format!(
        r#"
name = "cli_test"
hidden_dim = 16
z_dim = {z_dim}
time_step = 6
lr = 0.001
beta = 0.1
batch_size = 4
n_epochs = 3
if_parallel = false
is_adversarial = true
is_class = true
is_res = false
regularization = "tanh_diff"
params_dir = "{}"
"#,
        dir.join("params").display()
    );
    std::fs::write(&path, toml).unwrap();
    path
}

fn generate(dir: &Path) -> PathBuf {
    let data = dir.join("data/music.jsonl");
    let out = attr_vae(&[
        "generate-synthetic",
        "--output",
        path_arg(&data),
        "--count",
        "20",
        "--time-step",
        "6",
        "--seed",
        "7",
    ]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(std::fs::read_to_string(&data).unwrap().lines().count(), 20);
    data
}

// ---------------------------------------------------------------------------
// Test 1: generate -> run (train + evaluate) -> results JSON
// ---------------------------------------------------------------------------

#[test]
fn test_run_command_end_to_end() {
    let tmp = tempfile::TempDir::new().unwrap();
    let data = generate(tmp.path());
    let config = write_toml_config(tmp.path(), 2);
    let results = tmp.path().join("results.json");

    let out = attr_vae(&[
        "run",
        "--config",
        path_arg(&config),
        "--data",
        path_arg(&data),
        "--epochs",
        "1",
        "--output",
        path_arg(&results),
        "--quiet",
    ]);
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    assert!(stdout.contains("Epoch 1 / 1"), "stdout: {stdout}");
    assert!(!stdout.contains("Epoch 2 /"), "--epochs should override the file");
    assert!(stdout.contains("train loss by term:"));
    assert!(stdout.contains("val loss by term:"));
    assert!(stdout.contains("Model saved as"));
    assert!(stdout.contains("Acc:"));
    assert!(stdout.contains("KL:"), "KL gets its own line: {stdout}");
    assert!(stdout.lines().filter(|l| l.starts_with("CE:")).all(|l| l.split_whitespace().count() == 3));
    assert!(stdout.contains("Class acc:"));

    assert!(tmp.path().join("params/cli_test.mpk").exists());
    assert!(tmp.path().join("params/cli_test.meta.json").exists());

    let record: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&results).unwrap()).unwrap();
    assert_eq!(record["config"]["n_epochs"], 1);
    assert_eq!(record["training"]["final_step"], 4);
    assert_eq!(record["evaluation"]["step"], 4);
    assert_eq!(record["evaluation"]["train"]["examples"], 16);
}

// ---------------------------------------------------------------------------
// Test 2: evaluate reuses the checkpoint written by train
// ---------------------------------------------------------------------------

#[test]
fn test_train_then_evaluate() {
    let tmp = tempfile::TempDir::new().unwrap();
    let data = generate(tmp.path());
    let config = write_toml_config(tmp.path(), 2);
    let common = ["--config", path_arg(&config), "--data", path_arg(&data), "--quiet"];

    let mut train = vec!["train", "--epochs", "2"];
    train.extend_from_slice(&common);
    let out = attr_vae(&train);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let results = tmp.path().join("eval.json");
    let mut evaluate = vec!["evaluate", "--output", path_arg(&results)];
    evaluate.extend_from_slice(&common);
    let out = attr_vae(&evaluate);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let record: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&results).unwrap()).unwrap();
    assert!(record["training"].is_null());
    assert_eq!(record["evaluation"]["step"], 8);
    assert_eq!(record["evaluation"]["test"]["examples"], 2);
}

// ---------------------------------------------------------------------------
// Test 3: configuration errors are fatal
// ---------------------------------------------------------------------------

#[test]
fn test_invalid_config_fails() {
    let tmp = tempfile::TempDir::new().unwrap();
    let data = generate(tmp.path());
    let config = write_toml_config(tmp.path(), 0);

    let out = attr_vae(&["train", "--config", path_arg(&config), "--data", path_arg(&data), "--quiet"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("z_dim must be positive"));
}

#[test]
fn test_missing_config_file_fails() {
    let tmp = tempfile::TempDir::new().unwrap();
    let missing = tmp.path().join("nope.json");
    let out = attr_vae(&["evaluate", "--config", path_arg(&missing)]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("reading config"));
}
