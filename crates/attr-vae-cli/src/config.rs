//! Run configuration for the CLI.
//!
//! Reads a JSON (or TOML, by extension) file holding the model shape, the
//! optimizer settings and the feature flags, then merges CLI overrides and
//! lowers everything into the library's burn configs.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use attr_vae::model::vae::AttrVaeConfig;
use attr_vae::training::checkpoint::CheckpointPaths;
use attr_vae::training::loss::BetaSchedule;
use attr_vae::{RegularizationStrategy, TrainingConfig, VaeError};

fn default_adv_step_cap() -> usize {
    5000
}

fn default_adv_weight_cap() -> f64 {
    0.15
}

fn default_max_grad_norm() -> f64 {
    1.0
}

fn default_eval_batch_size() -> usize {
    128
}

fn default_shuffle_seed() -> u64 {
    42
}

fn default_params_dir() -> PathBuf {
    PathBuf::from("params")
}

/// Every option a run reads at startup.
///
/// The first block of fields is required; the rest fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Checkpoint identifier.
    pub name: String,
    pub hidden_dim: usize,
    pub z_dim: usize,
    pub time_step: usize,
    pub lr: f64,
    /// KL weight.
    pub beta: f64,
    pub batch_size: usize,
    pub n_epochs: usize,
    /// Accepted for compatibility; runs stay on a single device.
    pub if_parallel: bool,
    pub is_adversarial: bool,
    pub is_class: bool,
    pub is_res: bool,

    #[serde(default)]
    pub regularization: RegularizationStrategy,
    /// Linear KL warm-up length; constant beta when absent.
    #[serde(default)]
    pub beta_anneal_steps: Option<usize>,
    #[serde(default = "default_adv_step_cap")]
    pub adv_step_cap: usize,
    #[serde(default = "default_adv_weight_cap")]
    pub adv_weight_cap: f64,
    #[serde(default = "default_max_grad_norm")]
    pub max_grad_norm: f64,
    #[serde(default = "default_eval_batch_size")]
    pub eval_batch_size: usize,
    #[serde(default)]
    pub split_seed: u64,
    #[serde(default = "default_shuffle_seed")]
    pub shuffle_seed: u64,
    #[serde(default = "default_params_dir")]
    pub params_dir: PathBuf,
    /// JSONL dataset path.
    #[serde(default)]
    pub data: Option<PathBuf>,
}

/// Values given on the command line, which win over the file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub epochs: Option<usize>,
    pub batch_size: Option<usize>,
    pub lr: Option<f64>,
    pub data: Option<PathBuf>,
    pub params_dir: Option<PathBuf>,
}

impl RunConfig {
    /// Parse a config string; `toml` selects TOML, otherwise JSON.
    pub fn parse(contents: &str, toml: bool) -> anyhow::Result<Self> {
        let config = if toml {
            toml::from_str(contents)?
        } else {
            serde_json::from_str(contents)?
        };
        Ok(config)
    }

    /// Apply CLI overrides. Priority: file < CLI.
    pub fn apply(&mut self, overrides: &CliOverrides) {
        if let Some(n) = overrides.epochs {
            self.n_epochs = n;
        }
        if let Some(n) = overrides.batch_size {
            self.batch_size = n;
        }
        if let Some(lr) = overrides.lr {
            self.lr = lr;
        }
        if let Some(path) = &overrides.data {
            self.data = Some(path.clone());
        }
        if let Some(dir) = &overrides.params_dir {
            self.params_dir = dir.clone();
        }
    }

    /// Reject values the trainer cannot run with.
    pub fn validate(&self) -> Result<(), VaeError> {
        let invalid = |msg: String| -> Result<(), VaeError> { Err(VaeError::InvalidConfig(msg)) };
        if self.name.trim().is_empty() {
            return invalid("name must not be empty".into());
        }
        for (key, value) in [
            ("hidden_dim", self.hidden_dim),
            ("z_dim", self.z_dim),
            ("time_step", self.time_step),
            ("batch_size", self.batch_size),
            ("eval_batch_size", self.eval_batch_size),
            ("adv_step_cap", self.adv_step_cap),
        ] {
            if value == 0 {
                return invalid(format!("{key} must be positive"));
            }
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return invalid(format!("lr must be positive, got {}", self.lr));
        }
        if !(self.beta.is_finite() && self.beta >= 0.0) {
            return invalid(format!("beta must be non-negative, got {}", self.beta));
        }
        if !(self.max_grad_norm.is_finite() && self.max_grad_norm > 0.0) {
            return invalid(format!("max_grad_norm must be positive, got {}", self.max_grad_norm));
        }
        if let RegularizationStrategy::Hybrid { rank_weight, direct_weight } = self.regularization {
            if rank_weight < 0.0 || direct_weight < 0.0 {
                return invalid("hybrid regularization weights must be non-negative".into());
            }
        }
        Ok(())
    }

    pub fn to_model_config(&self) -> AttrVaeConfig {
        AttrVaeConfig::new(self.hidden_dim, self.z_dim, self.time_step).with_residual(self.is_res)
    }

    pub fn to_training_config(&self) -> TrainingConfig {
        let beta_schedule = match self.beta_anneal_steps {
            Some(warmup_steps) => BetaSchedule::Linear { warmup_steps },
            None => BetaSchedule::Constant,
        };
        TrainingConfig::new()
            .with_lr(self.lr)
            .with_beta(self.beta)
            .with_beta_schedule(beta_schedule)
            .with_regularization(self.regularization)
            .with_adversarial(self.is_adversarial)
            .with_class_loss(self.is_class)
            .with_adv_step_cap(self.adv_step_cap)
            .with_adv_weight_cap(self.adv_weight_cap)
            .with_max_grad_norm(self.max_grad_norm)
            .with_batch_size(self.batch_size)
            .with_n_epochs(self.n_epochs)
            .with_shuffle_seed(self.shuffle_seed)
    }

    pub fn checkpoint_paths(&self) -> CheckpointPaths {
        CheckpointPaths::new(self.params_dir.clone(), self.name.clone())
    }

    /// Dataset path, required by every command that touches data.
    pub fn data_path(&self) -> anyhow::Result<&Path> {
        self.data
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("no dataset given: pass --data or set `data` in the config"))
    }
}

/// Load a config file, merge CLI overrides and validate the result.
pub fn load_run_config(path: &Path, overrides: &CliOverrides) -> anyhow::Result<RunConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
    let is_toml = path.extension().is_some_and(|ext| ext == "toml");
    let mut config =
        RunConfig::parse(&contents, is_toml).with_context(|| format!("parsing config {}", path.display()))?;
    config.apply(overrides);
    config.validate()?;

    if config.if_parallel {
        tracing::warn!("if_parallel is set, but training runs on a single device");
    }
    tracing::info!(
        path = %path.display(),
        name = %config.name,
        epochs = config.n_epochs,
        batch_size = config.batch_size,
        adversarial = config.is_adversarial,
        class = config.is_class,
        "Loaded run config"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: &str = r#"{
        "name": "attr_vae_v1",
        "hidden_dim": 256,
        "z_dim": 4,
        "time_step": 32,
        "lr": 0.001,
        "beta": 0.1,
        "batch_size": 64,
        "n_epochs": 30,
        "if_parallel": false,
        "is_adversarial": true,
        "is_class": false,
        "is_res": true
    }"#;

    #[test]
    fn test_parse_json_with_defaults() {
        let config = RunConfig::parse(JSON, false).unwrap();
        assert_eq!(config.name, "attr_vae_v1");
        assert_eq!(config.time_step, 32);
        assert!(config.is_adversarial);
        assert_eq!(config.regularization, RegularizationStrategy::RankTanh);
        assert_eq!(config.beta_anneal_steps, None);
        assert_eq!(config.adv_step_cap, 5000);
        assert!((config.adv_weight_cap - 0.15).abs() < 1e-12);
        assert_eq!(config.eval_batch_size, 128);
        assert_eq!(config.params_dir, PathBuf::from("params"));
        assert!(config.data.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_toml_with_extensions() {
        let toml_str = r#"
name = "small"
hidden_dim = 32
z_dim = 2
time_step = 16
lr = 0.0005
beta = 0.2
batch_size = 8
n_epochs = 3
if_parallel = false
is_adversarial = false
is_class = true
is_res = false
regularization = "direct_mse"
beta_anneal_steps = 1000
data = "data/music.jsonl"
"#;
        let config = RunConfig::parse(toml_str, true).unwrap();
        assert_eq!(config.regularization, RegularizationStrategy::DirectMse);
        assert_eq!(config.beta_anneal_steps, Some(1000));
        assert_eq!(config.data.as_deref(), Some(Path::new("data/music.jsonl")));
    }

    #[test]
    fn test_missing_required_key_is_error() {
        let json = r#"{ "name": "x", "hidden_dim": 8 }"#;
        assert!(RunConfig::parse(json, false).is_err());
    }

    #[test]
    fn test_cli_override_priority() {
        let mut config = RunConfig::parse(JSON, false).unwrap();
        config.apply(&CliOverrides {
            epochs: Some(2),
            lr: Some(1e-2),
            data: Some(PathBuf::from("other.jsonl")),
            ..Default::default()
        });
        assert_eq!(config.n_epochs, 2);
        assert_eq!(config.batch_size, 64);
        assert!((config.lr - 1e-2).abs() < 1e-12);
        assert_eq!(config.data_path().unwrap(), Path::new("other.jsonl"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let base = RunConfig::parse(JSON, false).unwrap();

        let mut c = base.clone();
        c.z_dim = 0;
        assert!(matches!(c.validate(), Err(VaeError::InvalidConfig(msg)) if msg.contains("z_dim")));

        let mut c = base.clone();
        c.lr = -1.0;
        assert!(c.validate().is_err());

        let mut c = base;
        c.name = "  ".into();
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_lowering_into_library_configs() {
        let mut config = RunConfig::parse(JSON, false).unwrap();
        config.beta_anneal_steps = Some(500);

        let model = config.to_model_config();
        assert_eq!((model.hidden_dim, model.z_dim, model.time_step), (256, 4, 32));
        assert!(model.residual);

        let training = config.to_training_config();
        assert!(training.adversarial);
        assert!(!training.class_loss);
        assert_eq!(training.batch_size, 64);
        assert_eq!(training.n_epochs, 30);
        assert_eq!(training.beta_schedule, BetaSchedule::Linear { warmup_steps: 500 });

        let paths = config.checkpoint_paths();
        assert_eq!(paths.model(), PathBuf::from("params/attr_vae_v1.mpk"));
    }

    #[test]
    fn test_load_run_config_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(&path, JSON).unwrap();
        let config = load_run_config(
            &path,
            &CliOverrides { batch_size: Some(16), ..Default::default() },
        )
        .unwrap();
        assert_eq!(config.batch_size, 16);

        let missing = dir.path().join("missing.json");
        assert!(load_run_config(&missing, &CliOverrides::default()).is_err());
    }
}
