//! Result records written after a CLI run.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use attr_vae::training::checkpoint::now_ms;
use attr_vae::training::trainer::EpochSummary;
use attr_vae::{EvaluationReport, TrainingSummary};

use crate::config::RunConfig;

/// Everything one invocation produced, as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    /// Unix milliseconds when the record was written.
    pub written_at_ms: u64,
    pub config: RunConfig,
    /// Present for `train` and `run`.
    pub training: Option<TrainingSummary>,
    /// Present for `evaluate` and `run`.
    pub evaluation: Option<EvaluationReport>,
}

impl RunRecord {
    pub fn new(config: RunConfig) -> Self {
        Self { written_at_ms: now_ms(), config, training: None, evaluation: None }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("writing results {}", path.display()))?;
        tracing::info!(path = %path.display(), "Wrote run results");
        Ok(())
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("reading results {}", path.display()))?;
        Ok(serde_json::from_str(&contents)?)
    }
}

/// Epoch with the lowest validation total loss.
///
/// Returns `None` if no epoch reported validation losses.
pub fn best_epoch(summary: &TrainingSummary) -> Option<&EpochSummary> {
    summary
        .epochs
        .iter()
        .filter(|e| e.val.is_some_and(|v| v.total.is_finite()))
        .min_by(|a, b| {
            let (a, b) = (a.val.map(|v| v.total), b.val.map(|v| v.total));
            a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
        })
}
