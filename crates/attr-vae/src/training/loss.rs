//! Reconstruction + KL composite loss, adversarial density loss, and class loss.
//!
//! All loss functions are generic over `B: Backend` and operate on burn tensors.
//! Scalar losses are `(1,)` tensors.

use burn::nn::loss::CrossEntropyLossConfig;
use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::model::distribution::{mean_kl_to_standard, Normal};
use crate::training::features::DensityTensors;

/// Weight of the primary event reconstruction term relative to the auxiliary ones.
pub const PRIMARY_CE_WEIGHT: f64 = 5.0;

/// Schedule for the KL weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetaSchedule {
    /// `beta` at every step.
    Constant,
    /// `min(step / warmup_steps * beta, beta)`.
    Linear { warmup_steps: usize },
}

impl Default for BetaSchedule {
    fn default() -> Self {
        Self::Constant
    }
}

impl BetaSchedule {
    /// KL weight at a given global step.
    pub fn beta_at(&self, beta: f64, step: usize) -> f64 {
        match *self {
            Self::Constant => beta,
            Self::Linear { warmup_steps } if warmup_steps > 0 => {
                (step as f64 / warmup_steps as f64 * beta).min(beta)
            }
            Self::Linear { .. } => beta,
        }
    }
}

/// Negative log-likelihood over `(B, T, V)` log-probabilities, mean over `B*T`.
pub fn nll_loss<B: Backend>(log_probs: Tensor<B, 3>, targets: Tensor<B, 2, Int>) -> Tensor<B, 1> {
    let [batch, steps, vocab] = log_probs.dims();
    let flat = log_probs.reshape([batch * steps, vocab]);
    let idx = targets.reshape([batch * steps, 1]);
    flat.gather(1, idx).mean().neg()
}

/// Output of [`composite_loss`].
#[derive(Debug, Clone)]
pub struct CompositeLoss<B: Backend> {
    /// `5 * primary + auxiliary + beta * kl`
    pub total: Tensor<B, 1>,
    pub primary_ce: Tensor<B, 1>,
    /// Sum of per-attribute NLLs.
    pub auxiliary_ce: Tensor<B, 1>,
    /// Sum over partitions of mean KL to N(0, 1).
    pub kl: Tensor<B, 1>,
}

/// Reconstruction + KL loss.
///
/// # Arguments
/// - `events_log_probs`: `(B, T, event_dims)` primary decoder output
/// - `events`: `(B, T)` ground-truth event indices
/// - `attribute_log_probs` / `attribute_targets`: auxiliary decoder outputs and
///   their targets, matched by position
/// - `posteriors`: one per latent partition, each regularized toward N(0, 1)
/// - `beta`, `schedule`, `step`: KL weight is `schedule.beta_at(beta, step)`
#[allow(clippy::too_many_arguments)]
pub fn composite_loss<B: Backend>(
    events_log_probs: Tensor<B, 3>,
    events: Tensor<B, 2, Int>,
    attribute_log_probs: &[Tensor<B, 3>],
    attribute_targets: &[Tensor<B, 2, Int>],
    posteriors: &[Normal<B>],
    beta: f64,
    schedule: BetaSchedule,
    step: usize,
) -> CompositeLoss<B> {
    assert_eq!(
        attribute_log_probs.len(),
        attribute_targets.len(),
        "each auxiliary output needs a target"
    );
    let device = events_log_probs.device();

    let primary_ce = nll_loss(events_log_probs, events);

    let mut auxiliary_ce = Tensor::<B, 1>::zeros([1], &device);
    for (out, target) in attribute_log_probs.iter().zip(attribute_targets) {
        auxiliary_ce = auxiliary_ce + nll_loss(out.clone(), target.clone());
    }

    let mut kl = Tensor::<B, 1>::zeros([1], &device);
    for posterior in posteriors {
        kl = kl + mean_kl_to_standard(posterior);
    }

    let ce = primary_ce.clone().mul_scalar(PRIMARY_CE_WEIGHT) + auxiliary_ce.clone();
    let total = ce + kl.clone().mul_scalar(schedule.beta_at(beta, step));

    CompositeLoss { total, primary_ce, auxiliary_ce, kl }
}

/// Warm-up weight for the adversarial term: `min(min(cap, step) / cap, weight_cap)`.
pub fn adversarial_weight(step: usize, step_cap: usize, weight_cap: f64) -> f64 {
    if step_cap == 0 {
        return weight_cap;
    }
    (step.min(step_cap) as f64 / step_cap as f64).min(weight_cap)
}

/// MSE between adversary predictions and true densities (rhythm rate, raw note mean).
pub fn adversarial_loss<B: Backend>(
    predicted_rhythm: Tensor<B, 1>,
    predicted_note: Tensor<B, 1>,
    densities: &DensityTensors<B>,
) -> (Tensor<B, 1>, Tensor<B, 1>) {
    let l_r = (predicted_rhythm - densities.rhythm.clone()).powf_scalar(2.0).mean();
    let l_n = (predicted_note - densities.note_raw.clone()).powf_scalar(2.0).mean();
    (l_r, l_n)
}

/// Cross-entropy of the rhythm and note class heads, summed.
pub fn class_loss<B: Backend>(
    rhythm_logits: Tensor<B, 2>,
    rhythm_class: Tensor<B, 1, Int>,
    note_logits: Tensor<B, 2>,
    note_class: Tensor<B, 1, Int>,
) -> Tensor<B, 1> {
    let ce = CrossEntropyLossConfig::new().init(&rhythm_logits.device());
    ce.forward(rhythm_logits, rhythm_class) + ce.forward(note_logits, note_class)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::activation::log_softmax;
    use burn::tensor::{Distribution, TensorData};

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_nll_uniform() {
        let device = Default::default();
        // Uniform over 4 classes → NLL = ln 4
        let log_probs = Tensor::<TestBackend, 3>::zeros([2, 3, 4], &device).add_scalar(-(4.0_f32).ln());
        let targets = Tensor::<TestBackend, 2, Int>::from_data(
            TensorData::from([[0_i64, 1, 2], [3, 0, 1]]),
            &device,
        );
        let loss: f32 = nll_loss(log_probs, targets).into_scalar().elem();
        assert!((loss - 4.0_f32.ln()).abs() < 1e-6, "got {loss}");
    }

    #[test]
    fn test_nll_picks_target_entry() {
        let device = Default::default();
        let log_probs = Tensor::<TestBackend, 3>::from_data(
            TensorData::from([[[-0.1_f32, -2.0], [-3.0, -0.5]]]),
            &device,
        );
        let targets = Tensor::<TestBackend, 2, Int>::from_data(TensorData::from([[0_i64, 1]]), &device);
        let loss: f32 = nll_loss(log_probs, targets).into_scalar().elem();
        assert!((loss - 0.3).abs() < 1e-6, "got {loss}");
    }

    #[test]
    fn test_composite_total_at_least_weighted_primary() {
        let device = Default::default();
        let events = log_softmax(
            Tensor::<TestBackend, 3>::random([2, 4, 342], Distribution::Normal(0.0, 1.0), &device),
            2,
        );
        let rhythm = log_softmax(
            Tensor::<TestBackend, 3>::random([2, 4, 3], Distribution::Normal(0.0, 1.0), &device),
            2,
        );
        let targets = Tensor::<TestBackend, 2, Int>::from_data(
            TensorData::from([[5_i64, 100, 341, 0], [1, 2, 3, 4]]),
            &device,
        );
        let rhythm_targets = Tensor::<TestBackend, 2, Int>::from_data(
            TensorData::from([[0_i64, 1, 2, 1], [1, 1, 0, 2]]),
            &device,
        );
        let posterior = Normal::from_log_var(
            Tensor::random([2, 4], Distribution::Normal(0.0, 1.0), &device),
            Tensor::random([2, 4], Distribution::Normal(0.0, 1.0), &device),
        );

        let loss = composite_loss(
            events,
            targets,
            &[rhythm],
            &[rhythm_targets],
            &[posterior],
            0.1,
            BetaSchedule::Constant,
            0,
        );
        let total: f32 = loss.total.into_scalar().elem();
        let primary: f32 = loss.primary_ce.into_scalar().elem();
        let aux: f32 = loss.auxiliary_ce.into_scalar().elem();
        let kl: f32 = loss.kl.into_scalar().elem();

        assert!(total >= 5.0 * primary - 1e-4, "total={total} primary={primary}");
        assert!((total - (5.0 * primary + aux + 0.1 * kl)).abs() < 1e-3);
    }

    #[test]
    fn test_composite_without_auxiliary_or_posteriors() {
        let device = Default::default();
        let events = Tensor::<TestBackend, 3>::zeros([1, 2, 2], &device).add_scalar(-(2.0_f32).ln());
        let targets = Tensor::<TestBackend, 2, Int>::from_data(TensorData::from([[0_i64, 1]]), &device);
        let loss = composite_loss(events, targets, &[], &[], &[], 1.0, BetaSchedule::Constant, 0);
        let total: f32 = loss.total.into_scalar().elem();
        assert!((total - 5.0 * 2.0_f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_beta_schedule() {
        assert_eq!(BetaSchedule::Constant.beta_at(0.1, 0), 0.1);
        let linear = BetaSchedule::Linear { warmup_steps: 3000 };
        assert_eq!(linear.beta_at(0.1, 0), 0.0);
        assert!((linear.beta_at(0.1, 1500) - 0.05).abs() < 1e-12);
        assert_eq!(linear.beta_at(0.1, 3000), 0.1);
        assert_eq!(linear.beta_at(0.1, 9000), 0.1);
        assert_eq!(BetaSchedule::Linear { warmup_steps: 0 }.beta_at(0.1, 0), 0.1);
    }

    #[test]
    fn test_adversarial_weight_ramp() {
        assert_eq!(adversarial_weight(0, 5000, 0.15), 0.0);
        assert_eq!(adversarial_weight(5000, 5000, 0.15), 0.15);
        assert_eq!(adversarial_weight(10_000, 5000, 0.15), 0.15);
        assert!((adversarial_weight(500, 5000, 0.15) - 0.1).abs() < 1e-12);

        let mut prev = 0.0;
        for step in (0..12_000).step_by(250) {
            let w = adversarial_weight(step, 5000, 0.15);
            assert!(w >= prev, "ramp must be monotonic");
            assert!(w <= 0.15);
            prev = w;
        }
    }

    #[test]
    fn test_adversarial_loss_zero_for_exact_prediction() {
        let device = Default::default();
        let densities = DensityTensors::<TestBackend> {
            rhythm: Tensor::from_data(TensorData::from([0.25_f32, 0.5]), &device),
            note: Tensor::from_data(TensorData::from([2.0_f32, 1.0]), &device),
            note_raw: Tensor::from_data(TensorData::from([2.1_f32, 0.9]), &device),
        };
        let (l_r, l_n) = adversarial_loss(
            densities.rhythm.clone(),
            densities.note_raw.clone(),
            &densities,
        );
        assert_eq!(l_r.into_scalar().elem::<f32>(), 0.0);
        assert_eq!(l_n.into_scalar().elem::<f32>(), 0.0);
    }

    #[test]
    fn test_class_loss_confident_correct_is_small() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::from_data(
            TensorData::from([[10.0_f32, -10.0, -10.0], [-10.0, 10.0, -10.0]]),
            &device,
        );
        let classes = Tensor::<TestBackend, 1, Int>::from_data(TensorData::from([0_i64, 1]), &device);
        let loss: f32 = class_loss(logits.clone(), classes.clone(), logits, classes).into_scalar().elem();
        assert!(loss < 1e-3, "got {loss}");
    }
}
