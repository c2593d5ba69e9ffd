//! One training micro-step (forward + backward + update) and the matching
//! forward-only evaluation step.
//!
//! Both share [`compute_losses`]; the only differences are the adversarial
//! weight (ramped during training, unit during evaluation) and whether
//! gradients are taken.

use burn::optim::{GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};

use crate::error::VaeError;
use crate::model::bridge::{one_hot, tensor_to_f64};
use crate::model::vae::{AttrVae, AttrVaeInput, AttrVaeOutput, Sampling, EVENT_DIMS, NOTE_DIMS, RHYTHM_DIMS};
use crate::training::clipping::clip_grad_norm;
use crate::training::data::MusicBatch;
use crate::training::loss::{adversarial_loss, adversarial_weight, class_loss, composite_loss, CompositeLoss};
use crate::training::regularization::regularization_loss;
use crate::training::trainer::TrainingConfig;

/// Per-term loss values of one step, detached from the graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StepLosses {
    pub total: f64,
    pub primary_ce: f64,
    pub auxiliary_ce: f64,
    pub kl: f64,
    pub reg_rhythm: f64,
    pub reg_note: f64,
    pub adv_rhythm: f64,
    pub adv_note: f64,
    pub class_ce: f64,
}

/// Loss tensors of one forward pass, still on the graph.
#[derive(Debug, Clone)]
pub struct BatchLosses<B: Backend> {
    pub total: Tensor<B, 1>,
    pub composite: CompositeLoss<B>,
    pub reg_rhythm: Tensor<B, 1>,
    pub reg_note: Tensor<B, 1>,
    /// `None` when the adversarial term is disabled.
    pub adversarial: Option<(Tensor<B, 1>, Tensor<B, 1>)>,
    /// `None` when the class heads are disabled.
    pub class_ce: Option<Tensor<B, 1>>,
    pub output: AttrVaeOutput<B>,
}

impl<B: Backend> BatchLosses<B> {
    /// Read every term back to the host.
    pub fn scalars(&self) -> StepLosses {
        let (adv_rhythm, adv_note) = match &self.adversarial {
            Some((r, n)) => (tensor_to_f64(r.clone()), tensor_to_f64(n.clone())),
            None => (0.0, 0.0),
        };
        StepLosses {
            total: tensor_to_f64(self.total.clone()),
            primary_ce: tensor_to_f64(self.composite.primary_ce.clone()),
            auxiliary_ce: tensor_to_f64(self.composite.auxiliary_ce.clone()),
            kl: tensor_to_f64(self.composite.kl.clone()),
            reg_rhythm: tensor_to_f64(self.reg_rhythm.clone()),
            reg_note: tensor_to_f64(self.reg_note.clone()),
            adv_rhythm,
            adv_note,
            class_ce: self.class_ce.clone().map(tensor_to_f64).unwrap_or(0.0),
        }
    }
}

/// One-hot encode a batch for the model.
pub fn encode_inputs<B: Backend>(batch: &MusicBatch<B>) -> AttrVaeInput<B> {
    AttrVaeInput {
        events: one_hot(batch.events.clone(), EVENT_DIMS),
        rhythm: one_hot(batch.rhythm.clone(), RHYTHM_DIMS),
        note: one_hot(batch.note.clone(), NOTE_DIMS),
        chroma: batch.chroma.clone(),
    }
}

/// Forward pass plus every configured loss term.
///
/// `adv_weight` scales the adversarial term inside `total`; the reported
/// adversarial values are unweighted.
pub fn compute_losses<B: Backend>(
    model: &AttrVae<B>,
    batch: &MusicBatch<B>,
    config: &TrainingConfig,
    step: usize,
    adv_weight: f64,
    sampling: Sampling,
) -> BatchLosses<B> {
    let device = batch.events.device();
    let output = model.forward(encode_inputs(batch), sampling);

    let composite = composite_loss(
        output.events.clone(),
        batch.events.clone(),
        &output.attributes,
        &[batch.rhythm.clone(), batch.note.clone()],
        &output.posteriors,
        config.beta,
        config.beta_schedule,
        step,
    );

    let densities = batch.densities.to_tensors::<B>(&device);
    let (reg_rhythm, reg_note) = regularization_loss(config.regularization, &output.latents, &densities);
    let mut total = composite.total.clone() + reg_rhythm.clone() + reg_note.clone();

    let adversarial = if config.adversarial {
        let (pred_r, pred_n) = model.predict_densities(&output.latents);
        let (l_r, l_n) = adversarial_loss(pred_r, pred_n, &densities);
        total = total + (l_r.clone() + l_n.clone()).mul_scalar(adv_weight);
        Some((l_r, l_n))
    } else {
        None
    };

    let class_ce = if config.class_loss {
        let (logits_r, logits_n) = model.classify(&output.latents);
        let ce = class_loss(logits_r, batch.rhythm_class.clone(), logits_n, batch.note_class.clone());
        total = total + ce.clone();
        Some(ce)
    } else {
        None
    };

    BatchLosses {
        total,
        composite,
        reg_rhythm,
        reg_note,
        adversarial,
        class_ce,
        output,
    }
}

/// Forward, backward, clipped optimizer update.
///
/// Gradients are rescaled so their global norm is at most
/// `config.max_grad_norm`. Returns the updated model, the incremented global
/// step, and the per-term losses.
///
/// # Errors
/// [`VaeError::NonFiniteLoss`] if the total loss is NaN or infinite; the
/// model is not updated in that case.
pub fn train_step<B, O>(
    model: AttrVae<B>,
    optimizer: &mut O,
    batch: &MusicBatch<B>,
    config: &TrainingConfig,
    step: usize,
) -> Result<(AttrVae<B>, usize, StepLosses), VaeError>
where
    B: AutodiffBackend,
    O: Optimizer<AttrVae<B>, B>,
{
    let weight = adversarial_weight(step, config.adv_step_cap, config.adv_weight_cap);
    let losses = compute_losses(&model, batch, config, step, weight, Sampling::Stochastic);
    let scalars = losses.scalars();
    if !scalars.total.is_finite() {
        return Err(VaeError::NonFiniteLoss { step, value: scalars.total });
    }

    let grads = GradientsParams::from_grads(losses.total.backward(), &model);
    let (grads, grad_norm) = clip_grad_norm::<B, _>(&model, grads, config.max_grad_norm);
    tracing::trace!(step, grad_norm, "Gradient norm before clipping");
    let model = optimizer.step(config.lr, model, grads);

    Ok((model, step + 1, scalars))
}

/// Forward-only step with the adversarial term at full weight.
pub fn eval_step<B: Backend>(
    model: &AttrVae<B>,
    batch: &MusicBatch<B>,
    config: &TrainingConfig,
    step: usize,
) -> StepLosses {
    compute_losses(model, batch, config, step, 1.0, Sampling::Stochastic).scalars()
}
