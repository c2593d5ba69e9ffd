//! Running loss averages and reconstruction/class accuracy.
//!
//! Accuracy functions return per-example values as `(B,)` tensors so callers
//! can sum across batches and divide by the example count at the end.

use burn::prelude::*;

use crate::model::bridge::tensor_to_f64;
use crate::training::step::StepLosses;

/// Running per-batch average of every loss term.
#[derive(Debug, Clone, Default)]
pub struct LossAccumulator {
    sum: StepLosses,
    count: usize,
}

impl LossAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, l: &StepLosses) {
        self.sum.total += l.total;
        self.sum.primary_ce += l.primary_ce;
        self.sum.auxiliary_ce += l.auxiliary_ce;
        self.sum.kl += l.kl;
        self.sum.reg_rhythm += l.reg_rhythm;
        self.sum.reg_note += l.reg_note;
        self.sum.adv_rhythm += l.adv_rhythm;
        self.sum.adv_note += l.adv_note;
        self.sum.class_ce += l.class_ce;
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Mean of each term over the batches seen so far, `None` if empty.
    pub fn mean(&self) -> Option<StepLosses> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        let s = &self.sum;
        Some(StepLosses {
            total: s.total / n,
            primary_ce: s.primary_ce / n,
            auxiliary_ce: s.auxiliary_ce / n,
            kl: s.kl / n,
            reg_rhythm: s.reg_rhythm / n,
            reg_note: s.reg_note / n,
            adv_rhythm: s.adv_rhythm / n,
            adv_note: s.adv_note / n,
            class_ce: s.class_ce / n,
        })
    }

    pub fn display(&self) -> String {
        match self.mean() {
            None => "no data".to_string(),
            Some(m) => format!(
                "loss={:.4} ce={:.4} aux={:.4} kl={:.4} reg_r={:.4} reg_n={:.4} adv_r={:.4} adv_n={:.4} cls={:.4}",
                m.total, m.primary_ce, m.auxiliary_ce, m.kl, m.reg_rhythm, m.reg_note,
                m.adv_rhythm, m.adv_note, m.class_ce,
            ),
        }
    }
}

/// Per-example token accuracy of argmax predictions, `(B,)`.
///
/// With `trim_trailing_zeros`, each example is scored only up to its last
/// non-zero target; interior zeros still count. A target that is all zeros
/// scores 0.
pub fn sequence_accuracy<B: Backend>(
    log_probs: Tensor<B, 3>,
    targets: Tensor<B, 2, Int>,
    trim_trailing_zeros: bool,
) -> Tensor<B, 1> {
    let [batch, steps, _] = log_probs.dims();
    let predicted = log_probs.argmax(2).reshape([batch, steps]);
    let correct = predicted.equal(targets.clone()).float();

    if !trim_trailing_zeros {
        return correct.mean_dim(1).reshape([batch]);
    }

    let device = targets.device();
    let positions = Tensor::<B, 1, Int>::arange(1..steps as i64 + 1, &device)
        .float()
        .reshape([1, steps]);
    let nonzero = targets.equal_elem(0).bool_not().float();
    // 1-based index of the last non-zero target, 0 when there is none.
    let length = (nonzero * positions.clone()).max_dim(1);
    let mask = (length.clone() - positions).greater_equal_elem(0.0).float();

    let hits = (correct * mask).sum_dim(1);
    (hits / length.clamp_min(1.0)).reshape([batch])
}

/// Per-example class accuracy of argmax over logits, `(B,)`.
pub fn class_accuracy<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> Tensor<B, 1> {
    let [batch, _] = logits.dims();
    logits.argmax(1).reshape([batch]).equal(targets).float()
}

/// Summed per-example accuracies over a pass; divide by `examples` at the end.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AccuracyTotals {
    pub events: f64,
    pub rhythm: f64,
    pub note: f64,
    pub rhythm_class: f64,
    pub note_class: f64,
    pub examples: usize,
}

impl AccuracyTotals {
    pub fn add_sequences<B: Backend>(
        &mut self,
        events: Tensor<B, 1>,
        rhythm: Tensor<B, 1>,
        note: Tensor<B, 1>,
    ) {
        self.examples += events.dims()[0];
        self.events += tensor_to_f64(events.sum());
        self.rhythm += tensor_to_f64(rhythm.sum());
        self.note += tensor_to_f64(note.sum());
    }

    pub fn add_classes<B: Backend>(&mut self, rhythm: Tensor<B, 1>, note: Tensor<B, 1>) {
        self.rhythm_class += tensor_to_f64(rhythm.sum());
        self.note_class += tensor_to_f64(note.sum());
    }

    /// Totals divided by the number of examples. Zero examples yields zeros.
    pub fn averages(&self) -> AccuracyTotals {
        let n = self.examples.max(1) as f64;
        AccuracyTotals {
            events: self.events / n,
            rhythm: self.rhythm / n,
            note: self.note / n,
            rhythm_class: self.rhythm_class / n,
            note_class: self.note_class / n,
            examples: self.examples,
        }
    }
}
