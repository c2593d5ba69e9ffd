use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::log_softmax;

use crate::model::distribution::Normal;
use crate::model::heads::{ClassHead, ClassHeadConfig, DensityAdversary, DensityAdversaryConfig};

/// Vocabulary of the primary event stream.
pub const EVENT_DIMS: usize = 342;
/// Rhythm labels: rest, onset, hold.
pub const RHYTHM_DIMS: usize = 3;
/// Note-density labels (active note count, clipped).
pub const NOTE_DIMS: usize = 16;
/// Width of the chroma feature vector.
pub const CHROMA_DIMS: usize = 24;
/// Number of rhythm / note-density classes for the optional class heads.
pub const ATTR_CLASSES: usize = 3;

/// Configuration for the attribute-regularized music VAE.
///
/// ```text
/// events (B,T,342) ── flatten → Linear → tanh ─┐
///                                                ├─ [h, rhythm (B,T*3)]  → z_r
///                                                ├─ [h, note (B,T*16)]   → z_n
///                                                └─ [h, chroma (B,24)]   → z_c
/// [z_r, z_n, z_c] → event decoder  → log-probs (B,T,342)
/// z_r             → rhythm decoder → log-probs (B,T,3)
/// z_n             → note decoder   → log-probs (B,T,16)
/// ```
#[derive(Config, Debug)]
pub struct AttrVaeConfig {
    /// Hidden layer width of encoders and decoders.
    pub hidden_dim: usize,
    /// Width of each latent partition.
    pub z_dim: usize,
    /// Sequence length T.
    pub time_step: usize,
    #[config(default = 342)]
    pub event_dims: usize,
    #[config(default = 3)]
    pub rhythm_dims: usize,
    #[config(default = 16)]
    pub note_dims: usize,
    #[config(default = 24)]
    pub chroma_dims: usize,
    #[config(default = 3)]
    pub n_classes: usize,
    /// Add a linear skip path from the latent into the event decoder.
    #[config(default = false)]
    pub residual: bool,
}

/// How latents are drawn from the posteriors during a forward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sampling {
    /// Reparameterized sample; used for training and validation.
    Stochastic,
    /// Posterior mean; deterministic.
    Mean,
}

/// One-hot inputs to the model.
#[derive(Debug, Clone)]
pub struct AttrVaeInput<B: Backend> {
    /// `(B, T, event_dims)`
    pub events: Tensor<B, 3>,
    /// `(B, T, rhythm_dims)`
    pub rhythm: Tensor<B, 3>,
    /// `(B, T, note_dims)`
    pub note: Tensor<B, 3>,
    /// `(B, chroma_dims)`
    pub chroma: Tensor<B, 2>,
}

/// Latent code, partitioned per attribute. Each partition is `(B, z_dim)`.
#[derive(Debug, Clone)]
pub struct LatentSplit<B: Backend> {
    pub rhythm: Tensor<B, 2>,
    pub note: Tensor<B, 2>,
    pub chroma: Tensor<B, 2>,
}

impl<B: Backend> LatentSplit<B> {
    pub fn concat(&self) -> Tensor<B, 2> {
        Tensor::cat(vec![self.rhythm.clone(), self.note.clone(), self.chroma.clone()], 1)
    }
}

/// Everything a forward pass produces.
#[derive(Debug, Clone)]
pub struct AttrVaeOutput<B: Backend> {
    /// Primary event log-probabilities, `(B, T, event_dims)`.
    pub events: Tensor<B, 3>,
    /// Posteriors in partition order: rhythm, note, chroma.
    pub posteriors: Vec<Normal<B>>,
    pub latents: LatentSplit<B>,
    /// Auxiliary log-probabilities: rhythm `(B,T,3)`, note `(B,T,16)`.
    pub attributes: Vec<Tensor<B, 3>>,
}

/// Maps a flat feature vector to a diagonal Gaussian posterior.
#[derive(Module, Debug)]
pub struct PosteriorEncoder<B: Backend> {
    hidden: Linear<B>,
    mu: Linear<B>,
    log_var: Linear<B>,
}

impl<B: Backend> PosteriorEncoder<B> {
    fn new(d_input: usize, d_hidden: usize, d_latent: usize, device: &B::Device) -> Self {
        Self {
            hidden: LinearConfig::new(d_input, d_hidden).init(device),
            mu: LinearConfig::new(d_hidden, d_latent).init(device),
            log_var: LinearConfig::new(d_hidden, d_latent).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 2>) -> Normal<B> {
        let h = self.hidden.forward(x).tanh();
        Normal::from_log_var(self.mu.forward(h.clone()), self.log_var.forward(h))
    }
}

/// Decodes a latent into per-step log-probabilities over a vocabulary.
#[derive(Module, Debug)]
pub struct SequenceDecoder<B: Backend> {
    hidden: Linear<B>,
    skip: Option<Linear<B>>,
    out: Linear<B>,
    time_step: usize,
    vocab: usize,
}

impl<B: Backend> SequenceDecoder<B> {
    fn new(
        d_latent: usize,
        d_hidden: usize,
        time_step: usize,
        vocab: usize,
        residual: bool,
        device: &B::Device,
    ) -> Self {
        Self {
            hidden: LinearConfig::new(d_latent, d_hidden).init(device),
            skip: residual.then(|| LinearConfig::new(d_latent, d_hidden).with_bias(false).init(device)),
            out: LinearConfig::new(d_hidden, time_step * vocab).init(device),
            time_step,
            vocab,
        }
    }

    /// `(B, d_latent)` → `(B, T, vocab)` log-probabilities.
    pub fn forward(&self, z: Tensor<B, 2>) -> Tensor<B, 3> {
        let [batch, _] = z.dims();
        let mut h = self.hidden.forward(z.clone()).tanh();
        if let Some(skip) = &self.skip {
            h = h + skip.forward(z);
        }
        let logits = self.out.forward(h).reshape([batch, self.time_step, self.vocab]);
        log_softmax(logits, 2)
    }
}

/// Attribute-regularized VAE over symbolic music event sequences.
#[derive(Module, Debug)]
pub struct AttrVae<B: Backend> {
    event_embed: Linear<B>,
    rhythm_encoder: PosteriorEncoder<B>,
    note_encoder: PosteriorEncoder<B>,
    chroma_encoder: PosteriorEncoder<B>,
    event_decoder: SequenceDecoder<B>,
    rhythm_decoder: SequenceDecoder<B>,
    note_decoder: SequenceDecoder<B>,
    adversary: DensityAdversary<B>,
    rhythm_class: ClassHead<B>,
    note_class: ClassHead<B>,
}

impl AttrVaeConfig {
    /// Initialize an AttrVae with the given configuration.
    pub fn init<B: Backend>(&self, device: &B::Device) -> AttrVae<B> {
        let t = self.time_step;
        let h = self.hidden_dim;
        let z = self.z_dim;

        AttrVae {
            event_embed: LinearConfig::new(t * self.event_dims, h).init(device),
            rhythm_encoder: PosteriorEncoder::new(h + t * self.rhythm_dims, h, z, device),
            note_encoder: PosteriorEncoder::new(h + t * self.note_dims, h, z, device),
            chroma_encoder: PosteriorEncoder::new(h + self.chroma_dims, h, z, device),
            event_decoder: SequenceDecoder::new(3 * z, h, t, self.event_dims, self.residual, device),
            rhythm_decoder: SequenceDecoder::new(z, h, t, self.rhythm_dims, false, device),
            note_decoder: SequenceDecoder::new(z, h, t, self.note_dims, false, device),
            adversary: DensityAdversaryConfig::new(z).init(device),
            rhythm_class: ClassHeadConfig::new(z).with_n_classes(self.n_classes).init(device),
            note_class: ClassHeadConfig::new(z).with_n_classes(self.n_classes).init(device),
        }
    }
}

fn flatten_steps<B: Backend>(x: Tensor<B, 3>) -> Tensor<B, 2> {
    let [batch, steps, vocab] = x.dims();
    x.reshape([batch, steps * vocab])
}

impl<B: Backend> AttrVae<B> {
    /// Forward pass: encode, draw latents, decode.
    pub fn forward(&self, input: AttrVaeInput<B>, sampling: Sampling) -> AttrVaeOutput<B> {
        let h = self.event_embed.forward(flatten_steps(input.events)).tanh();

        let q_r = self
            .rhythm_encoder
            .forward(Tensor::cat(vec![h.clone(), flatten_steps(input.rhythm)], 1));
        let q_n = self
            .note_encoder
            .forward(Tensor::cat(vec![h.clone(), flatten_steps(input.note)], 1));
        let q_c = self.chroma_encoder.forward(Tensor::cat(vec![h, input.chroma], 1));

        let draw = |q: &Normal<B>| match sampling {
            Sampling::Stochastic => q.rsample(),
            Sampling::Mean => q.loc.clone(),
        };
        let latents = LatentSplit {
            rhythm: draw(&q_r),
            note: draw(&q_n),
            chroma: draw(&q_c),
        };

        let events = self.event_decoder.forward(latents.concat());
        let rhythm = self.rhythm_decoder.forward(latents.rhythm.clone());
        let note = self.note_decoder.forward(latents.note.clone());

        AttrVaeOutput {
            events,
            posteriors: vec![q_r, q_n, q_c],
            latents,
            attributes: vec![rhythm, note],
        }
    }

    /// Adversarial density predictions read from the chroma partition.
    pub fn predict_densities(&self, latents: &LatentSplit<B>) -> (Tensor<B, 1>, Tensor<B, 1>) {
        self.adversary.forward(latents.chroma.clone())
    }

    /// Rhythm and note class logits, `(B, n_classes)` each.
    pub fn classify(&self, latents: &LatentSplit<B>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        (
            self.rhythm_class.forward(latents.rhythm.clone()),
            self.note_class.forward(latents.note.clone()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::backend::Autodiff;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;
    type TestAutodiffBackend = Autodiff<NdArray<f32>>;

    fn small_config() -> AttrVaeConfig {
        AttrVaeConfig::new(16, 4, 6)
    }

    fn random_input<B: Backend>(batch: usize, config: &AttrVaeConfig, device: &B::Device) -> AttrVaeInput<B> {
        let t = config.time_step;
        AttrVaeInput {
            events: Tensor::random([batch, t, config.event_dims], Distribution::Uniform(0.0, 1.0), device),
            rhythm: Tensor::random([batch, t, config.rhythm_dims], Distribution::Uniform(0.0, 1.0), device),
            note: Tensor::random([batch, t, config.note_dims], Distribution::Uniform(0.0, 1.0), device),
            chroma: Tensor::random([batch, config.chroma_dims], Distribution::Uniform(0.0, 1.0), device),
        }
    }

    #[test]
    fn test_forward_shapes() {
        let device = Default::default();
        let config = small_config();
        let model = config.init::<TestBackend>(&device);
        let out = model.forward(random_input(3, &config, &device), Sampling::Stochastic);

        assert_eq!(out.events.dims(), [3, 6, EVENT_DIMS]);
        assert_eq!(out.attributes.len(), 2);
        assert_eq!(out.attributes[0].dims(), [3, 6, RHYTHM_DIMS]);
        assert_eq!(out.attributes[1].dims(), [3, 6, NOTE_DIMS]);
        assert_eq!(out.posteriors.len(), 3);
        assert_eq!(out.latents.rhythm.dims(), [3, 4]);
        assert_eq!(out.latents.concat().dims(), [3, 12]);
    }

    #[test]
    fn test_log_probs_normalized() {
        let device = Default::default();
        let config = small_config();
        let model = config.init::<TestBackend>(&device);
        let out = model.forward(random_input(2, &config, &device), Sampling::Mean);

        let sums = out.events.exp().sum_dim(2);
        let max_err: f32 = (sums - 1.0).abs().max().into_scalar().elem();
        assert!(max_err < 1e-4, "probabilities should sum to 1, err={max_err}");
    }

    #[test]
    fn test_mean_sampling_is_deterministic() {
        let device = Default::default();
        let config = small_config();
        let model = config.init::<TestBackend>(&device);
        let input = random_input(2, &config, &device);

        let a = model.forward(input.clone(), Sampling::Mean).events;
        let b = model.forward(input, Sampling::Mean).events;
        let diff: f32 = (a - b).abs().max().into_scalar().elem();
        assert_eq!(diff, 0.0);
    }

    #[test]
    fn test_residual_adds_skip_params() {
        let device = Default::default();
        let plain = small_config().init::<TestBackend>(&device).num_params();
        let residual = small_config().with_residual(true).init::<TestBackend>(&device).num_params();
        // skip: Linear(3*z → hidden), no bias
        assert_eq!(residual - plain, 3 * 4 * 16);
    }

    #[test]
    fn test_gradient_reaches_encoder() {
        use burn::optim::GradientsParams;

        let device = Default::default();
        let config = small_config();
        let model = config.init::<TestAutodiffBackend>(&device);
        let out = model.forward(random_input(2, &config, &device), Sampling::Stochastic);
        let loss = out.events.sum().neg();

        let grads = GradientsParams::from_grads(loss.backward(), &model);
        let grad = grads
            .get::<NdArray<f32>, 2>(model.event_embed.weight.id)
            .expect("event_embed weight should have gradient");
        let grad_sum: f32 = grad.abs().sum().into_scalar().elem();
        assert!(grad_sum > 0.0, "encoder gradient is zero");
    }
}
