use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;

/// Identity in the forward pass, negated gradient in the backward pass.
///
/// `2 * detach(x) - x` evaluates to `x` but only the `-x` term is on the
/// autodiff graph. On non-autodiff backends this is a plain identity.
pub fn reverse_gradient<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    x.clone().detach().mul_scalar(2.0) - x
}

/// Configuration for the adversarial density predictor.
#[derive(Config, Debug)]
pub struct DensityAdversaryConfig {
    /// Width of the latent partition the adversary reads.
    pub d_latent: usize,
    /// Hidden layer width.
    #[config(default = 64)]
    pub d_hidden: usize,
}

/// Predicts rhythm and note density from a latent partition that should not
/// encode them.
///
/// The input passes through [`reverse_gradient`] so that minimizing the
/// predictor's MSE trains the predictor while pushing the encoder to remove
/// the density signal from that partition.
#[derive(Module, Debug)]
pub struct DensityAdversary<B: Backend> {
    hidden: Linear<B>,
    rhythm_out: Linear<B>,
    note_out: Linear<B>,
}

impl DensityAdversaryConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> DensityAdversary<B> {
        DensityAdversary {
            hidden: LinearConfig::new(self.d_latent, self.d_hidden).init(device),
            rhythm_out: LinearConfig::new(self.d_hidden, 1).init(device),
            note_out: LinearConfig::new(self.d_hidden, 1).init(device),
        }
    }
}

impl<B: Backend> DensityAdversary<B> {
    /// `(batch, d_latent)` → (rhythm density `(batch,)`, note density `(batch,)`).
    pub fn forward(&self, z: Tensor<B, 2>) -> (Tensor<B, 1>, Tensor<B, 1>) {
        let h = burn::tensor::activation::relu(self.hidden.forward(reverse_gradient(z)));
        let rhythm = self.rhythm_out.forward(h.clone()).squeeze::<1>(1);
        let note = self.note_out.forward(h).squeeze::<1>(1);
        (rhythm, note)
    }
}

/// Linear classifier from a latent partition to attribute classes.
#[derive(Config, Debug)]
pub struct ClassHeadConfig {
    pub d_latent: usize,
    #[config(default = 3)]
    pub n_classes: usize,
}

#[derive(Module, Debug)]
pub struct ClassHead<B: Backend> {
    linear: Linear<B>,
}

impl ClassHeadConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ClassHead<B> {
        ClassHead {
            linear: LinearConfig::new(self.d_latent, self.n_classes).init(device),
        }
    }
}

impl<B: Backend> ClassHead<B> {
    /// Unnormalized class logits, `(batch, n_classes)`.
    pub fn forward(&self, z: Tensor<B, 2>) -> Tensor<B, 2> {
        self.linear.forward(z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::backend::Autodiff;
    use burn::tensor::{Distribution, TensorData};

    type TestBackend = NdArray<f32>;
    type TestAutodiffBackend = Autodiff<NdArray<f32>>;

    #[test]
    fn test_reverse_gradient_forward_is_identity() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 1>::from_data(TensorData::from([1.5_f32, -2.0, 0.0]), &device);
        let y = reverse_gradient(x.clone());
        let diff: f32 = (x - y).abs().sum().into_scalar().elem();
        assert!(diff < 1e-7, "forward must be identity, diff={diff}");
    }

    #[test]
    fn test_reverse_gradient_negates_grad() {
        let device = Default::default();
        let x = Tensor::<TestAutodiffBackend, 1>::from_data(TensorData::from([1.0_f32, 2.0]), &device)
            .require_grad();
        let loss = reverse_gradient(x.clone()).sum();
        let grads = loss.backward();
        let g: Vec<f32> = x.grad(&grads).unwrap().into_data().to_vec().unwrap();
        for v in g {
            assert!((v + 1.0).abs() < 1e-6, "expected gradient -1, got {v}");
        }
    }

    #[test]
    fn test_adversary_shapes() {
        let device = Default::default();
        let adv = DensityAdversaryConfig::new(8).with_d_hidden(4).init::<TestBackend>(&device);
        let z = Tensor::<TestBackend, 2>::random([5, 8], Distribution::Normal(0.0, 1.0), &device);
        let (r, n) = adv.forward(z);
        assert_eq!(r.dims(), [5]);
        assert_eq!(n.dims(), [5]);
    }

    #[test]
    fn test_class_head_shape() {
        let device = Default::default();
        let head = ClassHeadConfig::new(8).init::<TestBackend>(&device);
        let z = Tensor::<TestBackend, 2>::zeros([2, 8], &device);
        assert_eq!(head.forward(z).dims(), [2, 3]);
    }
}
