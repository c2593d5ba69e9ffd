//! Diagonal Gaussian posteriors and their KL divergence.

use burn::prelude::*;
use burn::tensor::Distribution;

/// Elementwise (diagonal) normal distribution `N(loc, scale^2)`.
#[derive(Debug, Clone)]
pub struct Normal<B: Backend> {
    pub loc: Tensor<B, 2>,
    pub scale: Tensor<B, 2>,
}

impl<B: Backend> Normal<B> {
    pub fn new(loc: Tensor<B, 2>, scale: Tensor<B, 2>) -> Self {
        Self { loc, scale }
    }

    /// Posterior from encoder heads: `scale = exp(0.5 * logvar)`.
    pub fn from_log_var(loc: Tensor<B, 2>, log_var: Tensor<B, 2>) -> Self {
        let scale = log_var.mul_scalar(0.5).exp();
        Self { loc, scale }
    }

    /// Standard normal `N(0, 1)` with the given shape.
    pub fn standard(shape: [usize; 2], device: &B::Device) -> Self {
        Self {
            loc: Tensor::zeros(shape, device),
            scale: Tensor::ones(shape, device),
        }
    }

    /// Standard normal matching this distribution's shape and device.
    pub fn standard_like(&self) -> Self {
        Self::standard(self.loc.dims(), &self.loc.device())
    }

    pub fn dims(&self) -> [usize; 2] {
        self.loc.dims()
    }

    /// Reparameterized sample `loc + scale * eps`, `eps ~ N(0, 1)`.
    pub fn rsample(&self) -> Tensor<B, 2> {
        let eps = Tensor::random(self.loc.dims(), Distribution::Normal(0.0, 1.0), &self.loc.device());
        self.loc.clone() + self.scale.clone() * eps
    }
}

/// Elementwise `KL(p || q)` for diagonal normals, shape `(batch, dim)`.
///
/// `log(sq / sp) + (sp^2 + (mp - mq)^2) / (2 sq^2) - 1/2`
pub fn kl_divergence<B: Backend>(p: &Normal<B>, q: &Normal<B>) -> Tensor<B, 2> {
    let var_p = p.scale.clone().powf_scalar(2.0);
    let var_q = q.scale.clone().powf_scalar(2.0);
    let mean_sq = (p.loc.clone() - q.loc.clone()).powf_scalar(2.0);
    let log_ratio = q.scale.clone().log() - p.scale.clone().log();

    log_ratio + (var_p + mean_sq) / var_q.mul_scalar(2.0) - 0.5
}

/// Mean `KL(p || N(0, 1))` over every element of `p`, as a `(1,)` tensor.
pub fn mean_kl_to_standard<B: Backend>(p: &Normal<B>) -> Tensor<B, 1> {
    kl_divergence(p, &p.standard_like()).mean()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::TensorData;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_kl_of_standard_is_zero() {
        let device = Default::default();
        let p = Normal::<TestBackend>::standard([3, 4], &device);
        let kl: f32 = mean_kl_to_standard(&p).into_scalar().elem();
        assert!(kl.abs() < 1e-6, "KL(N(0,1)||N(0,1)) should be 0, got {kl}");
    }

    #[test]
    fn test_kl_closed_form() {
        let device = Default::default();
        // mu=1, sigma=1 → KL = 0.5 * mu^2 = 0.5
        let p = Normal::<TestBackend>::new(
            Tensor::from_data(TensorData::from([[1.0_f32]]), &device),
            Tensor::from_data(TensorData::from([[1.0_f32]]), &device),
        );
        let kl: f32 = mean_kl_to_standard(&p).into_scalar().elem();
        assert!((kl - 0.5).abs() < 1e-6, "expected 0.5, got {kl}");

        // mu=0, sigma=2 → KL = -ln 2 + 4/2 - 1/2 = 1.5 - ln 2
        let p = Normal::<TestBackend>::new(
            Tensor::from_data(TensorData::from([[0.0_f32]]), &device),
            Tensor::from_data(TensorData::from([[2.0_f32]]), &device),
        );
        let kl: f32 = mean_kl_to_standard(&p).into_scalar().elem();
        let expected = 1.5 - 2.0_f32.ln();
        assert!((kl - expected).abs() < 1e-5, "expected {expected}, got {kl}");
    }

    #[test]
    fn test_kl_non_negative() {
        let device = Default::default();
        let p = Normal::<TestBackend>::from_log_var(
            Tensor::random([8, 6], Distribution::Normal(0.0, 2.0), &device),
            Tensor::random([8, 6], Distribution::Normal(0.0, 1.0), &device),
        );
        let kl = kl_divergence(&p, &p.standard_like());
        let min: f32 = kl.min().into_scalar().elem();
        assert!(min >= -1e-6, "KL must be non-negative elementwise, got min={min}");
    }

    #[test]
    fn test_from_log_var_scale() {
        let device = Default::default();
        let p = Normal::<TestBackend>::from_log_var(
            Tensor::zeros([1, 1], &device),
            Tensor::from_data(TensorData::from([[2.0_f32.ln() * 2.0]]), &device),
        );
        let scale: f32 = p.scale.into_scalar().elem();
        assert!((scale - 2.0).abs() < 1e-5);
    }
}
