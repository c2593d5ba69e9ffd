//! VAE model components: attribute-partitioned encoder/decoder, diagonal
//! Gaussian posteriors, adversarial/class heads, and the tensor bridge
//! between host label data and burn tensors.

pub mod bridge;
pub mod distribution;
pub mod heads;
pub mod vae;
