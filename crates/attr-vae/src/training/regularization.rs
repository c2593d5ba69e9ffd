//! Attribute–latent alignment losses.
//!
//! Each strategy compares the first coordinate of a latent partition against an
//! observed density feature across the batch. The default (`RankTanh`) only
//! looks at pairwise ordering: `tanh(z_i - z_j)` is pushed toward
//! `sign(a_i - a_j)`, so the absolute density scale never matters.

use std::fmt;

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::model::vae::LatentSplit;
use crate::training::features::DensityTensors;

/// Which alignment loss ties latent coordinates to density features.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegularizationStrategy {
    /// MSE(tanh(Dz), sign(Da)) against half-rounded note density.
    RankTanh,
    /// MSE(z, a) directly, raw note mean.
    DirectMse,
    /// L1(tanh(10 Dz), sign(Da)), raw note mean.
    ScaledRankL1,
    /// MSE(tanh(Dz), tanh(Da)), raw note mean.
    TanhDiff,
    /// MSE(Dz, Da), raw note mean.
    RawDiff,
    /// Weighted blend of `RankTanh` and `DirectMse`.
    Hybrid { rank_weight: f64, direct_weight: f64 },
}

impl Default for RegularizationStrategy {
    fn default() -> Self {
        Self::RankTanh
    }
}

impl fmt::Display for RegularizationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RankTanh => write!(f, "rank_tanh"),
            Self::DirectMse => write!(f, "direct_mse"),
            Self::ScaledRankL1 => write!(f, "scaled_rank_l1"),
            Self::TanhDiff => write!(f, "tanh_diff"),
            Self::RawDiff => write!(f, "raw_diff"),
            Self::Hybrid { rank_weight, direct_weight } => {
                write!(f, "hybrid(rank={rank_weight}, direct={direct_weight})")
            }
        }
    }
}

/// All-pairs difference matrix `D[i, j] = x[i] - x[j]`, shape `(n, n)`.
pub fn pairwise_diff<B: Backend>(x: Tensor<B, 1>) -> Tensor<B, 2> {
    let [n] = x.dims();
    x.clone().reshape([n, 1]) - x.reshape([1, n])
}

fn mse<B: Backend, const D: usize>(a: Tensor<B, D>, b: Tensor<B, D>) -> Tensor<B, 1> {
    (a - b).powf_scalar(2.0).mean()
}

fn l1<B: Backend, const D: usize>(a: Tensor<B, D>, b: Tensor<B, D>) -> Tensor<B, 1> {
    (a - b).abs().mean()
}

/// Pairwise rank-consistency loss between latent scalars `z` and attributes `a`.
///
/// `mean((tanh(z_i - z_j) - sign(a_i - a_j))^2)` over all `n^2` pairs,
/// diagonal included. A batch of one yields zero.
pub fn pairwise_rank_loss<B: Backend>(z: Tensor<B, 1>, a: Tensor<B, 1>) -> Tensor<B, 1> {
    mse(pairwise_diff(z).tanh(), pairwise_diff(a).sign())
}

fn strategy_loss<B: Backend>(
    strategy: RegularizationStrategy,
    z: Tensor<B, 1>,
    rounded: Tensor<B, 1>,
    raw: Tensor<B, 1>,
) -> Tensor<B, 1> {
    match strategy {
        RegularizationStrategy::RankTanh => pairwise_rank_loss(z, rounded),
        RegularizationStrategy::DirectMse => mse(z, raw),
        RegularizationStrategy::ScaledRankL1 => {
            l1(pairwise_diff(z).mul_scalar(10.0).tanh(), pairwise_diff(raw).sign())
        }
        RegularizationStrategy::TanhDiff => mse(pairwise_diff(z).tanh(), pairwise_diff(raw).tanh()),
        RegularizationStrategy::RawDiff => mse(pairwise_diff(z), pairwise_diff(raw)),
        RegularizationStrategy::Hybrid { rank_weight, direct_weight } => {
            pairwise_rank_loss(z.clone(), rounded).mul_scalar(rank_weight)
                + mse(z, raw).mul_scalar(direct_weight)
        }
    }
}

/// First coordinate of a latent partition, `(B, z_dim)` → `(B,)`.
pub fn first_coordinate<B: Backend>(z: Tensor<B, 2>) -> Tensor<B, 1> {
    let [batch, _] = z.dims();
    z.slice([0..batch, 0..1]).reshape([batch])
}

/// Rhythm and note alignment losses, returned separately.
///
/// Only coordinate 0 of `z_r` and `z_n` participates. Rhythm density has no
/// rounded/raw distinction, so both slots receive the onset rate.
pub fn regularization_loss<B: Backend>(
    strategy: RegularizationStrategy,
    latents: &LatentSplit<B>,
    densities: &DensityTensors<B>,
) -> (Tensor<B, 1>, Tensor<B, 1>) {
    let l_r = strategy_loss(
        strategy,
        first_coordinate(latents.rhythm.clone()),
        densities.rhythm.clone(),
        densities.rhythm.clone(),
    );
    let l_n = strategy_loss(
        strategy,
        first_coordinate(latents.note.clone()),
        densities.note.clone(),
        densities.note_raw.clone(),
    );
    (l_r, l_n)
}
