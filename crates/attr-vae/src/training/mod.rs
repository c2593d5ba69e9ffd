//! Training pipeline: density features, regularization and composite losses,
//! batching, the train/eval step, metrics, checkpoints, and the epoch loop.

pub mod checkpoint;
pub mod clipping;
pub mod data;
pub mod features;
pub mod loss;
pub mod metrics;
pub mod regularization;
pub mod step;
pub mod trainer;
