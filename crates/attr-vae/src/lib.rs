//! Attribute-regularized VAE for symbolic music.
//!
//! Encodes an event sequence into rhythm, note-density and chroma latent
//! partitions, decodes it back, and trains with a composite objective:
//! reconstruction, KL to a standard normal, a pairwise rank regularizer tying
//! one latent coordinate per partition to an observed density feature, and an
//! optional adversarial term that keeps density information out of the chroma
//! partition.

pub mod error;
pub mod evaluation;
pub mod model;
pub mod training;

pub use error::VaeError;
pub use evaluation::{run_evaluation, EvaluationReport, Evaluator, SplitReport};
pub use model::vae::{AttrVae, AttrVaeConfig, Sampling};
pub use training::checkpoint::CheckpointPaths;
pub use training::data::{load_examples, split_dataset, synthetic_examples, DatasetSplits, MusicExample};
pub use training::regularization::RegularizationStrategy;
pub use training::trainer::{build_optimizer, run_training, TrainingConfig, TrainingContext, TrainingSummary};
