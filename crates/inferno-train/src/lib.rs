//! # inferno-train
//!
//! Training-side half of inferno: turns classifier outputs into binned
//! shapes and exposes the profiled-likelihood precision as a loss.
//!
//! The training driver itself lives outside this crate. It talks to the
//! loss through the [`callback::Callback`] hooks and an explicit
//! [`callback::BatchContext`] per batch.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Hook contract, the inference-aware loss and the loss tracker.
pub mod callback;
/// Classifier seam and the reference MLP.
pub mod model;
/// Histograms from soft and hard assignments.
pub mod shape;
/// Input-feature nuisances.
pub mod systematics;
/// Paper benchmark dataset.
pub mod toy;

pub use callback::{
    BatchContext, BatchDiagnostics, Callback, EpochContext, InfernoConfig, InfernoLoss, LossMode, LossTracker, Phase,
    TrainFlags,
};
pub use model::{Classifier, Mlp};
pub use shape::{SHAPE_FLOOR, argmax_bins, argmax_shape, bin_hard, to_shape, to_shape_f64};
pub use systematics::{PaperSystematics, Perturbation, Systematic, SystematicSet};
pub use toy::{ToyConfig, ToyData, generate};
