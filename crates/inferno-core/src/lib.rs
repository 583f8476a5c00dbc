//! # inferno-core
//!
//! Shared foundation for the inferno workspace:
//! - [`Error`] / [`Result`] used by every crate
//! - transient result types produced by the profiler ([`ProfileCurve`], [`FisherResult`])
//! - the [`traits::LikelihoodObjective`] seam between models and numerical consumers

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use types::{FisherResult, ProfileCurve};
