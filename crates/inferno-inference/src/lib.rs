//! # inferno-inference
//!
//! Differentiable profiled-likelihood inference for binned counting models.
//!
//! This crate provides:
//! - shape morphing between nominal and up/down templates ([`interp`])
//! - the Asimov Poisson NLL with auxiliary constraints ([`nll`])
//! - gradient / curvature on the AD tape ([`oracle`])
//! - a fixed-budget Newton profiler ([`optimizer`])
//! - profiled NLL curves and interval widths ([`profile_likelihood`], [`width`])
//! - expected Fisher information at the true point ([`fisher`])
//!
//! ## Architecture
//!
//! Everything is recorded on one [`inferno_ad::Tape`] per call, so the final
//! scalar (a width or an inverse Fisher entry) can be swept back into
//! whatever produced the shapes.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Plain-valued model description (JSON) and its `LikelihoodObjective`.
pub mod binned;
/// Inverse Fisher information at the profiled true point.
pub mod fisher;
/// Quadratic/linear shape interpolation.
pub mod interp;
/// Dense matrix inversion on the tape and definiteness checks.
pub mod linalg;
/// Asimov Poisson NLL, nuisance layout, constraints.
pub mod nll;
/// Newton-Raphson profiler with a fixed step budget.
pub mod optimizer;
/// Gradient and curvature via graph-mode AD.
pub mod oracle;
/// Profiled NLL curves over a POI scan.
pub mod profile_likelihood;
/// Likelihood-interval half-width.
pub mod width;

pub use binned::{BinnedObjective, BinnedSpec};
pub use fisher::{FisherOnTape, fisher};
pub use nll::{AsimovModel, AsimovModelBuilder, AuxConstraints, Constraint, NuisanceLayout, Variations};
pub use optimizer::{NewtonProfiler, NewtonResult, NewtonSummary, ProfilerConfig, StepGraph};
pub use oracle::{Curvature, CurvatureMode, Derivatives};
pub use profile_likelihood::{CurveOnTape, linspace_step, profile_curve, validate_scan};
pub use width::{likelihood_width, likelihood_width_f64};
