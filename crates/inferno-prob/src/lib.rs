//! Probability building blocks for inferno.
//!
//! Log-densities needed by the binned likelihood, each available as a plain
//! `f64` function and as an `*_on_tape` variant that records onto an
//! [`inferno_ad::Tape`]:
//! - [`poisson`]: count likelihood for (possibly non-integer, Asimov) bin contents
//! - [`normal`]: Gaussian auxiliary constraints on nuisance parameters

pub mod normal;
pub mod poisson;
