//! # inferno-ad
//!
//! Reverse-mode automatic differentiation (AD) on a flat tape.
//!
//! Provides:
//! - **Numeric reverse sweep** via [`tape::Tape::backward`] (all adjoints in one pass)
//! - **Graph-mode gradients** via [`tape::Tape::grad`]: derivatives recorded as tape
//!   nodes, so they can be differentiated again (Hessians) and back-propagated
//!   through (differentiating through an optimizer loop)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod tape;

pub use tape::{GraphGradError, Tape, Var};
