//! Three-feature benchmark dataset from the INFERNO paper.
//!
//! - background: `(x0, x1) ~ N((2 + r, 0), diag(5, 9))`, `x2 ~ Exp(λ)`
//! - signal: `(x0, x1) ~ N((1, 1), I)`, `x2 ~ Exp(2)`
//!
//! Labels are `1` for signal and `0` for background.

use inferno_core::{Error, Result};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_distr::{Distribution, Exp, Normal};
use serde::{Deserialize, Serialize};

/// Generator settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToyConfig {
    /// RNG seed.
    pub seed: u64,
    /// Number of signal events.
    pub n_signal: usize,
    /// Number of background events.
    pub n_background: usize,
    /// Background mean shift of feature 0.
    pub r: f64,
    /// Background rate of feature 2.
    pub lambda: f64,
    /// Shuffle signal and background together.
    pub shuffle: bool,
}

impl Default for ToyConfig {
    fn default() -> Self {
        Self { seed: 42, n_signal: 50_000, n_background: 50_000, r: 0.0, lambda: 3.0, shuffle: true }
    }
}

/// Generated events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToyData {
    /// One row of 3 features per event.
    pub inputs: Vec<Vec<f64>>,
    /// Class label per event.
    pub labels: Vec<u8>,
}

impl ToyData {
    /// Number of events.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether there are no events.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Events `[start, end)` as a batch.
    pub fn slice(&self, start: usize, end: usize) -> ToyData {
        let end = end.min(self.len());
        let start = start.min(end);
        ToyData { inputs: self.inputs[start..end].to_vec(), labels: self.labels[start..end].to_vec() }
    }
}

fn dist_err(what: &str, e: impl std::fmt::Display) -> Error {
    Error::Validation(format!("toy {what}: {e}"))
}

/// Sample the dataset.
pub fn generate(config: &ToyConfig) -> Result<ToyData> {
    if !config.r.is_finite() {
        return Err(Error::Validation(format!("r must be finite, got {}", config.r)));
    }
    let mut rng = rand::rngs::StdRng::seed_from_u64(config.seed);

    let b_x0 = Normal::new(2.0 + config.r, 5.0_f64.sqrt()).map_err(|e| dist_err("background x0", e))?;
    let b_x1 = Normal::new(0.0, 3.0).map_err(|e| dist_err("background x1", e))?;
    let b_x2 = Exp::new(config.lambda).map_err(|e| dist_err("background x2", e))?;
    let s_x01 = Normal::new(1.0, 1.0).map_err(|e| dist_err("signal x0/x1", e))?;
    let s_x2 = Exp::new(2.0).map_err(|e| dist_err("signal x2", e))?;

    let n = config.n_signal + config.n_background;
    let mut events: Vec<(Vec<f64>, u8)> = Vec::with_capacity(n);
    for _ in 0..config.n_signal {
        events.push((vec![s_x01.sample(&mut rng), s_x01.sample(&mut rng), s_x2.sample(&mut rng)], 1));
    }
    for _ in 0..config.n_background {
        events.push((vec![b_x0.sample(&mut rng), b_x1.sample(&mut rng), b_x2.sample(&mut rng)], 0));
    }
    if config.shuffle {
        events.shuffle(&mut rng);
    }

    let (inputs, labels): (Vec<Vec<f64>>, Vec<u8>) = events.into_iter().unzip();
    Ok(ToyData { inputs, labels })
}
