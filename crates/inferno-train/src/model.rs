//! Reference classifier: a dense ReLU network with a temperature softmax head.

use inferno_ad::{Tape, Var};
use inferno_core::{Error, Result};
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

/// A classifier whose weights can be recorded on the tape.
///
/// Outputs are per-event soft assignments over the summary-statistic bins
/// (rows sum to 1).
pub trait Classifier {
    /// Number of input features.
    fn n_inputs(&self) -> usize;

    /// Number of output bins.
    fn n_outputs(&self) -> usize;

    /// Flat weight vector.
    fn params(&self) -> &[f64];

    /// Mutable flat weight vector (for the optimizer).
    fn params_mut(&mut self) -> &mut [f64];

    /// Forward pass with `weights` as tape nodes.
    fn forward_on_tape(&self, tape: &mut Tape, weights: &[Var], inputs: &[Vec<f64>]) -> Result<Vec<Vec<Var>>>;

    /// Forward pass on plain values (no gradient tracking).
    fn predict(&self, inputs: &[Vec<f64>]) -> Result<Vec<Vec<f64>>>;

    /// Record the current weights as tape variables.
    fn weights_on_tape(&self, tape: &mut Tape) -> Vec<Var> {
        self.params().iter().map(|&w| tape.var(w)).collect()
    }
}

/// Multi-layer perceptron.
///
/// Layer `l` stores an `out × in` row-major weight matrix followed by `out`
/// biases. Hidden layers use ReLU; the head is `softmax(z / temperature)`.
#[derive(Debug, Clone)]
pub struct Mlp {
    sizes: Vec<usize>,
    params: Vec<f64>,
    temperature: f64,
}

impl Mlp {
    /// He-normal initialized network with layer widths `sizes` (input first).
    pub fn new(sizes: &[usize], temperature: f64, seed: u64) -> Result<Self> {
        if sizes.len() < 2 || sizes.contains(&0) {
            return Err(Error::Validation(format!("invalid layer sizes {sizes:?}")));
        }
        if !temperature.is_finite() || temperature <= 0.0 {
            return Err(Error::Validation(format!("temperature must be finite and > 0, got {temperature}")));
        }
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let mut params = Vec::new();
        for w in sizes.windows(2) {
            let (n_in, n_out) = (w[0], w[1]);
            let std = (2.0 / n_in as f64).sqrt();
            let dist = Normal::new(0.0, std).map_err(|e| Error::Validation(format!("weight init: {e}")))?;
            params.extend((0..n_in * n_out).map(|_| dist.sample(&mut rng)));
            params.extend(std::iter::repeat_n(0.0, n_out));
        }
        Ok(Self { sizes: sizes.to_vec(), params, temperature })
    }

    /// Softmax temperature.
    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Layer widths, input first.
    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    fn n_params(&self) -> usize {
        self.sizes.windows(2).map(|w| w[0] * w[1] + w[1]).sum()
    }

    fn check_inputs(&self, inputs: &[Vec<f64>]) -> Result<()> {
        let n_in = self.sizes[0];
        if let Some((i, row)) = inputs.iter().enumerate().find(|(_, r)| r.len() != n_in) {
            return Err(Error::Validation(format!("event {i} has {} features, network expects {n_in}", row.len())));
        }
        Ok(())
    }
}

impl Classifier for Mlp {
    fn n_inputs(&self) -> usize {
        self.sizes[0]
    }

    fn n_outputs(&self) -> usize {
        self.sizes[self.sizes.len() - 1]
    }

    fn params(&self) -> &[f64] {
        &self.params
    }

    fn params_mut(&mut self) -> &mut [f64] {
        &mut self.params
    }

    fn forward_on_tape(&self, tape: &mut Tape, weights: &[Var], inputs: &[Vec<f64>]) -> Result<Vec<Vec<Var>>> {
        if weights.len() != self.n_params() {
            return Err(Error::Validation(format!(
                "network has {} parameters, got {} weights",
                self.n_params(),
                weights.len()
            )));
        }
        self.check_inputs(inputs)?;
        let n_layers = self.sizes.len() - 1;
        let inv_t = 1.0 / self.temperature;

        let mut out = Vec::with_capacity(inputs.len());
        for x in inputs {
            let mut h: Vec<Var> = x.iter().map(|&v| tape.constant(v)).collect();
            let mut offset = 0;
            for (l, w) in self.sizes.windows(2).enumerate() {
                let (n_in, n_out) = (w[0], w[1]);
                let bias = offset + n_in * n_out;
                let mut z = Vec::with_capacity(n_out);
                for o in 0..n_out {
                    let row = &weights[offset + o * n_in..offset + (o + 1) * n_in];
                    let mut terms: Vec<Var> = row.iter().zip(&h).map(|(&wi, &hi)| tape.mul(wi, hi)).collect();
                    terms.push(weights[bias + o]);
                    let pre = tape.sum(&terms);
                    z.push(if l + 1 < n_layers { tape.max_f64(pre, 0.0) } else { pre });
                }
                offset = bias + n_out;
                h = z;
            }

            // softmax(z / T), shifted by the (constant) max logit
            let z_max = h.iter().map(|&v| tape.val(v)).fold(f64::NEG_INFINITY, f64::max);
            let exps: Vec<Var> = h
                .iter()
                .map(|&v| {
                    let shifted = tape.sub_f64(v, z_max);
                    let scaled = tape.mul_f64(shifted, inv_t);
                    tape.exp(scaled)
                })
                .collect();
            let norm = tape.sum(&exps);
            out.push(exps.into_iter().map(|e| tape.div(e, norm)).collect());
        }
        Ok(out)
    }

    fn predict(&self, inputs: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        self.check_inputs(inputs)?;
        let n_layers = self.sizes.len() - 1;
        let w = &self.params;

        let mut out = Vec::with_capacity(inputs.len());
        for x in inputs {
            let mut h = x.clone();
            let mut offset = 0;
            for (l, s) in self.sizes.windows(2).enumerate() {
                let (n_in, n_out) = (s[0], s[1]);
                let bias = offset + n_in * n_out;
                h = (0..n_out)
                    .map(|o| {
                        let row = &w[offset + o * n_in..offset + (o + 1) * n_in];
                        let pre: f64 = row.iter().zip(&h).map(|(a, b)| a * b).sum::<f64>() + w[bias + o];
                        if l + 1 < n_layers { pre.max(0.0) } else { pre }
                    })
                    .collect();
                offset = bias + n_out;
            }
            let z_max = h.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let exps: Vec<f64> = h.iter().map(|&v| ((v - z_max) / self.temperature).exp()).collect();
            let norm: f64 = exps.iter().sum();
            out.push(exps.into_iter().map(|e| e / norm).collect());
        }
        Ok(out)
    }
}
