//! Plain-valued binned model description, as read from JSON.

use inferno_ad::{Tape, Var};
use inferno_core::traits::LikelihoodObjective;
use inferno_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::nll::{AsimovModel, AuxConstraints, NuisanceLayout, Variations};
use crate::oracle::hessian;

/// Signal/background shapes, templates and constraints in `f64`.
///
/// Empty template lists mean "no shape variation" for that process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinnedSpec {
    /// True signal yield.
    pub s_true: f64,
    /// True background yield.
    pub b_true: f64,
    /// Nominal signal shape.
    pub signal: Vec<f64>,
    /// Nominal background shape.
    pub background: Vec<f64>,
    /// Signal templates at `α = +1`.
    #[serde(default)]
    pub signal_up: Vec<Vec<f64>>,
    /// Signal templates at `α = -1`.
    #[serde(default)]
    pub signal_down: Vec<Vec<f64>>,
    /// Background templates at `α = +1`.
    #[serde(default)]
    pub background_up: Vec<Vec<f64>>,
    /// Background templates at `α = -1`.
    #[serde(default)]
    pub background_down: Vec<Vec<f64>>,
    /// Number of signal-normalization nuisances.
    #[serde(default)]
    pub n_s_norm: usize,
    /// Number of background-normalization nuisances.
    #[serde(default)]
    pub n_b_norm: usize,
    /// Auxiliary constraints.
    #[serde(default)]
    pub constraints: AuxConstraints,
}

impl BinnedSpec {
    /// Parse from a JSON string.
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Record the shapes as tape constants and build the model.
    pub fn build(&self, tape: &mut Tape) -> Result<AsimovModel> {
        for (name, shape) in [("signal", &self.signal), ("background", &self.background)] {
            if let Some(v) = shape.iter().find(|v| !v.is_finite() || **v < 0.0) {
                return Err(Error::Validation(format!("{name} shape has invalid bin value {v}")));
            }
        }
        let f_s: Vec<Var> = self.signal.iter().map(|&v| tape.constant(v)).collect();
        let f_b: Vec<Var> = self.background.iter().map(|&v| tape.constant(v)).collect();
        let mut builder = AsimovModel::builder(self.s_true, self.b_true, f_s, f_b)
            .norm_nuisances(self.n_s_norm, self.n_b_norm)
            .constraints(self.constraints.clone());
        if !self.signal_up.is_empty() || !self.signal_down.is_empty() {
            builder = builder.signal_variations(Variations::constants(tape, &self.signal_up, &self.signal_down));
        }
        if !self.background_up.is_empty() || !self.background_down.is_empty() {
            builder =
                builder.background_variations(Variations::constants(tape, &self.background_up, &self.background_down));
        }
        builder.build()
    }

    /// Validated [`LikelihoodObjective`] over `[alpha..., mu]`.
    pub fn objective(&self) -> Result<BinnedObjective> {
        let mut tape = Tape::new();
        let layout = self.build(&mut tape)?.layout();
        Ok(BinnedObjective { spec: self.clone(), layout })
    }
}

/// NLL of a [`BinnedSpec`] as a function of `[alpha..., mu]`, with AD derivatives.
#[derive(Debug, Clone)]
pub struct BinnedObjective {
    spec: BinnedSpec,
    layout: NuisanceLayout,
}

impl BinnedObjective {
    fn record(&self, params: &[f64]) -> Result<(Tape, Vec<Var>, Var)> {
        if params.len() != self.n_parameters() {
            return Err(Error::Validation(format!(
                "expected {} parameters, got {}",
                self.n_parameters(),
                params.len()
            )));
        }
        let mut tape = Tape::with_capacity(256);
        let model = self.spec.build(&mut tape)?;
        let asimov = model.asimov(&mut tape);
        let vars: Vec<Var> = params.iter().map(|&p| tape.var(p)).collect();
        let n = self.layout.len();
        let nll = model.nll(&mut tape, &asimov, vars[n], &vars[..n])?;
        Ok((tape, vars, nll))
    }
}

impl LikelihoodObjective for BinnedObjective {
    fn n_parameters(&self) -> usize {
        self.layout.len() + 1
    }

    fn parameter_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.layout.shape().map(|i| format!("alpha_shape_{i}")).collect();
        names.extend((0..self.layout.n_s_norm).map(|i| format!("alpha_s_norm_{i}")));
        names.extend((0..self.layout.n_b_norm).map(|i| format!("alpha_b_norm_{i}")));
        names.push("mu".to_string());
        names
    }

    fn nll(&self, params: &[f64]) -> Result<f64> {
        let (tape, _, nll) = self.record(params)?;
        Ok(tape.val(nll))
    }

    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        let (mut tape, vars, nll) = self.record(params)?;
        tape.backward(nll);
        Ok(vars.iter().map(|&v| tape.adjoint(v)).collect())
    }

    fn hessian(&self, params: &[f64]) -> Result<Vec<f64>> {
        let (mut tape, vars, nll) = self.record(params)?;
        let h = hessian(&mut tape, nll, &vars)?;
        Ok(h.iter().flat_map(|row| tape.vals(row)).collect())
    }
}
