//! Nuisance perturbations of input features and the variation shapes they induce.
//!
//! Perturbations never touch the caller's inputs: each direction builds its
//! own modified copy.

use inferno_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::model::Classifier;
use crate::shape::to_shape_f64;
use crate::toy::ToyData;

/// Elementary change of one input feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Perturbation {
    /// `x[feature] += delta`
    Shift {
        /// Feature column.
        feature: usize,
        /// Additive offset.
        delta: f64,
    },
    /// `x[feature] *= factor`
    Scale {
        /// Feature column.
        feature: usize,
        /// Multiplicative factor.
        factor: f64,
    },
}

impl Perturbation {
    fn feature(&self) -> usize {
        match *self {
            Perturbation::Shift { feature, .. } | Perturbation::Scale { feature, .. } => feature,
        }
    }

    /// Perturbed copy of `inputs`.
    pub fn apply(&self, inputs: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        let feature = self.feature();
        let mut out = inputs.to_vec();
        for (i, row) in out.iter_mut().enumerate() {
            let x = row.get_mut(feature).ok_or_else(|| {
                Error::Validation(format!("event {i} has no feature {feature} to perturb"))
            })?;
            match *self {
                Perturbation::Shift { delta, .. } => *x += delta,
                Perturbation::Scale { factor, .. } => *x *= factor,
            }
        }
        Ok(out)
    }
}

/// One shape nuisance: the perturbations realizing `α = -1` and `α = +1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Systematic {
    /// Label used in logs.
    pub name: String,
    /// Perturbation at `α = -1`.
    pub down: Perturbation,
    /// Perturbation at `α = +1`.
    pub up: Perturbation,
}

/// Ordered shape nuisances; position `i` is shape nuisance `i`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystematicSet {
    systematics: Vec<Systematic>,
}

impl SystematicSet {
    /// Set from an explicit list.
    pub fn new(systematics: Vec<Systematic>) -> Self {
        Self { systematics }
    }

    /// Number of shape nuisances.
    pub fn len(&self) -> usize {
        self.systematics.len()
    }

    /// Whether there are no shape nuisances.
    pub fn is_empty(&self) -> bool {
        self.systematics.is_empty()
    }

    /// Iterate in nuisance order.
    pub fn iter(&self) -> impl Iterator<Item = &Systematic> {
        self.systematics.iter()
    }

    /// `(up, down)` shape stacks of `model` on perturbed copies of `inputs`.
    pub fn variation_shapes<M: Classifier + ?Sized>(
        &self,
        model: &M,
        inputs: &[Vec<f64>],
    ) -> Result<(Vec<Vec<f64>>, Vec<Vec<f64>>)> {
        let mut up = Vec::with_capacity(self.len());
        let mut down = Vec::with_capacity(self.len());
        for s in &self.systematics {
            down.push(to_shape_f64(&model.predict(&s.down.apply(inputs)?)?)?);
            up.push(to_shape_f64(&model.predict(&s.up.apply(inputs)?)?)?);
        }
        Ok((up, down))
    }
}

/// Nuisances of the INFERNO paper benchmark.
///
/// `r` shifts feature 0 of the background; `λ` rescales feature 2, with the
/// modified rates expressed relative to the nominal `lambda_nominal`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperSystematics {
    /// `(down, up)` shifts of `r`; `None` drops the nuisance.
    pub r_mods: Option<(f64, f64)>,
    /// `(down, up)` values of `λ`; `None` drops the nuisance.
    pub lambda_mods: Option<(f64, f64)>,
    /// Nominal `λ`.
    pub lambda_nominal: f64,
}

impl Default for PaperSystematics {
    fn default() -> Self {
        Self { r_mods: Some((-0.2, 0.2)), lambda_mods: Some((2.5, 3.5)), lambda_nominal: 3.0 }
    }
}

impl PaperSystematics {
    /// Build the ordered set (`r` first, then `λ`).
    pub fn build(&self) -> Result<SystematicSet> {
        let mut set = Vec::new();
        if let Some((d, u)) = self.r_mods {
            set.push(Systematic {
                name: "r".into(),
                down: Perturbation::Shift { feature: 0, delta: d },
                up: Perturbation::Shift { feature: 0, delta: u },
            });
        }
        if let Some((d, u)) = self.lambda_mods {
            if !self.lambda_nominal.is_finite() || self.lambda_nominal <= 0.0 {
                return Err(Error::Validation(format!(
                    "lambda_nominal must be finite and > 0, got {}",
                    self.lambda_nominal
                )));
            }
            set.push(Systematic {
                name: "lambda".into(),
                down: Perturbation::Scale { feature: 2, factor: d / self.lambda_nominal },
                up: Perturbation::Scale { feature: 2, factor: u / self.lambda_nominal },
            });
        }
        Ok(SystematicSet::new(set))
    }

    /// Inputs as they would look with nuisance values `r` and `lambda`
    /// (evaluation-time modification of nominal data).
    pub fn modify(&self, inputs: &[Vec<f64>], r: f64, lambda: f64) -> Result<Vec<Vec<f64>>> {
        if !r.is_finite() {
            return Err(Error::Validation(format!("r must be finite, got {r}")));
        }
        if !(lambda.is_finite() && lambda > 0.0 && self.lambda_nominal.is_finite() && self.lambda_nominal > 0.0) {
            return Err(Error::Validation(format!(
                "lambda ({lambda}) and lambda_nominal ({}) must be finite and > 0",
                self.lambda_nominal
            )));
        }
        let shifted = Perturbation::Shift { feature: 0, delta: r }.apply(inputs)?;
        Perturbation::Scale { feature: 2, factor: lambda / self.lambda_nominal }.apply(&shifted)
    }

    /// Copy of `data` with [`modify`](Self::modify) applied to background events only.
    pub fn modify_background(&self, data: &ToyData, r: f64, lambda: f64) -> Result<ToyData> {
        let idx: Vec<usize> = (0..data.len()).filter(|&i| data.labels[i] == 0).collect();
        let rows: Vec<Vec<f64>> = idx.iter().map(|&i| data.inputs[i].clone()).collect();
        let mut out = data.clone();
        for (i, row) in idx.into_iter().zip(self.modify(&rows, r, lambda)?) {
            out.inputs[i] = row;
        }
        Ok(out)
    }
}
