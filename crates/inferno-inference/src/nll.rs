//! Binned Poisson NLL against an Asimov dataset.
//!
//! Expected counts are `s_exp · f_s(α) + b_exp · f_b(α)` with
//! `s_exp = mu + Σ s_norm`, `b_exp = b_true + Σ b_norm`; the observation is
//! the noiseless expectation at the true parameters,
//! `s_true · f_s_nom + b_true · f_b_nom`.
//!
//! The nuisance vector is laid out as `[shape..., s_norm..., b_norm...]`
//! (see [`NuisanceLayout`]). Shape nuisance `i` morphs the signal and/or the
//! background with their respective `i`-th up/down templates.

use std::ops::Range;

use inferno_ad::{Tape, Var};
use inferno_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::interp::interp_shape_on_tape;

/// Auxiliary distribution constraining one nuisance parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Constraint {
    /// Gaussian pull term `N(mean, sigma)`.
    Normal {
        /// Centre of the constraint.
        mean: f64,
        /// Width of the constraint; must be finite and > 0.
        sigma: f64,
    },
}

impl Constraint {
    /// Standard-normal pull `N(0, 1)`.
    pub fn unit_normal() -> Self {
        Constraint::Normal { mean: 0.0, sigma: 1.0 }
    }

    fn validate(&self) -> Result<()> {
        match *self {
            Constraint::Normal { mean, sigma } => {
                if !mean.is_finite() {
                    return Err(Error::Validation(format!("constraint mean must be finite, got {mean}")));
                }
                if !sigma.is_finite() || sigma <= 0.0 {
                    return Err(Error::Validation(format!("constraint sigma must be finite and > 0, got {sigma}")));
                }
                Ok(())
            }
        }
    }

    /// `log p(x)` recorded on the tape.
    pub fn logpdf_on_tape(&self, tape: &mut Tape, x: Var) -> Result<Var> {
        match *self {
            Constraint::Normal { mean, sigma } => inferno_prob::normal::logpdf_on_tape(tape, x, mean, sigma),
        }
    }
}

/// Auxiliary constraints per nuisance group. `None` leaves the whole group free.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuxConstraints {
    /// One constraint per shape nuisance.
    pub shape: Option<Vec<Constraint>>,
    /// One constraint per signal-normalization nuisance.
    pub s_norm: Option<Vec<Constraint>>,
    /// One constraint per background-normalization nuisance.
    pub b_norm: Option<Vec<Constraint>>,
}

impl AuxConstraints {
    /// Every present group must hold one valid constraint per nuisance of `layout`.
    pub fn check(&self, layout: &NuisanceLayout) -> Result<()> {
        let groups = [
            ("shape", &self.shape, layout.n_shape),
            ("s_norm", &self.s_norm, layout.n_s_norm),
            ("b_norm", &self.b_norm, layout.n_b_norm),
        ];
        for (name, aux, n) in groups {
            let Some(cs) = aux else { continue };
            if cs.len() != n {
                return Err(Error::Validation(format!("{name}: {} auxiliary constraints for {n} nuisances", cs.len())));
            }
            for c in cs {
                c.validate()?;
            }
        }
        Ok(())
    }
}

/// Partition of the flat nuisance vector into disjoint index groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NuisanceLayout {
    /// Number of shape nuisances.
    pub n_shape: usize,
    /// Number of signal-normalization nuisances.
    pub n_s_norm: usize,
    /// Number of background-normalization nuisances.
    pub n_b_norm: usize,
}

impl NuisanceLayout {
    /// Total number of nuisances.
    pub fn len(&self) -> usize {
        self.n_shape + self.n_s_norm + self.n_b_norm
    }

    /// Whether there are no nuisances at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Indices of the shape nuisances.
    pub fn shape(&self) -> Range<usize> {
        0..self.n_shape
    }

    /// Indices of the signal-normalization nuisances.
    pub fn s_norm(&self) -> Range<usize> {
        self.n_shape..self.n_shape + self.n_s_norm
    }

    /// Indices of the background-normalization nuisances.
    pub fn b_norm(&self) -> Range<usize> {
        let start = self.n_shape + self.n_s_norm;
        start..start + self.n_b_norm
    }
}

/// Up/down templates for one process: `up[i]`, `down[i]` belong to shape nuisance `i`.
#[derive(Debug, Clone)]
pub struct Variations {
    /// Templates at `α_i = +1`.
    pub up: Vec<Vec<Var>>,
    /// Templates at `α_i = -1`.
    pub down: Vec<Vec<Var>>,
}

impl Variations {
    /// Record `f64` templates as tape constants.
    pub fn constants(tape: &mut Tape, up: &[Vec<f64>], down: &[Vec<f64>]) -> Self {
        let rec = |tape: &mut Tape, m: &[Vec<f64>]| -> Vec<Vec<Var>> {
            m.iter().map(|row| row.iter().map(|&v| tape.constant(v)).collect()).collect()
        };
        let up = rec(tape, up);
        let down = rec(tape, down);
        Self { up, down }
    }

    /// Number of shape nuisances these templates describe.
    pub fn len(&self) -> usize {
        self.up.len()
    }

    /// Whether there are no templates.
    pub fn is_empty(&self) -> bool {
        self.up.is_empty()
    }
}

/// Builder for [`AsimovModel`]; all configuration errors surface in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct AsimovModelBuilder {
    s_true: f64,
    b_true: f64,
    f_s: Vec<Var>,
    f_b: Vec<Var>,
    s_var: Option<Variations>,
    b_var: Option<Variations>,
    n_s_norm: usize,
    n_b_norm: usize,
    aux: AuxConstraints,
}

impl AsimovModelBuilder {
    /// Signal/background true yields and nominal shapes.
    pub fn new(s_true: f64, b_true: f64, f_s: Vec<Var>, f_b: Vec<Var>) -> Self {
        Self {
            s_true,
            b_true,
            f_s,
            f_b,
            s_var: None,
            b_var: None,
            n_s_norm: 0,
            n_b_norm: 0,
            aux: AuxConstraints::default(),
        }
    }

    /// Shape variation templates for the signal.
    pub fn signal_variations(mut self, v: Variations) -> Self {
        self.s_var = Some(v);
        self
    }

    /// Shape variation templates for the background.
    pub fn background_variations(mut self, v: Variations) -> Self {
        self.b_var = Some(v);
        self
    }

    /// Number of additive signal / background normalization nuisances.
    pub fn norm_nuisances(mut self, n_s_norm: usize, n_b_norm: usize) -> Self {
        self.n_s_norm = n_s_norm;
        self.n_b_norm = n_b_norm;
        self
    }

    /// Auxiliary constraints per nuisance group.
    pub fn constraints(mut self, aux: AuxConstraints) -> Self {
        self.aux = aux;
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<AsimovModel> {
        if !self.s_true.is_finite() || self.s_true < 0.0 {
            return Err(Error::Validation(format!("s_true must be finite and >= 0, got {}", self.s_true)));
        }
        if !self.b_true.is_finite() || self.b_true < 0.0 {
            return Err(Error::Validation(format!("b_true must be finite and >= 0, got {}", self.b_true)));
        }
        let n_bins = self.f_s.len();
        if n_bins == 0 {
            return Err(Error::Validation("shapes must have at least one bin".into()));
        }
        if self.f_b.len() != n_bins {
            return Err(Error::Validation(format!(
                "signal shape has {} bins, background shape has {}",
                n_bins,
                self.f_b.len()
            )));
        }

        let check_templates = |name: &str, v: &Variations| -> Result<()> {
            if v.up.len() != v.down.len() {
                return Err(Error::Validation(format!(
                    "{name}: {} up templates but {} down templates",
                    v.up.len(),
                    v.down.len()
                )));
            }
            for row in v.up.iter().chain(v.down.iter()) {
                if row.len() != n_bins {
                    return Err(Error::Validation(format!(
                        "{name}: template has {} bins, nominal has {n_bins}",
                        row.len()
                    )));
                }
            }
            Ok(())
        };
        if let Some(v) = &self.s_var {
            check_templates("signal variations", v)?;
        }
        if let Some(v) = &self.b_var {
            check_templates("background variations", v)?;
        }

        let n_shape = match (&self.s_var, &self.b_var) {
            (Some(s), Some(b)) if s.len() != b.len() => {
                return Err(Error::Validation(format!(
                    "signal has {} shape variations, background has {}",
                    s.len(),
                    b.len()
                )));
            }
            (Some(s), _) => s.len(),
            (None, Some(b)) => b.len(),
            (None, None) => 0,
        };
        let layout = NuisanceLayout { n_shape, n_s_norm: self.n_s_norm, n_b_norm: self.n_b_norm };

        self.aux.check(&layout)?;

        Ok(AsimovModel {
            s_true: self.s_true,
            b_true: self.b_true,
            f_s: self.f_s,
            f_b: self.f_b,
            s_var: self.s_var,
            b_var: self.b_var,
            layout,
            aux: self.aux,
        })
    }
}

/// Validated binned model whose shapes live on a tape.
#[derive(Debug, Clone)]
pub struct AsimovModel {
    s_true: f64,
    b_true: f64,
    f_s: Vec<Var>,
    f_b: Vec<Var>,
    s_var: Option<Variations>,
    b_var: Option<Variations>,
    layout: NuisanceLayout,
    aux: AuxConstraints,
}

impl AsimovModel {
    /// Start building a model.
    pub fn builder(s_true: f64, b_true: f64, f_s: Vec<Var>, f_b: Vec<Var>) -> AsimovModelBuilder {
        AsimovModelBuilder::new(s_true, b_true, f_s, f_b)
    }

    /// Nuisance index groups.
    pub fn layout(&self) -> NuisanceLayout {
        self.layout
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.f_s.len()
    }

    /// True signal yield (the POI value the Asimov data is built at).
    pub fn s_true(&self) -> f64 {
        self.s_true
    }

    /// True background yield.
    pub fn b_true(&self) -> f64 {
        self.b_true
    }

    /// Asimov bin counts `s_true · f_s + b_true · f_b` (nominal shapes).
    pub fn asimov(&self, tape: &mut Tape) -> Vec<Var> {
        self.f_s
            .iter()
            .zip(&self.f_b)
            .map(|(&s, &b)| {
                let sc = tape.mul_f64(s, self.s_true);
                let bc = tape.mul_f64(b, self.b_true);
                tape.add(sc, bc)
            })
            .collect()
    }

    fn check_alpha(&self, alpha: &[Var]) -> Result<()> {
        if alpha.len() != self.layout.len() {
            return Err(Error::Validation(format!(
                "nuisance vector has {} entries, layout expects {}",
                alpha.len(),
                self.layout.len()
            )));
        }
        Ok(())
    }

    /// Expected bin counts at (`mu`, `alpha`).
    pub fn expected(&self, tape: &mut Tape, mu: Var, alpha: &[Var]) -> Result<Vec<Var>> {
        self.check_alpha(alpha)?;
        let shape_alpha = &alpha[self.layout.shape()];

        let f_s = match &self.s_var {
            Some(v) => interp_shape_on_tape(tape, shape_alpha, &self.f_s, &v.up, &v.down)?,
            None => self.f_s.clone(),
        };
        let f_b = match &self.b_var {
            Some(v) => interp_shape_on_tape(tape, shape_alpha, &self.f_b, &v.up, &v.down)?,
            None => self.f_b.clone(),
        };

        let s_exp = if self.layout.n_s_norm > 0 {
            let extra = tape.sum(&alpha[self.layout.s_norm()]);
            tape.add(mu, extra)
        } else {
            mu
        };
        let b_exp = if self.layout.n_b_norm > 0 {
            let extra = tape.sum(&alpha[self.layout.b_norm()]);
            tape.add_f64(extra, self.b_true)
        } else {
            tape.constant(self.b_true)
        };

        Ok(f_s
            .iter()
            .zip(&f_b)
            .map(|(&s, &b)| {
                let sc = tape.mul(s_exp, s);
                let bc = tape.mul(b_exp, b);
                tape.add(sc, bc)
            })
            .collect())
    }

    /// `-Σ log Poisson(asimov; expected) - Σ log aux(α)`.
    pub fn nll(&self, tape: &mut Tape, asimov: &[Var], mu: Var, alpha: &[Var]) -> Result<Var> {
        if asimov.len() != self.n_bins() {
            return Err(Error::Validation(format!(
                "asimov data has {} bins, model has {}",
                asimov.len(),
                self.n_bins()
            )));
        }
        let expected = self.expected(tape, mu, alpha)?;

        let mut terms = Vec::with_capacity(expected.len() + alpha.len());
        for (&obs, &exp) in asimov.iter().zip(&expected) {
            terms.push(inferno_prob::poisson::nll_on_tape(tape, obs, exp));
        }

        let groups = [
            (self.layout.shape(), &self.aux.shape),
            (self.layout.s_norm(), &self.aux.s_norm),
            (self.layout.b_norm(), &self.aux.b_norm),
        ];
        for (range, aux) in groups {
            let Some(cs) = aux else { continue };
            for (&a, c) in alpha[range].iter().zip(cs) {
                let lp = c.logpdf_on_tape(tape, a)?;
                terms.push(tape.neg(lp));
            }
        }

        Ok(tape.sum(&terms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn consts(t: &mut Tape, v: &[f64]) -> Vec<Var> {
        v.iter().map(|&x| t.constant(x)).collect()
    }

    fn plain_nll(s_true: f64, b_true: f64, mu: f64, f_s: &[f64], f_b: &[f64]) -> f64 {
        f_s.iter()
            .zip(f_b)
            .map(|(&s, &b)| {
                let obs = s_true * s + b_true * b;
                let exp = mu * s + b_true * b;
                -inferno_prob::poisson::logpmf(obs, exp).unwrap()
            })
            .sum()
    }

    #[test]
    fn test_zero_alpha_reduces_to_plain_poisson() {
        let mut t = Tape::new();
        let f_s = consts(&mut t, &[0.7, 0.2, 0.1]);
        let f_b = consts(&mut t, &[0.2, 0.3, 0.5]);
        let up = vec![vec![0.25, 0.3, 0.45]];
        let down = vec![vec![0.15, 0.3, 0.55]];
        let model = AsimovModel::builder(50.0, 1000.0, f_s, f_b)
            .background_variations(Variations::constants(&mut t, &up, &down))
            .norm_nuisances(1, 1)
            .build()
            .unwrap();
        let asimov = model.asimov(&mut t);
        let mu = t.constant(42.0);
        let alpha: Vec<Var> = (0..3).map(|_| t.var(0.0)).collect();
        let nll = model.nll(&mut t, &asimov, mu, &alpha).unwrap();
        let expect = plain_nll(50.0, 1000.0, 42.0, &[0.7, 0.2, 0.1], &[0.2, 0.3, 0.5]);
        assert_relative_eq!(t.val(nll), expect, epsilon = 1e-9);
    }

    #[test]
    fn test_nll_decreases_towards_asimov() {
        let f_s = [0.6, 0.4];
        let f_b = [0.5, 0.5];
        let values: Vec<f64> =
            [20.0, 35.0, 45.0, 50.0].iter().map(|&mu| plain_nll(50.0, 1000.0, mu, &f_s, &f_b)).collect();
        for w in values.windows(2) {
            assert!(w[1] < w[0], "NLL must decrease towards the true mu: {values:?}");
        }
        assert!(values[3].is_finite());
        assert!(plain_nll(50.0, 1000.0, 55.0, &f_s, &f_b) > values[3]);
    }

    #[test]
    fn test_gaussian_constraint_adds_quadratic_penalty() {
        let mut t = Tape::new();
        let f_s = consts(&mut t, &[0.5, 0.5]);
        let f_b = consts(&mut t, &[0.5, 0.5]);
        let make = |t: &mut Tape, aux: AuxConstraints| {
            AsimovModel::builder(50.0, 1000.0, f_s.clone(), f_b.clone())
                .norm_nuisances(0, 1)
                .constraints(aux)
                .build()
                .map(|m| {
                    let asimov = m.asimov(t);
                    let mu = t.constant(50.0);
                    let a = t.var(0.0);
                    let nll = m.nll(t, &asimov, mu, &[a]).unwrap();
                    t.val(nll)
                })
                .unwrap()
        };
        let free = make(&mut t, AuxConstraints::default());
        let constrained = make(
            &mut t,
            AuxConstraints { b_norm: Some(vec![Constraint::unit_normal()]), ..Default::default() },
        );
        assert_relative_eq!(constrained - free, inferno_prob::normal::LN_SQRT_2PI, epsilon = 1e-9);
    }

    #[test]
    fn test_constraint_count_mismatch_fails_at_build() {
        let mut t = Tape::new();
        let f = consts(&mut t, &[0.5, 0.5]);
        let err = AsimovModel::builder(50.0, 1000.0, f.clone(), f.clone())
            .norm_nuisances(1, 0)
            .constraints(AuxConstraints {
                s_norm: Some(vec![Constraint::unit_normal(), Constraint::unit_normal()]),
                ..Default::default()
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_aux_check_covers_every_group() {
        let layout = NuisanceLayout { n_shape: 2, n_s_norm: 1, n_b_norm: 0 };
        let ok = AuxConstraints {
            shape: Some(vec![Constraint::unit_normal(); 2]),
            s_norm: Some(vec![Constraint::Normal { mean: 0.0, sigma: 5.0 }]),
            b_norm: None,
        };
        assert!(ok.check(&layout).is_ok());

        let extra_b = AuxConstraints { b_norm: Some(vec![Constraint::unit_normal()]), ..ok.clone() };
        assert!(matches!(extra_b.check(&layout), Err(Error::Validation(_))));

        let bad_sigma = AuxConstraints { s_norm: Some(vec![Constraint::Normal { mean: 0.0, sigma: -1.0 }]), ..ok };
        assert!(matches!(bad_sigma.check(&layout), Err(Error::Validation(_))));
    }

    #[test]
    fn test_signal_background_template_mismatch_fails_at_build() {
        let mut t = Tape::new();
        let f = consts(&mut t, &[0.5, 0.5]);
        let one = Variations::constants(&mut t, &[vec![0.6, 0.4]], &[vec![0.4, 0.6]]);
        let two = Variations::constants(
            &mut t,
            &[vec![0.6, 0.4], vec![0.55, 0.45]],
            &[vec![0.4, 0.6], vec![0.45, 0.55]],
        );
        let err = AsimovModel::builder(50.0, 1000.0, f.clone(), f.clone())
            .signal_variations(one)
            .background_variations(two)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_layout_ranges_partition_vector() {
        let l = NuisanceLayout { n_shape: 2, n_s_norm: 1, n_b_norm: 3 };
        assert_eq!(l.shape(), 0..2);
        assert_eq!(l.s_norm(), 2..3);
        assert_eq!(l.b_norm(), 3..6);
        assert_eq!(l.len(), 6);
    }

    #[test]
    fn test_norm_nuisances_shift_yields() {
        let mut t = Tape::new();
        let f_s = consts(&mut t, &[1.0]);
        let f_b = consts(&mut t, &[1.0]);
        let model = AsimovModel::builder(10.0, 100.0, f_s, f_b).norm_nuisances(1, 1).build().unwrap();
        let mu = t.constant(10.0);
        let alpha = [t.var(2.0), t.var(-5.0)];
        let exp = model.expected(&mut t, mu, &alpha).unwrap();
        assert_relative_eq!(t.val(exp[0]), 12.0 + 95.0, epsilon = 1e-12);
    }
}
