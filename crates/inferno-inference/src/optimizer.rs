//! Fixed-budget Newton-Raphson on the tape.
//!
//! Each step evaluates the objective at the current parameters, takes its
//! gradient and curvature through [`crate::oracle`], and moves every
//! coordinate by `clamp(lr · g / (h + ε), -c, c)` (or the clamped
//! multivariate step `lr · H⁻¹ g` with [`CurvatureMode::Full`]). There is no
//! convergence test: the graph size per call is fixed by `n_steps`.

use std::fmt;

use inferno_ad::{Tape, Var};
use inferno_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::linalg::invert_on_tape;
use crate::oracle::{CurvatureMode, Curvature, derivatives};

/// How the Newton steps relate to the graph seen by the final loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepGraph {
    /// Every step stays on the tape; the loss differentiates through the
    /// whole iteration.
    #[default]
    Unrolled,
    /// Steps use plain values and their sub-graphs are discarded; the loss
    /// only sees the objective at the final (constant) parameters.
    Detached,
}

/// Configuration for [`NewtonProfiler`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    /// Number of Newton steps (fixed, no early exit).
    pub n_steps: usize,
    /// Step scale.
    pub lr: f64,
    /// Per-coordinate step magnitude limit.
    pub step_clamp: f64,
    /// Added to the curvature before dividing.
    pub curvature_eps: f64,
    /// Second-order information used for the steps.
    pub curvature: CurvatureMode,
    /// Whether steps are differentiated through.
    pub step_graph: StepGraph,
    /// Fisher mode: profile the parameter of interest together with the nuisances.
    pub profile_poi: bool,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            n_steps: 100,
            lr: 0.1,
            step_clamp: 100.0,
            curvature_eps: 1e-7,
            curvature: CurvatureMode::Diagonal,
            step_graph: StepGraph::Unrolled,
            profile_poi: true,
        }
    }
}

impl ProfilerConfig {
    /// Reject non-finite or non-positive step settings.
    pub fn validate(&self) -> Result<()> {
        if !self.lr.is_finite() || self.lr <= 0.0 {
            return Err(Error::Validation(format!("lr must be finite and > 0, got {}", self.lr)));
        }
        if !self.step_clamp.is_finite() || self.step_clamp <= 0.0 {
            return Err(Error::Validation(format!(
                "step_clamp must be finite and > 0, got {}",
                self.step_clamp
            )));
        }
        if !self.curvature_eps.is_finite() || self.curvature_eps < 0.0 {
            return Err(Error::Validation(format!(
                "curvature_eps must be finite and >= 0, got {}",
                self.curvature_eps
            )));
        }
        Ok(())
    }
}

/// Outcome of [`NewtonProfiler::minimize`].
#[derive(Debug, Clone)]
pub struct NewtonResult {
    /// Parameters after the last step.
    pub params: Vec<Var>,
    /// Objective evaluated at `params`.
    pub fval: Var,
    /// Steps taken.
    pub n_steps: usize,
    /// Largest absolute coordinate step of the last iteration.
    pub last_step: f64,
}

/// Plain-value summary of a [`NewtonResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewtonSummary {
    /// Parameter values after the last step.
    pub parameters: Vec<f64>,
    /// Objective value at `parameters`.
    pub fval: f64,
    /// Steps taken.
    pub n_steps: usize,
    /// Largest absolute coordinate step of the last iteration.
    pub last_step: f64,
}

impl NewtonResult {
    /// Read the values off the tape.
    pub fn summary(&self, tape: &Tape) -> NewtonSummary {
        NewtonSummary {
            parameters: tape.vals(&self.params),
            fval: tape.val(self.fval),
            n_steps: self.n_steps,
            last_step: self.last_step,
        }
    }
}

impl fmt::Display for NewtonSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NewtonSummary(fval={:.6}, n_steps={}, last_step={:.3e}, n_params={})",
            self.fval,
            self.n_steps,
            self.last_step,
            self.parameters.len()
        )
    }
}

/// Fixed-budget Newton minimizer.
#[derive(Debug, Clone, Default)]
pub struct NewtonProfiler {
    config: ProfilerConfig,
}

impl NewtonProfiler {
    /// Create a profiler, validating the configuration.
    pub fn new(config: ProfilerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Active configuration.
    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    /// Minimize `eval` starting from `init`.
    ///
    /// `init` must be distinct tape nodes; `eval` records the objective for a
    /// given parameter vector and is called `n_steps + 1` times. In
    /// [`StepGraph::Detached`] mode everything `eval` records during a step
    /// is truncated away once the step has been taken, so callers must not
    /// keep handles created inside `eval`.
    pub fn minimize<F>(&self, tape: &mut Tape, init: &[Var], mut eval: F) -> Result<NewtonResult>
    where
        F: FnMut(&mut Tape, &[Var]) -> Result<Var>,
    {
        let cfg = &self.config;
        let mut params = init.to_vec();
        let mut last_step = 0.0_f64;

        for step in 0..cfg.n_steps {
            if params.is_empty() {
                break;
            }
            let mark = tape.len();
            let f = eval(tape, &params)?;
            ensure_finite("NLL", tape.val(f), step)?;

            let d = derivatives(tape, f, &params, cfg.curvature)?;
            for (i, &g) in d.grad.iter().enumerate() {
                ensure_finite(&format!("gradient[{i}]"), tape.val(g), step)?;
            }

            let raw = match &d.curvature {
                Curvature::Diagonal(h) => {
                    let mut out = Vec::with_capacity(h.len());
                    for (i, (&g, &hi)) in d.grad.iter().zip(h).enumerate() {
                        ensure_finite(&format!("curvature[{i}]"), tape.val(hi), step)?;
                        let denom = tape.add_f64(hi, cfg.curvature_eps);
                        let ratio = tape.div(g, denom);
                        out.push(tape.mul_f64(ratio, cfg.lr));
                    }
                    out
                }
                Curvature::Full(h) => {
                    let mut shifted = Vec::with_capacity(h.len());
                    for (i, row) in h.iter().enumerate() {
                        let mut r = Vec::with_capacity(row.len());
                        for (j, &hij) in row.iter().enumerate() {
                            ensure_finite(&format!("hessian[{i}][{j}]"), tape.val(hij), step)?;
                            r.push(if i == j { tape.add_f64(hij, cfg.curvature_eps) } else { hij });
                        }
                        shifted.push(r);
                    }
                    let inv = invert_on_tape(tape, &shifted)?;
                    let mut out = Vec::with_capacity(inv.len());
                    for row in &inv {
                        let terms: Vec<Var> = row.iter().zip(&d.grad).map(|(&a, &g)| tape.mul(a, g)).collect();
                        let newton = tape.sum(&terms);
                        out.push(tape.mul_f64(newton, cfg.lr));
                    }
                    out
                }
            };

            let steps: Vec<Var> =
                raw.iter().map(|&s| tape.clamp(s, -cfg.step_clamp, cfg.step_clamp)).collect();
            last_step = steps.iter().map(|&s| tape.val(s).abs()).fold(0.0, f64::max);

            params = match cfg.step_graph {
                StepGraph::Unrolled => {
                    params.iter().zip(&steps).map(|(&p, &s)| tape.sub(p, s)).collect()
                }
                StepGraph::Detached => {
                    let next: Vec<f64> =
                        params.iter().zip(&steps).map(|(&p, &s)| tape.val(p) - tape.val(s)).collect();
                    tape.truncate(mark);
                    next.into_iter().map(|v| tape.var(v)).collect()
                }
            };
        }

        let fval = eval(tape, &params)?;
        ensure_finite("NLL", tape.val(fval), cfg.n_steps)?;
        Ok(NewtonResult { params, fval, n_steps: cfg.n_steps, last_step })
    }
}

fn ensure_finite(what: &str, value: f64, step: usize) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(Error::Computation(format!("{what} is {value} at Newton step {step}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // f(x, y) = (x - 2)^2 + 3 (y + 1)^2 + 0.5 x y
    fn quadratic(tape: &mut Tape, p: &[Var]) -> Result<Var> {
        let dx = tape.sub_f64(p[0], 2.0);
        let dy = tape.add_f64(p[1], 1.0);
        let a = tape.mul(dx, dx);
        let b0 = tape.mul(dy, dy);
        let b = tape.mul_f64(b0, 3.0);
        let c0 = tape.mul(p[0], p[1]);
        let c = tape.mul_f64(c0, 0.5);
        Ok(tape.sum(&[a, b, c]))
    }

    // ∇f = 0: 2(x-2) + 0.5y = 0, 6(y+1) + 0.5x = 0
    fn quadratic_min() -> (f64, f64) {
        let det = 2.0 * 6.0 - 0.25;
        let x = (4.0 * 6.0 - 0.5 * -6.0) / det;
        let y = (2.0 * -6.0 - 0.5 * 4.0) / det;
        (x, y)
    }

    fn run(config: ProfilerConfig) -> NewtonSummary {
        let mut t = Tape::new();
        let init = [t.var(0.0), t.var(0.0)];
        let res = NewtonProfiler::new(config).unwrap().minimize(&mut t, &init, quadratic).unwrap();
        res.summary(&t)
    }

    #[test]
    fn test_diagonal_newton_reaches_minimum() {
        let s = run(ProfilerConfig { lr: 0.5, n_steps: 200, ..Default::default() });
        let (x, y) = quadratic_min();
        assert_relative_eq!(s.parameters[0], x, epsilon = 1e-6);
        assert_relative_eq!(s.parameters[1], y, epsilon = 1e-6);
        println!("{s}");
    }

    #[test]
    fn test_full_newton_single_step_on_quadratic() {
        let s = run(ProfilerConfig {
            lr: 1.0,
            n_steps: 1,
            curvature: CurvatureMode::Full,
            curvature_eps: 0.0,
            ..Default::default()
        });
        let (x, y) = quadratic_min();
        assert_relative_eq!(s.parameters[0], x, epsilon = 1e-12);
        assert_relative_eq!(s.parameters[1], y, epsilon = 1e-12);
    }

    #[test]
    fn test_detached_matches_unrolled_values() {
        let base = ProfilerConfig { n_steps: 20, ..Default::default() };
        let unrolled = run(base);
        let detached = run(ProfilerConfig { step_graph: StepGraph::Detached, ..base });
        for (a, b) in unrolled.parameters.iter().zip(&detached.parameters) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
        assert_relative_eq!(unrolled.fval, detached.fval, epsilon = 1e-12);
    }

    #[test]
    fn test_detached_keeps_tape_bounded() {
        let mut t = Tape::new();
        let init = [t.var(0.0), t.var(0.0)];
        let cfg = ProfilerConfig { n_steps: 50, step_graph: StepGraph::Detached, ..Default::default() };
        let mut evals = 0;
        NewtonProfiler::new(cfg)
            .unwrap()
            .minimize(&mut t, &init, |tape, p| {
                evals += 1;
                quadratic(tape, p)
            })
            .unwrap();
        assert_eq!(evals, 51);
        // two params per step, plus the final evaluation
        assert!(t.len() < 2 + 2 * 50 + 100, "tape grew to {}", t.len());
    }

    #[test]
    fn test_step_is_clamped() {
        // Near-zero curvature in a linear objective: step saturates at the clamp.
        let mut t = Tape::new();
        let init = [t.var(0.0)];
        let cfg = ProfilerConfig { n_steps: 1, lr: 1.0, step_clamp: 5.0, ..Default::default() };
        let res = NewtonProfiler::new(cfg)
            .unwrap()
            .minimize(&mut t, &init, |tape, p| Ok(tape.mul_f64(p[0], 3.0)))
            .unwrap();
        assert_relative_eq!(t.val(res.params[0]), -5.0, epsilon = 1e-12);
        assert_relative_eq!(res.last_step, 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_unrolled_steps_are_differentiable() {
        // minimize (x - c)^2 from x0 = 0 with lr = 0.5: x_n = c (1 - 0.5^n)
        let mut t = Tape::new();
        let c = t.var(3.0);
        let init = [t.var(0.0)];
        let cfg = ProfilerConfig { n_steps: 3, lr: 0.5, curvature_eps: 0.0, ..Default::default() };
        let res = NewtonProfiler::new(cfg)
            .unwrap()
            .minimize(&mut t, &init, |tape, p| {
                let d = tape.sub(p[0], c);
                Ok(tape.mul(d, d))
            })
            .unwrap();
        assert_relative_eq!(t.val(res.params[0]), 3.0 * (1.0 - 0.125), epsilon = 1e-12);
        t.backward(res.params[0]);
        assert_relative_eq!(t.adjoint(c), 1.0 - 0.125, epsilon = 1e-12);
    }

    #[test]
    fn test_non_finite_objective_is_reported() {
        let mut t = Tape::new();
        let init = [t.var(-1.0)];
        let err = NewtonProfiler::default()
            .minimize(&mut t, &init, |tape, p| Ok(tape.ln(p[0])))
            .unwrap_err();
        assert!(matches!(err, Error::Computation(_)));
    }

    #[test]
    fn test_invalid_config() {
        assert!(NewtonProfiler::new(ProfilerConfig { lr: 0.0, ..Default::default() }).is_err());
        assert!(NewtonProfiler::new(ProfilerConfig { step_clamp: f64::NAN, ..Default::default() }).is_err());
    }

    #[test]
    fn test_config_from_partial_json() {
        let cfg: ProfilerConfig = serde_json::from_str(r#"{"n_steps": 7, "step_graph": "detached"}"#).unwrap();
        assert_eq!(cfg.n_steps, 7);
        assert_eq!(cfg.step_graph, StepGraph::Detached);
        assert_eq!(cfg.curvature, CurvatureMode::Diagonal);
        assert_relative_eq!(cfg.lr, 0.1);
    }
}
