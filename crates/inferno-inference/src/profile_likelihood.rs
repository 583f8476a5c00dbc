//! Profiled NLL curve over a scan of the parameter of interest.
//!
//! For each scanned mu (held fixed) the nuisances start at zero and are
//! moved by the Newton profiler; the NLL after the final step is recorded.
//! Points are profiled sequentially on one tape.

use inferno_ad::{Tape, Var};
use inferno_core::{Error, ProfileCurve, Result};

use crate::interp::in_quadratic_regime;
use crate::nll::AsimovModel;
use crate::optimizer::NewtonProfiler;

/// Profiled curve whose NLL values are tape nodes.
#[derive(Debug, Clone)]
pub struct CurveOnTape {
    /// Scanned POI values.
    pub mu: Vec<f64>,
    /// Profiled NLL per point (differentiable w.r.t. the model's shapes).
    pub nll: Vec<Var>,
    /// Profiled nuisances per point.
    pub nuisances: Vec<Vec<Var>>,
}

impl CurveOnTape {
    /// Read the values off the tape.
    pub fn to_profile_curve(&self, tape: &Tape) -> ProfileCurve {
        ProfileCurve {
            mu: self.mu.clone(),
            nll: tape.vals(&self.nll),
            nuisances: self.nuisances.iter().map(|a| tape.vals(a)).collect(),
        }
    }
}

/// At least two finite, strictly increasing points.
pub fn validate_scan(mu_scan: &[f64]) -> Result<()> {
    if mu_scan.len() < 2 {
        return Err(Error::Validation(format!("mu scan needs at least 2 points, got {}", mu_scan.len())));
    }
    if let Some(bad) = mu_scan.iter().find(|m| !m.is_finite()) {
        return Err(Error::Validation(format!("mu scan contains non-finite value {bad}")));
    }
    if mu_scan.windows(2).any(|w| w[1] <= w[0]) {
        return Err(Error::Validation("mu scan must be strictly increasing".into()));
    }
    Ok(())
}

/// Warn about profiled shape nuisances outside `[-1, 1]`, where the morph is linear.
pub(crate) fn warn_extrapolated(model: &AsimovModel, alpha: &[f64], context: &str) {
    for (i, &a) in alpha.iter().enumerate().take(model.layout().n_shape) {
        if !in_quadratic_regime(a) {
            log::warn!(
                "{context}: shape nuisance {i} profiled to {a:.3}, outside the quadratic regime; \
                 curvature is a linear approximation"
            );
        }
    }
}

/// Profile the nuisances at every `mu` in `mu_scan`.
pub fn profile_curve(
    tape: &mut Tape,
    model: &AsimovModel,
    profiler: &NewtonProfiler,
    mu_scan: &[f64],
) -> Result<CurveOnTape> {
    validate_scan(mu_scan)?;
    let asimov = model.asimov(tape);
    let n_alpha = model.layout().len();

    let mut nll = Vec::with_capacity(mu_scan.len());
    let mut nuisances = Vec::with_capacity(mu_scan.len());
    for &mu_val in mu_scan {
        let mu = tape.constant(mu_val);
        let init: Vec<Var> = (0..n_alpha).map(|_| tape.var(0.0)).collect();
        let res = profiler.minimize(tape, &init, |tape, alpha| model.nll(tape, &asimov, mu, alpha))?;

        let alpha_vals = tape.vals(&res.params);
        log::debug!(
            "profile mu={mu_val:.3}: nll={:.6}, alpha={alpha_vals:?}, last_step={:.3e}",
            tape.val(res.fval),
            res.last_step
        );
        warn_extrapolated(model, &alpha_vals, &format!("mu={mu_val}"));

        nll.push(res.fval);
        nuisances.push(res.params);
    }

    Ok(CurveOnTape { mu: mu_scan.to_vec(), nll, nuisances })
}

/// `mu_scan` as `start, start + step, ...` up to and including `stop`.
pub fn linspace_step(start: f64, stop: f64, step: f64) -> Result<Vec<f64>> {
    if !start.is_finite() || !stop.is_finite() || !step.is_finite() || step <= 0.0 || stop < start {
        return Err(Error::Validation(format!("invalid scan range {start}..={stop} step {step}")));
    }
    let n = ((stop - start) / step + 1e-9).floor() as usize + 1;
    Ok((0..n).map(|i| start + i as f64 * step).collect())
}
