//! Half-width of the profiled likelihood interval.
//!
//! The interval is `{mu : NLL(mu) - min NLL <= threshold}`. Its edges are
//! found by walking outward from the scan minimum to the first sign change
//! of `NLL - min - threshold` on each side and interpolating linearly
//! between the two bracketing grid points. The interpolation is recorded on
//! the tape, so the width is differentiable in the NLL values.

use inferno_ad::{Tape, Var};
use inferno_core::{Error, ProfileCurve, Result};

fn validate(mu: &[f64], n_nll: usize, threshold: f64) -> Result<()> {
    if mu.len() != n_nll {
        return Err(Error::Validation(format!("{} scan points but {} NLL values", mu.len(), n_nll)));
    }
    if !threshold.is_finite() || threshold <= 0.0 {
        return Err(Error::Validation(format!("width threshold must be finite and > 0, got {threshold}")));
    }
    crate::profile_likelihood::validate_scan(mu)
}

fn argmin(values: &[f64]) -> Result<usize> {
    if let Some((i, v)) = values.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(Error::Computation(format!("profiled NLL is {v} at scan point {i}")));
    }
    values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .ok_or_else(|| Error::Computation("empty likelihood curve".into()))
}

/// Bracketing indices `(inside, outside)` of the first crossing on each side.
fn brackets(y: &[f64], imin: usize, threshold: f64) -> Result<((usize, usize), (usize, usize))> {
    let lo = (1..=imin).rev().find(|&i| y[i] < 0.0 && y[i - 1] >= 0.0).map(|i| (i, i - 1));
    let hi = (imin..y.len() - 1).find(|&i| y[i] < 0.0 && y[i + 1] >= 0.0).map(|i| (i, i + 1));
    match (lo, hi) {
        (Some(lo), Some(hi)) => Ok((lo, hi)),
        _ => Err(Error::NoRootsFound { threshold }),
    }
}

/// Interval half-width as a tape node.
pub fn likelihood_width(tape: &mut Tape, mu: &[f64], nll: &[Var], threshold: f64) -> Result<Var> {
    validate(mu, nll.len(), threshold)?;
    let values = tape.vals(nll);
    let imin = argmin(&values)?;
    let y_vals: Vec<f64> = values.iter().map(|v| v - values[imin] - threshold).collect();
    let ((lo_in, lo_out), (hi_in, hi_out)) = brackets(&y_vals, imin, threshold)?;

    let min = nll[imin];
    let y = |tape: &mut Tape, i: usize| {
        let d = tape.sub(nll[i], min);
        tape.sub_f64(d, threshold)
    };
    // root = mu_in + (mu_out - mu_in) · y_in / (y_in - y_out)
    let root = |tape: &mut Tape, inside: usize, outside: usize| {
        let y_in = y(tape, inside);
        let y_out = y(tape, outside);
        let denom = tape.sub(y_in, y_out);
        let frac = tape.div(y_in, denom);
        let offset = tape.mul_f64(frac, mu[outside] - mu[inside]);
        tape.add_f64(offset, mu[inside])
    };
    let r_lo = root(tape, lo_in, lo_out);
    let r_hi = root(tape, hi_in, hi_out);

    let span = tape.sub(r_hi, r_lo);
    let width = tape.mul_f64(span, 0.5);
    log::debug!(
        "likelihood width {:.4} (roots {:.4}, {:.4}; min at mu={})",
        tape.val(width),
        tape.val(r_lo),
        tape.val(r_hi),
        mu[imin]
    );
    Ok(width)
}

/// Interval half-width of a plain-valued curve.
pub fn likelihood_width_f64(curve: &ProfileCurve, threshold: f64) -> Result<f64> {
    let mut tape = Tape::with_capacity(2 * curve.len() + 16);
    let nll: Vec<Var> = curve.nll.iter().map(|&v| tape.constant(v)).collect();
    let w = likelihood_width(&mut tape, &curve.mu, &nll, threshold)?;
    Ok(tape.val(w))
}
