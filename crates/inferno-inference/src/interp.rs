//! Shape morphing between nominal and up/down variation templates.
//!
//! Per bin, with `a = 0.5 (up + down) - nominal` and `b = 0.5 (up - down)`:
//! - `|α| <= 1`: quadratic `a α² + b α`
//! - `|α| > 1`: linear extrapolation `(2b + s a)(α - s) + (edge - nominal)`
//!   with `s = sign(α)` and `edge` the up (s > 0) or down (s < 0) template,
//!   joining the quadratic piece in value at `α = ±1`.
//!
//! Contributions of independent nuisances are summed before being added to
//! the nominal shape. Beyond `|α| = 1` the curvature is zero and the slope
//! generally differs from the quadratic one at the edge, so a profiled
//! nuisance that ends up there only sees a linear approximation.

use inferno_ad::{Tape, Var};
use inferno_core::{Error, Result};

/// Whether `alpha` lies in the quadratic (`|α| <= 1`) regime.
#[inline]
pub fn in_quadratic_regime(alpha: f64) -> bool {
    alpha.abs() <= 1.0
}

/// Morph delta for a single bin: returns `(delta, d delta / d alpha)`.
pub fn morph_delta(alpha: f64, nominal: f64, up: f64, down: f64) -> (f64, f64) {
    let a = 0.5 * (up + down) - nominal;
    let b = 0.5 * (up - down);
    if in_quadratic_regime(alpha) {
        (a * alpha * alpha + b * alpha, 2.0 * a * alpha + b)
    } else {
        let s = alpha.signum();
        let edge = if s > 0.0 { up } else { down };
        let slope = 2.0 * b + s * a;
        (slope * (alpha - s) + (edge - nominal), slope)
    }
}

fn validate<T>(n_alpha: usize, n_bins: usize, up: &[Vec<T>], down: &[Vec<T>]) -> Result<()> {
    if up.len() != n_alpha || down.len() != n_alpha {
        return Err(Error::Validation(format!(
            "shape interpolation: {} nuisances but {} up / {} down templates",
            n_alpha,
            up.len(),
            down.len()
        )));
    }
    for (i, (u, d)) in up.iter().zip(down).enumerate() {
        if u.len() != n_bins || d.len() != n_bins {
            return Err(Error::Validation(format!(
                "shape interpolation: template {} has {} up / {} down bins, nominal has {}",
                i,
                u.len(),
                d.len(),
                n_bins
            )));
        }
    }
    Ok(())
}

/// Interpolate a shape in plain `f64`.
///
/// `up[i]` / `down[i]` are the templates of nuisance `alpha[i]`.
pub fn interp_shape(alpha: &[f64], nominal: &[f64], up: &[Vec<f64>], down: &[Vec<f64>]) -> Result<Vec<f64>> {
    validate(alpha.len(), nominal.len(), up, down)?;
    let mut out = nominal.to_vec();
    for (k, &al) in alpha.iter().enumerate() {
        for (j, o) in out.iter_mut().enumerate() {
            *o += morph_delta(al, nominal[j], up[k][j], down[k][j]).0;
        }
    }
    Ok(out)
}

/// Interpolate a shape on the tape; differentiable in `alpha` and in all templates.
pub fn interp_shape_on_tape(
    tape: &mut Tape,
    alpha: &[Var],
    nominal: &[Var],
    up: &[Vec<Var>],
    down: &[Vec<Var>],
) -> Result<Vec<Var>> {
    validate(alpha.len(), nominal.len(), up, down)?;

    let mut out = Vec::with_capacity(nominal.len());
    for (j, &nom) in nominal.iter().enumerate() {
        let mut deltas = Vec::with_capacity(alpha.len());
        for (k, &al) in alpha.iter().enumerate() {
            deltas.push(morph_delta_on_tape(tape, al, nom, up[k][j], down[k][j]));
        }
        let total = tape.sum(&deltas);
        out.push(tape.add(nom, total));
    }
    Ok(out)
}

fn morph_delta_on_tape(tape: &mut Tape, alpha: Var, nominal: Var, up: Var, down: Var) -> Var {
    // a = 0.5 (up + down) - nominal, b = 0.5 (up - down)
    let sum = tape.add(up, down);
    let half_sum = tape.mul_f64(sum, 0.5);
    let a = tape.sub(half_sum, nominal);
    let diff = tape.sub(up, down);
    let b = tape.mul_f64(diff, 0.5);

    let alpha_val = tape.val(alpha);
    if in_quadratic_regime(alpha_val) {
        let a2 = tape.mul(alpha, alpha);
        let quad = tape.mul(a, a2);
        let lin = tape.mul(b, alpha);
        return tape.add(quad, lin);
    }

    let s = alpha_val.signum();
    let edge = if s > 0.0 { up } else { down };
    let two_b = tape.mul_f64(b, 2.0);
    let s_a = tape.mul_f64(a, s);
    let slope = tape.add(two_b, s_a);
    let shifted = tape.sub_f64(alpha, s);
    let lin = tape.mul(slope, shifted);
    let offset = tape.sub(edge, nominal);
    tape.add(lin, offset)
}
