//! Normal distribution utilities.

use inferno_ad::{Tape, Var};
use inferno_core::{Error, Result};

/// Natural log of `sqrt(2π)`.
///
/// `ln(sqrt(2π)) = 0.5*ln(2π)` (precomputed to keep this crate const-friendly).
pub const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_7;

fn validate_sigma(sigma: f64) -> Result<()> {
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(Error::Validation(format!("sigma must be finite and > 0, got {}", sigma)));
    }
    Ok(())
}

/// Log-PDF of a Normal distribution `N(mu, sigma)` at `x`.
///
/// `log p(x) = -0.5 * ((x-mu)/sigma)^2 - ln(sigma) - ln(sqrt(2π))`
pub fn logpdf(x: f64, mu: f64, sigma: f64) -> Result<f64> {
    validate_sigma(sigma)?;
    let z = (x - mu) / sigma;
    Ok(-0.5 * z * z - sigma.ln() - LN_SQRT_2PI)
}

/// Negative log-likelihood for a Normal distribution `N(mu, sigma)` at `x`.
pub fn nll(x: f64, mu: f64, sigma: f64) -> Result<f64> {
    Ok(-logpdf(x, mu, sigma)?)
}

/// [`logpdf`] recorded on the tape; `x` is differentiable, `mu`/`sigma` are fixed.
pub fn logpdf_on_tape(tape: &mut Tape, x: Var, mu: f64, sigma: f64) -> Result<Var> {
    validate_sigma(sigma)?;
    let diff = tape.sub_f64(x, mu);
    let z = tape.div_f64(diff, sigma);
    let z2 = tape.mul(z, z);
    let half = tape.mul_f64(z2, -0.5);
    Ok(tape.sub_f64(half, sigma.ln() + LN_SQRT_2PI))
}
