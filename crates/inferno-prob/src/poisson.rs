//! Poisson log-likelihood for binned counts.
//!
//! Counts are taken as `f64`: Asimov bin contents are expectations, not
//! integers, and `ln Γ(k + 1)` generalizes `ln k!` to them.

use inferno_ad::{Tape, Var};
use inferno_core::{Error, Result};
use statrs::function::gamma::ln_gamma;

/// Floor applied to the rate before taking its logarithm.
pub const RATE_FLOOR: f64 = 1e-10;

/// Log-PMF of Poisson(k | lambda) for a non-negative, possibly non-integer `k`.
pub fn logpmf(k: f64, lambda: f64) -> Result<f64> {
    if !k.is_finite() || k < 0.0 {
        return Err(Error::Validation(format!("k must be finite and >= 0, got {}", k)));
    }
    if !lambda.is_finite() || lambda < 0.0 {
        return Err(Error::Validation(format!("lambda must be finite and >= 0, got {}", lambda)));
    }
    let lambda = lambda.max(RATE_FLOOR);
    if k == 0.0 {
        return Ok(-lambda);
    }
    Ok(k * lambda.ln() - lambda - ln_gamma(k + 1.0))
}

/// Per-bin negative log-likelihood `lambda - k ln(lambda) + ln Γ(k+1)` on the tape.
///
/// Both the observed count `k` and the rate `lambda` are differentiable:
/// Asimov counts are built from the classifier's own shapes.
pub fn nll_on_tape(tape: &mut Tape, k: Var, lambda: Var) -> Var {
    let lambda = tape.max_f64(lambda, RATE_FLOOR);
    if tape.val(k) > 0.0 {
        let ln_lambda = tape.ln(lambda);
        let k_ln_lambda = tape.mul(k, ln_lambda);
        let bin_nll = tape.sub(lambda, k_ln_lambda);
        let k1 = tape.add_f64(k, 1.0);
        let ln_fact = tape.ln_gamma(k1);
        tape.add(bin_nll, ln_fact)
    } else {
        lambda
    }
}
