//! Expected Fisher information at the true parameter point.
//!
//! Parameters are ordered `[alpha..., mu]`. With `profile_poi` the POI is
//! profiled together with the nuisances, otherwise it stays at `true_mu`.
//! The full Hessian at the optimum is inverted on the tape and the POI
//! diagonal of the inverse (the expected variance of mu) is the loss.

use inferno_ad::{Tape, Var};
use inferno_core::{Error, FisherResult, Result};

use crate::linalg::{check_positive_definite, invert_on_tape};
use crate::nll::AsimovModel;
use crate::optimizer::NewtonProfiler;
use crate::oracle::hessian;
use crate::profile_likelihood::warn_extrapolated;

/// Fisher information whose entries are tape nodes.
#[derive(Debug, Clone)]
pub struct FisherOnTape {
    /// `[alpha..., mu]` at which the Hessian was taken.
    pub parameters: Vec<Var>,
    /// NLL at `parameters`.
    pub nll: Var,
    /// Row-major Hessian of the NLL.
    pub hessian: Vec<Vec<Var>>,
    /// Inverse of `hessian`.
    pub covariance: Vec<Vec<Var>>,
    /// Index of mu in `parameters`.
    pub poi_index: usize,
}

impl FisherOnTape {
    /// Inverse Fisher information of the POI.
    pub fn poi_variance(&self) -> Var {
        self.covariance[self.poi_index][self.poi_index]
    }

    /// Read the values off the tape.
    pub fn to_result(&self, tape: &Tape) -> FisherResult {
        let flat = |m: &[Vec<Var>]| m.iter().flat_map(|row| tape.vals(row)).collect::<Vec<f64>>();
        FisherResult {
            parameters: tape.vals(&self.parameters),
            hessian: flat(&self.hessian),
            covariance: flat(&self.covariance),
            poi_index: self.poi_index,
            nll: tape.val(self.nll),
        }
    }
}

/// Profile at `true_mu`, then build and invert the full Hessian.
pub fn fisher(tape: &mut Tape, model: &AsimovModel, profiler: &NewtonProfiler, true_mu: f64) -> Result<FisherOnTape> {
    if !true_mu.is_finite() {
        return Err(Error::Validation(format!("true_mu must be finite, got {true_mu}")));
    }
    let asimov = model.asimov(tape);
    let n_alpha = model.layout().len();
    let poi_index = n_alpha;

    let (parameters, nll) = if profiler.config().profile_poi {
        let mut init: Vec<Var> = (0..n_alpha).map(|_| tape.var(0.0)).collect();
        init.push(tape.var(true_mu));
        let res = profiler.minimize(tape, &init, |tape, p| model.nll(tape, &asimov, p[poi_index], &p[..poi_index]))?;
        (res.params, res.fval)
    } else {
        let mu = tape.var(true_mu);
        let init: Vec<Var> = (0..n_alpha).map(|_| tape.var(0.0)).collect();
        let res = profiler.minimize(tape, &init, |tape, alpha| model.nll(tape, &asimov, mu, alpha))?;
        let mut params = res.params;
        params.push(mu);
        (params, res.fval)
    };

    let values = tape.vals(&parameters);
    warn_extrapolated(model, &values, "fisher");

    let h = hessian(tape, nll, &parameters)?;
    let h_vals: Vec<Vec<f64>> = h.iter().map(|row| tape.vals(row)).collect();
    check_positive_definite(&h_vals)?;
    let covariance = invert_on_tape(tape, &h)?;

    let var = tape.val(covariance[poi_index][poi_index]);
    if !var.is_finite() || var <= 0.0 {
        return Err(Error::Computation(format!("POI variance is {var}")));
    }
    log::debug!("fisher: nll={:.6}, params={values:?}, sigma_mu={:.4}", tape.val(nll), var.sqrt());

    Ok(FisherOnTape { parameters, nll, hessian: h, covariance, poi_index })
}
