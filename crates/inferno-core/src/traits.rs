//! Core traits for inferno
//!
//! High-level consumers (CLI diagnostics, numerical cross-checks) talk to
//! likelihood models through [`LikelihoodObjective`] and never depend on how
//! the model records its computation.

use crate::Result;

/// A scalar negative log-likelihood over a flat parameter vector.
///
/// Implementors evaluate at plain `f64` parameters; gradient and Hessian
/// default to central finite differences and should be overridden when the
/// model can do better (e.g. via AD).
pub trait LikelihoodObjective {
    /// Number of parameters
    fn n_parameters(&self) -> usize;

    /// Parameter names, in parameter order
    fn parameter_names(&self) -> Vec<String>;

    /// Negative log-likelihood at `params`
    fn nll(&self, params: &[f64]) -> Result<f64>;

    /// Gradient of the NLL
    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        let n = params.len();
        let mut grad = vec![0.0; n];
        for i in 0..n {
            let eps = 1e-6 * params[i].abs().max(1.0);
            let mut p = params.to_vec();
            p[i] += eps;
            let f_plus = self.nll(&p)?;
            p[i] -= 2.0 * eps;
            let f_minus = self.nll(&p)?;
            grad[i] = (f_plus - f_minus) / (2.0 * eps);
        }
        Ok(grad)
    }

    /// Hessian of the NLL (row-major, `n × n`)
    fn hessian(&self, params: &[f64]) -> Result<Vec<f64>> {
        let n = params.len();
        let mut h = vec![0.0; n * n];
        for j in 0..n {
            let eps = 1e-4 * params[j].abs().max(1.0);
            let mut p = params.to_vec();
            p[j] += eps;
            let g_plus = self.gradient(&p)?;
            p[j] -= 2.0 * eps;
            let g_minus = self.gradient(&p)?;
            for i in 0..n {
                h[i * n + j] = (g_plus[i] - g_minus[i]) / (2.0 * eps);
            }
        }
        // Symmetrize
        for i in 0..n {
            for j in (i + 1)..n {
                let s = 0.5 * (h[i * n + j] + h[j * n + i]);
                h[i * n + j] = s;
                h[j * n + i] = s;
            }
        }
        Ok(h)
    }
}
