//! First- and second-derivative information of a scalar on the tape.
//!
//! Every quantity returned here is itself a tape node, so it can be
//! differentiated again or swept by [`Tape::backward`].

use inferno_ad::{GraphGradError, Tape, Var};
use inferno_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Which second-order information to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurvatureMode {
    /// Per-coordinate `∂²f/∂x_i²`, cross terms ignored.
    #[default]
    Diagonal,
    /// Complete Hessian, one gradient sweep per row.
    Full,
}

/// Second-order information as tape nodes.
#[derive(Debug, Clone)]
pub enum Curvature {
    /// `h[i] = ∂²f/∂x_i²`.
    Diagonal(Vec<Var>),
    /// Row-major Hessian `h[i][j] = ∂²f/∂x_i∂x_j`.
    Full(Vec<Vec<Var>>),
}

impl Curvature {
    /// Diagonal entries (the diagonal of the full matrix in `Full` mode).
    pub fn diagonal(&self) -> Vec<Var> {
        match self {
            Curvature::Diagonal(d) => d.clone(),
            Curvature::Full(h) => h.iter().enumerate().map(|(i, row)| row[i]).collect(),
        }
    }
}

/// Gradient plus curvature at one point.
#[derive(Debug, Clone)]
pub struct Derivatives {
    /// `∂f/∂x_i`.
    pub grad: Vec<Var>,
    /// Second-order information selected by [`CurvatureMode`].
    pub curvature: Curvature,
}

pub(crate) fn graph_error(e: GraphGradError) -> Error {
    Error::Computation(format!("graph-mode gradient failed: {e}"))
}

/// Differentiable gradient of `f` with respect to `wrt`.
pub fn gradient(tape: &mut Tape, f: Var, wrt: &[Var]) -> Result<Vec<Var>> {
    tape.grad(f, wrt).map_err(graph_error)
}

/// Full Hessian of `f` with respect to `wrt` (row-major, as tape nodes).
pub fn hessian(tape: &mut Tape, f: Var, wrt: &[Var]) -> Result<Vec<Vec<Var>>> {
    let g = gradient(tape, f, wrt)?;
    hessian_from_gradient(tape, &g, wrt)
}

fn hessian_from_gradient(tape: &mut Tape, g: &[Var], wrt: &[Var]) -> Result<Vec<Vec<Var>>> {
    g.iter().map(|&gi| gradient(tape, gi, wrt)).collect()
}

/// Gradient and curvature of `f` in one call.
pub fn derivatives(tape: &mut Tape, f: Var, wrt: &[Var], mode: CurvatureMode) -> Result<Derivatives> {
    let grad = gradient(tape, f, wrt)?;
    let curvature = match mode {
        CurvatureMode::Diagonal => {
            let mut diag = Vec::with_capacity(wrt.len());
            for (&gi, &xi) in grad.iter().zip(wrt) {
                let h = gradient(tape, gi, &[xi])?;
                diag.push(h[0]);
            }
            Curvature::Diagonal(diag)
        }
        CurvatureMode::Full => Curvature::Full(hessian_from_gradient(tape, &grad, wrt)?),
    };
    Ok(Derivatives { grad, curvature })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // f(x, y) = x² y + 3 y²  →  ∇ = (2xy, x² + 6y), H = [[2y, 2x], [2x, 6]]
    fn build(t: &mut Tape, x: f64, y: f64) -> (Var, Var, Var) {
        let xv = t.var(x);
        let yv = t.var(y);
        let x2 = t.mul(xv, xv);
        let x2y = t.mul(x2, yv);
        let y2 = t.mul(yv, yv);
        let y2_3 = t.mul_f64(y2, 3.0);
        let f = t.add(x2y, y2_3);
        (xv, yv, f)
    }

    #[test]
    fn test_gradient_and_full_hessian() {
        let mut t = Tape::new();
        let (x, y, f) = build(&mut t, 1.5, -2.0);
        let d = derivatives(&mut t, f, &[x, y], CurvatureMode::Full).unwrap();
        assert_relative_eq!(t.val(d.grad[0]), 2.0 * 1.5 * -2.0, epsilon = 1e-12);
        assert_relative_eq!(t.val(d.grad[1]), 1.5 * 1.5 + 6.0 * -2.0, epsilon = 1e-12);
        let Curvature::Full(h) = &d.curvature else { panic!("expected full curvature") };
        assert_relative_eq!(t.val(h[0][0]), -4.0, epsilon = 1e-12);
        assert_relative_eq!(t.val(h[0][1]), 3.0, epsilon = 1e-12);
        assert_relative_eq!(t.val(h[1][0]), 3.0, epsilon = 1e-12);
        assert_relative_eq!(t.val(h[1][1]), 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_diagonal_ignores_cross_terms() {
        let mut t = Tape::new();
        let (x, y, f) = build(&mut t, 1.5, -2.0);
        let d = derivatives(&mut t, f, &[x, y], CurvatureMode::Diagonal).unwrap();
        let diag = d.curvature.diagonal();
        assert_relative_eq!(t.val(diag[0]), -4.0, epsilon = 1e-12);
        assert_relative_eq!(t.val(diag[1]), 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_curvature_is_differentiable() {
        // ∂(H_00)/∂y = 2
        let mut t = Tape::new();
        let (x, y, f) = build(&mut t, 0.3, 0.7);
        let h = hessian(&mut t, f, &[x, y]).unwrap();
        t.backward(h[0][0]);
        assert_relative_eq!(t.adjoint(y), 2.0, epsilon = 1e-12);
        assert_relative_eq!(t.adjoint(x), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_active_ln_gamma_is_a_computation_error() {
        let mut t = Tape::new();
        let x = t.var(2.5);
        let f = t.ln_gamma(x);
        let err = gradient(&mut t, f, &[x]).unwrap_err();
        assert!(err.is_numerical());
    }
}
