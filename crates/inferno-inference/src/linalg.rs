//! Dense linear algebra on tape nodes.

use inferno_ad::{Tape, Var};
use inferno_core::{Error, Result};
use nalgebra::DMatrix;

/// Pivots smaller than this (relative to the largest diagonal entry) are singular.
const PIVOT_TOL: f64 = 1e-12;

/// Confirm that `h` (row-major values) is symmetric positive-definite.
///
/// Uses a Cholesky factorization; the covariance extracted from a Hessian is
/// only meaningful when it succeeds.
pub fn check_positive_definite(h: &[Vec<f64>]) -> Result<()> {
    let n = h.len();
    for (i, row) in h.iter().enumerate() {
        if row.len() != n {
            return Err(Error::Validation(format!("matrix row {i} has {} entries, expected {n}", row.len())));
        }
        if let Some(v) = row.iter().find(|v| !v.is_finite()) {
            return Err(Error::Computation(format!("Hessian has non-finite entry {v} in row {i}")));
        }
    }
    let m = DMatrix::from_fn(n, n, |i, j| 0.5 * (h[i][j] + h[j][i]));
    if nalgebra::linalg::Cholesky::new(m).is_none() {
        return Err(Error::Computation("Hessian is not positive definite at the profiled optimum".into()));
    }
    Ok(())
}

/// Inverse of the square matrix `a` built on the tape (Gauss-Jordan).
///
/// Pivot rows are chosen by the magnitude of their current values; the
/// choice is a constant of the graph, so the result is differentiable
/// everywhere the pivot order does not change.
pub fn invert_on_tape(tape: &mut Tape, a: &[Vec<Var>]) -> Result<Vec<Vec<Var>>> {
    let n = a.len();
    for (i, row) in a.iter().enumerate() {
        if row.len() != n {
            return Err(Error::Validation(format!("matrix row {i} has {} entries, expected {n}", row.len())));
        }
    }
    if n == 0 {
        return Ok(Vec::new());
    }

    let scale = (0..n).map(|i| tape.val(a[i][i]).abs()).fold(0.0_f64, f64::max).max(1.0);

    // Augmented [A | I], eliminated in place.
    let mut m: Vec<Vec<Var>> = a
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let mut r = row.clone();
            for j in 0..n {
                r.push(tape.constant(if i == j { 1.0 } else { 0.0 }));
            }
            r
        })
        .collect();

    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&p, &q| tape.val(m[p][col]).abs().total_cmp(&tape.val(m[q][col]).abs()))
            .unwrap_or(col);
        let pivot_val = tape.val(m[pivot_row][col]);
        if !pivot_val.is_finite() || pivot_val.abs() <= PIVOT_TOL * scale {
            return Err(Error::Computation(format!("singular matrix: pivot {pivot_val} in column {col}")));
        }
        m.swap(col, pivot_row);

        let pivot = m[col][col];
        for j in 0..2 * n {
            m[col][j] = tape.div(m[col][j], pivot);
        }
        for r in 0..n {
            if r == col {
                continue;
            }
            // Zero-valued factors are still eliminated: their derivative is not zero.
            let factor = m[r][col];
            for j in 0..2 * n {
                let p = tape.mul(factor, m[col][j]);
                m[r][j] = tape.sub(m[r][j], p);
            }
        }
    }

    Ok(m.into_iter().map(|row| row[n..].to_vec()).collect())
}
