//! Normalized histograms built from classifier outputs.

use inferno_ad::{Tape, Var};
use inferno_core::{Error, Result};

/// Additive floor per bin before renormalizing.
pub const SHAPE_FLOOR: f64 = 1e-7;

fn check_rows<T>(rows: &[Vec<T>]) -> Result<usize> {
    let Some(first) = rows.first() else {
        return Err(Error::Validation("cannot build a shape from an empty batch".into()));
    };
    let n_bins = first.len();
    if n_bins == 0 {
        return Err(Error::Validation("classifier outputs have zero bins".into()));
    }
    if let Some((i, r)) = rows.iter().enumerate().find(|(_, r)| r.len() != n_bins) {
        return Err(Error::Validation(format!("event {i} has {} bins, expected {n_bins}", r.len())));
    }
    Ok(n_bins)
}

/// Column sums of per-event soft assignments, floored and renormalized to 1.
pub fn to_shape(tape: &mut Tape, probs: &[Vec<Var>]) -> Result<Vec<Var>> {
    let n_bins = check_rows(probs)?;
    let mut counts = Vec::with_capacity(n_bins);
    for j in 0..n_bins {
        let column: Vec<Var> = probs.iter().map(|row| row[j]).collect();
        let total = tape.sum(&column);
        counts.push(tape.add_f64(total, SHAPE_FLOOR));
    }
    let norm = tape.sum(&counts);
    Ok(counts.into_iter().map(|c| tape.div(c, norm)).collect())
}

/// [`to_shape`] on plain values.
pub fn to_shape_f64(probs: &[Vec<f64>]) -> Result<Vec<f64>> {
    let n_bins = check_rows(probs)?;
    let mut counts = vec![SHAPE_FLOOR; n_bins];
    for row in probs {
        for (c, &p) in counts.iter_mut().zip(row) {
            *c += p;
        }
    }
    let norm: f64 = counts.iter().sum();
    Ok(counts.into_iter().map(|c| c / norm).collect())
}

/// Index of the most probable bin per event.
pub fn argmax_bins(probs: &[Vec<f64>]) -> Vec<usize> {
    probs
        .iter()
        .map(|row| row.iter().enumerate().max_by(|a, b| a.1.total_cmp(b.1)).map_or(0, |(i, _)| i))
        .collect()
}

/// Fraction of events whose most probable bin is each bin (hard assignment).
pub fn argmax_shape(probs: &[Vec<f64>]) -> Result<Vec<f64>> {
    let n_bins = check_rows(probs)?;
    let mut hist = vec![0.0; n_bins];
    for bin in argmax_bins(probs) {
        hist[bin] += 1.0;
    }
    let n = probs.len() as f64;
    Ok(hist.into_iter().map(|h| h / n).collect())
}

/// Normalized histogram of `values` over `edges` (left-closed, last bin closed).
///
/// Values outside `[edges[0], edges[last]]` are dropped.
pub fn bin_hard(values: &[f64], edges: &[f64]) -> Result<Vec<f64>> {
    if edges.len() < 2 {
        return Err(Error::Validation(format!("need at least 2 bin edges, got {}", edges.len())));
    }
    if edges.windows(2).any(|w| !(w[1] > w[0])) {
        return Err(Error::Validation("bin edges must be strictly increasing".into()));
    }
    let n_bins = edges.len() - 1;
    let last = edges[n_bins];
    let mut hist = vec![0.0; n_bins];
    let mut n_in = 0usize;
    for &v in values {
        if !(v >= edges[0] && v <= last) {
            continue;
        }
        let bin = if v == last { n_bins - 1 } else { edges.partition_point(|&e| e <= v) - 1 };
        hist[bin] += 1.0;
        n_in += 1;
    }
    if n_in == 0 {
        return Err(Error::Validation("no values fall inside the bin edges".into()));
    }
    let total = n_in as f64;
    Ok(hist.into_iter().map(|h| h / total).collect())
}
