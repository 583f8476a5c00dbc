//! Common data types for inferno

use serde::{Deserialize, Serialize};

/// Profiled NLL curve over a scan of the parameter of interest.
///
/// One entry per scanned `mu`, each obtained after the nuisances were
/// profiled to their per-point optimum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileCurve {
    /// Scanned POI values (ascending)
    pub mu: Vec<f64>,

    /// Profiled NLL at each scanned value
    pub nll: Vec<f64>,

    /// Optimized nuisance vector at each scanned value
    pub nuisances: Vec<Vec<f64>>,
}

impl ProfileCurve {
    /// Number of scan points
    pub fn len(&self) -> usize {
        self.mu.len()
    }

    /// Whether the curve has no points
    pub fn is_empty(&self) -> bool {
        self.mu.is_empty()
    }

    /// Index of the smallest finite NLL value, if any.
    pub fn argmin(&self) -> Option<usize> {
        self.nll
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
    }

    /// POI value at the curve minimum.
    pub fn mu_hat(&self) -> Option<f64> {
        self.argmin().map(|i| self.mu[i])
    }

    /// `NLL - min(NLL)` at each point. Empty if no finite value exists.
    pub fn delta_nll(&self) -> Vec<f64> {
        match self.argmin() {
            Some(i) => {
                let min = self.nll[i];
                self.nll.iter().map(|v| v - min).collect()
            }
            None => Vec::new(),
        }
    }
}

/// Curvature of the NLL at the (profiled) true parameter point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FisherResult {
    /// Parameter values at which the Hessian was taken (nuisances then POI)
    pub parameters: Vec<f64>,

    /// Hessian of the NLL (row-major, N×N)
    pub hessian: Vec<f64>,

    /// Inverse Hessian (row-major, N×N)
    pub covariance: Vec<f64>,

    /// Index of the POI in `parameters`
    pub poi_index: usize,

    /// NLL at `parameters`
    pub nll: f64,
}

impl FisherResult {
    /// Number of parameters
    pub fn n_parameters(&self) -> usize {
        self.parameters.len()
    }

    /// Inverse Fisher information of the POI (expected variance).
    pub fn poi_variance(&self) -> f64 {
        let n = self.n_parameters();
        self.covariance[self.poi_index * n + self.poi_index]
    }

    /// Expected one-sigma uncertainty on the POI. `None` if the variance is not positive.
    pub fn poi_uncertainty(&self) -> Option<f64> {
        let v = self.poi_variance();
        if v.is_finite() && v > 0.0 { Some(v.sqrt()) } else { None }
    }

    /// Correlation element (i, j) from the covariance. `None` if out of range or degenerate.
    pub fn correlation(&self, i: usize, j: usize) -> Option<f64> {
        let n = self.n_parameters();
        if i >= n || j >= n {
            return None;
        }
        let vi = self.covariance[i * n + i];
        let vj = self.covariance[j * n + j];
        if vi <= 0.0 || vj <= 0.0 {
            return None;
        }
        Some(self.covariance[i * n + j] / (vi.sqrt() * vj.sqrt()))
    }
}
