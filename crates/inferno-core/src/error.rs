//! Error types for inferno

use thiserror::Error;

/// inferno error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration or input validation error (raised before any batch is processed)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Numerical failure during evaluation (non-finite NLL, singular Hessian, ...)
    #[error("Computation error: {0}")]
    Computation(String),

    /// The scanned likelihood curve never crosses `min + threshold` on both sides.
    #[error("No bracketing roots found at threshold {threshold}; widen the scan or lower the threshold")]
    NoRootsFound {
        /// Offset above the curve minimum that was searched for.
        threshold: f64,
    },
}

impl Error {
    /// Whether this error describes a per-batch numerical degeneracy that a
    /// training driver may choose to skip rather than abort on.
    pub fn is_numerical(&self) -> bool {
        matches!(self, Error::Computation(_) | Error::NoRootsFound { .. })
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_roots_message_names_threshold() {
        let e = Error::NoRootsFound { threshold: 0.5 };
        assert!(e.to_string().contains("0.5"));
        assert!(e.is_numerical());
    }

    #[test]
    fn test_validation_is_not_numerical() {
        assert!(!Error::Validation("bad".into()).is_numerical());
    }
}
