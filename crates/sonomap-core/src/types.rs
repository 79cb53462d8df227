//! Core types shared by every stage of the beamforming pipeline
//!
//! Complex numbers are `f64` precision throughout. Matrices are stored
//! flat and row-major; maps are plain `Vec<f64>` indexed by grid point.
//!
//! ## Error Taxonomy
//!
//! ```text
//! Configuration        invalid parameter combination, raised at the component boundary
//! NumericalDivergence  NaN/Inf inside an iterative solver, carries the last valid map
//! CacheConsistency     stored entry incompatible with the requesting computation
//! DataShape            channel count / grid size / index mismatch
//! ```

use num_complex::Complex64;

/// Complex sample type
pub type Complex = Complex64;

/// Result type for beamforming operations
pub type BeamResult<T> = Result<T, BeamError>;

/// Errors that can occur anywhere in the pipeline
#[derive(Debug, thiserror::Error)]
pub enum BeamError {
    /// Invalid parameter or parameter combination
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// An iterative solver produced a non-finite value
    #[error("{algorithm} diverged at iteration {iteration}")]
    NumericalDivergence {
        algorithm: &'static str,
        iteration: usize,
        /// Last map before the non-finite update
        last_valid: Vec<f64>,
    },

    /// Stored cache entry does not match the requesting computation
    #[error("Cache consistency error: {0}")]
    CacheConsistency(String),

    /// Dimension mismatch between cooperating components
    #[error("Data shape mismatch in {context}: expected {expected}, got {actual}")]
    DataShape {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BeamError {
    /// Shorthand for [`BeamError::Configuration`].
    pub fn config(msg: impl Into<String>) -> Self {
        BeamError::Configuration(msg.into())
    }

    /// Shorthand for [`BeamError::DataShape`].
    pub fn shape(context: &'static str, expected: usize, actual: usize) -> Self {
        BeamError::DataShape {
            context,
            expected,
            actual,
        }
    }

    /// True for errors that a cache read may recover from by recomputing.
    pub fn is_recoverable_cache_error(&self) -> bool {
        matches!(
            self,
            BeamError::CacheConsistency(_) | BeamError::Io(_) | BeamError::Serialization(_)
        )
    }
}

/// Sound pressure level in dB re 20 µPa from a mean-square pressure.
///
/// Values at or below zero are floored so the result stays finite.
pub fn level_db(mean_square: f64) -> f64 {
    10.0 * (mean_square.max(1e-35) / 4e-10).log10()
}
