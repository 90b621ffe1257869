//! Error taxonomy for reconstruction runs.
//!
//! All variants are fatal to the current run and carry enough context to
//! diagnose the offending shapes or values. Running out of iterations is not
//! an error; it is reported through `TerminationReason` instead.

use thiserror::Error;

/// Errors that abort a reconstruction run.
#[derive(Debug, Error)]
pub enum ReconError {
    /// An operator was called with an input whose shape does not match the
    /// shape fixed at construction time.
    #[error("shape mismatch in {context}: expected {expected}, got {got}")]
    ShapeMismatch {
        context: &'static str,
        expected: String,
        got: String,
    },

    /// Inconsistent or missing construction parameters, e.g. coil maps and
    /// sampling masks with different grid sizes.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The nonlinear signal model produced a non-finite value. Never clamped
    /// silently; the offending location is reported.
    #[error("non-finite model output in {context}: channel {channel}, voxel {voxel}, value {value}")]
    ModelEvaluation {
        context: &'static str,
        channel: usize,
        voxel: usize,
        value: String,
    },

    /// Operator-norm power iteration failed to stabilize within its budget,
    /// so no safe primal/dual step sizes can be derived.
    #[error("operator norm estimation did not stabilize after {iterations} iterations (last relative change {last_change:.3e})")]
    NormEstimation { iterations: usize, last_change: f32 },
}

pub type Result<T> = std::result::Result<T, ReconError>;
