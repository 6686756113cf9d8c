//! Error types for the node-ranking estimator

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for estimator operations
pub type Result<T> = std::result::Result<T, EstimatorError>;

/// Fatal error type for the driver and audit trail.
///
/// Numerical degeneracies (zero-width ranges, non-finite regression output,
/// divide-by-zero ratios) and malformed input lines are never represented
/// here — those are absorbed at the point of detection and only logged, per
/// the estimator's failure semantics. This enum exists solely for the small
/// set of conditions that must abort the driver loop.
#[derive(Error, Debug)]
pub enum EstimatorError {
    /// I/O errors reading the input stream or writing the audit trail
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON codec failure in a context where it must abort rather than skip
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Audit trail file could not be opened
    #[error("could not open audit log at {path}: {source}")]
    AuditLog {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
