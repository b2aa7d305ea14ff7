//! Top-level error taxonomy.
//!
//! Malformed input and structural invariant violations abort the run;
//! everything else is recovered locally (with a log line) or surfaced on
//! the report.

use crate::features::trace::TraceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error(transparent)]
    Trace(#[from] TraceError),

    #[error("failed to write preprocessed IR: {0}")]
    Io(#[from] std::io::Error),
}
