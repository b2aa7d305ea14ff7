//! Trace construction errors.
//!
//! Structural invariant violations are fatal: the IR is internally
//! inconsistent and no meaningful trace exists. Everything recoverable is
//! logged and surfaced on the report instead.

use crate::features::points_to::PtaError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error(transparent)]
    Pta(#[from] PtaError),

    #[error("master end without matching master start at instruction {inst}")]
    MasterEndWithoutStart { inst: u32 },

    #[error("single end without matching single start at instruction {inst}")]
    SingleEndWithoutStart { inst: u32 },

    #[error("master region without end marker starting at instruction {inst}")]
    UnterminatedMaster { inst: u32 },

    #[error("single region without end marker starting at instruction {inst}")]
    UnterminatedSingle { inst: u32 },

    #[error("thread list order does not match thread ids")]
    ThreadOrder,
}

pub type Result<T> = std::result::Result<T, TraceError>;
