//! Function summaries.
//!
//! Lowers each function's instruction stream into an ordered list of
//! race-relevant operations ([`RaceOp`]); summaries are immutable after
//! construction and cached per function by [`SummaryBuilder`].

pub mod builder;
pub mod race_op;

pub use builder::SummaryBuilder;
pub use race_op::{ForkKind, ForkOp, FunctionSummary, LockKind, RaceOp, RaceOpKind};
