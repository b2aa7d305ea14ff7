//! Race candidate enumeration and filtering.
//!
//! Consumes a built [`ProgramTrace`]: candidate pairs are memory accesses
//! on different threads whose points-to sets intersect with at least one
//! write, filtered by the happens-before relation implied by fork/join,
//! sibling barriers, locksets, single/master regions, and thread-id
//! guards.
//!
//! [`ProgramTrace`]: crate::features::trace::ProgramTrace

pub mod detector;
pub mod race;
pub mod vector_clock;

pub use detector::RaceDetector;
pub use race::{AccessRef, RaceCandidate, Report};
pub use vector_clock::VectorClock;
