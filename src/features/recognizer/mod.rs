//! Function-effect recognition.
//!
//! Maps a callee name to its concurrency-relevant effect. Classification is
//! total and a pure function of the name: anything unrecognized is an
//! opaque call.

pub mod effects;

pub use effects::{classify, is_openmp, is_openmp_no_effect, FuncEffect};
pub use effects::{GUARD_END_FN, GUARD_START_FN};
