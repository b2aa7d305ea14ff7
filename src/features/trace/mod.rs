//! Program-wide thread trace construction.
//!
//! One ordered event stream per thread of execution, produced by an
//! interpretive, depth-first traversal of the call graph through cached
//! function summaries. OpenMP parallel regions appear as two sibling
//! threads thanks to the preprocessing fork duplication; tasks, single,
//! master, critical, ordered, reductions, barriers and thread-id guards
//! are modeled as region state during the walk.

pub mod error;
pub mod event;
pub mod openmp_state;
pub mod program_trace;
pub mod thread_trace;

pub use error::TraceError;
pub use event::{Event, EventId, EventKind, EventScope, LockKey, ThreadId};
pub use openmp_state::{OpenMpState, TraceBuildState};
pub use program_trace::ProgramTrace;
pub use thread_trace::{SpawnSite, ThreadTrace};
