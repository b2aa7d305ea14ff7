//! Mutable state carried during trace construction.

use super::event::{EventId, ThreadId};
use crate::features::summary::SummaryBuilder;

/// An OpenMP task forked but not yet joined. Tasks join implicitly at the
/// next barrier, taskwait, region end, or the end of the thread.
#[derive(Debug, Clone, Copy)]
pub struct UnjoinedTask {
    pub fork_event: EventId,
    pub thread: Option<ThreadId>,
}

/// OpenMP region state, local to one thread trace. A nested thread trace
/// receives a fresh state through [`OpenMpState::child_state`].
#[derive(Debug, Default)]
pub struct OpenMpState {
    /// Nesting depth of `teams` regions; team-specific synchronization is
    /// skipped while inside one.
    pub teams_depth: usize,

    /// Inside a single region (task forks happen on the master sibling
    /// only).
    pub in_single: bool,

    /// Depth counters guarding against unbalanced region markers.
    pub single_depth: usize,
    pub master_depth: usize,

    /// Tasks awaiting their implicit join.
    pub unjoined_tasks: Vec<UnjoinedTask>,

    /// `push_num_threads` applies to the next parallel construct only.
    pub pending_push: Option<i64>,

    /// `set_num_threads` persists until overwritten.
    pub set_num_threads: Option<i64>,

    /// The current parallel-region pair is suppressed
    /// (`set_num_threads(1)`).
    pub suppress_region: bool,

    /// A reduction lock is held until the next barrier or region end.
    pub reduce_held: bool,
}

impl OpenMpState {
    /// Fresh state for a child thread. The teams depth is inherited (and
    /// grown through a teams fork); the number-of-threads setting is an
    /// ICV the child inherits.
    pub fn child_state(&self, through_teams_fork: bool) -> OpenMpState {
        OpenMpState {
            teams_depth: self.teams_depth + usize::from(through_teams_fork),
            set_num_threads: self.set_num_threads,
            ..OpenMpState::default()
        }
    }

    pub fn in_teams_region(&self) -> bool {
        self.teams_depth > 0
    }
}

/// State shared across the construction of the whole program trace.
#[derive(Debug, Default)]
pub struct TraceBuildState {
    /// Cached function summaries.
    pub summaries: SummaryBuilder,

    /// Monotonic thread-id counter; threads are constructed while the
    /// thread list is still growing, so the list length cannot serve as
    /// the counter.
    pub next_tid: ThreadId,
}

impl TraceBuildState {
    pub fn alloc_tid(&mut self) -> ThreadId {
        self.next_tid += 1;
        self.next_tid
    }
}
