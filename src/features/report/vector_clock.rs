//! Vector clocks for fork/join ordering.
//!
//! Entry `t` is the last known logical time of thread `t`. `a` happens
//! before `b` iff every component of `a`'s clock is at most `b`'s.

use crate::features::trace::ThreadId;
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VectorClock {
    clocks: FxHashMap<ThreadId, u64>,
}

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, thread: ThreadId) -> u64 {
        self.clocks.get(&thread).copied().unwrap_or(0)
    }

    pub fn increment(&mut self, thread: ThreadId) {
        *self.clocks.entry(thread).or_insert(0) += 1;
    }

    /// Component-wise maximum; used when a join transfers the child's
    /// history to the joining thread.
    pub fn join(&mut self, other: &VectorClock) {
        for (&thread, &time) in &other.clocks {
            let entry = self.clocks.entry(thread).or_insert(0);
            *entry = (*entry).max(time);
        }
    }

    /// self → other iff ∀t: self[t] ≤ other[t].
    pub fn happens_before(&self, other: &VectorClock) -> bool {
        self.clocks
            .iter()
            .all(|(&thread, &time)| time <= other.get(thread))
    }

    pub fn concurrent(&self, other: &VectorClock) -> bool {
        !self.happens_before(other) && !other.happens_before(self)
    }
}
