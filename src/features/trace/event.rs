//! Trace-level events.

use crate::features::points_to::{CtxId, ObjectId};
use crate::features::summary::ForkKind;
use crate::shared::models::{FuncId, InstId, Value};
use std::fmt;
use std::sync::Arc;

pub type ThreadId = u32;
pub type EventId = u32;

/// Emission-time scope shared by all events of one traversal frame: the
/// pointer-analysis context and the call stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventScope {
    pub ctx: CtxId,
    pub callstack: Vec<FuncId>,
}

/// Key identifying a lock for lockset computation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockKey {
    /// Points-to objects of the lock operand, sorted.
    Objects(Vec<ObjectId>),
    /// Named synchronization (critical sections, ordered regions,
    /// reductions, unresolvable lock operands).
    Named(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Read {
        addr: Value,
    },
    Write {
        addr: Value,
    },
    Fork {
        kind: ForkKind,
        /// Spawned thread; `None` when the region's children were
        /// suppressed by `set_num_threads(1)`.
        thread: Option<ThreadId>,
        /// Thread handle operand (pthread only), for join matching.
        handle: Option<Value>,
        forks_master: bool,
        /// Fork instruction identifying the parallel-region pair both
        /// siblings belong to.
        region: Option<InstId>,
    },
    Join {
        kind: ForkKind,
        /// The fork event this join pairs with.
        fork: Option<(ThreadId, EventId)>,
        /// The joined thread, when one was spawned.
        thread: Option<ThreadId>,
    },
    LockAcquire {
        key: LockKey,
    },
    LockRelease {
        key: LockKey,
    },
    Barrier,
    EnterSingle,
    ExitSingle,
    EnterMaster,
    ExitMaster,
    EnterCritical {
        name: String,
    },
    ExitCritical {
        name: String,
    },
    EnterOrdered,
    ExitOrdered,
    EnterGuard {
        tid: i64,
    },
    ExitGuard {
        tid: i64,
    },
    OpaqueCall {
        callee: Option<FuncId>,
    },
}

/// One event of a thread's stream. `(thread, id)` is the universal handle;
/// events never hold back-pointers.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: EventId,
    pub kind: EventKind,
    /// Originating instruction; `None` only for synthesized joins.
    pub inst: Option<InstId>,
    pub scope: Arc<EventScope>,
}

impl Event {
    pub fn is_memory_access(&self) -> bool {
        matches!(self.kind, EventKind::Read { .. } | EventKind::Write { .. })
    }

    pub fn is_write(&self) -> bool {
        matches!(self.kind, EventKind::Write { .. })
    }

    pub fn accessed_value(&self) -> Option<Value> {
        match self.kind {
            EventKind::Read { addr } | EventKind::Write { addr } => Some(addr),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Read { addr } => write!(f, "Read {addr}"),
            EventKind::Write { addr } => write!(f, "Write {addr}"),
            EventKind::Fork {
                kind,
                thread,
                forks_master,
                ..
            } => {
                write!(f, "Fork {kind:?}")?;
                if let Some(t) = thread {
                    write!(f, " -> T{t}")?;
                }
                if *forks_master {
                    write!(f, " (master)")?;
                }
                Ok(())
            }
            EventKind::Join { kind, thread, .. } => {
                write!(f, "Join {kind:?}")?;
                if let Some(t) = thread {
                    write!(f, " <- T{t}")?;
                }
                Ok(())
            }
            EventKind::LockAcquire { key } => write!(f, "Acquire {key:?}"),
            EventKind::LockRelease { key } => write!(f, "Release {key:?}"),
            EventKind::Barrier => write!(f, "Barrier"),
            EventKind::EnterSingle => write!(f, "EnterSingle"),
            EventKind::ExitSingle => write!(f, "ExitSingle"),
            EventKind::EnterMaster => write!(f, "EnterMaster"),
            EventKind::ExitMaster => write!(f, "ExitMaster"),
            EventKind::EnterCritical { name } => write!(f, "EnterCritical({name})"),
            EventKind::ExitCritical { name } => write!(f, "ExitCritical({name})"),
            EventKind::EnterOrdered => write!(f, "EnterOrdered"),
            EventKind::ExitOrdered => write!(f, "ExitOrdered"),
            EventKind::EnterGuard { tid } => write!(f, "EnterGuard({tid})"),
            EventKind::ExitGuard { tid } => write!(f, "ExitGuard({tid})"),
            EventKind::OpaqueCall { callee } => match callee {
                Some(c) => write!(f, "Call @{c}"),
                None => write!(f, "Call <indirect>"),
            },
        }
    }
}
