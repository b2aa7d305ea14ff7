//! The race-relevant operation vocabulary.

use crate::shared::models::{CallTarget, InstId, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForkKind {
    PthreadCreate,
    Omp,
    OmpTeams,
    OmpTask,
}

impl ForkKind {
    pub fn is_omp_parallel(&self) -> bool {
        matches!(self, ForkKind::Omp | ForkKind::OmpTeams)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKind {
    Mutex,
    Spin,
    OmpLock,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkOp {
    pub kind: ForkKind,
    /// The thread-entry operand: a function, a cast of one, or an
    /// arbitrary pointer resolved later through the pointer analysis.
    pub entry: Value,
    /// Thread handle operand (pthread only).
    pub handle: Option<Value>,
    /// First fork of a duplicated OpenMP pair; its spawned sibling models
    /// the team's master thread.
    pub forks_master: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaceOpKind {
    Read { addr: Value },
    Write { addr: Value },

    Fork(ForkOp),
    PthreadJoin { handle: Value },
    /// Implicit join of an OpenMP parallel region; pairs with the fork
    /// emitted from `fork_inst`.
    OmpJoin { fork_inst: InstId, teams: bool },
    TaskWait,

    LockAcquire { kind: LockKind, lock: Value },
    LockRelease { kind: LockKind, lock: Value },

    Barrier,
    SingleStart,
    SingleEnd,
    MasterStart,
    MasterEnd,
    CriticalStart { name: String },
    CriticalEnd { name: String },
    OrderedStart,
    OrderedEnd,
    Reduce,

    ForInit,
    ForFini,
    DispatchInit,
    DispatchNext,
    DispatchFini,

    GetThreadNum,
    SetNumThreads { n: Option<i64> },
    PushNumThreads { n: Option<i64> },

    GuardStart { tid: i64 },
    GuardEnd { tid: i64 },

    /// Unrecognized call, kept for interprocedural traversal.
    Call { target: CallTarget },
}

/// One race-relevant operation, tied to its originating instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceOp {
    pub inst: InstId,
    pub kind: RaceOpKind,
}

impl RaceOp {
    pub fn new(inst: InstId, kind: RaceOpKind) -> Self {
        Self { inst, kind }
    }

    pub fn as_fork(&self) -> Option<&ForkOp> {
        match &self.kind {
            RaceOpKind::Fork(fork) => Some(fork),
            _ => None,
        }
    }
}

/// Ordered race-relevant operations of one function.
pub type FunctionSummary = Vec<RaceOp>;
