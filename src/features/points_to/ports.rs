//! The contract the trace imposes on a pointer-analysis service.

use super::domain::context::CtxId;
use super::domain::object::{MemoryObject, ObjectId};
use crate::shared::models::{FuncId, InstId, Module, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PtaError {
    #[error("entry function not found: {0}")]
    EntryNotFound(String),
}

/// A (context, function) node of the analysis call graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallNodeRef {
    pub ctx: CtxId,
    pub func: FuncId,
}

/// Context-sensitive, call-site-aware pointer analysis.
///
/// Implementations must intercept the thread-spawning call sites
/// (`pthread_create`, `__kmpc_fork_call`, `__kmpc_fork_teams`,
/// `__kmpc_omp_task`) so argument flow matches the runtime semantics, and
/// must model heap allocation including `__kmpc_omp_task_alloc`'s
/// task/shared-data object pair.
pub trait PointsToEngine {
    /// Eagerly build the call graph and points-to relation rooted at
    /// `entry_name`.
    fn analyze(&mut self, module: &Module, entry_name: &str) -> Result<(), PtaError>;

    /// The root call-graph node established by [`analyze`].
    ///
    /// [`analyze`]: PointsToEngine::analyze
    fn entry_node(&self) -> CallNodeRef;

    /// Abstract objects `value` may refer to inside `ctx`, sorted.
    fn points_to(&self, ctx: CtxId, value: Value) -> Vec<ObjectId>;

    fn object(&self, id: ObjectId) -> &MemoryObject;

    /// The node for a function invoked directly at a call site that
    /// evolves to `ctx`, if the analysis visited it.
    fn direct_node(&self, ctx: CtxId, func: FuncId) -> Option<CallNodeRef>;

    /// Resolved callees of an indirect call site, in deterministic order.
    fn indirect_callees(&self, ctx: CtxId, call: InstId) -> Vec<CallNodeRef>;

    /// The context transformation applied at a call site: contexts grow
    /// only at origin sites (thread-spawning calls).
    fn context_evolve(&self, parent: CtxId, callsite: InstId) -> CtxId;

    /// Does this call site begin a new thread? True for `pthread_create`,
    /// the OpenMP fork calls, `__kmpc_omp_task` and `__kmpc_omp_task_alloc`.
    fn is_origin(&self, callsite: InstId) -> bool;
}
