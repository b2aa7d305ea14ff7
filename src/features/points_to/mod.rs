//! Context-sensitive points-to analysis.
//!
//! The trace depends only on the [`ports::PointsToEngine`] contract:
//! context-sensitive points-to queries, call-graph node lookup, indirect
//! call resolution, and context evolution. [`AndersenEngine`] is the
//! reference implementation: an inclusion-based worklist solver over
//! (context, value) nodes with origin-sensitive contexts and race-aware
//! call-site interception (pthread_create argument passing, OpenMP
//! outlined-function argument passing, task allocation).

pub mod domain;
pub mod infrastructure;
pub mod ports;

pub use domain::context::{ContextTable, CtxId, ROOT_CTX};
pub use domain::object::{MemoryObject, ObjKind, ObjectId};
pub use ports::{CallNodeRef, PointsToEngine, PtaError};

pub use infrastructure::andersen::AndersenEngine;
