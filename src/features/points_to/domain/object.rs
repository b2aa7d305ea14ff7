//! Abstract memory objects.
//!
//! Concrete addresses are abstracted to allocation sites, cloned per
//! calling context so the same `alloca` in two thread contexts yields two
//! objects.

use super::context::CtxId;
use crate::shared::models::{FuncId, GlobalId, InstId, TypeDesc};
use std::fmt;

pub type ObjectId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjKind {
    Global(GlobalId),
    /// Stack slot from an `alloca`.
    Stack(InstId),
    Heap(InstId),
    /// The shared-data object a `__kmpc_omp_task_alloc` task struct
    /// contains.
    TaskShared(InstId),
    /// The opaque value `pthread_create` writes through its handle
    /// argument; joins are matched against it.
    ThreadHandle(InstId),
    Function(FuncId),
}

#[derive(Debug, Clone)]
pub struct MemoryObject {
    pub id: ObjectId,
    pub ctx: CtxId,
    pub kind: ObjKind,
    /// Inferred allocation type; `None` means the allocation is modeled
    /// untyped.
    pub ty: Option<TypeDesc>,
    pub thread_local: bool,
}

impl MemoryObject {
    pub fn as_function(&self) -> Option<FuncId> {
        match self.kind {
            ObjKind::Function(f) => Some(f),
            _ => None,
        }
    }
}

impl fmt::Display for MemoryObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ObjKind::Global(g) => write!(f, "O{}@global{}", self.id, g),
            ObjKind::Stack(i) => write!(f, "O{}@stack{}", self.id, i),
            ObjKind::Heap(i) => write!(f, "O{}@heap{}", self.id, i),
            ObjKind::TaskShared(i) => write!(f, "O{}@shared{}", self.id, i),
            ObjKind::ThreadHandle(i) => write!(f, "O{}@handle{}", self.id, i),
            ObjKind::Function(id) => write!(f, "O{}@fn{}", self.id, id),
        }
    }
}
