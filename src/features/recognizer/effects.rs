//! Name-based classification of called functions.

/// Synthetic external call inserted at the head of a thread-id guarded
/// block by preprocessing. Signature: `void(i32)`.
pub const GUARD_START_FN: &str = "omp_get_thread_num_guard_start";
/// Synthetic external call inserted before the terminator of a guarded
/// block. Signature: `void(i32)`.
pub const GUARD_END_FN: &str = "omp_get_thread_num_guard_end";

/// Concurrency-relevant effect of a called function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FuncEffect {
    PthreadCreate,
    PthreadJoin,
    PthreadMutexLock,
    PthreadMutexUnlock,
    PthreadSpinLock,
    PthreadSpinUnlock,

    OmpFork,
    OmpForkTeams,
    OmpTaskFork,
    OmpTaskAlloc,
    OmpTaskWait,
    OmpForStaticInit,
    OmpForStaticFini,
    OmpDispatchInit,
    OmpDispatchNext,
    OmpDispatchFini,
    OmpSingleStart,
    OmpSingleEnd,
    OmpMasterStart,
    OmpMasterEnd,
    OmpBarrier,
    OmpReduce,
    OmpCriticalStart,
    OmpCriticalEnd,
    OmpOrderedStart,
    OmpOrderedEnd,
    OmpSetLock,
    OmpUnsetLock,
    OmpGetThreadNum,
    OmpSetNumThreads,
    OmpPushNumThreads,

    GuardStart,
    GuardEnd,

    /// Known to be irrelevant for race detection.
    NoEffect,
    /// Anything else.
    Opaque,
}

fn is_llvm_no_effect(name: &str) -> bool {
    name == "llvm.dbg.declare"
        || name == "llvm.dbg.value"
        || name.starts_with("llvm.dbg.")
        || name.starts_with("llvm.lifetime")
        || name == "llvm.stacksave"
        || name == "llvm.stackrestore"
        || name.starts_with("llvm.memcpy")
}

/// True for any name in the OpenMP runtime or library families.
pub fn is_openmp(name: &str) -> bool {
    name.starts_with("__kmpc_") || name.starts_with("omp_")
}

/// OpenMP runtime entry points known to be harmless for race detection.
/// An OpenMP name that classifies as opaque must be on this list; anything
/// else is an unhandled construct (see the summarizer diagnostic).
pub fn is_openmp_no_effect(name: &str) -> bool {
    matches!(
        name,
        "__kmpc_global_thread_num"
            | "__kmpc_end_reduce"
            | "__kmpc_end_reduce_nowait"
            | "__kmpc_flush"
            | "__kmpc_serialized_parallel"
            | "__kmpc_end_serialized_parallel"
            | "__kmpc_push_num_teams"
            | "__kmpc_omp_task_alloc"
            | "omp_get_num_threads"
    )
}

/// Classify a callee by name. Total: unknown names are [`FuncEffect::Opaque`].
pub fn classify(name: &str) -> FuncEffect {
    use FuncEffect::*;

    match name {
        "pthread_create" => return PthreadCreate,
        "pthread_join" => return PthreadJoin,
        "pthread_mutex_lock" => return PthreadMutexLock,
        "pthread_mutex_unlock" => return PthreadMutexUnlock,
        "pthread_spin_lock" => return PthreadSpinLock,
        "pthread_spin_unlock" => return PthreadSpinUnlock,

        "__kmpc_fork_call" => return OmpFork,
        "__kmpc_fork_teams" => return OmpForkTeams,
        "__kmpc_omp_task" => return OmpTaskFork,
        "__kmpc_omp_task_alloc" => return OmpTaskAlloc,
        "__kmpc_omp_taskwait" => return OmpTaskWait,
        "__kmpc_for_static_fini" => return OmpForStaticFini,
        "__kmpc_single" => return OmpSingleStart,
        "__kmpc_end_single" => return OmpSingleEnd,
        "__kmpc_master" => return OmpMasterStart,
        "__kmpc_end_master" => return OmpMasterEnd,
        "__kmpc_barrier" => return OmpBarrier,
        "__kmpc_reduce" | "__kmpc_reduce_nowait" => return OmpReduce,
        "__kmpc_critical" => return OmpCriticalStart,
        "__kmpc_end_critical" => return OmpCriticalEnd,
        "__kmpc_ordered" => return OmpOrderedStart,
        "__kmpc_end_ordered" => return OmpOrderedEnd,
        "__kmpc_set_lock" | "__kmpc_set_nest_lock" => return OmpSetLock,
        "__kmpc_unset_lock" | "__kmpc_unset_nest_lock" => return OmpUnsetLock,
        "__kmpc_push_num_threads" => return OmpPushNumThreads,
        "omp_get_thread_num" => return OmpGetThreadNum,
        "omp_set_num_threads" => return OmpSetNumThreads,
        GUARD_START_FN => return GuardStart,
        GUARD_END_FN => return GuardEnd,
        // printf is deliberately unmodeled; treating it as reading its
        // arguments would add noise without value.
        "printf" => return NoEffect,
        _ => {}
    }

    // Width-suffixed runtime entry points (_4, _4u, _8, ...).
    if name.starts_with("__kmpc_for_static_init") {
        return OmpForStaticInit;
    }
    if name.starts_with("__kmpc_dispatch_init") {
        return OmpDispatchInit;
    }
    if name.starts_with("__kmpc_dispatch_next") {
        return OmpDispatchNext;
    }
    if name.starts_with("__kmpc_dispatch_fini") {
        return OmpDispatchFini;
    }

    if is_llvm_no_effect(name) || is_openmp_no_effect(name) {
        return NoEffect;
    }

    Opaque
}
