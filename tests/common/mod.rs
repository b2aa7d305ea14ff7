#![allow(dead_code)] // each test crate uses a subset of the fixtures

//! Shared fixtures for the integration scenarios.
//!
//! Modules are built the way clang lowers the corresponding C source:
//! OpenMP constructs become `__kmpc_*` runtime calls, parallel bodies
//! become outlined functions receiving shared variables by pointer.

use racegraph::features::points_to::AndersenEngine;
use racegraph::features::trace::ProgramTrace;
use racegraph::shared::models::{FuncId, ModuleBuilder, TypeDesc};
use racegraph::{detect_races, DetectConfig, Module, Report};

pub struct OmpRuntime {
    pub fork_call: FuncId,
    pub barrier: FuncId,
    pub set_num_threads: FuncId,
    pub push_num_threads: FuncId,
    pub get_thread_num: FuncId,
    pub single: FuncId,
    pub end_single: FuncId,
    pub master: FuncId,
    pub end_master: FuncId,
    pub critical: FuncId,
    pub end_critical: FuncId,
    pub reduce: FuncId,
    pub task: FuncId,
    pub task_alloc: FuncId,
    pub printf: FuncId,
}

pub fn omp_runtime(mb: &mut ModuleBuilder) -> OmpRuntime {
    let ptr = TypeDesc::Ptr;
    let i32t = TypeDesc::i32();
    OmpRuntime {
        fork_call: mb.declare(
            "__kmpc_fork_call",
            vec![ptr.clone(), i32t.clone(), ptr.clone()],
            TypeDesc::Void,
        ),
        barrier: mb.declare(
            "__kmpc_barrier",
            vec![ptr.clone(), i32t.clone()],
            TypeDesc::Void,
        ),
        set_num_threads: mb.declare("omp_set_num_threads", vec![i32t.clone()], TypeDesc::Void),
        push_num_threads: mb.declare(
            "__kmpc_push_num_threads",
            vec![ptr.clone(), i32t.clone(), i32t.clone()],
            TypeDesc::Void,
        ),
        get_thread_num: mb.declare("omp_get_thread_num", vec![], i32t.clone()),
        single: mb.declare(
            "__kmpc_single",
            vec![ptr.clone(), i32t.clone()],
            i32t.clone(),
        ),
        end_single: mb.declare(
            "__kmpc_end_single",
            vec![ptr.clone(), i32t.clone()],
            TypeDesc::Void,
        ),
        master: mb.declare(
            "__kmpc_master",
            vec![ptr.clone(), i32t.clone()],
            i32t.clone(),
        ),
        end_master: mb.declare(
            "__kmpc_end_master",
            vec![ptr.clone(), i32t.clone()],
            TypeDesc::Void,
        ),
        critical: mb.declare(
            "__kmpc_critical",
            vec![ptr.clone(), i32t.clone(), ptr.clone()],
            TypeDesc::Void,
        ),
        end_critical: mb.declare(
            "__kmpc_end_critical",
            vec![ptr.clone(), i32t.clone(), ptr.clone()],
            TypeDesc::Void,
        ),
        reduce: mb.declare(
            "__kmpc_reduce",
            vec![ptr.clone(), i32t.clone(), i32t.clone(), ptr.clone()],
            i32t.clone(),
        ),
        task: mb.declare(
            "__kmpc_omp_task",
            vec![ptr.clone(), i32t.clone(), ptr.clone()],
            i32t.clone(),
        ),
        task_alloc: mb.declare(
            "__kmpc_omp_task_alloc",
            vec![
                ptr.clone(),
                i32t.clone(),
                i32t.clone(),
                TypeDesc::i64(),
                TypeDesc::i64(),
                ptr.clone(),
            ],
            ptr.clone(),
        ),
        printf: mb.declare("printf", vec![ptr], i32t),
    }
}

pub struct PthreadRuntime {
    pub create: FuncId,
    pub join: FuncId,
    pub mutex_lock: FuncId,
    pub mutex_unlock: FuncId,
}

pub fn pthread_runtime(mb: &mut ModuleBuilder) -> PthreadRuntime {
    let ptr = TypeDesc::Ptr;
    PthreadRuntime {
        create: mb.declare(
            "pthread_create",
            vec![ptr.clone(), ptr.clone(), ptr.clone(), ptr.clone()],
            TypeDesc::i32(),
        ),
        join: mb.declare(
            "pthread_join",
            vec![TypeDesc::i64(), ptr.clone()],
            TypeDesc::i32(),
        ),
        mutex_lock: mb.declare("pthread_mutex_lock", vec![ptr.clone()], TypeDesc::i32()),
        mutex_unlock: mb.declare("pthread_mutex_unlock", vec![ptr], TypeDesc::i32()),
    }
}

pub fn build_trace(module: Module) -> ProgramTrace {
    ProgramTrace::build(module, Box::new(AndersenEngine::new()), "main")
        .expect("trace construction")
}

pub fn detect(module: Module) -> Report {
    detect_races(module, "main", &DetectConfig::default()).expect("race detection")
}
