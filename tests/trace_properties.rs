//! Trace-level properties: determinism, event-id contiguity, summary
//! caching, preprocessing idempotence, fork/join pairing, guard closure.

mod common;

use common::{build_trace, detect, omp_runtime, pthread_runtime};
use racegraph::features::preprocess::preprocess;
use racegraph::features::summary::ForkKind;
use racegraph::features::trace::EventKind;
use racegraph::shared::models::{ModuleBuilder, TypeDesc, Value};
use racegraph::{detect_races, DetectConfig, Module};

/// A module with a parallel region, a thread-id guard, and a barrier.
fn omp_fixture() -> Module {
    let mut mb = ModuleBuilder::new();
    let rt = omp_runtime(&mut mb);
    let shared = mb.global("shared", TypeDesc::i32());

    let mut outlined = mb.function(
        "main.omp_outlined",
        vec![("tid", TypeDesc::Ptr), ("bound", TypeDesc::Ptr)],
        TypeDesc::Void,
    );
    let guarded_bb = outlined.block("guarded");
    let join_bb = outlined.block("join");
    let tid = outlined.call(rt.get_thread_num, vec![]);
    let cmp = outlined.cmp_eq(tid, Value::ConstInt(0));
    outlined.cond_br(cmp, guarded_bb, join_bb);
    outlined.switch_to(guarded_bb);
    outlined.at("fix.c", 5, 5).store(shared, Value::ConstInt(1));
    outlined.br(join_bb);
    outlined.switch_to(join_bb);
    outlined.call(rt.barrier, vec![Value::Null, Value::ConstInt(0)]);
    outlined.at("fix.c", 8, 3).store(shared, Value::ConstInt(2));
    outlined.ret_void();
    let outlined_id = outlined.id();

    let mut main = mb.function("main", vec![], TypeDesc::i32());
    main.call(
        rt.fork_call,
        vec![Value::Null, Value::ConstInt(0), Value::Function(outlined_id)],
    );
    main.ret(Value::ConstInt(0));
    mb.finish()
}

#[test]
fn report_and_trace_are_deterministic() {
    let trace_a = build_trace(omp_fixture()).to_string();
    let trace_b = build_trace(omp_fixture()).to_string();
    assert_eq!(trace_a, trace_b);

    let report_a = detect(omp_fixture()).to_json().unwrap();
    let report_b = detect(omp_fixture()).to_json().unwrap();
    assert_eq!(report_a, report_b);
}

#[test]
fn event_ids_are_contiguous_in_emission_order() {
    let trace = build_trace(omp_fixture());
    assert!(trace.threads().len() >= 3);
    for thread in trace.threads() {
        for (position, event) in thread.events.iter().enumerate() {
            assert_eq!(event.id as usize, position);
        }
    }
}

#[test]
fn omp_forks_pair_with_exactly_one_join() {
    let trace = build_trace(omp_fixture());
    for thread in trace.threads() {
        for event in &thread.events {
            let EventKind::Fork {
                kind: ForkKind::Omp,
                ..
            } = &event.kind
            else {
                continue;
            };
            let joins = thread
                .events
                .iter()
                .filter(|e| {
                    matches!(
                        &e.kind,
                        EventKind::Join { fork: Some((t, f)), .. }
                            if *t == thread.id && *f == event.id
                    )
                })
                .count();
            assert_eq!(joins, 1, "fork T{}:{}", thread.id, event.id);
            // and the join comes later in the same thread
            let join = thread
                .events
                .iter()
                .find(|e| {
                    matches!(
                        &e.kind,
                        EventKind::Join { fork: Some((t, f)), .. }
                            if *t == thread.id && *f == event.id
                    )
                })
                .unwrap();
            assert!(join.id > event.id);
        }
    }
}

#[test]
fn guards_close_in_emission_order() {
    let trace = build_trace(omp_fixture());
    let mut saw_guard = false;
    for thread in trace.threads() {
        let mut open: Option<i64> = None;
        for event in &thread.events {
            match &event.kind {
                EventKind::EnterGuard { tid } => {
                    assert_eq!(open, None, "nested or unclosed guard");
                    open = Some(*tid);
                    saw_guard = true;
                }
                EventKind::ExitGuard { tid } => {
                    assert_eq!(open, Some(*tid), "guard closed with wrong tid");
                    open = None;
                }
                _ => {}
            }
        }
        assert_eq!(open, None, "guard left open on thread {}", thread.id);
    }
    assert!(saw_guard, "fixture must exercise guards");
}

/// Traversing the same function from two different contexts builds its
/// summary once.
#[test]
fn summaries_are_built_once_per_function() {
    let mut mb = ModuleBuilder::new();
    let rt = pthread_runtime(&mut mb);
    let g = mb.global("g", TypeDesc::i32());

    let mut worker = mb.function("worker", vec![("arg", TypeDesc::Ptr)], TypeDesc::Ptr);
    let v = worker.load(g);
    worker.store(g, v);
    worker.ret(Value::Null);
    let worker_id = worker.id();

    let mut main = mb.function("main", vec![], TypeDesc::i32());
    let h1 = main.alloca(TypeDesc::i64());
    let h2 = main.alloca(TypeDesc::i64());
    main.call(
        rt.create,
        vec![h1, Value::Null, Value::Function(worker_id), Value::Null],
    );
    main.call(
        rt.create,
        vec![h2, Value::Null, Value::Function(worker_id), Value::Null],
    );
    main.ret(Value::ConstInt(0));

    let trace = build_trace(mb.finish());
    assert_eq!(trace.threads().len(), 3);
    // main and worker: one summary each, despite two worker contexts
    assert_eq!(trace.summaries_built(), 2);
}

#[test]
fn preprocessing_is_idempotent() {
    let mut module = omp_fixture();
    preprocess(&mut module);
    let once = module.to_string();
    preprocess(&mut module);
    assert_eq!(module.to_string(), once);
}

/// The preprocessed module is a superset of the input: same function and
/// global names plus the two guard declarations, and twice the forks.
#[test]
fn preprocessing_only_adds() {
    let original = omp_fixture();
    let mut processed = original.clone();
    preprocess(&mut processed);

    for func in &original.functions {
        assert!(processed.function_by_name(&func.name).is_some());
    }
    assert!(processed
        .function_by_name("omp_get_thread_num_guard_start")
        .is_some());
    assert!(processed
        .function_by_name("omp_get_thread_num_guard_end")
        .is_some());

    let count_forks = |m: &Module| {
        m.functions
            .iter()
            .flat_map(|f| f.blocks.iter())
            .flat_map(|b| b.insts.iter())
            .filter(|i| m.callee_name(i) == Some("__kmpc_fork_call"))
            .count()
    };
    assert_eq!(count_forks(&processed), 2 * count_forks(&original));
}

/// The dumped IR shows the synthetic guard declarations and the
/// duplicated forks.
#[test]
fn dump_preprocessed_ir_writes_marked_module() {
    let path = std::env::temp_dir().join(format!(
        "racegraph-dump-{}.ll",
        std::process::id()
    ));
    let config = DetectConfig {
        dump_preprocessed_ir: Some(path.clone()),
        ..DetectConfig::default()
    };
    detect_races(omp_fixture(), "main", &config).unwrap();

    let listing = std::fs::read_to_string(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert!(listing.contains("declare void @omp_get_thread_num_guard_start(i32 %tid)"));
    assert!(listing.contains("declare void @omp_get_thread_num_guard_end(i32 %tid)"));
    assert_eq!(listing.matches("call @__kmpc_fork_call").count(), 2);
}

/// A missing entry function aborts the run with a diagnostic.
#[test]
fn missing_entry_function_is_fatal() {
    let module = ModuleBuilder::new().finish();
    let err = detect_races(module, "main", &DetectConfig::default()).unwrap_err();
    assert!(err.to_string().contains("entry function not found"));
}
