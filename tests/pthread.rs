//! Pthread end-to-end scenarios.

mod common;

use common::{detect, pthread_runtime};
use racegraph::shared::models::{ModuleBuilder, TypeDesc, Value};

/// Two threads incrementing a global without synchronization race.
#[test]
fn unsynchronized_writers_race() {
    let mut mb = ModuleBuilder::new();
    let rt = pthread_runtime(&mut mb);
    let g = mb.global("g", TypeDesc::i32());

    let mut worker = mb.function("worker", vec![("arg", TypeDesc::Ptr)], TypeDesc::Ptr);
    let v = worker.at("pt.c", 5, 3).load(g);
    let inc = worker.other(vec![v, Value::ConstInt(1)]);
    worker.store(g, inc);
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

    let report = detect(mb.finish());
    assert!(report.involves("pt.c:5:3"), "{report:?}");
}

/// The same two writers protected by one mutex do not race.
#[test]
fn mutex_protects_writers() {
    let mut mb = ModuleBuilder::new();
    let rt = pthread_runtime(&mut mb);
    let g = mb.global("g", TypeDesc::i32());
    let mutex = mb.global("m", TypeDesc::named_struct("pthread_mutex_t", 40));

    let mut worker = mb.function("worker", vec![("arg", TypeDesc::Ptr)], TypeDesc::Ptr);
    worker.call(rt.mutex_lock, vec![mutex]);
    let v = worker.at("pt.c", 5, 3).load(g);
    let inc = worker.other(vec![v, Value::ConstInt(1)]);
    worker.store(g, inc);
    worker.call(rt.mutex_unlock, vec![mutex]);
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

    let report = detect(mb.finish());
    assert!(report.is_race_free(), "{report:?}");
}

/// A write after pthread_join is ordered after the child's writes; a
/// write without the join races.
#[test]
fn join_orders_parent_accesses() {
    let build = |with_join: bool| {
        let mut mb = ModuleBuilder::new();
        let rt = pthread_runtime(&mut mb);
        let g = mb.global("g", TypeDesc::i32());

        let mut worker = mb.function("worker", vec![("arg", TypeDesc::Ptr)], TypeDesc::Ptr);
        worker.at("join.c", 4, 3).store(g, Value::ConstInt(1));
        worker.ret(Value::Null);
        let worker_id = worker.id();

        let mut main = mb.function("main", vec![], TypeDesc::i32());
        let handle = main.alloca(TypeDesc::i64());
        main.call(
            rt.create,
            vec![handle, Value::Null, Value::Function(worker_id), Value::Null],
        );
        if with_join {
            let h = main.load(handle);
            main.call(rt.join, vec![h, Value::Null]);
        }
        main.at("join.c", 12, 3).store(g, Value::ConstInt(2));
        main.ret(Value::ConstInt(0));
        mb.finish()
    };

    let with_join = detect(build(true));
    assert!(with_join.is_race_free(), "{with_join:?}");

    let without_join = detect(build(false));
    assert!(without_join.involves("join.c:12:3"), "{without_join:?}");
}

/// The argument passed through pthread_create reaches the entry function:
/// a stack variable of main written by the child races with main's own
/// unsynchronized write.
#[test]
fn create_argument_flows_to_entry() {
    let mut mb = ModuleBuilder::new();
    let rt = pthread_runtime(&mut mb);

    let mut worker = mb.function("worker", vec![("arg", TypeDesc::Ptr)], TypeDesc::Ptr);
    let arg = worker.arg(0);
    worker.at("arg.c", 5, 3).store(arg, Value::ConstInt(1));
    worker.ret(Value::Null);
    let worker_id = worker.id();

    let mut main = mb.function("main", vec![], TypeDesc::i32());
    let shared = main.alloca(TypeDesc::i32());
    let handle = main.alloca(TypeDesc::i64());
    main.call(
        rt.create,
        vec![handle, Value::Null, Value::Function(worker_id), shared],
    );
    main.at("arg.c", 11, 3).store(shared, Value::ConstInt(2));
    main.ret(Value::ConstInt(0));

    let report = detect(mb.finish());
    assert_eq!(report.len(), 1, "{report:?}");
    assert!(report.involves("arg.c:5:3"));
    assert!(report.involves("arg.c:11:3"));
}
