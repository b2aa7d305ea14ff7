//! Lowering from the instruction stream to function summaries.

use super::race_op::{ForkKind, ForkOp, FunctionSummary, LockKind, RaceOp, RaceOpKind};
use crate::features::recognizer::{classify, is_openmp, is_openmp_no_effect, FuncEffect};
use crate::shared::models::{
    CallTarget, FuncId, FunctionDef, InstKind, Instruction, Module, Value,
};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Builds and caches function summaries.
///
/// Summaries are immutable once built; repeated requests for the same
/// function hit the cache regardless of calling context.
#[derive(Debug, Default)]
pub struct SummaryBuilder {
    cache: FxHashMap<FuncId, Arc<FunctionSummary>>,
    builds: usize,
}

impl SummaryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summarize(&mut self, module: &Module, func: FuncId) -> Arc<FunctionSummary> {
        if let Some(summary) = self.cache.get(&func) {
            return Arc::clone(summary);
        }
        let summary = Arc::new(lower_function(module, module.function(func)));
        self.builds += 1;
        self.cache.insert(func, Arc::clone(&summary));
        summary
    }

    /// Number of summaries actually built (cache misses).
    pub fn build_count(&self) -> usize {
        self.builds
    }
}

fn is_thread_local_global(module: &Module, ptr: Value) -> bool {
    match ptr {
        Value::Global(g) => module.global(g).thread_local,
        _ => false,
    }
}

/// Lock/name operand of an OpenMP runtime call: always the trailing
/// argument (`(loc, gtid, lock)` in the runtime, `(lock)` in the library).
fn trailing_arg(args: &[Value]) -> Option<Value> {
    args.last().copied()
}

fn critical_name(module: &Module, args: &[Value]) -> String {
    match trailing_arg(args) {
        Some(Value::Global(g)) => module.global(g).name.clone(),
        Some(other) => other.to_string(),
        None => "<anon>".to_string(),
    }
}

/// Resolve the entry function of an OpenMP task by chasing the task
/// struct back to its `__kmpc_omp_task_alloc` site, whose sixth argument
/// is the task entry. Falls back to the struct value itself.
fn task_entry(module: &Module, task_struct: Value) -> Value {
    if let Some(inst_id) = task_struct.as_inst() {
        if let Some(inst) = module.inst(inst_id) {
            if let Some((CallTarget::Direct(f), args)) = inst.as_call() {
                if classify(&module.function(*f).name) == FuncEffect::OmpTaskAlloc {
                    if let Some(entry) = args.get(5) {
                        return *entry;
                    }
                }
            }
        }
    }
    task_struct
}

/// The immediately following instruction, if it is a call classified as
/// `effect`.
fn twin_fork<'m>(
    module: &'m Module,
    block_insts: &'m [Instruction],
    index: usize,
    effect: FuncEffect,
) -> Option<&'m Instruction> {
    let next = block_insts.get(index + 1)?;
    let name = module.callee_name(next)?;
    (classify(name) == effect).then_some(next)
}

fn lower_function(module: &Module, func: &FunctionDef) -> FunctionSummary {
    let mut ops: FunctionSummary = Vec::new();

    for block in &func.blocks {
        let mut i = 0;
        while i < block.insts.len() {
            let inst = &block.insts[i];
            i += 1;
            match &inst.kind {
                InstKind::Load {
                    ptr,
                    atomic,
                    volatile,
                } => {
                    // Atomic and volatile accesses cannot race; accesses to
                    // thread-local globals never reach another thread.
                    if *atomic || *volatile || is_thread_local_global(module, *ptr) {
                        continue;
                    }
                    ops.push(RaceOp::new(inst.id, RaceOpKind::Read { addr: *ptr }));
                }
                InstKind::Store {
                    ptr,
                    value: _,
                    atomic,
                    volatile,
                } => {
                    if *atomic || *volatile || is_thread_local_global(module, *ptr) {
                        continue;
                    }
                    ops.push(RaceOp::new(inst.id, RaceOpKind::Write { addr: *ptr }));
                }
                InstKind::Call {
                    target: CallTarget::Indirect(callee),
                    ..
                } => {
                    // Resolution is deferred to the pointer analysis at
                    // trace time.
                    ops.push(RaceOp::new(
                        inst.id,
                        RaceOpKind::Call {
                            target: CallTarget::Indirect(*callee),
                        },
                    ));
                }
                InstKind::Call {
                    target: CallTarget::Direct(callee),
                    args,
                } => {
                    let advance =
                        lower_direct_call(module, func, block.insts.as_slice(), i - 1, *callee, args, &mut ops);
                    i += advance;
                }
                _ => {}
            }
        }
    }

    ops
}

/// Lower one direct call. Returns how many extra instructions the cursor
/// must advance past (non-zero only for duplicated OpenMP fork pairs).
fn lower_direct_call(
    module: &Module,
    func: &FunctionDef,
    block_insts: &[Instruction],
    index: usize,
    callee: FuncId,
    args: &[Value],
    ops: &mut FunctionSummary,
) -> usize {
    let inst = &block_insts[index];
    let name = module.function(callee).name.as_str();

    match classify(name) {
        FuncEffect::NoEffect | FuncEffect::OmpTaskAlloc => {}
        FuncEffect::PthreadCreate => {
            let (Some(handle), Some(entry)) = (args.first(), args.get(2)) else {
                warn!(call = name, func = %func.name, "malformed pthread_create call");
                return 0;
            };
            ops.push(RaceOp::new(
                inst.id,
                RaceOpKind::Fork(ForkOp {
                    kind: ForkKind::PthreadCreate,
                    entry: *entry,
                    handle: Some(*handle),
                    forks_master: false,
                }),
            ));
        }
        FuncEffect::PthreadJoin => {
            let Some(handle) = args.first() else {
                warn!(call = name, func = %func.name, "malformed pthread_join call");
                return 0;
            };
            ops.push(RaceOp::new(inst.id, RaceOpKind::PthreadJoin { handle: *handle }));
        }
        FuncEffect::PthreadMutexLock => push_lock(ops, inst, LockKind::Mutex, args, true),
        FuncEffect::PthreadMutexUnlock => push_lock(ops, inst, LockKind::Mutex, args, false),
        FuncEffect::PthreadSpinLock => push_lock(ops, inst, LockKind::Spin, args, true),
        FuncEffect::PthreadSpinUnlock => push_lock(ops, inst, LockKind::Spin, args, false),
        FuncEffect::OmpSetLock => push_lock(ops, inst, LockKind::OmpLock, args, true),
        FuncEffect::OmpUnsetLock => push_lock(ops, inst, LockKind::OmpLock, args, false),

        effect @ (FuncEffect::OmpFork | FuncEffect::OmpForkTeams) => {
            // Preprocessing duplicates every OpenMP fork; the twin must be
            // the very next instruction. Without it no races inside the
            // region can be modeled, so the whole region is skipped.
            let Some(twin) = twin_fork(module, block_insts, index, effect) else {
                warn!(
                    call = name,
                    func = %func.name,
                    "encountered non-duplicated OpenMP fork; skipping entire parallel region"
                );
                return 0;
            };
            let kind = if effect == FuncEffect::OmpFork {
                ForkKind::Omp
            } else {
                ForkKind::OmpTeams
            };
            let teams = kind == ForkKind::OmpTeams;
            let Some(entry) = args.get(2) else {
                warn!(call = name, func = %func.name, "malformed OpenMP fork call");
                return 0;
            };
            let (_, twin_args) = twin.as_call().expect("twin is a call");
            let twin_entry = twin_args.get(2).copied().unwrap_or(*entry);

            // Both forks, then both implicit joins, so the two sibling
            // threads of the region run in parallel with each other.
            ops.push(RaceOp::new(
                inst.id,
                RaceOpKind::Fork(ForkOp {
                    kind,
                    entry: *entry,
                    handle: None,
                    forks_master: true,
                }),
            ));
            ops.push(RaceOp::new(
                twin.id,
                RaceOpKind::Fork(ForkOp {
                    kind,
                    entry: twin_entry,
                    handle: None,
                    forks_master: false,
                }),
            ));
            ops.push(RaceOp::new(
                inst.id,
                RaceOpKind::OmpJoin {
                    fork_inst: inst.id,
                    teams,
                },
            ));
            ops.push(RaceOp::new(
                twin.id,
                RaceOpKind::OmpJoin {
                    fork_inst: twin.id,
                    teams,
                },
            ));
            return 1;
        }
        FuncEffect::OmpTaskFork => {
            let Some(task_struct) = trailing_arg(args) else {
                warn!(call = name, func = %func.name, "malformed OpenMP task call");
                return 0;
            };
            ops.push(RaceOp::new(
                inst.id,
                RaceOpKind::Fork(ForkOp {
                    kind: ForkKind::OmpTask,
                    entry: task_entry(module, task_struct),
                    handle: None,
                    forks_master: false,
                }),
            ));
        }
        FuncEffect::OmpTaskWait => ops.push(RaceOp::new(inst.id, RaceOpKind::TaskWait)),
        FuncEffect::OmpForStaticInit => ops.push(RaceOp::new(inst.id, RaceOpKind::ForInit)),
        FuncEffect::OmpForStaticFini => ops.push(RaceOp::new(inst.id, RaceOpKind::ForFini)),
        FuncEffect::OmpDispatchInit => ops.push(RaceOp::new(inst.id, RaceOpKind::DispatchInit)),
        FuncEffect::OmpDispatchNext => ops.push(RaceOp::new(inst.id, RaceOpKind::DispatchNext)),
        FuncEffect::OmpDispatchFini => ops.push(RaceOp::new(inst.id, RaceOpKind::DispatchFini)),
        FuncEffect::OmpSingleStart => ops.push(RaceOp::new(inst.id, RaceOpKind::SingleStart)),
        FuncEffect::OmpSingleEnd => ops.push(RaceOp::new(inst.id, RaceOpKind::SingleEnd)),
        FuncEffect::OmpMasterStart => ops.push(RaceOp::new(inst.id, RaceOpKind::MasterStart)),
        FuncEffect::OmpMasterEnd => ops.push(RaceOp::new(inst.id, RaceOpKind::MasterEnd)),
        FuncEffect::OmpBarrier => ops.push(RaceOp::new(inst.id, RaceOpKind::Barrier)),
        FuncEffect::OmpReduce => ops.push(RaceOp::new(inst.id, RaceOpKind::Reduce)),
        FuncEffect::OmpCriticalStart => ops.push(RaceOp::new(
            inst.id,
            RaceOpKind::CriticalStart {
                name: critical_name(module, args),
            },
        )),
        FuncEffect::OmpCriticalEnd => ops.push(RaceOp::new(
            inst.id,
            RaceOpKind::CriticalEnd {
                name: critical_name(module, args),
            },
        )),
        FuncEffect::OmpOrderedStart => ops.push(RaceOp::new(inst.id, RaceOpKind::OrderedStart)),
        FuncEffect::OmpOrderedEnd => ops.push(RaceOp::new(inst.id, RaceOpKind::OrderedEnd)),
        FuncEffect::OmpGetThreadNum => ops.push(RaceOp::new(inst.id, RaceOpKind::GetThreadNum)),
        FuncEffect::OmpSetNumThreads => ops.push(RaceOp::new(
            inst.id,
            RaceOpKind::SetNumThreads {
                n: trailing_arg(args).and_then(|v| v.as_const_int()),
            },
        )),
        FuncEffect::OmpPushNumThreads => ops.push(RaceOp::new(
            inst.id,
            RaceOpKind::PushNumThreads {
                n: trailing_arg(args).and_then(|v| v.as_const_int()),
            },
        )),
        FuncEffect::GuardStart => {
            if let Some(tid) = args.first().and_then(|v| v.as_const_int()) {
                ops.push(RaceOp::new(inst.id, RaceOpKind::GuardStart { tid }));
            }
        }
        FuncEffect::GuardEnd => {
            if let Some(tid) = args.first().and_then(|v| v.as_const_int()) {
                ops.push(RaceOp::new(inst.id, RaceOpKind::GuardEnd { tid }));
            }
        }
        FuncEffect::Opaque => {
            if is_openmp(name) {
                // Make sure no OpenMP feature is silently ignored: an
                // OpenMP name that reaches here must be a known-harmless
                // runtime entry point.
                debug!(call = name, "unhandled OpenMP call");
                debug_assert!(is_openmp_no_effect(name), "unhandled OpenMP call: {name}");
                warn!(call = name, "treating unhandled OpenMP call as opaque");
            }
            ops.push(RaceOp::new(
                inst.id,
                RaceOpKind::Call {
                    target: CallTarget::Direct(callee),
                },
            ));
        }
    }

    0
}

fn push_lock(
    ops: &mut FunctionSummary,
    inst: &Instruction,
    kind: LockKind,
    args: &[Value],
    acquire: bool,
) {
    let Some(lock) = trailing_arg(args).or_else(|| args.first().copied()) else {
        warn!("lock call without operands");
        return;
    };
    // Pthread locks take the lock as their only argument; OpenMP runtime
    // locks take it last.
    let lock = if matches!(kind, LockKind::Mutex | LockKind::Spin) {
        args.first().copied().unwrap_or(lock)
    } else {
        lock
    };
    let op = if acquire {
        RaceOpKind::LockAcquire { kind, lock }
    } else {
        RaceOpKind::LockRelease { kind, lock }
    };
    ops.push(RaceOp::new(inst.id, op));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::{ModuleBuilder, TypeDesc};

    fn omp_decls(mb: &mut ModuleBuilder) {
        mb.declare(
            "__kmpc_fork_call",
            vec![TypeDesc::Ptr, TypeDesc::i32(), TypeDesc::Ptr],
            TypeDesc::Void,
        );
    }

    #[test]
    fn read_write_call_order_preserved() {
        let mut mb = ModuleBuilder::new();
        let bar = mb.declare("bar", vec![], TypeDesc::Void);
        let mut f = mb.function("foo", vec![("x", TypeDesc::Ptr)], TypeDesc::Void);
        let x = f.arg(0);
        let v = f.load(x);
        let _ = f.other(vec![v, Value::ConstInt(42)]);
        f.call(bar, vec![]);
        f.store(x, v);
        f.ret_void();
        let module = mb.finish();

        let mut builder = SummaryBuilder::new();
        let foo = module.function_by_name("foo").unwrap();
        let summary = builder.summarize(&module, foo);
        assert_eq!(summary.len(), 3);
        assert!(matches!(summary[0].kind, RaceOpKind::Read { .. }));
        assert!(matches!(summary[1].kind, RaceOpKind::Call { .. }));
        assert!(matches!(summary[2].kind, RaceOpKind::Write { .. }));
    }

    #[test]
    fn atomic_volatile_and_thread_local_dropped() {
        let mut mb = ModuleBuilder::new();
        let tls = mb.thread_local_global("tls", TypeDesc::i32());
        let g = mb.global("g", TypeDesc::i32());
        let mut f = mb.function("foo", vec![], TypeDesc::Void);
        let _ = f.load(tls);
        f.store(tls, Value::ConstInt(1));
        let _ = f.load_flags(g, true, false);
        f.store_flags(g, Value::ConstInt(1), false, true);
        let _ = f.load(g);
        f.ret_void();
        let module = mb.finish();

        let mut builder = SummaryBuilder::new();
        let foo = module.function_by_name("foo").unwrap();
        let summary = builder.summarize(&module, foo);
        assert_eq!(summary.len(), 1);
        assert!(matches!(summary[0].kind, RaceOpKind::Read { .. }));
    }

    #[test]
    fn duplicated_fork_pairs_with_joins() {
        let mut mb = ModuleBuilder::new();
        omp_decls(&mut mb);
        let fork = mb.func_id("__kmpc_fork_call").unwrap();
        let mut outlined = mb.function(
            "outlined",
            vec![("tid", TypeDesc::Ptr), ("bound", TypeDesc::Ptr)],
            TypeDesc::Void,
        );
        outlined.ret_void();
        let outlined_id = outlined.id();
        let mut f = mb.function("main", vec![], TypeDesc::i32());
        f.call(fork, vec![Value::Null, Value::ConstInt(0), Value::Function(outlined_id)]);
        f.call(fork, vec![Value::Null, Value::ConstInt(0), Value::Function(outlined_id)]);
        f.ret(Value::ConstInt(0));
        let module = mb.finish();

        let mut builder = SummaryBuilder::new();
        let main = module.function_by_name("main").unwrap();
        let summary = builder.summarize(&module, main);
        assert_eq!(summary.len(), 4);
        let first = summary[0].as_fork().unwrap();
        let second = summary[1].as_fork().unwrap();
        assert!(first.forks_master);
        assert!(!second.forks_master);
        assert!(matches!(
            summary[2].kind,
            RaceOpKind::OmpJoin { teams: false, .. }
        ));
        assert!(matches!(summary[3].kind, RaceOpKind::OmpJoin { .. }));
    }

    #[test]
    fn non_duplicated_fork_skips_region() {
        let mut mb = ModuleBuilder::new();
        omp_decls(&mut mb);
        let fork = mb.func_id("__kmpc_fork_call").unwrap();
        let mut outlined = mb.function("outlined", vec![], TypeDesc::Void);
        outlined.ret_void();
        let outlined_id = outlined.id();
        let mut f = mb.function("main", vec![], TypeDesc::i32());
        f.call(fork, vec![Value::Null, Value::ConstInt(0), Value::Function(outlined_id)]);
        f.ret(Value::ConstInt(0));
        let module = mb.finish();

        let mut builder = SummaryBuilder::new();
        let main = module.function_by_name("main").unwrap();
        let summary = builder.summarize(&module, main);
        assert!(summary.is_empty());
    }

    #[test]
    fn summaries_are_cached() {
        let mut mb = ModuleBuilder::new();
        let mut f = mb.function("foo", vec![("x", TypeDesc::Ptr)], TypeDesc::Void);
        let x = f.arg(0);
        let _ = f.load(x);
        f.ret_void();
        let module = mb.finish();

        let mut builder = SummaryBuilder::new();
        let foo = module.function_by_name("foo").unwrap();
        let first = builder.summarize(&module, foo);
        let second = builder.summarize(&module, foo);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(builder.build_count(), 1);
    }

    #[test]
    fn pthread_mutex_lowering() {
        let mut mb = ModuleBuilder::new();
        let lock = mb.declare("pthread_mutex_lock", vec![TypeDesc::Ptr], TypeDesc::i32());
        let unlock = mb.declare("pthread_mutex_unlock", vec![TypeDesc::Ptr], TypeDesc::i32());
        let mut f = mb.function("main", vec![], TypeDesc::i32());
        let m = f.alloca(TypeDesc::named_struct("pthread_mutex_t", 40));
        f.call(lock, vec![m]);
        f.call(unlock, vec![m]);
        f.ret(Value::ConstInt(0));
        let module = mb.finish();

        let mut builder = SummaryBuilder::new();
        let main = module.function_by_name("main").unwrap();
        let summary = builder.summarize(&module, main);
        assert_eq!(summary.len(), 2);
        assert!(matches!(
            summary[0].kind,
            RaceOpKind::LockAcquire {
                kind: LockKind::Mutex,
                ..
            }
        ));
        assert!(matches!(
            summary[1].kind,
            RaceOpKind::LockRelease {
                kind: LockKind::Mutex,
                ..
            }
        ));
    }
}
