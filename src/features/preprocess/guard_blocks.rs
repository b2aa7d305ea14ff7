//! Thread-id guard marking.
//!
//! OpenMP programs routinely serialize work by branching on the thread id
//! (`if (omp_get_thread_num() == 0) { ... }`). Without markers the analyzer
//! would report false races on such single-threaded blocks. This pass finds
//! blocks guarded by an equality comparison of `omp_get_thread_num()`
//! against a constant and brackets them with synthetic external calls the
//! recognizer classifies as guard events.

use crate::features::recognizer::{classify, FuncEffect, GUARD_END_FN, GUARD_START_FN};
use crate::shared::models::{
    BlockId, CallTarget, FuncId, FunctionDef, InstId, InstKind, Instruction, Module, Terminator,
    TypeDesc, Value,
};
use rustc_hash::FxHashSet;
use tracing::debug;

/// Blocks reachable from `start`, including `start` itself.
fn reachable(func: &FunctionDef, start: BlockId) -> FxHashSet<BlockId> {
    let mut visited = FxHashSet::default();
    let mut queue = vec![start];
    while let Some(block) = queue.pop() {
        if !visited.insert(block) {
            continue;
        }
        for succ in func.blocks[block as usize].term.successors() {
            queue.push(succ);
        }
    }
    visited
}

/// Blocks guarded by the taken edge of `branch`: reachable from the taken
/// successor but not from the not-taken successor.
fn guarded_blocks(func: &FunctionDef, then_dest: BlockId, else_dest: BlockId) -> Vec<BlockId> {
    let taken = reachable(func, then_dest);
    let not_taken = reachable(func, else_dest);
    let mut guarded: Vec<BlockId> = taken.difference(&not_taken).copied().collect();
    guarded.sort_unstable();
    guarded
}

/// Equality comparisons of `call_result` against a compile-time constant,
/// with the guarded thread id.
fn const_cmp_eq(func: &FunctionDef, call_result: Value) -> Vec<(InstId, i64)> {
    let mut cmps = Vec::new();
    for block in &func.blocks {
        for inst in &block.insts {
            if let InstKind::CmpEq { lhs, rhs } = &inst.kind {
                let tid = if *lhs == call_result {
                    rhs.as_const_int()
                } else if *rhs == call_result {
                    lhs.as_const_int()
                } else {
                    None
                };
                if let Some(tid) = tid {
                    cmps.push((inst.id, tid));
                }
            }
        }
    }
    cmps
}

fn declare_guard_fn(module: &mut Module, name: &str) -> FuncId {
    if let Some(existing) = module.function_by_name(name) {
        return existing;
    }
    module.add_function(FunctionDef {
        id: 0,
        name: name.to_string(),
        params: vec![crate::shared::models::Param {
            name: "tid".to_string(),
            ty: TypeDesc::i32(),
        }],
        ret: TypeDesc::Void,
        blocks: Vec::new(),
    })
}

fn has_guard_start(module: &Module, func: &FunctionDef, block: BlockId, tid: i64) -> bool {
    func.blocks[block as usize].insts.iter().any(|inst| {
        inst.synthetic
            && matches!(
                inst.as_call(),
                Some((CallTarget::Direct(callee), args))
                    if classify(&module.function(*callee).name) == FuncEffect::GuardStart
                        && args.first().and_then(Value::as_const_int) == Some(tid)
            )
    })
}

/// Insert `guard_start(k)`/`guard_end(k)` around every block guarded by a
/// thread-id comparison. All blocks of a guarded set receive markers.
pub fn insert_guard_markers(module: &mut Module) {
    // Read phase: collect (function, block, tid) targets.
    let mut targets: Vec<(FuncId, BlockId, i64)> = Vec::new();
    for func in &module.functions {
        for block in &func.blocks {
            for inst in &block.insts {
                let Some(name) = module.callee_name(inst) else {
                    continue;
                };
                if classify(name) != FuncEffect::OmpGetThreadNum {
                    continue;
                }
                for (cmp_id, tid) in const_cmp_eq(func, inst.result()) {
                    for branch_block in &func.blocks {
                        let Terminator::CondBr {
                            cond,
                            then_dest,
                            else_dest,
                        } = &branch_block.term
                        else {
                            continue;
                        };
                        if *cond != Value::Inst(cmp_id) {
                            continue;
                        }
                        for guarded in guarded_blocks(func, *then_dest, *else_dest) {
                            targets.push((func.id, guarded, tid));
                        }
                    }
                }
            }
        }
    }

    if targets.is_empty() {
        return;
    }

    let start_fn = declare_guard_fn(module, GUARD_START_FN);
    let end_fn = declare_guard_fn(module, GUARD_END_FN);

    for (func_id, block, tid) in targets {
        // Idempotence: the block already carries its markers.
        if has_guard_start(module, module.function(func_id), block, tid) {
            continue;
        }
        debug!(func = func_id, block, tid, "marking guarded block");

        let start_id = module.alloc_inst_id();
        let end_id = module.alloc_inst_id();
        let make_call = |id: InstId, callee: FuncId| Instruction {
            id,
            kind: InstKind::Call {
                target: CallTarget::Direct(callee),
                args: vec![Value::ConstInt(tid)],
            },
            loc: None,
            synthetic: true,
        };

        let insts = &mut module.functions[func_id as usize].blocks[block as usize].insts;
        // guard_end sits at the end of the body, just before the
        // terminator; guard_start goes after any leading phi nodes.
        insts.push(make_call(end_id, end_fn));
        let first_non_phi = insts.iter().take_while(|i| i.is_phi()).count();
        insts.insert(first_non_phi, make_call(start_id, start_fn));
    }
}
