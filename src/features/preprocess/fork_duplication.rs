//! OpenMP fork duplication.

use crate::features::recognizer::{classify, FuncEffect};
use crate::shared::models::{InstKind, Instruction, Module};
use tracing::debug;

fn is_omp_fork(module: &Module, inst: &Instruction) -> bool {
    module
        .callee_name(inst)
        .map(|name| {
            matches!(
                classify(name),
                FuncEffect::OmpFork | FuncEffect::OmpForkTeams
            )
        })
        .unwrap_or(false)
}

/// Insert an exact copy of each OpenMP fork call immediately after the
/// original, preserving all operands.
///
/// Copies are flagged synthetic so a re-run neither duplicates the copies
/// nor re-duplicates an original that already has its twin.
pub fn duplicate_omp_forks(module: &mut Module) {
    for fi in 0..module.functions.len() {
        // Read phase: find originals that still lack a twin.
        let mut insertions: Vec<(usize, usize, Instruction)> = Vec::new();
        for (bi, block) in module.functions[fi].blocks.iter().enumerate() {
            for (ii, inst) in block.insts.iter().enumerate() {
                if inst.synthetic || !is_omp_fork(module, inst) {
                    continue;
                }
                let already_twinned = block
                    .insts
                    .get(ii + 1)
                    .map(|next| next.synthetic && next.kind == inst.kind)
                    .unwrap_or(false);
                if already_twinned {
                    continue;
                }
                insertions.push((bi, ii, inst.clone()));
            }
        }

        // Write phase, back to front so recorded positions stay valid.
        for (bi, ii, original) in insertions.into_iter().rev() {
            let id = module.alloc_inst_id();
            debug!(func = fi, inst = original.id, twin = id, "duplicating OpenMP fork");
            let twin = Instruction {
                id,
                synthetic: true,
                ..original
            };
            module.functions[fi].blocks[bi].insts.insert(ii + 1, twin);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::{ModuleBuilder, TypeDesc, Value};

    fn module_with_fork() -> Module {
        let mut mb = ModuleBuilder::new();
        let fork = mb.declare(
            "__kmpc_fork_call",
            vec![TypeDesc::Ptr, TypeDesc::i32(), TypeDesc::Ptr],
            TypeDesc::Void,
        );
        let mut outlined = mb.function("outlined", vec![], TypeDesc::Void);
        outlined.ret_void();
        let outlined_id = outlined.id();
        let mut main = mb.function("main", vec![], TypeDesc::i32());
        main.call(
            fork,
            vec![Value::Null, Value::ConstInt(0), Value::Function(outlined_id)],
        );
        main.ret(Value::ConstInt(0));
        mb.finish()
    }

    fn fork_count(module: &Module) -> usize {
        let main = module.function(module.function_by_name("main").unwrap());
        main.blocks[0]
            .insts
            .iter()
            .filter(|i| is_omp_fork(module, i))
            .count()
    }

    #[test]
    fn inserts_twin_after_original() {
        let mut module = module_with_fork();
        duplicate_omp_forks(&mut module);
        assert_eq!(fork_count(&module), 2);

        let main = module.function(module.function_by_name("main").unwrap());
        let insts = &main.blocks[0].insts;
        assert!(!insts[0].synthetic);
        assert!(insts[1].synthetic);
        assert_eq!(insts[0].kind, insts[1].kind);
        assert_ne!(insts[0].id, insts[1].id);
    }

    #[test]
    fn second_run_is_no_op() {
        let mut module = module_with_fork();
        duplicate_omp_forks(&mut module);
        duplicate_omp_forks(&mut module);
        assert_eq!(fork_count(&module), 2);
    }
}
