//! Heap allocation modeling.
//!
//! Allocated types are inferred from the bitcast that consumes the raw
//! allocation result. When the static allocation size matches the element
//! size the object is a single instance; when it is a whole multiple, a
//! bounded array; otherwise an unbounded array.

use crate::shared::models::{InstId, InstKind, Instruction, Module, TypeDesc, Value};

/// Heap allocator entry points: C, C++ mangled operators new/new[], and
/// the OpenMP task allocator.
pub fn is_heap_alloc(name: &str) -> bool {
    matches!(
        name,
        "malloc" | "calloc" | "_Znwm" | "_Znam" | "__kmpc_omp_task_alloc"
    )
}

/// Pointee type of the bitcast consuming `alloc`'s result.
///
/// The fast path looks at the immediately following instruction. For call
/// sites inlined from a wrapper, the bitcast is not necessarily adjacent;
/// the single bitcast user is used instead, and multiple users make the
/// heuristic give up.
fn next_bitcast_dest(module: &Module, alloc: &Instruction) -> Option<TypeDesc> {
    if let Some(next) = module.next_inst_in_block(alloc.id) {
        if let InstKind::BitCast { value, to_pointee } = &next.kind {
            if *value == alloc.result() && to_pointee.is_sized() {
                return Some(to_pointee.clone());
            }
        }
    }

    let inlined = alloc.loc.as_ref().map(|l| l.inlined).unwrap_or(false);
    if !inlined {
        return None;
    }

    let func = module.containing_function(alloc.id)?;
    let mut unique: Option<&TypeDesc> = None;
    for block in &module.function(func).blocks {
        for inst in &block.insts {
            if let InstKind::BitCast { value, to_pointee } = &inst.kind {
                if *value == alloc.result() {
                    if unique.is_some() {
                        // Multiple bitcast users: no way to pick one.
                        return None;
                    }
                    unique = Some(to_pointee);
                }
            }
        }
    }
    unique.filter(|ty| ty.is_sized()).cloned()
}

fn infer_sized(elem: TypeDesc, total: Option<i64>) -> Option<TypeDesc> {
    let elem_size = elem.size()?;
    match total {
        Some(total) => {
            let total = u64::try_from(total).ok()?;
            if total == elem_size {
                Some(elem)
            } else if elem_size != 0 && total % elem_size == 0 {
                Some(TypeDesc::bounded_array(elem, total / elem_size))
            } else {
                None
            }
        }
        None => {
            if elem_size == 1 {
                // i8[] carries no structure; equal to a field-insensitive
                // object.
                None
            } else {
                Some(TypeDesc::unbounded_array(elem))
            }
        }
    }
}

/// `void *malloc(size_t size)`-shaped inference.
fn infer_malloc(module: &Module, alloc: &Instruction, size_arg: Option<Value>) -> Option<TypeDesc> {
    let elem = next_bitcast_dest(module, alloc)?;
    infer_sized(elem, size_arg.and_then(|v| v.as_const_int()))
}

/// `void *calloc(size_t num, size_t elem_size)`-shaped inference.
fn infer_calloc(
    module: &Module,
    alloc: &Instruction,
    num_arg: Option<Value>,
    size_arg: Option<Value>,
) -> Option<TypeDesc> {
    let elem = next_bitcast_dest(module, alloc)?;
    let elem_size = elem.size()?;
    let declared = size_arg.and_then(|v| v.as_const_int())?;
    if u64::try_from(declared).ok()? != elem_size {
        return Some(TypeDesc::unbounded_array(elem));
    }
    match num_arg.and_then(|v| v.as_const_int()) {
        Some(1) => Some(elem),
        Some(n) => Some(TypeDesc::bounded_array(elem, u64::try_from(n).ok()?)),
        None => Some(TypeDesc::unbounded_array(elem)),
    }
}

/// Infer the allocated type at a heap allocation call site, or `None` to
/// model the object untyped.
pub fn infer_alloc_type(module: &Module, alloc_inst: InstId, callee_name: &str) -> Option<TypeDesc> {
    let alloc = module.inst(alloc_inst)?;
    let (_, args) = alloc.as_call()?;
    match callee_name {
        "calloc" => infer_calloc(module, alloc, args.first().copied(), args.get(1).copied()),
        "malloc" | "_Znwm" | "_Znam" => {
            infer_malloc(module, alloc, args.first().copied())
        }
        // __kmpc_omp_task_alloc(loc, gtid, flags, sizeof_task, sizeof_shareds, entry)
        "__kmpc_omp_task_alloc" => infer_malloc(module, alloc, args.get(3).copied()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::ModuleBuilder;

    fn build(size: i64, elem: TypeDesc) -> (Module, InstId) {
        let mut mb = ModuleBuilder::new();
        let malloc = mb.declare("malloc", vec![TypeDesc::i64()], TypeDesc::Ptr);
        let mut f = mb.function("main", vec![], TypeDesc::i32());
        let raw = f.call(malloc, vec![Value::ConstInt(size)]);
        let _typed = f.bitcast(raw, elem);
        f.ret(Value::ConstInt(0));
        (mb.finish(), raw.as_inst().unwrap())
    }

    #[test]
    fn exact_size_is_single_instance() {
        let (module, alloc) = build(8, TypeDesc::named_struct("pair", 8));
        assert_eq!(
            infer_alloc_type(&module, alloc, "malloc"),
            Some(TypeDesc::named_struct("pair", 8))
        );
    }

    #[test]
    fn whole_multiple_is_bounded_array() {
        let (module, alloc) = build(32, TypeDesc::named_struct("pair", 8));
        assert_eq!(
            infer_alloc_type(&module, alloc, "malloc"),
            Some(TypeDesc::bounded_array(TypeDesc::named_struct("pair", 8), 4))
        );
    }

    #[test]
    fn misaligned_size_gives_up() {
        let (module, alloc) = build(12, TypeDesc::named_struct("pair", 8));
        assert_eq!(infer_alloc_type(&module, alloc, "malloc"), None);
    }

    #[test]
    fn no_bitcast_gives_up() {
        let mut mb = ModuleBuilder::new();
        let malloc = mb.declare("malloc", vec![TypeDesc::i64()], TypeDesc::Ptr);
        let mut f = mb.function("main", vec![], TypeDesc::i32());
        let raw = f.call(malloc, vec![Value::ConstInt(64)]);
        f.ret(Value::ConstInt(0));
        let module = mb.finish();
        assert_eq!(
            infer_alloc_type(&module, raw.as_inst().unwrap(), "malloc"),
            None
        );
    }

    #[test]
    fn inlined_site_uses_unique_bitcast_user() {
        let mut mb = ModuleBuilder::new();
        let malloc = mb.declare("malloc", vec![TypeDesc::i64()], TypeDesc::Ptr);
        let mut f = mb.function("main", vec![], TypeDesc::i32());
        f.at_inlined("wrapper.c", 3, 10);
        let raw = f.call(malloc, vec![Value::ConstInt(8)]);
        let _gap = f.other(vec![]);
        let _typed = f.bitcast(raw, TypeDesc::i64());
        f.ret(Value::ConstInt(0));
        let module = mb.finish();
        assert_eq!(
            infer_alloc_type(&module, raw.as_inst().unwrap(), "malloc"),
            Some(TypeDesc::i64())
        );
    }

    #[test]
    fn inlined_site_with_two_bitcast_users_gives_up() {
        let mut mb = ModuleBuilder::new();
        let malloc = mb.declare("malloc", vec![TypeDesc::i64()], TypeDesc::Ptr);
        let mut f = mb.function("main", vec![], TypeDesc::i32());
        f.at_inlined("wrapper.c", 3, 10);
        let raw = f.call(malloc, vec![Value::ConstInt(8)]);
        let _gap = f.other(vec![]);
        let _a = f.bitcast(raw, TypeDesc::i64());
        let _b = f.bitcast(raw, TypeDesc::i32());
        f.ret(Value::ConstInt(0));
        let module = mb.finish();
        assert_eq!(
            infer_alloc_type(&module, raw.as_inst().unwrap(), "malloc"),
            None
        );
    }
}
