//! Programmatic IR construction.
//!
//! Embedding tools and the test suite build modules through these builders;
//! there is no textual parser in this crate.

use super::instruction::{CallTarget, InstKind, Instruction, Terminator};
use super::module::{BasicBlock, FunctionDef, GlobalVar, Module, Param};
use super::source_loc::SourceLoc;
use super::types::TypeDesc;
use super::values::{BlockId, FuncId, Value};

#[derive(Debug, Default)]
pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global(&mut self, name: impl Into<String>, ty: TypeDesc) -> Value {
        let id = self.module.add_global(GlobalVar {
            id: 0,
            name: name.into(),
            ty,
            thread_local: false,
        });
        Value::Global(id)
    }

    pub fn thread_local_global(&mut self, name: impl Into<String>, ty: TypeDesc) -> Value {
        let id = self.module.add_global(GlobalVar {
            id: 0,
            name: name.into(),
            ty,
            thread_local: true,
        });
        Value::Global(id)
    }

    /// Declare an external function.
    pub fn declare(
        &mut self,
        name: impl Into<String>,
        params: Vec<TypeDesc>,
        ret: TypeDesc,
    ) -> FuncId {
        let name = name.into();
        if let Some(existing) = self.module.function_by_name(&name) {
            return existing;
        }
        self.module.add_function(FunctionDef {
            id: 0,
            name,
            params: params
                .into_iter()
                .enumerate()
                .map(|(i, ty)| Param {
                    name: format!("p{i}"),
                    ty,
                })
                .collect(),
            ret,
            blocks: Vec::new(),
        })
    }

    /// Start defining a function with an implicit `entry` block.
    pub fn function(
        &mut self,
        name: impl Into<String>,
        params: Vec<(&str, TypeDesc)>,
        ret: TypeDesc,
    ) -> FunctionBuilder<'_> {
        let func = self.module.add_function(FunctionDef {
            id: 0,
            name: name.into(),
            params: params
                .into_iter()
                .map(|(name, ty)| Param {
                    name: name.to_string(),
                    ty,
                })
                .collect(),
            ret,
            blocks: vec![BasicBlock {
                label: "entry".to_string(),
                insts: Vec::new(),
                term: Terminator::Unreachable,
            }],
        });
        FunctionBuilder {
            module: &mut self.module,
            func,
            cur: 0,
            loc: None,
        }
    }

    pub fn func_id(&self, name: &str) -> Option<FuncId> {
        self.module.function_by_name(name)
    }

    pub fn finish(mut self) -> Module {
        self.module.reindex();
        self.module
    }
}

pub struct FunctionBuilder<'m> {
    module: &'m mut Module,
    func: FuncId,
    cur: usize,
    loc: Option<SourceLoc>,
}

impl<'m> FunctionBuilder<'m> {
    pub fn id(&self) -> FuncId {
        self.func
    }

    pub fn arg(&self, index: u32) -> Value {
        Value::Arg {
            func: self.func,
            index,
        }
    }

    /// Append a new block; does not change the insertion point.
    pub fn block(&mut self, label: impl Into<String>) -> BlockId {
        let blocks = &mut self.module.functions[self.func as usize].blocks;
        blocks.push(BasicBlock {
            label: label.into(),
            insts: Vec::new(),
            term: Terminator::Unreachable,
        });
        (blocks.len() - 1) as BlockId
    }

    pub fn switch_to(&mut self, block: BlockId) {
        self.cur = block as usize;
    }

    /// Set the sticky source location applied to subsequent instructions.
    pub fn at(&mut self, file: &str, line: u32, col: u32) -> &mut Self {
        self.loc = Some(SourceLoc::new(file, line, col));
        self
    }

    pub fn at_inlined(&mut self, file: &str, line: u32, col: u32) -> &mut Self {
        self.loc = Some(SourceLoc::inlined(file, line, col));
        self
    }

    fn push(&mut self, kind: InstKind) -> Value {
        let id = self.module.alloc_inst_id();
        let inst = Instruction {
            id,
            kind,
            loc: self.loc.clone(),
            synthetic: false,
        };
        self.module.functions[self.func as usize].blocks[self.cur]
            .insts
            .push(inst);
        Value::Inst(id)
    }

    pub fn alloca(&mut self, ty: TypeDesc) -> Value {
        self.push(InstKind::Alloca { ty })
    }

    pub fn load(&mut self, ptr: Value) -> Value {
        self.push(InstKind::Load {
            ptr,
            atomic: false,
            volatile: false,
        })
    }

    pub fn load_flags(&mut self, ptr: Value, atomic: bool, volatile: bool) -> Value {
        self.push(InstKind::Load {
            ptr,
            atomic,
            volatile,
        })
    }

    pub fn store(&mut self, ptr: Value, value: Value) {
        self.push(InstKind::Store {
            ptr,
            value,
            atomic: false,
            volatile: false,
        });
    }

    pub fn store_flags(&mut self, ptr: Value, value: Value, atomic: bool, volatile: bool) {
        self.push(InstKind::Store {
            ptr,
            value,
            atomic,
            volatile,
        });
    }

    pub fn bitcast(&mut self, value: Value, to_pointee: TypeDesc) -> Value {
        self.push(InstKind::BitCast { value, to_pointee })
    }

    pub fn gep(&mut self, base: Value) -> Value {
        self.push(InstKind::Gep { base })
    }

    pub fn cmp_eq(&mut self, lhs: Value, rhs: Value) -> Value {
        self.push(InstKind::CmpEq { lhs, rhs })
    }

    pub fn phi(&mut self, incoming: Vec<(BlockId, Value)>) -> Value {
        self.push(InstKind::Phi { incoming })
    }

    pub fn call(&mut self, func: FuncId, args: Vec<Value>) -> Value {
        self.push(InstKind::Call {
            target: CallTarget::Direct(func),
            args,
        })
    }

    /// Call by name, declaring an opaque external on first use.
    pub fn call_named(&mut self, name: &str, args: Vec<Value>) -> Value {
        let func = match self.module.function_by_name(name) {
            Some(f) => f,
            None => self.module.add_function(FunctionDef {
                id: 0,
                name: name.to_string(),
                params: args
                    .iter()
                    .enumerate()
                    .map(|(i, _)| Param {
                        name: format!("p{i}"),
                        ty: TypeDesc::Opaque,
                    })
                    .collect(),
                ret: TypeDesc::Opaque,
                blocks: Vec::new(),
            }),
        };
        self.call(func, args)
    }

    pub fn call_indirect(&mut self, callee: Value, args: Vec<Value>) -> Value {
        self.push(InstKind::Call {
            target: CallTarget::Indirect(callee),
            args,
        })
    }

    pub fn other(&mut self, operands: Vec<Value>) -> Value {
        self.push(InstKind::Other { operands })
    }

    fn set_term(&mut self, term: Terminator) {
        self.module.functions[self.func as usize].blocks[self.cur].term = term;
    }

    pub fn ret_void(&mut self) {
        self.set_term(Terminator::Ret(None));
    }

    pub fn ret(&mut self, value: Value) {
        self.set_term(Terminator::Ret(Some(value)));
    }

    pub fn br(&mut self, dest: BlockId) {
        self.set_term(Terminator::Br(dest));
    }

    pub fn cond_br(&mut self, cond: Value, then_dest: BlockId, else_dest: BlockId) {
        self.set_term(Terminator::CondBr {
            cond,
            then_dest,
            else_dest,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_index() {
        let mut mb = ModuleBuilder::new();
        let g = mb.global("c", TypeDesc::i32());
        let mut f = mb.function("main", vec![], TypeDesc::i32());
        let slot = f.alloca(TypeDesc::i32());
        let v = f.load(g);
        f.store(slot, v);
        f.ret(Value::ConstInt(0));
        let module = mb.finish();

        let main = module.function_by_name("main").unwrap();
        assert_eq!(module.function(main).blocks.len(), 1);
        assert_eq!(module.function(main).blocks[0].insts.len(), 3);

        let load_id = v.as_inst().unwrap();
        assert_eq!(module.containing_function(load_id), Some(main));
        let next = module.next_inst_in_block(load_id).unwrap();
        assert!(matches!(next.kind, InstKind::Store { .. }));
    }

    #[test]
    fn call_named_declares_once() {
        let mut mb = ModuleBuilder::new();
        let mut f = mb.function("main", vec![], TypeDesc::Void);
        f.call_named("printf", vec![Value::Null]);
        f.call_named("printf", vec![Value::Null]);
        f.ret_void();
        let module = mb.finish();

        let count = module
            .functions
            .iter()
            .filter(|f| f.name == "printf")
            .count();
        assert_eq!(count, 1);
        assert!(module
            .function(module.function_by_name("printf").unwrap())
            .is_external());
    }
}
