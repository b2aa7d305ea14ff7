//! The IR module: functions, globals, and lookup indices.

use super::instruction::{CallTarget, InstKind, Instruction, Terminator};
use super::types::TypeDesc;
use super::values::{FuncId, GlobalId, InstId, Value};
use rustc_hash::FxHashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub ty: TypeDesc,
}

#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub label: String,
    pub insts: Vec<Instruction>,
    pub term: Terminator,
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub id: FuncId,
    pub name: String,
    pub params: Vec<Param>,
    pub ret: TypeDesc,
    /// Empty for external declarations.
    pub blocks: Vec<BasicBlock>,
}

impl FunctionDef {
    pub fn is_external(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct GlobalVar {
    pub id: GlobalId,
    pub name: String,
    pub ty: TypeDesc,
    pub thread_local: bool,
}

/// Position of an instruction inside its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstPos {
    pub func: FuncId,
    pub block: usize,
    pub index: usize,
}

/// A whole translation unit.
///
/// The instruction index is rebuilt by [`Module::reindex`] after any
/// structural mutation (the preprocessing passes call it).
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub functions: Vec<FunctionDef>,
    pub globals: Vec<GlobalVar>,
    name_index: FxHashMap<String, FuncId>,
    inst_index: FxHashMap<InstId, InstPos>,
    next_inst: InstId,
}

impl Module {
    pub fn function(&self, id: FuncId) -> &FunctionDef {
        &self.functions[id as usize]
    }

    pub fn function_by_name(&self, name: &str) -> Option<FuncId> {
        self.name_index.get(name).copied()
    }

    pub fn global(&self, id: GlobalId) -> &GlobalVar {
        &self.globals[id as usize]
    }

    pub fn inst_pos(&self, id: InstId) -> Option<InstPos> {
        self.inst_index.get(&id).copied()
    }

    pub fn inst(&self, id: InstId) -> Option<&Instruction> {
        let pos = self.inst_pos(id)?;
        Some(&self.function(pos.func).blocks[pos.block].insts[pos.index])
    }

    pub fn containing_function(&self, id: InstId) -> Option<FuncId> {
        self.inst_pos(id).map(|p| p.func)
    }

    /// The instruction that immediately follows `id` in its basic block.
    pub fn next_inst_in_block(&self, id: InstId) -> Option<&Instruction> {
        let pos = self.inst_pos(id)?;
        self.function(pos.func).blocks[pos.block]
            .insts
            .get(pos.index + 1)
    }

    /// Chase bitcasts and geps back to the underlying value.
    pub fn strip_casts(&self, mut value: Value) -> Value {
        loop {
            let Some(inst_id) = (match value {
                Value::Inst(id) => Some(id),
                _ => None,
            }) else {
                return value;
            };
            let Some(inst) = self.inst(inst_id) else {
                return value;
            };
            value = match &inst.kind {
                InstKind::BitCast { value, .. } => *value,
                InstKind::Gep { base } => *base,
                _ => return value,
            };
        }
    }

    /// Name of the directly called function at a call instruction.
    pub fn callee_name(&self, inst: &Instruction) -> Option<&str> {
        match &inst.kind {
            InstKind::Call {
                target: CallTarget::Direct(f),
                ..
            } => Some(self.function(*f).name.as_str()),
            _ => None,
        }
    }

    pub(crate) fn add_function(&mut self, mut func: FunctionDef) -> FuncId {
        let id = self.functions.len() as FuncId;
        func.id = id;
        self.name_index.insert(func.name.clone(), id);
        self.functions.push(func);
        id
    }

    pub(crate) fn add_global(&mut self, mut global: GlobalVar) -> GlobalId {
        let id = self.globals.len() as GlobalId;
        global.id = id;
        self.globals.push(global);
        id
    }

    pub(crate) fn alloc_inst_id(&mut self) -> InstId {
        let id = self.next_inst;
        self.next_inst += 1;
        id
    }

    /// Rebuild the instruction position index. Must be called after any
    /// pass that inserts or removes instructions.
    pub fn reindex(&mut self) {
        self.inst_index.clear();
        for func in &self.functions {
            for (bi, block) in func.blocks.iter().enumerate() {
                for (ii, inst) in block.insts.iter().enumerate() {
                    self.inst_index.insert(
                        inst.id,
                        InstPos {
                            func: func.id,
                            block: bi,
                            index: ii,
                        },
                    );
                }
            }
        }
    }

    fn fmt_value(&self, v: Value) -> String {
        match v {
            Value::Global(g) => format!("@{}", self.global(g).name),
            Value::Function(f) => format!("@{}", self.function(f).name),
            Value::Arg { func, index } => {
                format!("%{}", self.function(func).params[index as usize].name)
            }
            other => other.to_string(),
        }
    }

    fn fmt_inst(&self, inst: &Instruction, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(out, "  ")?;
        match &inst.kind {
            InstKind::Alloca { ty } => write!(out, "%{} = alloca {}", inst.id, ty)?,
            InstKind::Load { ptr, atomic, volatile } => {
                write!(out, "%{} = load", inst.id)?;
                if *atomic {
                    write!(out, " atomic")?;
                }
                if *volatile {
                    write!(out, " volatile")?;
                }
                write!(out, " {}", self.fmt_value(*ptr))?;
            }
            InstKind::Store {
                ptr,
                value,
                atomic,
                volatile,
            } => {
                write!(out, "store")?;
                if *atomic {
                    write!(out, " atomic")?;
                }
                if *volatile {
                    write!(out, " volatile")?;
                }
                write!(out, " {}, {}", self.fmt_value(*value), self.fmt_value(*ptr))?;
            }
            InstKind::BitCast { value, to_pointee } => write!(
                out,
                "%{} = bitcast {} to {}*",
                inst.id,
                self.fmt_value(*value),
                to_pointee
            )?,
            InstKind::Gep { base } => {
                write!(out, "%{} = getelementptr {}", inst.id, self.fmt_value(*base))?
            }
            InstKind::CmpEq { lhs, rhs } => write!(
                out,
                "%{} = icmp eq {}, {}",
                inst.id,
                self.fmt_value(*lhs),
                self.fmt_value(*rhs)
            )?,
            InstKind::Phi { incoming } => {
                write!(out, "%{} = phi ", inst.id)?;
                for (i, (block, value)) in incoming.iter().enumerate() {
                    if i > 0 {
                        write!(out, ", ")?;
                    }
                    write!(out, "[ {}, bb{} ]", self.fmt_value(*value), block)?;
                }
            }
            InstKind::Call { target, args } => {
                write!(out, "%{} = call ", inst.id)?;
                match target {
                    CallTarget::Direct(f) => write!(out, "@{}", self.function(*f).name)?,
                    CallTarget::Indirect(v) => write!(out, "{}", self.fmt_value(*v))?,
                }
                write!(out, "(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(out, ", ")?;
                    }
                    write!(out, "{}", self.fmt_value(*arg))?;
                }
                write!(out, ")")?;
            }
            InstKind::Other { operands } => {
                write!(out, "%{} = op", inst.id)?;
                for operand in operands {
                    write!(out, " {}", self.fmt_value(*operand))?;
                }
            }
        }
        if inst.synthetic {
            write!(out, " ; synthetic")?;
        }
        if let Some(loc) = &inst.loc {
            write!(out, " ; !{loc}")?;
        }
        writeln!(out)
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for global in &self.globals {
            if global.thread_local {
                writeln!(f, "@{} = thread_local global {}", global.name, global.ty)?;
            } else {
                writeln!(f, "@{} = global {}", global.name, global.ty)?;
            }
        }
        if !self.globals.is_empty() {
            writeln!(f)?;
        }

        for func in &self.functions {
            let params = func
                .params
                .iter()
                .map(|p| format!("{} %{}", p.ty, p.name))
                .collect::<Vec<_>>()
                .join(", ");
            if func.is_external() {
                writeln!(f, "declare {} @{}({})", func.ret, func.name, params)?;
                continue;
            }
            writeln!(f, "define {} @{}({}) {{", func.ret, func.name, params)?;
            for (bi, block) in func.blocks.iter().enumerate() {
                writeln!(f, "{}: ; bb{}", block.label, bi)?;
                for inst in &block.insts {
                    self.fmt_inst(inst, f)?;
                }
                match &block.term {
                    Terminator::Ret(None) => writeln!(f, "  ret void")?,
                    Terminator::Ret(Some(v)) => writeln!(f, "  ret {}", self.fmt_value(*v))?,
                    Terminator::Br(b) => writeln!(f, "  br bb{b}")?,
                    Terminator::CondBr {
                        cond,
                        then_dest,
                        else_dest,
                    } => writeln!(
                        f,
                        "  br {}, bb{}, bb{}",
                        self.fmt_value(*cond),
                        then_dest,
                        else_dest
                    )?,
                    Terminator::Unreachable => writeln!(f, "  unreachable")?,
                }
            }
            writeln!(f, "}}")?;
            writeln!(f)?;
        }
        Ok(())
    }
}
