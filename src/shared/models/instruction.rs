//! Instructions and terminators.

use super::source_loc::SourceLoc;
use super::types::TypeDesc;
use super::values::{BlockId, FuncId, InstId, Value};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallTarget {
    Direct(FuncId),
    /// Called through a pointer value; resolution is deferred to the
    /// pointer analysis.
    Indirect(Value),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstKind {
    Alloca {
        ty: TypeDesc,
    },
    Load {
        ptr: Value,
        atomic: bool,
        volatile: bool,
    },
    Store {
        ptr: Value,
        value: Value,
        atomic: bool,
        volatile: bool,
    },
    BitCast {
        value: Value,
        /// Pointee type of the destination pointer type.
        to_pointee: TypeDesc,
    },
    /// Pointer arithmetic; the analysis is field-insensitive, so only the
    /// base pointer matters.
    Gep {
        base: Value,
    },
    /// Integer equality comparison. Only equality feeds the thread-id
    /// guard detection, so no other predicates are modeled.
    CmpEq {
        lhs: Value,
        rhs: Value,
    },
    Phi {
        incoming: Vec<(BlockId, Value)>,
    },
    Call {
        target: CallTarget,
        args: Vec<Value>,
    },
    /// Arithmetic and anything else with no pointer or concurrency effect.
    Other {
        operands: Vec<Value>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub id: InstId,
    pub kind: InstKind,
    pub loc: Option<SourceLoc>,
    /// Inserted by preprocessing rather than present in the input.
    pub synthetic: bool,
}

impl Instruction {
    /// The SSA value produced by this instruction.
    pub fn result(&self) -> Value {
        Value::Inst(self.id)
    }

    pub fn as_call(&self) -> Option<(&CallTarget, &[Value])> {
        match &self.kind {
            InstKind::Call { target, args } => Some((target, args)),
            _ => None,
        }
    }

    pub fn is_phi(&self) -> bool {
        matches!(self.kind, InstKind::Phi { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Terminator {
    Ret(Option<Value>),
    Br(BlockId),
    CondBr {
        cond: Value,
        then_dest: BlockId,
        else_dest: BlockId,
    },
    Unreachable,
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Ret(_) | Terminator::Unreachable => Vec::new(),
            Terminator::Br(b) => vec![*b],
            Terminator::CondBr {
                then_dest,
                else_dest,
                ..
            } => vec![*then_dest, *else_dest],
        }
    }
}
