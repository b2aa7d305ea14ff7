//! Value handles.
//!
//! Everything an instruction operand can name, as a small copyable handle.
//! Identity is the handle itself; the data lives in the [`Module`].
//!
//! [`Module`]: super::module::Module

use serde::{Deserialize, Serialize};
use std::fmt;

pub type FuncId = u32;
pub type GlobalId = u32;
pub type InstId = u32;
/// Basic-block index within its function.
pub type BlockId = u32;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Value {
    /// Result of an instruction.
    Inst(InstId),
    /// Formal parameter of a function.
    Arg { func: FuncId, index: u32 },
    Global(GlobalId),
    Function(FuncId),
    ConstInt(i64),
    Null,
}

impl Value {
    pub fn as_const_int(&self) -> Option<i64> {
        match self {
            Value::ConstInt(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<FuncId> {
        match self {
            Value::Function(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_inst(&self) -> Option<InstId> {
        match self {
            Value::Inst(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Inst(id) => write!(f, "%{id}"),
            Value::Arg { index, .. } => write!(f, "%arg{index}"),
            Value::Global(id) => write!(f, "@g{id}"),
            Value::Function(id) => write!(f, "@f{id}"),
            Value::ConstInt(n) => write!(f, "{n}"),
            Value::Null => write!(f, "null"),
        }
    }
}
