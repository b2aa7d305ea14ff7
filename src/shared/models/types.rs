//! Type descriptions carried by the IR.
//!
//! Only what the analyzer needs: enough structure to size heap allocations
//! and to tell pointers from scalars. Anything richer stays opaque.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeDesc {
    Void,
    Int { bits: u32 },
    /// All pointers are untyped at this level; the pointee travels
    /// separately where it matters (bitcasts, allocas).
    Ptr,
    /// Named aggregate with a known byte size.
    Struct { name: String, size: u64 },
    /// Array of `elem`; `len == None` means unbounded.
    Array { elem: Box<TypeDesc>, len: Option<u64> },
    Opaque,
}

impl TypeDesc {
    pub fn i8() -> Self {
        TypeDesc::Int { bits: 8 }
    }

    pub fn i32() -> Self {
        TypeDesc::Int { bits: 32 }
    }

    pub fn i64() -> Self {
        TypeDesc::Int { bits: 64 }
    }

    pub fn named_struct(name: impl Into<String>, size: u64) -> Self {
        TypeDesc::Struct {
            name: name.into(),
            size,
        }
    }

    pub fn bounded_array(elem: TypeDesc, len: u64) -> Self {
        TypeDesc::Array {
            elem: Box::new(elem),
            len: Some(len),
        }
    }

    pub fn unbounded_array(elem: TypeDesc) -> Self {
        TypeDesc::Array {
            elem: Box::new(elem),
            len: None,
        }
    }

    /// Allocation size in bytes, if statically known.
    pub fn size(&self) -> Option<u64> {
        match self {
            TypeDesc::Void => None,
            TypeDesc::Int { bits } => Some(u64::from(*bits) / 8),
            TypeDesc::Ptr => Some(8),
            TypeDesc::Struct { size, .. } => Some(*size),
            TypeDesc::Array { elem, len } => {
                let len = (*len)?;
                Some(elem.size()? * len)
            }
            TypeDesc::Opaque => None,
        }
    }

    pub fn is_sized(&self) -> bool {
        self.size().is_some()
    }

    pub fn is_ptr(&self) -> bool {
        matches!(self, TypeDesc::Ptr)
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDesc::Void => write!(f, "void"),
            TypeDesc::Int { bits } => write!(f, "i{bits}"),
            TypeDesc::Ptr => write!(f, "ptr"),
            TypeDesc::Struct { name, .. } => write!(f, "%{name}"),
            TypeDesc::Array { elem, len: Some(n) } => write!(f, "[{n} x {elem}]"),
            TypeDesc::Array { elem, len: None } => write!(f, "[? x {elem}]"),
            TypeDesc::Opaque => write!(f, "opaque"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(TypeDesc::i32().size(), Some(4));
        assert_eq!(TypeDesc::Ptr.size(), Some(8));
        assert_eq!(TypeDesc::named_struct("kmp_task_t", 40).size(), Some(40));
        assert_eq!(
            TypeDesc::bounded_array(TypeDesc::i64(), 10).size(),
            Some(80)
        );
        assert_eq!(TypeDesc::unbounded_array(TypeDesc::i64()).size(), None);
        assert_eq!(TypeDesc::Opaque.size(), None);
    }
}
