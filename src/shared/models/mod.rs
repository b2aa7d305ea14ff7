//! The typed intermediate representation the analyzer consumes.
//!
//! The IR is plain data: a [`Module`] of functions, each a list of basic
//! blocks holding instructions plus a terminator. Reading this IR from disk
//! is an external concern; embedders and tests construct modules through
//! [`ModuleBuilder`].

pub mod builder;
pub mod instruction;
pub mod module;
pub mod source_loc;
pub mod types;
pub mod values;

pub use builder::{FunctionBuilder, ModuleBuilder};
pub use instruction::{CallTarget, InstKind, Instruction, Terminator};
pub use module::{BasicBlock, FunctionDef, GlobalVar, InstPos, Module, Param};
pub use source_loc::SourceLoc;
pub use types::TypeDesc;
pub use values::{BlockId, FuncId, GlobalId, InstId, Value};
