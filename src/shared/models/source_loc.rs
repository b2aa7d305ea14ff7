//! Source locations attached to IR instructions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Source location (file, line, column) of an instruction.
///
/// `inlined` marks locations whose debug info says the instruction was
/// inlined from elsewhere; the heap model uses this to decide which
/// bitcast heuristic applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLoc {
    pub file: String,
    pub line: u32,
    pub col: u32,
    pub inlined: bool,
}

impl SourceLoc {
    pub fn new(file: impl Into<String>, line: u32, col: u32) -> Self {
        Self {
            file: file.into(),
            line,
            col,
            inlined: false,
        }
    }

    pub fn inlined(file: impl Into<String>, line: u32, col: u32) -> Self {
        Self {
            file: file.into(),
            line,
            col,
            inlined: true,
        }
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.col)
    }
}
