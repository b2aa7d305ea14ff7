//! Analyzer configuration.

use std::path::PathBuf;

#[derive(Debug, Clone, Default)]
pub struct DetectConfig {
    /// Write the IR after preprocessing (fork duplication + guard
    /// markers) to this file.
    pub dump_preprocessed_ir: Option<PathBuf>,

    /// Print a human-readable rendering of the program trace to stderr.
    pub print_trace: bool,

    /// Also report the ratio of analyzed source lines to total source
    /// lines.
    pub compute_coverage: bool,
}
