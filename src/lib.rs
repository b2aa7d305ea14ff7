/*
 * racegraph - Static Data-Race Detection Engine
 *
 * Feature-First Architecture:
 * - shared/      : The typed IR the analyzer consumes (module, blocks, values)
 * - features/    : Vertical slices (recognize -> summarize -> preprocess ->
 *                  points-to -> trace -> report)
 * - api          : detect_races() entry point
 *
 * Pipeline:
 *   Module --preprocess--> Module' --points-to--> call graph + pts
 *          --trace--> per-thread event streams --report--> race candidates
 */

#![allow(clippy::too_many_arguments)] // Trace traversal threads a lot of state
#![allow(clippy::type_complexity)]

pub mod api;
pub mod config;
pub mod errors;

/// Shared IR models and utilities
pub mod shared;

/// Feature modules (analysis pipeline stages)
pub mod features;

pub use api::detect_races;
pub use config::DetectConfig;
pub use errors::DetectError;
pub use features::report::{Report, RaceCandidate};
pub use shared::models::{Module, ModuleBuilder};

use lazy_static::lazy_static;

lazy_static! {
    /// Verbose tracing of the pointer-analysis integration paths,
    /// toggled by the DEBUG_PTA environment variable.
    pub(crate) static ref DEBUG_PTA: bool = std::env::var("DEBUG_PTA")
        .map(|v| !v.is_empty() && v != "0")
        .unwrap_or(false);
}
