//! IR preprocessing.
//!
//! Two rewrites run before trace construction, in order:
//!
//! 1. [`duplicate_omp_forks`] inserts an exact copy of each non-task
//!    OpenMP fork call immediately after the original, so one parallel
//!    region appears to the analyzer as two sibling threads.
//! 2. [`insert_guard_markers`] brackets basic blocks guarded by
//!    `omp_get_thread_num() == k` comparisons with synthetic
//!    `guard_start(k)`/`guard_end(k)` external calls.
//!
//! Both passes are idempotent; running them twice leaves the module
//! unchanged.

pub mod fork_duplication;
pub mod guard_blocks;

pub use fork_duplication::duplicate_omp_forks;
pub use guard_blocks::insert_guard_markers;

use crate::shared::models::Module;

/// Run all preprocessing passes and rebuild the instruction index.
pub fn preprocess(module: &mut Module) {
    duplicate_omp_forks(module);
    insert_guard_markers(module);
    module.reindex();
}
