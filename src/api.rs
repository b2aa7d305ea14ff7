//! The analyzer entry point.

use crate::config::DetectConfig;
use crate::errors::DetectError;
use crate::features::points_to::AndersenEngine;
use crate::features::report::{RaceDetector, Report};
use crate::features::trace::ProgramTrace;
use crate::shared::models::Module;
use rustc_hash::FxHashSet;
use tracing::info;

/// Fraction of source lines the trace actually visited.
fn coverage(trace: &ProgramTrace) -> (usize, usize) {
    let mut total: FxHashSet<(&str, u32)> = FxHashSet::default();
    for func in &trace.module().functions {
        for block in &func.blocks {
            for inst in &block.insts {
                if let Some(loc) = &inst.loc {
                    total.insert((loc.file.as_str(), loc.line));
                }
            }
        }
    }

    let mut analyzed: FxHashSet<(&str, u32)> = FxHashSet::default();
    for thread in trace.threads() {
        for event in &thread.events {
            if let Some(loc) = trace.event_loc(event) {
                analyzed.insert((loc.file.as_str(), loc.line));
            }
        }
    }

    (analyzed.len(), total.len())
}

/// Run the full pipeline on `module`, rooted at `entry_name`
/// (conventionally `main`), and report candidate races.
pub fn detect_races(
    module: Module,
    entry_name: &str,
    config: &DetectConfig,
) -> Result<Report, DetectError> {
    let engine = Box::new(AndersenEngine::new());
    let trace = ProgramTrace::build(module, engine, entry_name)?;

    if let Some(path) = &config.dump_preprocessed_ir {
        std::fs::write(path, trace.module().to_string())?;
    }
    if config.print_trace {
        eprintln!("{trace}");
    }
    if config.compute_coverage {
        let (analyzed, total) = coverage(&trace);
        let ratio = if total == 0 {
            1.0
        } else {
            analyzed as f64 / total as f64
        };
        eprintln!("coverage: {analyzed}/{total} source lines ({ratio:.2})");
    }

    let report = RaceDetector::new(&trace).detect();
    info!(
        threads = trace.threads().len(),
        races = report.len(),
        "race detection complete"
    );
    Ok(report)
}
