//! The program-wide trace.

use super::error::{Result, TraceError};
use super::event::{Event, EventId, ThreadId};
use super::openmp_state::OpenMpState;
use super::thread_trace::{ThreadTrace, TraceBuilder};
use crate::features::points_to::{CtxId, MemoryObject, ObjectId, PointsToEngine};
use crate::features::preprocess::preprocess;
use crate::shared::models::{Module, SourceLoc, Value};
use std::fmt;

/// Owns every thread trace, the preprocessed module, and the pointer
/// analysis. `(thread id, event id)` addresses any event in O(1).
pub struct ProgramTrace {
    module: Module,
    engine: Box<dyn PointsToEngine>,
    threads: Vec<ThreadTrace>,
    summaries_built: usize,
}

impl ProgramTrace {
    /// Preprocess the module, run the pointer analysis, and build all
    /// threads depth-first from the entry function.
    pub fn build(
        mut module: Module,
        mut engine: Box<dyn PointsToEngine>,
        entry_name: &str,
    ) -> Result<Self> {
        preprocess(&mut module);
        engine.analyze(&module, entry_name)?;
        let entry = engine.entry_node();

        let (mut threads, summaries_built) = {
            let mut builder = TraceBuilder::new(&module, engine.as_ref());
            let root = builder.build_thread(0, None, entry, OpenMpState::default())?;
            let summaries_built = builder.state.summaries.build_count();
            let mut threads = builder.threads;
            // The root thread is always first.
            threads.insert(0, root);
            (threads, summaries_built)
        };

        // Thread ids were assigned in spawn order, which is exactly the
        // depth-first insertion order; event lookup relies on it.
        for (position, thread) in threads.iter().enumerate() {
            if thread.id as usize != position {
                return Err(TraceError::ThreadOrder);
            }
        }
        threads.shrink_to_fit();

        Ok(Self {
            module,
            engine,
            threads,
            summaries_built,
        })
    }

    /// Number of function summaries built (as opposed to served from the
    /// cache) during construction.
    pub fn summaries_built(&self) -> usize {
        self.summaries_built
    }

    /// The module after preprocessing.
    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn threads(&self) -> &[ThreadTrace] {
        &self.threads
    }

    pub fn event(&self, thread: ThreadId, event: EventId) -> &Event {
        self.threads[thread as usize].event(event)
    }

    pub fn points_to(&self, ctx: CtxId, value: Value) -> Vec<ObjectId> {
        self.engine.points_to(ctx, value)
    }

    /// Points-to set of a memory-access event, resolved lazily.
    pub fn event_points_to(&self, event: &Event) -> Vec<ObjectId> {
        event
            .accessed_value()
            .map(|addr| self.engine.points_to(event.scope.ctx, addr))
            .unwrap_or_default()
    }

    pub fn object(&self, id: ObjectId) -> &MemoryObject {
        self.engine.object(id)
    }

    pub fn event_loc(&self, event: &Event) -> Option<&SourceLoc> {
        let inst = event.inst?;
        self.module.inst(inst)?.loc.as_ref()
    }
}

impl fmt::Display for ProgramTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "===== Program Trace =====")?;
        for thread in &self.threads {
            write!(f, "---Thread{}", thread.id)?;
            if let Some(spawn) = &thread.spawn {
                write!(f, "  (spawned by T{}:{})", spawn.parent, spawn.fork_event)?;
            }
            writeln!(f)?;
            for event in &thread.events {
                write!(f, "  {:>4}  {}", event.id, event.kind)?;
                if let Some(loc) = self.event_loc(event) {
                    write!(f, "  [{loc}]")?;
                }
                writeln!(f)?;
            }
        }
        writeln!(f, "=========================")
    }
}
