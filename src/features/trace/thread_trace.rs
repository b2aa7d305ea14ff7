//! Per-thread event stream construction.

use super::error::{Result, TraceError};
use super::event::{Event, EventId, EventKind, EventScope, LockKey, ThreadId};
use super::openmp_state::{OpenMpState, TraceBuildState, UnjoinedTask};
use crate::features::points_to::{CallNodeRef, CtxId, PointsToEngine};
use crate::features::summary::{ForkKind, ForkOp, FunctionSummary, LockKind, RaceOp, RaceOpKind};
use crate::shared::models::{CallTarget, FuncId, InstId, Module, Value};
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Where and how a thread was spawned.
#[derive(Debug, Clone, Copy)]
pub struct SpawnSite {
    pub parent: ThreadId,
    pub fork_event: EventId,
    pub kind: ForkKind,
    pub forks_master: bool,
    /// Fork instruction identifying the parallel-region pair.
    pub region: Option<InstId>,
}

/// One thread of execution and its ordered events.
#[derive(Debug)]
pub struct ThreadTrace {
    pub id: ThreadId,
    pub entry: CallNodeRef,
    /// `None` for the root thread.
    pub spawn: Option<SpawnSite>,
    pub events: Vec<Event>,
}

impl ThreadTrace {
    pub fn event(&self, id: EventId) -> &Event {
        &self.events[id as usize]
    }

    /// Spawned by an OpenMP parallel/teams fork (one of the two siblings
    /// of a region).
    pub fn is_omp_sibling(&self) -> bool {
        matches!(
            self.spawn.map(|s| s.kind),
            Some(ForkKind::Omp | ForkKind::OmpTeams)
        )
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum RegionKind {
    Single,
    Master,
}

struct ThreadFrame {
    id: ThreadId,
    is_omp_sibling: bool,
    /// Executes master/single bodies. True for every non-OpenMP thread.
    is_master: bool,
    omp: OpenMpState,
    skip_until: Option<InstId>,
    /// Pair id of the current parallel region (set at the master fork).
    current_region: Option<InstId>,
    events: Vec<Event>,
    /// Fork instruction -> (fork event, spawned thread), for join pairing.
    fork_events: FxHashMap<InstId, (EventId, Option<ThreadId>)>,
}

impl ThreadFrame {
    fn emit(&mut self, scope: &Arc<EventScope>, inst: Option<InstId>, kind: EventKind) -> EventId {
        let id = self.events.len() as EventId;
        self.events.push(Event {
            id,
            kind,
            inst,
            scope: Arc::clone(scope),
        });
        id
    }
}

/// Synchronization with no effect across teams.
fn is_team_specific(kind: &RaceOpKind) -> bool {
    matches!(
        kind,
        RaceOpKind::Barrier
            | RaceOpKind::CriticalStart { .. }
            | RaceOpKind::CriticalEnd { .. }
            | RaceOpKind::LockAcquire {
                kind: LockKind::OmpLock,
                ..
            }
            | RaceOpKind::LockRelease {
                kind: LockKind::OmpLock,
                ..
            }
    )
}

/// Instruction of the region end marker matching the start at `start_idx`.
fn find_matching_end(
    summary: &FunctionSummary,
    start_idx: usize,
    region: RegionKind,
) -> Result<InstId> {
    let mut depth = 1usize;
    for op in &summary[start_idx + 1..] {
        match (&op.kind, region) {
            (RaceOpKind::SingleStart, RegionKind::Single)
            | (RaceOpKind::MasterStart, RegionKind::Master) => depth += 1,
            (RaceOpKind::SingleEnd, RegionKind::Single)
            | (RaceOpKind::MasterEnd, RegionKind::Master) => {
                depth -= 1;
                if depth == 0 {
                    return Ok(op.inst);
                }
            }
            _ => {}
        }
    }
    let inst = summary[start_idx].inst;
    Err(match region {
        RegionKind::Single => TraceError::UnterminatedSingle { inst },
        RegionKind::Master => TraceError::UnterminatedMaster { inst },
    })
}

pub(crate) struct TraceBuilder<'a> {
    pub module: &'a Module,
    pub engine: &'a dyn PointsToEngine,
    pub state: TraceBuildState,
    pub threads: Vec<ThreadTrace>,
}

impl<'a> TraceBuilder<'a> {
    pub fn new(module: &'a Module, engine: &'a dyn PointsToEngine) -> Self {
        Self {
            module,
            engine,
            state: TraceBuildState::default(),
            threads: Vec::new(),
        }
    }

    /// Build one thread's event stream, spawning child thread traces
    /// depth-first as forks are encountered.
    pub fn build_thread(
        &mut self,
        id: ThreadId,
        spawn: Option<SpawnSite>,
        entry: CallNodeRef,
        omp: OpenMpState,
    ) -> Result<ThreadTrace> {
        let is_omp_sibling = matches!(
            spawn.map(|s| s.kind),
            Some(ForkKind::Omp | ForkKind::OmpTeams)
        );
        let is_master = spawn.map(|s| s.forks_master).unwrap_or(true);
        let mut frame = ThreadFrame {
            id,
            is_omp_sibling,
            is_master,
            omp,
            skip_until: None,
            current_region: None,
            events: Vec::new(),
            fork_events: FxHashMap::default(),
        };
        let mut callstack = Vec::new();
        self.traverse(entry, &mut frame, &mut callstack)?;

        // End of thread: any still-unjoined tasks receive synthetic joins
        // and a pending reduction lock is released.
        let end_scope = Arc::new(EventScope {
            ctx: entry.ctx,
            callstack: vec![entry.func],
        });
        if frame.omp.reduce_held {
            frame.omp.reduce_held = false;
            frame.emit(
                &end_scope,
                None,
                EventKind::LockRelease {
                    key: reduction_key(),
                },
            );
        }
        for task in std::mem::take(&mut frame.omp.unjoined_tasks) {
            frame.emit(
                &end_scope,
                None,
                EventKind::Join {
                    kind: ForkKind::OmpTask,
                    fork: Some((id, task.fork_event)),
                    thread: task.thread,
                },
            );
        }

        Ok(ThreadTrace {
            id,
            entry,
            spawn,
            events: frame.events,
        })
    }

    fn lock_key(&self, ctx: CtxId, lock: Value) -> LockKey {
        let objs = self.engine.points_to(ctx, lock);
        if objs.is_empty() {
            LockKey::Named(format!("lock:{lock}"))
        } else {
            LockKey::Objects(objs)
        }
    }

    /// Thread-entry resolution for a fork: a direct function evolves the
    /// context; an instruction operand resolves to its containing
    /// function without evolving (keeping scopes aligned for shared-array
    /// reasoning); anything else goes through the indirect resolution of
    /// the pointer analysis.
    fn resolve_entries(&self, ctx: CtxId, fork: &ForkOp, fork_inst: InstId) -> Vec<CallNodeRef> {
        match self.module.strip_casts(fork.entry) {
            Value::Function(f) => {
                let child_ctx = self.engine.context_evolve(ctx, fork_inst);
                self.engine.direct_node(child_ctx, f).into_iter().collect()
            }
            Value::Inst(inst) => self
                .module
                .containing_function(inst)
                .and_then(|f| self.engine.direct_node(ctx, f))
                .into_iter()
                .collect(),
            _ => self.engine.indirect_callees(ctx, fork_inst),
        }
    }

    fn insert_task_joins(&mut self, frame: &mut ThreadFrame, scope: &Arc<EventScope>) {
        for task in std::mem::take(&mut frame.omp.unjoined_tasks) {
            frame.emit(
                scope,
                None,
                EventKind::Join {
                    kind: ForkKind::OmpTask,
                    fork: Some((frame.id, task.fork_event)),
                    thread: task.thread,
                },
            );
        }
    }

    /// Find the pthread fork event whose handle intersects `handle_pts`,
    /// searching the current thread first, then previously built threads.
    fn find_pthread_fork(
        &self,
        handle_pts: &BTreeSet<u32>,
        frame: &ThreadFrame,
    ) -> Option<(ThreadId, EventId, Option<ThreadId>)> {
        let matches = |event: &Event| -> Option<Option<ThreadId>> {
            let EventKind::Fork {
                kind: ForkKind::PthreadCreate,
                thread,
                ..
            } = &event.kind
            else {
                return None;
            };
            let inst = event.inst?;
            let fork_pts = self.engine.points_to(event.scope.ctx, Value::Inst(inst));
            fork_pts
                .iter()
                .any(|o| handle_pts.contains(o))
                .then_some(*thread)
        };

        for event in &frame.events {
            if let Some(thread) = matches(event) {
                return Some((frame.id, event.id, thread));
            }
        }
        for thread_trace in &self.threads {
            for event in &thread_trace.events {
                if let Some(thread) = matches(event) {
                    return Some((thread_trace.id, event.id, thread));
                }
            }
        }
        None
    }

    fn handle_fork(
        &mut self,
        op: &RaceOp,
        fork: &ForkOp,
        frame: &mut ThreadFrame,
        scope: &Arc<EventScope>,
    ) -> Result<()> {
        // Tasks spawned inside a single region are created once, on the
        // master sibling.
        if fork.kind == ForkKind::OmpTask
            && frame.omp.in_single
            && frame.is_omp_sibling
            && !frame.is_master
        {
            return Ok(());
        }

        let teams_fork = fork.kind == ForkKind::OmpTeams;
        if fork.kind.is_omp_parallel() && fork.forks_master {
            // The number-of-threads setting in effect at the master fork
            // decides the whole pair; push applies to this construct only.
            let effective = frame.omp.pending_push.take().or(frame.omp.set_num_threads);
            frame.omp.suppress_region = effective == Some(1);
            frame.current_region = Some(op.inst);
        }
        let region = if fork.kind.is_omp_parallel() {
            frame.current_region
        } else {
            None
        };

        if fork.kind.is_omp_parallel() && frame.omp.suppress_region {
            // A single-threaded parallel region: the fork and its
            // implicit join are still emitted, but no child threads are
            // built and the outlined function is skipped.
            let event = frame.emit(
                scope,
                Some(op.inst),
                EventKind::Fork {
                    kind: fork.kind,
                    thread: None,
                    handle: fork.handle,
                    forks_master: fork.forks_master,
                    region,
                },
            );
            frame.fork_events.insert(op.inst, (event, None));
            return Ok(());
        }

        let entries = self.resolve_entries(scope.ctx, fork, op.inst);
        if entries.is_empty() {
            warn!(inst = op.inst, "fork with unresolved thread entry");
            let event = frame.emit(
                scope,
                Some(op.inst),
                EventKind::Fork {
                    kind: fork.kind,
                    thread: None,
                    handle: fork.handle,
                    forks_master: fork.forks_master,
                    region,
                },
            );
            frame.fork_events.insert(op.inst, (event, None));
            return Ok(());
        }
        if entries.len() > 1 {
            debug!(
                inst = op.inst,
                candidates = entries.len(),
                "fork with multiple possible entries; choosing first"
            );
        }
        let entry = entries[0];

        let child_tid = self.state.alloc_tid();
        let event = frame.emit(
            scope,
            Some(op.inst),
            EventKind::Fork {
                kind: fork.kind,
                thread: Some(child_tid),
                handle: fork.handle,
                forks_master: fork.forks_master,
                region,
            },
        );
        frame.fork_events.insert(op.inst, (event, Some(child_tid)));

        if fork.kind == ForkKind::OmpTask {
            frame.omp.unjoined_tasks.push(UnjoinedTask {
                fork_event: event,
                thread: Some(child_tid),
            });
        }

        let spawn = SpawnSite {
            parent: frame.id,
            fork_event: event,
            kind: fork.kind,
            forks_master: fork.forks_master,
            region,
        };
        let child_state = frame.omp.child_state(teams_fork);
        // Depth-first: the child (and all its descendants) are built now;
        // inserting at the recorded position keeps the list in spawn
        // order, parents before their children.
        let position = self.threads.len();
        let child = self.build_thread(child_tid, Some(spawn), entry, child_state)?;
        self.threads.insert(position, child);
        Ok(())
    }

    fn traverse(
        &mut self,
        node: CallNodeRef,
        frame: &mut ThreadFrame,
        callstack: &mut Vec<(CtxId, FuncId)>,
    ) -> Result<()> {
        if callstack.contains(&(node.ctx, node.func)) {
            // Recursion with an unchanged context would expand forever.
            return Ok(());
        }
        callstack.push((node.ctx, node.func));

        let summary = self.state.summaries.summarize(self.module, node.func);
        let scope = Arc::new(EventScope {
            ctx: node.ctx,
            callstack: callstack.iter().map(|(_, f)| *f).collect(),
        });

        for (i, op) in summary.iter().enumerate() {
            if let Some(target) = frame.skip_until {
                if op.inst != target {
                    continue;
                }
                frame.skip_until = None;
            }
            if frame.omp.in_teams_region() && is_team_specific(&op.kind) {
                continue;
            }

            match &op.kind {
                RaceOpKind::Read { addr } => {
                    frame.emit(&scope, Some(op.inst), EventKind::Read { addr: *addr });
                }
                RaceOpKind::Write { addr } => {
                    frame.emit(&scope, Some(op.inst), EventKind::Write { addr: *addr });
                }
                RaceOpKind::Fork(fork) => {
                    self.handle_fork(op, fork, frame, &scope)?;
                }
                RaceOpKind::PthreadJoin { handle } => {
                    let handle_pts: BTreeSet<u32> =
                        self.engine.points_to(scope.ctx, *handle).into_iter().collect();
                    match self.find_pthread_fork(&handle_pts, frame) {
                        Some((host, fork_event, thread)) => {
                            frame.emit(
                                &scope,
                                Some(op.inst),
                                EventKind::Join {
                                    kind: ForkKind::PthreadCreate,
                                    fork: Some((host, fork_event)),
                                    thread,
                                },
                            );
                        }
                        None => {
                            warn!(inst = op.inst, "pthread_join with no matching create");
                            frame.emit(
                                &scope,
                                Some(op.inst),
                                EventKind::Join {
                                    kind: ForkKind::PthreadCreate,
                                    fork: None,
                                    thread: None,
                                },
                            );
                        }
                    }
                }
                RaceOpKind::OmpJoin { fork_inst, teams } => {
                    // End of the parallel region: pending tasks join here
                    // and a held reduction lock is released.
                    self.insert_task_joins(frame, &scope);
                    if frame.omp.reduce_held {
                        frame.omp.reduce_held = false;
                        frame.emit(
                            &scope,
                            Some(op.inst),
                            EventKind::LockRelease {
                                key: reduction_key(),
                            },
                        );
                    }
                    let pair = frame.fork_events.get(fork_inst).copied();
                    frame.emit(
                        &scope,
                        Some(op.inst),
                        EventKind::Join {
                            kind: if *teams { ForkKind::OmpTeams } else { ForkKind::Omp },
                            fork: pair.map(|(event, _)| (frame.id, event)),
                            thread: pair.and_then(|(_, thread)| thread),
                        },
                    );
                }
                RaceOpKind::TaskWait => {
                    self.insert_task_joins(frame, &scope);
                }
                RaceOpKind::LockAcquire { lock, .. } => {
                    let key = self.lock_key(scope.ctx, *lock);
                    frame.emit(&scope, Some(op.inst), EventKind::LockAcquire { key });
                }
                RaceOpKind::LockRelease { lock, .. } => {
                    let key = self.lock_key(scope.ctx, *lock);
                    frame.emit(&scope, Some(op.inst), EventKind::LockRelease { key });
                }
                RaceOpKind::Barrier => {
                    // Tasks join at every barrier; a reduction section
                    // extends to the barrier closing it.
                    self.insert_task_joins(frame, &scope);
                    if frame.omp.reduce_held {
                        frame.omp.reduce_held = false;
                        frame.emit(
                            &scope,
                            Some(op.inst),
                            EventKind::LockRelease {
                                key: reduction_key(),
                            },
                        );
                    }
                    frame.emit(&scope, Some(op.inst), EventKind::Barrier);
                }
                RaceOpKind::SingleStart => {
                    if !frame.is_omp_sibling {
                        continue;
                    }
                    frame.omp.in_single = true;
                    frame.omp.single_depth += 1;
                    frame.emit(&scope, Some(op.inst), EventKind::EnterSingle);
                    if !frame.is_master {
                        // The body runs on the master sibling only; skip
                        // ahead to the matching end marker.
                        frame.skip_until =
                            Some(find_matching_end(&summary, i, RegionKind::Single)?);
                    }
                }
                RaceOpKind::SingleEnd => {
                    if !frame.is_omp_sibling {
                        continue;
                    }
                    if frame.omp.single_depth == 0 {
                        return Err(TraceError::SingleEndWithoutStart { inst: op.inst });
                    }
                    frame.omp.single_depth -= 1;
                    frame.omp.in_single = false;
                    frame.emit(&scope, Some(op.inst), EventKind::ExitSingle);
                }
                RaceOpKind::MasterStart => {
                    if !frame.is_omp_sibling {
                        continue;
                    }
                    if frame.is_master {
                        frame.omp.master_depth += 1;
                        frame.emit(&scope, Some(op.inst), EventKind::EnterMaster);
                    } else {
                        // Non-master siblings skip the region entirely.
                        frame.skip_until =
                            Some(find_matching_end(&summary, i, RegionKind::Master)?);
                    }
                }
                RaceOpKind::MasterEnd => {
                    if !frame.is_omp_sibling || !frame.is_master {
                        continue;
                    }
                    if frame.omp.master_depth == 0 {
                        return Err(TraceError::MasterEndWithoutStart { inst: op.inst });
                    }
                    frame.omp.master_depth -= 1;
                    frame.emit(&scope, Some(op.inst), EventKind::ExitMaster);
                }
                RaceOpKind::CriticalStart { name } => {
                    frame.emit(
                        &scope,
                        Some(op.inst),
                        EventKind::EnterCritical { name: name.clone() },
                    );
                }
                RaceOpKind::CriticalEnd { name } => {
                    frame.emit(
                        &scope,
                        Some(op.inst),
                        EventKind::ExitCritical { name: name.clone() },
                    );
                }
                RaceOpKind::OrderedStart => {
                    frame.emit(&scope, Some(op.inst), EventKind::EnterOrdered);
                }
                RaceOpKind::OrderedEnd => {
                    frame.emit(&scope, Some(op.inst), EventKind::ExitOrdered);
                }
                RaceOpKind::Reduce => {
                    // An implicit critical section from the reduce call to
                    // the barrier closing it.
                    frame.omp.reduce_held = true;
                    frame.emit(
                        &scope,
                        Some(op.inst),
                        EventKind::LockAcquire {
                            key: reduction_key(),
                        },
                    );
                }
                RaceOpKind::SetNumThreads { n } => {
                    frame.omp.set_num_threads = *n;
                }
                RaceOpKind::PushNumThreads { n } => {
                    frame.omp.pending_push = *n;
                }
                RaceOpKind::GuardStart { tid } => {
                    frame.emit(&scope, Some(op.inst), EventKind::EnterGuard { tid: *tid });
                }
                RaceOpKind::GuardEnd { tid } => {
                    frame.emit(&scope, Some(op.inst), EventKind::ExitGuard { tid: *tid });
                }
                RaceOpKind::GetThreadNum
                | RaceOpKind::ForInit
                | RaceOpKind::ForFini
                | RaceOpKind::DispatchInit
                | RaceOpKind::DispatchNext
                | RaceOpKind::DispatchFini => {}
                RaceOpKind::Call {
                    target: CallTarget::Direct(callee),
                } => {
                    if self.module.function(*callee).is_external() {
                        frame.emit(
                            &scope,
                            Some(op.inst),
                            EventKind::OpaqueCall {
                                callee: Some(*callee),
                            },
                        );
                        continue;
                    }
                    let child_ctx = self.engine.context_evolve(scope.ctx, op.inst);
                    match self.engine.direct_node(child_ctx, *callee) {
                        Some(child) => self.traverse(child, frame, callstack)?,
                        None => {
                            warn!(inst = op.inst, "unable to get callee node");
                            frame.emit(
                                &scope,
                                Some(op.inst),
                                EventKind::OpaqueCall {
                                    callee: Some(*callee),
                                },
                            );
                        }
                    }
                }
                RaceOpKind::Call {
                    target: CallTarget::Indirect(_),
                } => {
                    let callees = self.engine.indirect_callees(scope.ctx, op.inst);
                    if callees.is_empty() {
                        warn!(inst = op.inst, "unresolved indirect call");
                        frame.emit(&scope, Some(op.inst), EventKind::OpaqueCall { callee: None });
                        continue;
                    }
                    // Under-approximation: visit every resolved callee in
                    // deterministic order.
                    for callee in callees {
                        self.traverse(callee, frame, callstack)?;
                    }
                }
            }
        }

        callstack.pop();
        Ok(())
    }
}

fn reduction_key() -> LockKey {
    LockKey::Named("omp.reduction".to_string())
}
