//! Candidate enumeration and happens-before filtering.

use super::race::{AccessRef, RaceCandidate, Report};
use super::vector_clock::VectorClock;
use crate::features::points_to::ObjectId;
use crate::features::trace::{
    Event, EventKind, LockKey, ProgramTrace, ThreadTrace,
};
use rustc_hash::FxHashSet;
use std::collections::BTreeSet;

/// Per-event derived facts of one thread, computed in a single pass over
/// its stream.
struct ThreadFacts {
    /// Lock keys held when the event fires.
    locks: Vec<BTreeSet<LockKey>>,
    /// Number of barriers preceding the event.
    barriers: Vec<u32>,
    /// Strictly-inside depths of single/master regions.
    single_depth: Vec<u32>,
    master_depth: Vec<u32>,
    /// Active thread-id guard, innermost wins.
    guard: Vec<Option<i64>>,
}

fn critical_key(name: &str) -> LockKey {
    LockKey::Named(format!("omp.critical.{name}"))
}

fn ordered_key() -> LockKey {
    LockKey::Named("omp.ordered".to_string())
}

fn derive_facts(thread: &ThreadTrace, diagnostics: &mut Vec<String>) -> ThreadFacts {
    let len = thread.events.len();
    let mut facts = ThreadFacts {
        locks: Vec::with_capacity(len),
        barriers: Vec::with_capacity(len),
        single_depth: Vec::with_capacity(len),
        master_depth: Vec::with_capacity(len),
        guard: Vec::with_capacity(len),
    };

    let mut held: Vec<LockKey> = Vec::new();
    let mut barriers = 0u32;
    let mut single = 0u32;
    let mut master = 0u32;
    let mut guards: Vec<i64> = Vec::new();

    let mut release = |held: &mut Vec<LockKey>, key: &LockKey, event: &Event| {
        if let Some(pos) = held.iter().rposition(|k| k == key) {
            held.remove(pos);
        } else {
            diagnostics.push(format!(
                "unbalanced lock release on thread {} at event {}",
                thread.id, event.id
            ));
        }
    };

    for event in &thread.events {
        // Snapshot before the event's own effect: an enter/exit marker is
        // not strictly inside its own region.
        facts.locks.push(held.iter().cloned().collect());
        facts.barriers.push(barriers);
        facts.single_depth.push(single);
        facts.master_depth.push(master);
        facts.guard.push(guards.last().copied());

        match &event.kind {
            EventKind::LockAcquire { key } => held.push(key.clone()),
            EventKind::LockRelease { key } => release(&mut held, key, event),
            EventKind::EnterCritical { name } => held.push(critical_key(name)),
            EventKind::ExitCritical { name } => release(&mut held, &critical_key(name), event),
            EventKind::EnterOrdered => held.push(ordered_key()),
            EventKind::ExitOrdered => release(&mut held, &ordered_key(), event),
            EventKind::Barrier => barriers += 1,
            EventKind::EnterSingle => single += 1,
            EventKind::ExitSingle => single = single.saturating_sub(1),
            EventKind::EnterMaster => master += 1,
            EventKind::ExitMaster => master = master.saturating_sub(1),
            EventKind::EnterGuard { tid } => guards.push(*tid),
            EventKind::ExitGuard { .. } => {
                guards.pop();
            }
            _ => {}
        }
    }

    facts
}

/// Fork/join ordering via vector clocks, walking threads depth-first so a
/// child's final clock exists before any join that references it.
fn walk_clocks(
    trace: &ProgramTrace,
    thread: usize,
    init: VectorClock,
    event_clocks: &mut Vec<Vec<VectorClock>>,
    final_clocks: &mut Vec<VectorClock>,
) {
    let mut clock = init;
    let tid = trace.threads()[thread].id;
    for event in &trace.threads()[thread].events {
        clock.increment(tid);
        match &event.kind {
            EventKind::Fork {
                thread: Some(child),
                ..
            } => {
                event_clocks[thread].push(clock.clone());
                walk_clocks(
                    trace,
                    *child as usize,
                    clock.clone(),
                    event_clocks,
                    final_clocks,
                );
            }
            EventKind::Join {
                thread: Some(child),
                ..
            } => {
                let child_final = final_clocks[*child as usize].clone();
                clock.join(&child_final);
                event_clocks[thread].push(clock.clone());
            }
            _ => event_clocks[thread].push(clock.clone()),
        }
    }
    final_clocks[thread] = clock;
}

struct Access {
    event: u32,
    is_write: bool,
    pts: BTreeSet<ObjectId>,
}

/// Enumerates candidate racing event pairs over a built trace.
pub struct RaceDetector<'t> {
    trace: &'t ProgramTrace,
}

impl<'t> RaceDetector<'t> {
    pub fn new(trace: &'t ProgramTrace) -> Self {
        Self { trace }
    }

    /// Two sibling threads of one parallel region synchronize barrier by
    /// barrier; events with different barrier counts are ordered.
    fn are_siblings(&self, t1: usize, t2: usize) -> bool {
        let threads = self.trace.threads();
        match (&threads[t1].spawn, &threads[t2].spawn) {
            (Some(a), Some(b)) => {
                a.parent == b.parent && a.region.is_some() && a.region == b.region
            }
            _ => false,
        }
    }

    pub fn detect(&self) -> Report {
        let trace = self.trace;
        let threads = trace.threads();
        let mut diagnostics = Vec::new();

        let facts: Vec<ThreadFacts> = threads
            .iter()
            .map(|t| derive_facts(t, &mut diagnostics))
            .collect();

        let mut event_clocks: Vec<Vec<VectorClock>> = threads
            .iter()
            .map(|t| Vec::with_capacity(t.events.len()))
            .collect();
        let mut final_clocks = vec![VectorClock::new(); threads.len()];
        if !threads.is_empty() {
            walk_clocks(
                trace,
                0,
                VectorClock::new(),
                &mut event_clocks,
                &mut final_clocks,
            );
        }

        let accesses: Vec<Vec<Access>> = threads
            .iter()
            .map(|t| {
                t.events
                    .iter()
                    .filter(|e| e.is_memory_access())
                    .map(|e| Access {
                        event: e.id,
                        is_write: e.is_write(),
                        pts: trace.event_points_to(e).into_iter().collect(),
                    })
                    .collect()
            })
            .collect();

        let mut seen = FxHashSet::default();
        let mut races = Vec::new();

        for t1 in 0..threads.len() {
            for t2 in t1 + 1..threads.len() {
                let siblings = self.are_siblings(t1, t2);
                for a in &accesses[t1] {
                    for b in &accesses[t2] {
                        if !a.is_write && !b.is_write {
                            continue;
                        }
                        let shared: Vec<ObjectId> =
                            a.pts.intersection(&b.pts).copied().collect();
                        if shared.is_empty() {
                            continue;
                        }
                        // The only shareable objects are thread local.
                        if shared.iter().all(|&o| trace.object(o).thread_local) {
                            continue;
                        }

                        let (ae, be) = (a.event as usize, b.event as usize);
                        let (fa, fb) = (&facts[t1], &facts[t2]);

                        // A single (or master) body runs once per team.
                        if fa.single_depth[ae] > 0 && fb.single_depth[be] > 0 {
                            continue;
                        }
                        if fa.master_depth[ae] > 0 && fb.master_depth[be] > 0 {
                            continue;
                        }
                        // Same effective thread id under a guard.
                        if let (Some(x), Some(y)) = (fa.guard[ae], fb.guard[be]) {
                            if x == y {
                                continue;
                            }
                        }
                        if !fa.locks[ae].is_disjoint(&fb.locks[be]) {
                            continue;
                        }
                        if !event_clocks[t1][ae].concurrent(&event_clocks[t2][be]) {
                            continue;
                        }
                        if siblings && fa.barriers[ae] != fb.barriers[be] {
                            continue;
                        }

                        let first = self.access_ref(&threads[t1], a);
                        let second = self.access_ref(&threads[t2], b);
                        let candidate = RaceCandidate { first, second };
                        if seen.insert(candidate.location_pair()) {
                            races.push(candidate);
                        }
                    }
                }
            }
        }

        races.sort_by_key(RaceCandidate::location_pair);
        Report { races, diagnostics }
    }

    fn access_ref(&self, thread: &ThreadTrace, access: &Access) -> AccessRef {
        let event = thread.event(access.event);
        AccessRef {
            thread: thread.id,
            event: access.event,
            is_write: access.is_write,
            loc: self.trace.event_loc(event).cloned(),
        }
    }
}
