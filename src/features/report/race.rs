//! Race report records.

use crate::features::trace::{EventId, ThreadId};
use crate::shared::models::SourceLoc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One side of a candidate race, addressed by (thread id, event id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRef {
    pub thread: ThreadId,
    pub event: EventId,
    pub is_write: bool,
    pub loc: Option<SourceLoc>,
}

impl fmt::Display for AccessRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_write { "write" } else { "read" };
        write!(f, "T{}:{} ({kind})", self.thread, self.event)?;
        if let Some(loc) = &self.loc {
            write!(f, " at {loc}")?;
        }
        Ok(())
    }
}

/// A pair of memory accesses that may race.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceCandidate {
    pub first: AccessRef,
    pub second: AccessRef,
}

impl RaceCandidate {
    /// "`file:line:col file:line:col`" pair used for deduplication and
    /// oracle matching.
    pub fn location_pair(&self) -> String {
        let fmt = |loc: &Option<SourceLoc>| match loc {
            Some(l) => l.to_string(),
            None => "<unknown>".to_string(),
        };
        format!("{} {}", fmt(&self.first.loc), fmt(&self.second.loc))
    }
}

/// The analyzer's output: candidate races plus surfaced diagnostics
/// (unbalanced locks and the like).
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Report {
    pub races: Vec<RaceCandidate>,
    pub diagnostics: Vec<String>,
}

impl Report {
    pub fn is_race_free(&self) -> bool {
        self.races.is_empty()
    }

    pub fn len(&self) -> usize {
        self.races.len()
    }

    pub fn is_empty(&self) -> bool {
        self.races.is_empty()
    }

    /// True if some candidate touches the given `file:line:col` location.
    pub fn involves(&self, loc: &str) -> bool {
        self.races.iter().any(|race| {
            race.location_pair()
                .split(' ')
                .any(|candidate| candidate == loc)
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
