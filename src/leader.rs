use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::state::ScoreboardEntry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderSnapshot {
    pub id: u64,
    pub name: String,
    pub score: i64,
}

impl From<&ScoreboardEntry> for LeaderSnapshot {
    fn from(entry: &ScoreboardEntry) -> Self {
        Self {
            id: entry.id,
            name: entry.name.clone(),
            score: entry.score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderChange {
    pub previous_leader: LeaderSnapshot,
    pub new_leader: LeaderSnapshot,
}

/// Watches rank 1 across scoreboard polls.
///
/// The first observation is a silent baseline. A different id at rank 1 is a
/// change; the same id with a new score only refreshes the stored snapshot.
/// Rank order comes from the server as-is.
#[derive(Debug, Default)]
pub struct LeaderTracker {
    current: Option<LeaderSnapshot>,
}

impl LeaderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&LeaderSnapshot> {
        self.current.as_ref()
    }

    pub fn reset(&mut self) {
        self.current = None;
    }

    pub fn process(&mut self, scoreboard: &BTreeMap<u32, ScoreboardEntry>) -> Option<LeaderChange> {
        let leader = LeaderSnapshot::from(scoreboard.get(&1)?);
        // Baseline on first sight; afterwards the stored snapshot always tracks the latest.
        let previous = self.current.replace(leader.clone())?;
        if previous.id == leader.id {
            return None;
        }
        Some(LeaderChange {
            previous_leader: previous,
            new_leader: leader,
        })
    }
}
