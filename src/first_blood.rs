use std::collections::HashMap;

use crate::ctfd_fetch::CtfdClient;
use crate::error::UpstreamError;
use crate::state::{Challenge, ChallengeSolve};

/// Source of a challenge's solve history, oldest solve first.
pub trait SolveHistory {
    fn challenge_solves(&self, challenge_id: u64) -> Result<Vec<ChallengeSolve>, UpstreamError>;
}

impl SolveHistory for CtfdClient {
    fn challenge_solves(&self, challenge_id: u64) -> Result<Vec<ChallengeSolve>, UpstreamError> {
        CtfdClient::challenge_solves(self, challenge_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirstBloodEvent {
    pub challenge_id: u64,
    pub challenge_name: String,
    pub solver: ChallengeSolve,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    Processing,
    Resolved,
}

/// Fires once per challenge when its solve count is seen at exactly one.
///
/// Ids are marked before the solve history is requested and never unmarked,
/// so a challenge is looked up at most once per tracker lifetime even when the
/// lookup fails. A challenge first observed with two or more solves is never
/// reported.
#[derive(Debug, Default)]
pub struct FirstBloodTracker {
    tracked: HashMap<u64, Detection>,
}

impl FirstBloodTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn detection(&self, challenge_id: u64) -> Option<Detection> {
        self.tracked.get(&challenge_id).copied()
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    pub fn reset(&mut self) {
        self.tracked.clear();
    }

    pub fn check_challenges<S>(
        &mut self,
        challenges: &[Challenge],
        source: &S,
    ) -> Vec<FirstBloodEvent>
    where
        S: SolveHistory + ?Sized,
    {
        let fresh: Vec<&Challenge> = challenges
            .iter()
            .filter(|c| c.solves == 1 && !self.tracked.contains_key(&c.id))
            .collect();
        for challenge in &fresh {
            self.tracked.insert(challenge.id, Detection::Processing);
        }

        let mut events = Vec::new();
        for challenge in fresh {
            let first = source
                .challenge_solves(challenge.id)
                .ok()
                .and_then(|solves| solves.into_iter().next());
            self.tracked.insert(challenge.id, Detection::Resolved);
            if let Some(solver) = first {
                events.push(FirstBloodEvent {
                    challenge_id: challenge.id,
                    challenge_name: challenge.name.clone(),
                    solver,
                });
            }
        }
        events
    }
}

/// Who took first blood on each solved challenge, for scoreboard counts.
///
/// Unlike the tracker this never produces events; it back-fills at most
/// `batch` unknown challenges per call so a large catalog does not burst the
/// API.
#[derive(Debug, Default)]
pub struct FirstBloodRoster {
    owners: HashMap<u64, ChallengeSolve>,
    attempted: HashMap<u64, u32>,
}

impl FirstBloodRoster {
    const MAX_ATTEMPTS: u32 = 3;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn owners(&self) -> &HashMap<u64, ChallengeSolve> {
        &self.owners
    }

    pub fn record(&mut self, event: &FirstBloodEvent) {
        self.owners
            .insert(event.challenge_id, event.solver.clone());
    }

    pub fn reset(&mut self) {
        self.owners.clear();
        self.attempted.clear();
    }

    /// Returns true when the roster changed.
    pub fn backfill<S>(&mut self, challenges: &[Challenge], source: &S, batch: usize) -> bool
    where
        S: SolveHistory + ?Sized,
    {
        let pending: Vec<u64> = challenges
            .iter()
            .filter(|c| c.solves > 0 && !self.owners.contains_key(&c.id))
            .filter(|c| self.attempted.get(&c.id).copied().unwrap_or(0) < Self::MAX_ATTEMPTS)
            .map(|c| c.id)
            .take(batch)
            .collect();

        let mut changed = false;
        for id in pending {
            *self.attempted.entry(id).or_insert(0) += 1;
            if let Ok(solves) = source.challenge_solves(id) {
                if let Some(first) = solves.into_iter().next() {
                    self.owners.insert(id, first);
                    changed = true;
                }
            }
        }
        changed
    }
}
