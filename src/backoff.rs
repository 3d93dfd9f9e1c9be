use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub const PENALTY_WINDOW: Duration = Duration::from_secs(60);
pub const MAX_PENALTY: u32 = 5;
const BASE_DELAY_MS: u64 = 1_000;
const MAX_DELAY_MS: u64 = 10_000;

/// Time source for request pacing. Tests swap in a virtual clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, dur: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, dur: Duration) {
        if !dur.is_zero() {
            thread::sleep(dur);
        }
    }
}

/// Pre-request throttle shared by every accessor of one connection.
///
/// Each 429 bumps a penalty counter (capped at 5). While the last penalty is
/// less than a minute old, callers wait `min(1s * 2^counter, 10s)` before
/// sending. Successes after a quiet minute decay the counter one step.
#[derive(Debug, Clone, Default)]
pub struct BackoffPolicy {
    counter: u32,
    last_penalty: Option<Instant>,
}

pub type SharedBackoff = Arc<Mutex<BackoffPolicy>>;

impl BackoffPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedBackoff {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn last_penalty(&self) -> Option<Instant> {
        self.last_penalty
    }

    pub fn current_delay(&self, now: Instant) -> Duration {
        let Some(last) = self.last_penalty else {
            return Duration::ZERO;
        };
        if now.saturating_duration_since(last) >= PENALTY_WINDOW {
            return Duration::ZERO;
        }
        let ms = BASE_DELAY_MS
            .saturating_mul(1u64 << self.counter.min(MAX_PENALTY))
            .min(MAX_DELAY_MS);
        Duration::from_millis(ms)
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.counter = (self.counter + 1).min(MAX_PENALTY);
        self.last_penalty = Some(now);
    }

    pub fn record_success(&mut self, now: Instant) {
        if self.counter == 0 {
            return;
        }
        let quiet = self
            .last_penalty
            .map(|last| now.saturating_duration_since(last) > PENALTY_WINDOW)
            .unwrap_or(true);
        if quiet {
            self.counter -= 1;
        }
    }
}
