//! Key-addressed polling slots.
//!
//! A [`Query`] remembers the last value or error of one resource, knows when it
//! is due for another fetch, and refuses to start a second fetch for its key
//! while one is already running.

use std::time::{Duration, Instant};

const MIN_STALE: Duration = Duration::from_secs(5);
const RETRY_BASE_MS: u64 = 1_000;
const RETRY_MAX_MS: u64 = 30_000;

/// What the UI reads for one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryView<T> {
    pub data: Option<T>,
    pub is_loading: bool,
    pub error: Option<String>,
    pub updated_at: Option<Instant>,
}

impl<T> Default for QueryView<T> {
    fn default() -> Self {
        Self {
            data: None,
            is_loading: false,
            error: None,
            updated_at: None,
        }
    }
}

impl<T> QueryView<T> {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn mark_loading(&mut self) {
        self.is_loading = true;
    }

    pub fn resolve(&mut self, data: T, now: Instant) {
        self.data = Some(data);
        self.error = None;
        self.is_loading = false;
        self.updated_at = Some(now);
    }

    /// Keeps the last good value so panels can show it next to the error.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.is_loading = false;
    }
}

/// Logical identity of a query: resource name plus the connection and
/// parameters it was issued with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey(String);

impl QueryKey {
    pub fn new(resource: &str, base_url: &str, token: &str, params: &str) -> Self {
        Self(format!(
            "{resource}|{base_url}|{}|{params}",
            token_fingerprint(token)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn token_fingerprint(token: &str) -> String {
    let tail: String = token
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("{}:{tail}", token.len())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSpec {
    /// `None` means fetch once, then only on `invalidate` or a
    /// `refresh_if_stale` hint once the data has gone stale.
    pub interval: Option<Duration>,
    pub stale_time: Duration,
    pub retry: u32,
}

impl PollSpec {
    /// Live resources: refetch every `poll`, stale after half of it (at least 5s).
    pub fn live(poll: Duration) -> Self {
        Self {
            interval: Some(poll),
            stale_time: (poll / 2).max(MIN_STALE),
            retry: 0,
        }
    }

    pub fn on_demand(poll: Duration) -> Self {
        Self {
            interval: None,
            stale_time: (poll / 2).max(MIN_STALE),
            retry: 0,
        }
    }

    /// Slow-moving settings such as the competition name and times.
    pub fn static_info() -> Self {
        Self {
            interval: None,
            stale_time: Duration::from_secs(5 * 60),
            retry: 3,
        }
    }
}

pub fn retry_delay(attempt: u32) -> Duration {
    let ms = RETRY_BASE_MS
        .saturating_mul(1u64 << attempt.min(16))
        .min(RETRY_MAX_MS);
    Duration::from_millis(ms)
}

#[derive(Debug, Clone)]
pub struct Query<T> {
    key: QueryKey,
    spec: PollSpec,
    enabled: bool,
    data: Option<T>,
    error: Option<String>,
    in_flight: bool,
    updated_at: Option<Instant>,
    attempted_at: Option<Instant>,
    failures: u32,
    retry_at: Option<Instant>,
    invalidated: bool,
}

impl<T: Clone> Query<T> {
    pub fn new(key: QueryKey, spec: PollSpec) -> Self {
        Self {
            key,
            spec,
            enabled: true,
            data: None,
            error: None,
            in_flight: false,
            updated_at: None,
            attempted_at: None,
            failures: 0,
            retry_at: None,
            invalidated: false,
        }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn spec(&self) -> PollSpec {
        self.spec
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn set_spec(&mut self, spec: PollSpec) {
        self.spec = spec;
    }

    /// Switches to a new key. Data cached under the old key is discarded.
    pub fn rekey(&mut self, key: QueryKey) {
        if self.key == key {
            return;
        }
        self.key = key;
        self.data = None;
        self.error = None;
        self.updated_at = None;
        self.attempted_at = None;
        self.failures = 0;
        self.retry_at = None;
        self.invalidated = false;
    }

    /// Forces the next `is_due` check to fire.
    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        match self.updated_at {
            Some(at) => now.saturating_duration_since(at) >= self.spec.stale_time,
            None => true,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        if !self.enabled || self.in_flight {
            return false;
        }
        if self.invalidated {
            return true;
        }
        if let Some(retry_at) = self.retry_at {
            return now >= retry_at;
        }
        let Some(last) = self.attempted_at else {
            return true;
        };
        match self.spec.interval {
            Some(interval) => now.saturating_duration_since(last) >= interval,
            // Stale data is only eligible for a refresh, never refetched on its own.
            None => match self.updated_at {
                Some(_) => false,
                None => now.saturating_duration_since(last) >= self.spec.stale_time,
            },
        }
    }

    /// Background refresh hint: refetch only if the data is stale.
    pub fn refresh_if_stale(&mut self, now: Instant) -> bool {
        if self.enabled && !self.in_flight && self.is_stale(now) {
            self.invalidated = true;
            return true;
        }
        false
    }

    /// Claims the slot for one fetch. Returns false when a fetch for this key
    /// is already running.
    pub fn begin(&mut self, now: Instant) -> bool {
        if self.in_flight || !self.enabled {
            return false;
        }
        self.in_flight = true;
        self.invalidated = false;
        self.attempted_at = Some(now);
        true
    }

    pub fn settle(&mut self, result: Result<T, String>, now: Instant) {
        self.in_flight = false;
        match result {
            Ok(data) => {
                self.data = Some(data);
                self.error = None;
                self.updated_at = Some(now);
                self.failures = 0;
                self.retry_at = None;
            }
            Err(err) => {
                self.error = Some(err);
                if self.failures < self.spec.retry {
                    self.retry_at = Some(now + retry_delay(self.failures));
                    self.failures += 1;
                } else {
                    self.retry_at = None;
                    self.failures = 0;
                }
            }
        }
    }

    pub fn view(&self) -> QueryView<T> {
        QueryView {
            data: self.data.clone(),
            is_loading: self.in_flight,
            error: self.error.clone(),
            updated_at: self.updated_at,
        }
    }
}
