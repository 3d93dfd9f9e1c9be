use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ctfd_terminal::backoff::{BackoffPolicy, Clock, MAX_PENALTY, PENALTY_WINDOW};
use ctfd_terminal::ctfd_fetch::{Connection, CtfdClient};
use ctfd_terminal::http_client::{RawResponse, Transport};

#[test]
fn fresh_policy_has_no_delay() {
    let policy = BackoffPolicy::new();
    assert_eq!(policy.counter(), 0);
    assert_eq!(policy.current_delay(Instant::now()), Duration::ZERO);
}

#[test]
fn delay_doubles_per_penalty_and_caps() {
    let t0 = Instant::now();
    let mut policy = BackoffPolicy::new();

    policy.record_failure(t0);
    assert_eq!(policy.current_delay(t0), Duration::from_secs(2));
    policy.record_failure(t0);
    policy.record_failure(t0);
    assert_eq!(policy.current_delay(t0), Duration::from_secs(8));

    for _ in 0..5 {
        policy.record_failure(t0);
    }
    assert_eq!(policy.counter(), MAX_PENALTY);
    assert_eq!(policy.current_delay(t0), Duration::from_secs(10));
}

#[test]
fn penalty_expires_after_quiet_window() {
    let t0 = Instant::now();
    let mut policy = BackoffPolicy::new();
    policy.record_failure(t0);
    assert!(!policy.current_delay(t0 + Duration::from_secs(59)).is_zero());
    assert!(policy.current_delay(t0 + PENALTY_WINDOW).is_zero());
}

#[test]
fn success_decays_only_after_quiet_window() {
    let t0 = Instant::now();
    let mut policy = BackoffPolicy::new();
    policy.record_failure(t0);
    policy.record_failure(t0);

    policy.record_success(t0 + Duration::from_secs(30));
    assert_eq!(policy.counter(), 2);

    policy.record_success(t0 + Duration::from_secs(61));
    assert_eq!(policy.counter(), 1);
    policy.record_success(t0 + Duration::from_secs(62));
    assert_eq!(policy.counter(), 0);
    policy.record_success(t0 + Duration::from_secs(63));
    assert_eq!(policy.counter(), 0);
}

struct SteppingClock {
    base: Instant,
    offset: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl Clock for SteppingClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap()
    }

    fn sleep(&self, dur: Duration) {
        self.sleeps.lock().unwrap().push(dur);
        *self.offset.lock().unwrap() += dur;
    }
}

struct AlwaysLimited;

impl Transport for AlwaysLimited {
    fn get(&self, _url: &str, _token: &str) -> Result<RawResponse, String> {
        Ok(RawResponse::status(429, "slow down"))
    }
}

#[test]
fn consecutive_limited_requests_reach_the_cap() {
    let clock = Arc::new(SteppingClock {
        base: Instant::now(),
        offset: Mutex::new(Duration::ZERO),
        sleeps: Mutex::new(Vec::new()),
    });
    let backoff = BackoffPolicy::shared();
    let client = CtfdClient::new(
        Connection::new("https://ctf.example.org", "tok"),
        Arc::new(AlwaysLimited),
        clock.clone(),
        backoff.clone(),
    );

    for _ in 0..5 {
        assert!(client.challenges().unwrap_err().is_rate_limit());
    }
    {
        let policy = backoff.lock().unwrap();
        assert_eq!(policy.counter(), 5);
        assert_eq!(policy.current_delay(clock.now()), Duration::from_secs(10));
    }

    // Sixth request waits out the capped penalty before its first attempt.
    clock.sleeps.lock().unwrap().clear();
    assert!(client.challenges().unwrap_err().is_rate_limit());
    let sleeps = clock.sleeps.lock().unwrap().clone();
    assert_eq!(
        sleeps,
        vec![
            Duration::from_secs(10),
            Duration::from_millis(300),
            Duration::from_millis(600),
            Duration::from_millis(1200),
        ]
    );
    assert_eq!(backoff.lock().unwrap().counter(), 5);
}

#[test]
fn shared_policy_throttles_every_client_on_the_connection() {
    let backoff = BackoffPolicy::shared();
    let other = backoff.clone();
    let now = Instant::now();
    backoff.lock().unwrap().record_failure(now);
    assert_eq!(other.lock().unwrap().current_delay(now), Duration::from_secs(2));
}
