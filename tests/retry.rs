use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ctfd_terminal::backoff::{BackoffPolicy, Clock, SharedBackoff};
use ctfd_terminal::ctfd_fetch::{Connection, CtfdClient, SubmissionFilter};
use ctfd_terminal::error::UpstreamError;
use ctfd_terminal::http_client::{RawResponse, Transport};
use ctfd_terminal::state::SubmissionKind;

const OK_LIST: &str = r#"{"success": true, "data": []}"#;

struct FakeClock {
    base: Instant,
    offset: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl FakeClock {
    fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap()
    }

    fn sleep(&self, dur: Duration) {
        self.sleeps.lock().unwrap().push(dur);
        *self.offset.lock().unwrap() += dur;
    }
}

#[derive(Default)]
struct ScriptedTransport {
    script: Mutex<VecDeque<Result<RawResponse, String>>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedTransport {
    fn new(script: Vec<Result<RawResponse, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Transport for ScriptedTransport {
    fn get(&self, url: &str, token: &str) -> Result<RawResponse, String> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), token.to_string()));
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(RawResponse::ok(OK_LIST)))
    }
}

fn too_many(retry_after: Option<&str>) -> Result<RawResponse, String> {
    Ok(RawResponse {
        status: 429,
        retry_after: retry_after.map(str::to_string),
        body: "Too Many Requests".to_string(),
    })
}

fn harness(
    script: Vec<Result<RawResponse, String>>,
) -> (CtfdClient, Arc<ScriptedTransport>, Arc<FakeClock>, SharedBackoff) {
    let transport = Arc::new(ScriptedTransport::new(script));
    let clock = Arc::new(FakeClock::new());
    let backoff = BackoffPolicy::shared();
    let client = CtfdClient::new(
        Connection::new("https://ctf.example.org/", "ctfd_secret"),
        transport.clone(),
        clock.clone(),
        backoff.clone(),
    );
    (client, transport, clock, backoff)
}

#[test]
fn sends_token_to_versioned_api_path() {
    let (client, transport, _, _) = harness(vec![]);
    client.challenges().expect("empty list");
    assert_eq!(
        transport.calls(),
        vec![(
            "https://ctf.example.org/api/v1/challenges".to_string(),
            "ctfd_secret".to_string()
        )]
    );
}

#[test]
fn rate_limits_are_retried_with_doubling_waits() {
    let (client, transport, clock, backoff) = harness(vec![
        too_many(None),
        too_many(None),
        Ok(RawResponse::ok(OK_LIST)),
    ]);
    let list = client.challenges().expect("third attempt succeeds");
    assert!(list.is_empty());
    assert_eq!(transport.calls().len(), 3);
    assert_eq!(
        clock.sleeps(),
        vec![Duration::from_millis(300), Duration::from_millis(600)]
    );
    // Recovered within the retry budget: no penalty.
    assert_eq!(backoff.lock().unwrap().counter(), 0);
}

#[test]
fn exhausted_rate_limit_records_one_penalty() {
    let (client, transport, clock, backoff) = harness(vec![
        too_many(None),
        too_many(None),
        too_many(None),
        too_many(Some("30")),
    ]);
    let err = client.full_scoreboard().expect_err("all attempts limited");
    assert_eq!(
        err,
        UpstreamError::RateLimited {
            retry_after: Some("30".to_string())
        }
    );
    assert_eq!(err.status(), Some(429));
    assert_eq!(err.retry_after(), Some("30"));
    assert!(err.to_string().contains("30 seconds"));
    assert_eq!(transport.calls().len(), 4);
    assert_eq!(
        clock.sleeps(),
        vec![
            Duration::from_millis(300),
            Duration::from_millis(600),
            Duration::from_millis(1200)
        ]
    );
    assert_eq!(backoff.lock().unwrap().counter(), 1);
}

#[test]
fn other_statuses_fail_without_retry() {
    let (client, transport, clock, backoff) =
        harness(vec![Ok(RawResponse::status(403, "Forbidden"))]);
    let err = client.submissions(&SubmissionFilter::default()).expect_err("forbidden");
    assert_eq!(
        err,
        UpstreamError::Rejected {
            status: 403,
            body: "Forbidden".to_string()
        }
    );
    assert_eq!(transport.calls().len(), 1);
    assert!(clock.sleeps().is_empty());
    assert_eq!(backoff.lock().unwrap().counter(), 0);
}

#[test]
fn rejected_body_is_truncated() {
    let long = "x".repeat(500);
    let (client, _, _, _) = harness(vec![Ok(RawResponse::status(500, long))]);
    let err = client.challenges().expect_err("server error");
    let UpstreamError::Rejected { body, .. } = err else {
        panic!("expected rejection");
    };
    assert_eq!(body.chars().count(), 203);
    assert!(body.ends_with("..."));
}

#[test]
fn transport_failures_are_retried_then_reported() {
    let (client, transport, clock, backoff) = harness(vec![
        Err("connection refused".to_string()),
        Err("connection refused".to_string()),
        Err("connection refused".to_string()),
        Err("connection refused".to_string()),
    ]);
    let err = client.challenges().expect_err("server unreachable");
    assert_eq!(err, UpstreamError::Transport("connection refused".to_string()));
    assert_eq!(transport.calls().len(), 4);
    assert_eq!(clock.sleeps().len(), 3);
    // Only rate limits feed the pre-request throttle.
    assert_eq!(backoff.lock().unwrap().counter(), 0);
}

#[test]
fn transport_blip_then_success() {
    let (client, transport, _, _) = harness(vec![
        Err("timed out".to_string()),
        Ok(RawResponse::ok(OK_LIST)),
    ]);
    assert!(client.challenges().is_ok());
    assert_eq!(transport.calls().len(), 2);
}

#[test]
fn unsuccessful_envelope_is_not_retried() {
    let body = r#"{"success": false, "errors": ["Invalid token"]}"#;
    let (client, transport, _, _) = harness(vec![Ok(RawResponse::ok(body))]);
    let err = client.challenges().expect_err("envelope failure");
    assert_eq!(err, UpstreamError::Malformed("Invalid token".to_string()));
    assert_eq!(transport.calls().len(), 1);
}

#[test]
fn active_penalty_delays_the_next_request() {
    let (client, _, clock, backoff) = harness(vec![]);
    {
        let mut policy = backoff.lock().unwrap();
        policy.record_failure(clock.now());
        policy.record_failure(clock.now());
    }
    client.challenges().expect("ok");
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(4)]);
    // Success inside the penalty window does not decay the counter.
    assert_eq!(backoff.lock().unwrap().counter(), 2);
}

#[test]
fn submission_filter_builds_query() {
    let (client, transport, _, _) = harness(vec![]);
    let filter = SubmissionFilter {
        kind: Some(SubmissionKind::Incorrect),
        per_page: Some(25),
        page: Some(0),
        challenge_id: Some(4),
        user_id: None,
    };
    client.submissions(&filter).expect("empty page");
    let (url, _) = &transport.calls()[0];
    assert_eq!(
        url,
        "https://ctf.example.org/api/v1/submissions?type=incorrect&per_page=25&challenge_id=4"
    );
}

#[test]
fn ctf_info_treats_rejected_config_as_unknown() {
    let (client, _, _, _) = harness(vec![
        Ok(RawResponse::status(403, "admins only")),
        Ok(RawResponse::ok(
            r#"{"success": true, "data": [{"key": "start", "value": "1714816800"}]}"#,
        )),
        Ok(RawResponse::ok(r#"{"success": true, "data": []}"#)),
    ]);
    let info = client.ctf_info().expect("rejections are tolerated");
    assert_eq!(info.name, None);
    assert_eq!(info.start, Some(1_714_816_800));
    assert_eq!(info.end, None);
}

#[test]
fn ctf_info_still_fails_on_transport_errors() {
    let down = || Err("dns failure".to_string());
    let (client, _, _, _) = harness(vec![down(), down(), down(), down()]);
    assert!(matches!(client.ctf_info(), Err(UpstreamError::Transport(_))));
}

#[test]
fn request_hands_back_the_parsed_envelope() {
    let (client, _, _, _) = harness(vec![Ok(RawResponse::ok(
        r#"{"success": true, "data": [{"id": 3, "name": "baby-rsa"}]}"#,
    ))]);
    let body = client.request("/challenges").expect("good envelope");
    assert_eq!(body["data"][0]["id"], 3);
    assert_eq!(body["success"], true);
}
