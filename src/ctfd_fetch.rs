use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::backoff::{BackoffPolicy, Clock, SharedBackoff};
use crate::error::UpstreamError;
use crate::http_client::{RawResponse, Transport};
use crate::state::{
    Challenge, ChallengeSolve, CtfInfo, Pagination, ScoreboardEntry, Solve, SubmissionKind,
    Submission, SubmissionsPage,
};

const API_PREFIX: &str = "/api/v1";
pub const MAX_RETRIES: u32 = 3;
pub const INITIAL_RETRY_WAIT: Duration = Duration::from_millis(300);
pub const DEFAULT_TOP_N: u32 = 10;
const ERROR_BODY_MAX: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Connection {
    pub base_url: String,
    pub token: String,
}

impl Connection {
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            token: token.trim().to_string(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty() && !self.token.is_empty()
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{API_PREFIX}{path}", self.base_url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubmissionFilter {
    pub kind: Option<SubmissionKind>,
    pub per_page: Option<u32>,
    pub page: Option<u32>,
    pub challenge_id: Option<u64>,
    pub user_id: Option<u64>,
}

impl SubmissionFilter {
    /// Only the parameters that are set (and non-zero) end up in the query.
    pub fn query_string(&self) -> String {
        let mut parts = Vec::new();
        if let Some(kind) = self.kind.and_then(SubmissionKind::as_query) {
            parts.push(format!("type={kind}"));
        }
        if let Some(per_page) = self.per_page.filter(|v| *v > 0) {
            parts.push(format!("per_page={per_page}"));
        }
        if let Some(page) = self.page.filter(|v| *v > 0) {
            parts.push(format!("page={page}"));
        }
        if let Some(id) = self.challenge_id.filter(|v| *v > 0) {
            parts.push(format!("challenge_id={id}"));
        }
        if let Some(id) = self.user_id.filter(|v| *v > 0) {
            parts.push(format!("user_id={id}"));
        }
        if parts.is_empty() {
            String::new()
        } else {
            format!("?{}", parts.join("&"))
        }
    }

    pub fn path(&self) -> String {
        format!("/submissions{}", self.query_string())
    }
}

/// Typed access to one CTFd instance.
///
/// Every accessor goes through [`CtfdClient::request`], which applies the shared
/// rate-limit throttle before sending and retries transport failures and 429s.
#[derive(Clone)]
pub struct CtfdClient {
    conn: Connection,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    backoff: SharedBackoff,
}

impl CtfdClient {
    pub fn new(
        conn: Connection,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        backoff: SharedBackoff,
    ) -> Self {
        Self {
            conn,
            transport,
            clock,
            backoff,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn backoff(&self) -> &SharedBackoff {
        &self.backoff
    }

    fn with_backoff<R>(&self, f: impl FnOnce(&mut BackoffPolicy) -> R) -> R {
        let mut guard = self.backoff.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// One logical request. Returns the body of a successful envelope, parsed
    /// once so the accessors can decode their payload without re-reading text.
    pub fn request(&self, path: &str) -> Result<Value, UpstreamError> {
        let delay = self.with_backoff(|policy| policy.current_delay(self.clock.now()));
        if !delay.is_zero() {
            self.clock.sleep(delay);
        }

        let url = self.conn.url(path);
        let resp = match self.send_with_retry(&url) {
            Ok(resp) => resp,
            Err(err) => {
                if err.is_rate_limit() {
                    let now = self.clock.now();
                    self.with_backoff(|policy| policy.record_failure(now));
                }
                return Err(err);
            }
        };

        let body = parse_envelope(&resp.body)?;
        let now = self.clock.now();
        self.with_backoff(|policy| policy.record_success(now));
        Ok(body)
    }

    fn send_with_retry(&self, url: &str) -> Result<RawResponse, UpstreamError> {
        let mut wait = INITIAL_RETRY_WAIT;
        let mut attempt = 0;
        loop {
            let outcome = self.transport.get(url, &self.conn.token);
            let retryable = match &outcome {
                Err(_) => true,
                Ok(resp) => resp.status == 429,
            };
            if !retryable || attempt >= MAX_RETRIES {
                return classify(outcome);
            }
            self.clock.sleep(wait);
            wait *= 2;
            attempt += 1;
        }
    }

    fn fetch<T>(
        &self,
        path: &str,
        parse: impl FnOnce(Value) -> Result<T, UpstreamError>,
    ) -> Result<T, UpstreamError> {
        parse(self.request(path)?)
    }

    pub fn scoreboard_top(&self, n: u32) -> Result<BTreeMap<u32, ScoreboardEntry>, UpstreamError> {
        self.fetch(&format!("/scoreboard/top/{n}"), scoreboard_top_from)
    }

    pub fn full_scoreboard(&self) -> Result<Vec<ScoreboardEntry>, UpstreamError> {
        self.fetch("/scoreboard", full_scoreboard_from)
    }

    pub fn challenges(&self) -> Result<Vec<Challenge>, UpstreamError> {
        self.fetch("/challenges", challenges_from)
    }

    pub fn challenge_by_id(&self, id: u64) -> Result<Challenge, UpstreamError> {
        self.fetch(&format!("/challenges/{id}"), challenge_from)
    }

    pub fn challenge_solves(&self, id: u64) -> Result<Vec<ChallengeSolve>, UpstreamError> {
        self.fetch(&format!("/challenges/{id}/solves"), challenge_solves_from)
    }

    pub fn submissions(&self, filter: &SubmissionFilter) -> Result<SubmissionsPage, UpstreamError> {
        self.fetch(&filter.path(), submissions_from)
    }

    pub fn config_value(&self, key: &str) -> Result<Option<String>, UpstreamError> {
        self.fetch(&format!("/configs?key={key}"), config_value_from)
    }

    pub fn ctf_name(&self) -> Result<Option<String>, UpstreamError> {
        self.config_value("ctf_name")
    }

    pub fn ctf_start(&self) -> Result<Option<i64>, UpstreamError> {
        Ok(self.config_value("start")?.and_then(|v| v.parse::<i64>().ok()))
    }

    pub fn ctf_end(&self) -> Result<Option<i64>, UpstreamError> {
        Ok(self.config_value("end")?.and_then(|v| v.parse::<i64>().ok()))
    }

    /// Name and timing. Config reads need an admin token; a rejected read is
    /// reported as "unknown" rather than as a failure.
    pub fn ctf_info(&self) -> Result<CtfInfo, UpstreamError> {
        Ok(CtfInfo {
            name: tolerate_rejection(self.ctf_name())?,
            start: tolerate_rejection(self.ctf_start())?,
            end: tolerate_rejection(self.ctf_end())?,
        })
    }
}

fn tolerate_rejection<T>(result: Result<Option<T>, UpstreamError>) -> Result<Option<T>, UpstreamError> {
    match result {
        Err(UpstreamError::Rejected { .. }) | Err(UpstreamError::Malformed(_)) => Ok(None),
        other => other,
    }
}

fn classify(outcome: Result<RawResponse, String>) -> Result<RawResponse, UpstreamError> {
    let resp = outcome.map_err(UpstreamError::Transport)?;
    if resp.status == 429 {
        return Err(UpstreamError::RateLimited {
            retry_after: resp.retry_after,
        });
    }
    if !resp.is_success() {
        return Err(UpstreamError::Rejected {
            status: resp.status,
            body: truncate(resp.body.trim(), ERROR_BODY_MAX),
        });
    }
    Ok(resp)
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct EnvelopeStatus {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    errors: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

/// Fails with the server's own error text when the envelope says `success: false`.
pub fn check_envelope(raw: &str) -> Result<(), UpstreamError> {
    parse_envelope(raw).map(drop)
}

fn parse_envelope(raw: &str) -> Result<Value, UpstreamError> {
    let body: Value = serde_json::from_str(raw.trim())
        .map_err(|err| UpstreamError::Malformed(format!("invalid json: {err}")))?;
    envelope_status(&body)?;
    Ok(body)
}

fn envelope_status(body: &Value) -> Result<(), UpstreamError> {
    let status = EnvelopeStatus::deserialize(body)
        .map_err(|err| UpstreamError::Malformed(format!("invalid json: {err}")))?;
    if status.success == Some(false) {
        let mut messages = Vec::new();
        if let Some(errors) = &status.errors {
            collect_messages(errors, &mut messages);
        }
        if messages.is_empty() {
            if let Some(message) = status.message {
                messages.push(message);
            }
        }
        let text = if messages.is_empty() {
            "API request failed".to_string()
        } else {
            messages.join(", ")
        };
        return Err(UpstreamError::Malformed(text));
    }
    Ok(())
}

fn collect_messages(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|item| collect_messages(item, out)),
        Value::Object(map) => map.values().for_each(|item| collect_messages(item, out)),
        _ => {}
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    #[serde(default)]
    meta: Option<Meta>,
}

#[derive(Debug, Deserialize)]
struct Meta {
    #[serde(default)]
    pagination: Pagination,
}

/// Body already passed `parse_envelope`.
fn decode<T: DeserializeOwned>(body: Value) -> Result<Envelope<T>, UpstreamError> {
    serde_json::from_value(body)
        .map_err(|err| UpstreamError::Malformed(format!("unexpected payload: {err}")))
}

fn decode_data<T: DeserializeOwned>(body: Value) -> Result<T, UpstreamError> {
    decode::<T>(body)?
        .data
        .ok_or_else(|| UpstreamError::Malformed("response has no data".to_string()))
}

#[derive(Debug, Deserialize)]
struct RawScoreboardEntry {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    account_id: Option<u64>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    score: Option<i64>,
    #[serde(default)]
    account_url: Option<String>,
    #[serde(default)]
    solves: Option<Vec<Solve>>,
}

impl RawScoreboardEntry {
    fn into_entry(self) -> Option<ScoreboardEntry> {
        let id = self.id.or(self.account_id)?;
        let solves = self.solves.unwrap_or_default();
        let score = self
            .score
            .unwrap_or_else(|| solves.iter().map(|s| s.value).sum());
        Some(ScoreboardEntry {
            id,
            name: self.name,
            score,
            account_url: self.account_url,
            solves,
        })
    }
}

/// Top-N summary keyed by rank. Non-numeric rank keys and entries without an
/// id are skipped.
pub fn parse_scoreboard_top_json(raw: &str) -> Result<BTreeMap<u32, ScoreboardEntry>, UpstreamError> {
    scoreboard_top_from(parse_envelope(raw)?)
}

fn scoreboard_top_from(body: Value) -> Result<BTreeMap<u32, ScoreboardEntry>, UpstreamError> {
    let data: BTreeMap<String, RawScoreboardEntry> = decode_data(body)?;
    Ok(data
        .into_iter()
        .filter_map(|(rank, entry)| {
            let rank = rank.trim().parse::<u32>().ok()?;
            Some((rank, entry.into_entry()?))
        })
        .collect())
}

pub fn parse_full_scoreboard_json(raw: &str) -> Result<Vec<ScoreboardEntry>, UpstreamError> {
    full_scoreboard_from(parse_envelope(raw)?)
}

fn full_scoreboard_from(body: Value) -> Result<Vec<ScoreboardEntry>, UpstreamError> {
    let data: Vec<RawScoreboardEntry> = decode_data(body)?;
    Ok(data.into_iter().filter_map(RawScoreboardEntry::into_entry).collect())
}

#[derive(Debug, Deserialize)]
struct RawChallenge {
    id: u64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: Option<i64>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    solves: Option<u32>,
    #[serde(default)]
    solved_by_me: Option<bool>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    max_attempts: Option<u32>,
}

impl From<RawChallenge> for Challenge {
    fn from(raw: RawChallenge) -> Self {
        Challenge {
            id: raw.id,
            name: raw.name,
            value: raw.value.unwrap_or(0),
            category: raw.category.unwrap_or_default(),
            solves: raw.solves.unwrap_or(0),
            solved_by_me: raw.solved_by_me.unwrap_or(false),
            description: raw.description.unwrap_or_default(),
            kind: raw.kind,
            state: raw.state,
            max_attempts: raw.max_attempts,
        }
    }
}

pub fn parse_challenges_json(raw: &str) -> Result<Vec<Challenge>, UpstreamError> {
    challenges_from(parse_envelope(raw)?)
}

fn challenges_from(body: Value) -> Result<Vec<Challenge>, UpstreamError> {
    let data: Vec<RawChallenge> = decode_data(body)?;
    Ok(data.into_iter().map(Challenge::from).collect())
}

pub fn parse_challenge_json(raw: &str) -> Result<Challenge, UpstreamError> {
    challenge_from(parse_envelope(raw)?)
}

fn challenge_from(body: Value) -> Result<Challenge, UpstreamError> {
    let data: RawChallenge = decode_data(body)?;
    Ok(data.into())
}

pub fn parse_challenge_solves_json(raw: &str) -> Result<Vec<ChallengeSolve>, UpstreamError> {
    challenge_solves_from(parse_envelope(raw)?)
}

fn challenge_solves_from(body: Value) -> Result<Vec<ChallengeSolve>, UpstreamError> {
    Ok(decode::<Vec<ChallengeSolve>>(body)?.data.unwrap_or_default())
}

pub fn parse_submissions_json(raw: &str) -> Result<SubmissionsPage, UpstreamError> {
    submissions_from(parse_envelope(raw)?)
}

fn submissions_from(body: Value) -> Result<SubmissionsPage, UpstreamError> {
    let envelope = decode::<Vec<Submission>>(body)?;
    Ok(SubmissionsPage {
        submissions: envelope.data.unwrap_or_default(),
        pagination: envelope.meta.map(|m| m.pagination).unwrap_or_default(),
    })
}

#[derive(Debug, Deserialize)]
struct ConfigItem {
    #[serde(default)]
    value: Option<Value>,
}

pub fn parse_config_value_json(raw: &str) -> Result<Option<String>, UpstreamError> {
    config_value_from(parse_envelope(raw)?)
}

fn config_value_from(body: Value) -> Result<Option<String>, UpstreamError> {
    let items = decode::<Vec<ConfigItem>>(body)?.data.unwrap_or_default();
    Ok(items
        .into_iter()
        .next()
        .and_then(|item| match item.value {
            Some(Value::String(s)) => Some(s.trim().to_string()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
        .filter(|v| !v.is_empty()))
}
