//! Offline CTFd stand-in. Implements [`Transport`] so the real accessors,
//! retry/backoff and detectors run unchanged against simulated data.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Value, json};

use crate::http_client::{RawResponse, Transport};

pub const DEMO_BASE_URL: &str = "http://demo.ctfd.local";
pub const DEMO_TOKEN: &str = "demo";
const ME: u64 = 1;
const DEFAULT_RATE_LIMIT_CHANCE: f64 = 0.03;

const TEAMS: [&str; 8] = [
    "null_ptr",
    "0xDEADBEEF",
    "pwnies",
    "segfault squad",
    "rop chain gang",
    "heap hoppers",
    "bit flippers",
    "kernel panic",
];

const CHALLENGES: [(&str, &str, i64); 12] = [
    ("warmup", "sanity check", 50),
    ("web", "cookie monster", 100),
    ("web", "template trouble", 300),
    ("pwn", "baby overflow", 150),
    ("pwn", "heap of trouble", 450),
    ("crypto", "xor marks the spot", 100),
    ("crypto", "lattice party", 500),
    ("rev", "crackme", 200),
    ("rev", "vm in a vm", 400),
    ("forensics", "pcap party", 150),
    ("misc", "jail break", 250),
    ("misc", "qr salad", 100),
];

#[derive(Debug, Clone)]
struct DemoSolve {
    challenge_id: u64,
    team_id: u64,
    at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct DemoSubmission {
    id: u64,
    challenge_id: u64,
    team_id: u64,
    correct: bool,
    provided: String,
    at: DateTime<Utc>,
}

struct DemoWorld {
    rng: StdRng,
    now: DateTime<Utc>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    solves: Vec<DemoSolve>,
    submissions: Vec<DemoSubmission>,
    rate_limit_chance: f64,
}

pub struct DemoCtfd {
    world: Mutex<DemoWorld>,
}

impl DemoCtfd {
    pub fn new() -> Self {
        Self::with_seed(rand::thread_rng().r#gen(), DEFAULT_RATE_LIMIT_CHANCE)
    }

    pub fn with_seed(seed: u64, rate_limit_chance: f64) -> Self {
        let now = Utc::now();
        let mut world = DemoWorld {
            rng: StdRng::seed_from_u64(seed),
            now,
            start: now - ChronoDuration::hours(2),
            end: now + ChronoDuration::hours(22),
            solves: Vec::new(),
            submissions: Vec::new(),
            rate_limit_chance: rate_limit_chance.clamp(0.0, 1.0),
        };
        world.seed_history();
        Self {
            world: Mutex::new(world),
        }
    }

    pub fn route(&self, path: &str) -> RawResponse {
        let mut world = match self.world.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if world.rate_limit_chance > 0.0 {
            let chance = world.rate_limit_chance;
            if world.rng.gen_bool(chance) {
                return RawResponse {
                    status: 429,
                    retry_after: Some("2".to_string()),
                    body: json!({"message": "Too Many Requests"}).to_string(),
                };
            }
        }
        world.route(path)
    }
}

impl Default for DemoCtfd {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for DemoCtfd {
    fn get(&self, url: &str, _token: &str) -> Result<RawResponse, String> {
        let path = url
            .split_once("/api/v1")
            .map(|(_, rest)| rest)
            .ok_or_else(|| format!("unexpected demo url: {url}"))?;
        Ok(self.route(path))
    }
}

impl DemoWorld {
    fn seed_history(&mut self) {
        // A few early solves so the board is not empty; the hard half of the
        // catalog stays unsolved so first bloods show up once polling starts.
        self.now = self.start + ChronoDuration::minutes(5);
        for _ in 0..10 {
            let challenge_id = self.rng.gen_range(1..=6u64);
            let team_id = self.rng.gen_range(1..=TEAMS.len() as u64);
            self.now += ChronoDuration::seconds(self.rng.gen_range(60..600));
            self.submit(challenge_id, team_id, true);
        }
    }

    fn submit(&mut self, challenge_id: u64, team_id: u64, correct: bool) {
        let already = self
            .solves
            .iter()
            .any(|s| s.challenge_id == challenge_id && s.team_id == team_id);
        let correct = correct && !already;
        let id = self.submissions.len() as u64 + 1;
        let provided = if correct {
            format!("flag{{{:08x}}}", self.rng.r#gen::<u32>())
        } else {
            format!("flag{{guess_{}}}", self.rng.gen_range(0..1000))
        };
        self.submissions.push(DemoSubmission {
            id,
            challenge_id,
            team_id,
            correct,
            provided,
            at: self.now,
        });
        if correct {
            self.solves.push(DemoSolve {
                challenge_id,
                team_id,
                at: self.now,
            });
        }
    }

    fn advance(&mut self) {
        self.now = Utc::now().max(self.now + ChronoDuration::seconds(1));
        let attempts = self.rng.gen_range(0..3);
        for _ in 0..attempts {
            let challenge_id = self.rng.gen_range(1..=CHALLENGES.len() as u64);
            let team_id = self.rng.gen_range(1..=TEAMS.len() as u64);
            let (_, _, value) = CHALLENGES[(challenge_id - 1) as usize];
            // Harder challenges fall less often.
            let chance = (120.0 / value as f64).clamp(0.1, 0.9);
            let correct = self.rng.gen_bool(chance);
            self.submit(challenge_id, team_id, correct);
        }
    }

    fn route(&mut self, path: &str) -> RawResponse {
        let (route, query) = path.split_once('?').unwrap_or((path, ""));
        let params = parse_query(query);
        let segments: Vec<&str> = route.trim_matches('/').split('/').collect();
        match segments.as_slice() {
            ["scoreboard", "top", n] => {
                let n = n.parse::<usize>().unwrap_or(10);
                ok(self.top_json(n))
            }
            ["scoreboard"] => ok(self.full_scoreboard_json()),
            ["challenges"] => {
                self.advance();
                ok(self.challenges_json())
            }
            ["challenges", id] => match id.parse::<u64>().ok().and_then(|id| self.challenge_json(id)) {
                Some(data) => ok(data),
                None => not_found(),
            },
            ["challenges", id, "solves"] => match id.parse::<u64>() {
                Ok(id) if challenge_def(id).is_some() => ok(self.solves_json(id)),
                _ => not_found(),
            },
            ["submissions"] => self.submissions_json(&params),
            ["configs"] => ok(self.config_json(params.get("key").map(String::as_str))),
            _ => not_found(),
        }
    }

    fn team_score(&self, team_id: u64) -> i64 {
        self.solves
            .iter()
            .filter(|s| s.team_id == team_id)
            .filter_map(|s| challenge_def(s.challenge_id).map(|(_, _, v)| v))
            .sum()
    }

    /// Team ids by score, earliest last solve first on ties.
    fn standings(&self) -> Vec<(u64, i64)> {
        let mut rows: Vec<(u64, i64, Option<DateTime<Utc>>)> = (1..=TEAMS.len() as u64)
            .map(|id| {
                let last = self
                    .solves
                    .iter()
                    .filter(|s| s.team_id == id)
                    .map(|s| s.at)
                    .max();
                (id, self.team_score(id), last)
            })
            .collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)).then(a.0.cmp(&b.0)));
        rows.into_iter().map(|(id, score, _)| (id, score)).collect()
    }

    fn top_json(&self, n: usize) -> Value {
        let mut data = serde_json::Map::new();
        for (idx, (team_id, score)) in self.standings().into_iter().take(n).enumerate() {
            let solves: Vec<Value> = self
                .solves
                .iter()
                .filter(|s| s.team_id == team_id)
                .map(|s| {
                    json!({
                        "challenge_id": s.challenge_id,
                        "account_id": team_id,
                        "user_id": team_id,
                        "team_id": null,
                        "value": challenge_def(s.challenge_id).map(|(_, _, v)| v).unwrap_or(0),
                        "date": iso(s.at),
                    })
                })
                .collect();
            data.insert(
                (idx + 1).to_string(),
                json!({
                    "id": team_id,
                    "account_url": format!("/users/{team_id}"),
                    "name": team_name(team_id),
                    "score": score,
                    "bracket_id": null,
                    "bracket_name": null,
                    "solves": solves,
                }),
            );
        }
        Value::Object(data)
    }

    fn full_scoreboard_json(&self) -> Value {
        let rows: Vec<Value> = self
            .standings()
            .into_iter()
            .enumerate()
            .map(|(idx, (team_id, score))| {
                json!({
                    "pos": idx + 1,
                    "account_id": team_id,
                    "account_url": format!("/users/{team_id}"),
                    "account_type": "user",
                    "name": team_name(team_id),
                    "score": score,
                })
            })
            .collect();
        Value::Array(rows)
    }

    fn solve_count(&self, challenge_id: u64) -> usize {
        self.solves
            .iter()
            .filter(|s| s.challenge_id == challenge_id)
            .count()
    }

    fn challenge_value(&self, id: u64, with_description: bool) -> Option<Value> {
        let (category, name, value) = challenge_def(id)?;
        let mut data = json!({
            "id": id,
            "type": "standard",
            "name": name,
            "value": value,
            "solves": self.solve_count(id),
            "solved_by_me": self.solves.iter().any(|s| s.challenge_id == id && s.team_id == ME),
            "category": category,
            "state": "visible",
        });
        if with_description {
            data["description"] = Value::String(format!(
                "{name}: a {category} challenge worth {value} points. Flag format is flag{{...}}."
            ));
            data["max_attempts"] = json!(0);
        }
        Some(data)
    }

    fn challenges_json(&self) -> Value {
        Value::Array(
            (1..=CHALLENGES.len() as u64)
                .filter_map(|id| self.challenge_value(id, false))
                .collect(),
        )
    }

    fn challenge_json(&self, id: u64) -> Option<Value> {
        self.challenge_value(id, true)
    }

    fn solves_json(&self, challenge_id: u64) -> Value {
        let mut solves: Vec<&DemoSolve> = self
            .solves
            .iter()
            .filter(|s| s.challenge_id == challenge_id)
            .collect();
        solves.sort_by_key(|s| s.at);
        Value::Array(
            solves
                .into_iter()
                .map(|s| {
                    json!({
                        "account_id": s.team_id,
                        "name": team_name(s.team_id),
                        "date": iso(s.at),
                        "account_url": format!("/users/{}", s.team_id),
                    })
                })
                .collect(),
        )
    }

    fn submissions_json(&self, params: &HashMap<String, String>) -> RawResponse {
        let per_page = params
            .get("per_page")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(20)
            .max(1);
        let page = params
            .get("page")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(1)
            .max(1);
        let kind = params.get("type").map(String::as_str);
        let challenge_filter = params.get("challenge_id").and_then(|v| v.parse::<u64>().ok());
        let user_filter = params.get("user_id").and_then(|v| v.parse::<u64>().ok());

        let rows: Vec<&DemoSubmission> = self
            .submissions
            .iter()
            .rev()
            .filter(|s| match kind {
                Some("correct") => s.correct,
                Some("incorrect") => !s.correct,
                _ => true,
            })
            .filter(|s| challenge_filter.map(|id| s.challenge_id == id).unwrap_or(true))
            .filter(|s| user_filter.map(|id| s.team_id == id).unwrap_or(true))
            .collect();

        let total = rows.len();
        let pages = total.div_ceil(per_page).max(1);
        let data: Vec<Value> = rows
            .into_iter()
            .skip((page - 1) * per_page)
            .take(per_page)
            .map(|s| {
                let (category, name, value) = challenge_def(s.challenge_id).unwrap_or(("", "", 0));
                json!({
                    "id": s.id,
                    "user_id": s.team_id,
                    "user": {"id": s.team_id, "name": team_name(s.team_id)},
                    "team_id": null,
                    "team": null,
                    "challenge_id": s.challenge_id,
                    "challenge": {"id": s.challenge_id, "name": name, "value": value, "category": category},
                    "date": iso(s.at),
                    "provided": s.provided,
                    "type": if s.correct { "correct" } else { "incorrect" },
                    "ip": "127.0.0.1",
                })
            })
            .collect();

        let body = json!({
            "success": true,
            "meta": {"pagination": {
                "page": page,
                "next": if page < pages { Some(page + 1) } else { None },
                "prev": if page > 1 { Some(page - 1) } else { None },
                "pages": pages,
                "per_page": per_page,
                "total": total,
            }},
            "data": data,
        });
        RawResponse::ok(body.to_string())
    }

    fn config_json(&self, key: Option<&str>) -> Value {
        let value = match key {
            Some("ctf_name") => Some("Demo CTF".to_string()),
            Some("start") => Some(self.start.timestamp().to_string()),
            Some("end") => Some(self.end.timestamp().to_string()),
            _ => None,
        };
        match (key, value) {
            (Some(key), Some(value)) => json!([{"id": 1, "key": key, "value": value}]),
            _ => json!([]),
        }
    }
}

fn ok(data: Value) -> RawResponse {
    RawResponse::ok(json!({"success": true, "data": data}).to_string())
}

fn not_found() -> RawResponse {
    RawResponse::status(
        404,
        json!({"message": "The requested URL was not found on the server."}).to_string(),
    )
}

fn challenge_def(id: u64) -> Option<(&'static str, &'static str, i64)> {
    let idx = usize::try_from(id).ok()?.checked_sub(1)?;
    CHALLENGES.get(idx).copied()
}

fn team_name(id: u64) -> &'static str {
    usize::try_from(id)
        .ok()
        .and_then(|id| id.checked_sub(1))
        .and_then(|idx| TEAMS.get(idx))
        .copied()
        .unwrap_or("unknown")
}

fn iso(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::DemoCtfd;
    use crate::ctfd_fetch::{
        parse_challenge_solves_json, parse_challenges_json, parse_config_value_json,
        parse_scoreboard_top_json, parse_submissions_json,
    };

    #[test]
    fn demo_top_scoreboard_is_rank_ordered() {
        let demo = DemoCtfd::with_seed(7, 0.0);
        let resp = demo.route("/scoreboard/top/5");
        assert_eq!(resp.status, 200);
        let top = parse_scoreboard_top_json(&resp.body).expect("demo json parses");
        assert_eq!(top.len(), 5);
        let scores: Vec<i64> = top.values().map(|e| e.score).collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn demo_solves_are_oldest_first() {
        let demo = DemoCtfd::with_seed(11, 0.0);
        let challenges = parse_challenges_json(&demo.route("/challenges").body).expect("parses");
        let solved: Vec<_> = challenges.iter().filter(|c| c.solves > 0).collect();
        assert!(!solved.is_empty(), "seeded history has at least one solve");
        for challenge in solved {
            let path = format!("/challenges/{}/solves", challenge.id);
            let solves = parse_challenge_solves_json(&demo.route(&path).body).expect("parses");
            assert_eq!(solves.len() as u32, challenge.solves);
            assert!(solves.windows(2).all(|w| w[0].date <= w[1].date));
        }
    }

    #[test]
    fn demo_submission_pages_respect_per_page() {
        let demo = DemoCtfd::with_seed(3, 0.0);
        let page = parse_submissions_json(&demo.route("/submissions?per_page=3&page=1").body)
            .expect("parses");
        assert!(page.submissions.len() <= 3);
        assert_eq!(page.pagination.per_page, 3);
        assert_eq!(page.pagination.prev, None);
    }

    #[test]
    fn demo_unknown_route_is_404() {
        let demo = DemoCtfd::with_seed(1, 0.0);
        assert_eq!(demo.route("/teams").status, 404);
        assert_eq!(demo.route("/challenges/999").status, 404);
    }

    #[test]
    fn demo_config_serves_name() {
        let demo = DemoCtfd::with_seed(1, 0.0);
        let name = parse_config_value_json(&demo.route("/configs?key=ctf_name").body)
            .expect("parses");
        assert_eq!(name.as_deref(), Some("Demo CTF"));
    }
}
