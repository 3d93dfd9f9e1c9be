use std::collections::BTreeMap;

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use ctfd_terminal::ctfd_fetch::{
    parse_challenges_json, parse_scoreboard_top_json, parse_submissions_json,
};
use ctfd_terminal::error::UpstreamError;
use ctfd_terminal::first_blood::{FirstBloodTracker, SolveHistory};
use ctfd_terminal::leader::LeaderTracker;
use ctfd_terminal::state::{
    AppState, Challenge, ChallengeSolve, Delta, ScoreboardEntry, apply_delta,
};

struct StaticHistory;

impl SolveHistory for StaticHistory {
    fn challenge_solves(&self, challenge_id: u64) -> Result<Vec<ChallengeSolve>, UpstreamError> {
        Ok(vec![ChallengeSolve {
            account_id: challenge_id % 50,
            name: format!("team-{}", challenge_id % 50),
            date: "2024-05-04T10:00:00Z".to_string(),
            account_url: None,
        }])
    }
}

fn sample_challenges(count: u64) -> Vec<Challenge> {
    (1..=count)
        .map(|id| Challenge {
            id,
            name: format!("Challenge {id}"),
            value: 100 + (id as i64 % 5) * 100,
            category: ["web", "pwn", "crypto", "rev", "misc"][(id % 5) as usize].to_string(),
            solves: (id % 4) as u32,
            solved_by_me: id % 7 == 0,
            description: String::new(),
            kind: None,
            state: None,
            max_attempts: None,
        })
        .collect()
}

fn sample_board(leader: u64, size: u32) -> BTreeMap<u32, ScoreboardEntry> {
    (1..=size)
        .map(|rank| {
            let id = if rank == 1 { leader } else { 1_000 + rank as u64 };
            (
                rank,
                ScoreboardEntry {
                    id,
                    name: format!("team-{id}"),
                    score: 10_000 - rank as i64 * 10,
                    account_url: None,
                    solves: Vec::new(),
                },
            )
        })
        .collect()
}

fn bench_first_blood_pass(c: &mut Criterion) {
    let challenges = sample_challenges(300);
    c.bench_function("first_blood_pass", |b| {
        b.iter(|| {
            let mut tracker = FirstBloodTracker::new();
            let first = tracker.check_challenges(black_box(&challenges), &StaticHistory);
            let second = tracker.check_challenges(black_box(&challenges), &StaticHistory);
            black_box((first.len(), second.len()));
        })
    });
}

fn bench_leader_process(c: &mut Criterion) {
    let boards = [sample_board(1, 50), sample_board(2, 50), sample_board(2, 50)];
    c.bench_function("leader_process", |b| {
        b.iter(|| {
            let mut tracker = LeaderTracker::new();
            let changes = boards
                .iter()
                .filter_map(|board| tracker.process(black_box(board)))
                .count();
            black_box(changes);
        })
    });
}

fn bench_sorted_challenges(c: &mut Criterion) {
    let mut state = AppState::new();
    apply_delta(&mut state, Delta::SetChallenges(sample_challenges(500)));
    c.bench_function("sorted_challenges", |b| {
        b.iter(|| {
            black_box(state.sorted_challenges().len());
        })
    });
}

fn bench_scoreboard_top_parse(c: &mut Criterion) {
    c.bench_function("scoreboard_top_parse", |b| {
        b.iter(|| {
            let top = parse_scoreboard_top_json(black_box(SCOREBOARD_TOP_JSON)).unwrap();
            black_box(top.len());
        })
    });
}

fn bench_challenges_parse(c: &mut Criterion) {
    c.bench_function("challenges_parse", |b| {
        b.iter(|| {
            let rows = parse_challenges_json(black_box(CHALLENGES_JSON)).unwrap();
            black_box(rows.len());
        })
    });
}

fn bench_submissions_parse(c: &mut Criterion) {
    c.bench_function("submissions_parse", |b| {
        b.iter(|| {
            let page = parse_submissions_json(black_box(SUBMISSIONS_JSON)).unwrap();
            black_box(page.submissions.len());
        })
    });
}

criterion_group!(
    perf,
    bench_first_blood_pass,
    bench_leader_process,
    bench_sorted_challenges,
    bench_scoreboard_top_parse,
    bench_challenges_parse,
    bench_submissions_parse
);
criterion_main!(perf);

static SCOREBOARD_TOP_JSON: &str = include_str!("../tests/fixtures/scoreboard_top.json");
static CHALLENGES_JSON: &str = include_str!("../tests/fixtures/challenges.json");
static SUBMISSIONS_JSON: &str = include_str!("../tests/fixtures/submissions.json");
