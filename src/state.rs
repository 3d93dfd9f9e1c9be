use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::ctfd_fetch::SubmissionFilter;
use crate::first_blood::FirstBloodEvent;
use crate::leader::{LeaderChange, LeaderSnapshot};
use crate::poller::QueryView;

pub const MAX_LOGS: usize = 200;
const DEFAULT_BANNER_SECS: u64 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Scoreboard,
    Challenges,
    Submissions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Scoreboard,
    FullScoreboard,
    Challenges,
    Submissions,
    /// Detail and solver list of one challenge, by id.
    ChallengeDetail(u64),
    ChallengeSolves(u64),
    CtfInfo,
}

impl Resource {
    pub fn label(self) -> &'static str {
        match self {
            Resource::Scoreboard => "scoreboard",
            Resource::FullScoreboard => "full scoreboard",
            Resource::Challenges => "challenges",
            Resource::Submissions => "submissions",
            Resource::ChallengeDetail(_) => "challenge detail",
            Resource::ChallengeSolves(_) => "challenge solves",
            Resource::CtfInfo => "ctf info",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solve {
    pub challenge_id: u64,
    #[serde(default)]
    pub account_id: Option<u64>,
    #[serde(default)]
    pub user_id: Option<u64>,
    #[serde(default)]
    pub team_id: Option<u64>,
    #[serde(default)]
    pub value: i64,
    #[serde(default)]
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreboardEntry {
    pub id: u64,
    pub name: String,
    pub score: i64,
    #[serde(default)]
    pub account_url: Option<String>,
    #[serde(default)]
    pub solves: Vec<Solve>,
}

impl ScoreboardEntry {
    /// Most recent solve timestamp, compared as ISO-8601 text.
    pub fn last_solve(&self) -> Option<&str> {
        self.solves.iter().map(|s| s.date.as_str()).max()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: u64,
    pub name: String,
    pub value: i64,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub solves: u32,
    #[serde(default)]
    pub solved_by_me: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeSolve {
    pub account_id: u64,
    pub name: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub account_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionKind {
    Correct,
    Incorrect,
    #[serde(other)]
    Other,
}

impl SubmissionKind {
    pub fn as_query(self) -> Option<&'static str> {
        match self {
            SubmissionKind::Correct => Some("correct"),
            SubmissionKind::Incorrect => Some("incorrect"),
            SubmissionKind::Other => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionUser {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionChallenge {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub value: i64,
    #[serde(default)]
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: u64,
    #[serde(default)]
    pub user: Option<SubmissionUser>,
    #[serde(default)]
    pub team_id: Option<u64>,
    pub challenge: SubmissionChallenge,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub provided: Option<String>,
    #[serde(rename = "type")]
    pub kind: SubmissionKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub next: Option<u32>,
    #[serde(default)]
    pub prev: Option<u32>,
    #[serde(default)]
    pub pages: u32,
    #[serde(default)]
    pub per_page: u32,
    #[serde(default)]
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubmissionsPage {
    pub submissions: Vec<Submission>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CtfInfo {
    pub name: Option<String>,
    pub start: Option<i64>,
    pub end: Option<i64>,
}

/// One-shot notice for the banner queue.
#[derive(Debug, Clone, PartialEq)]
pub enum DashboardEvent {
    FirstBlood(FirstBloodEvent),
    LeaderChange(LeaderChange),
}

#[derive(Debug, Clone)]
pub struct ActiveBanner {
    pub event: DashboardEvent,
    pub shown_at: Instant,
}

#[derive(Debug, Clone)]
pub struct ChallengeDetailView {
    pub id: u64,
    pub detail: QueryView<Challenge>,
    pub solves: QueryView<Vec<ChallengeSolve>>,
}

impl ChallengeDetailView {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            detail: QueryView::default(),
            solves: QueryView::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DashboardStats {
    pub total_entrants: usize,
    pub entrants_with_points: usize,
    pub average_score: i64,
    pub top_score: i64,
    pub total_challenges: usize,
    pub solved_by_me: usize,
    pub total_submissions: u64,
    pub total_first_bloods: usize,
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub screen: Screen,
    pub selected: usize,
    pub configured: bool,
    pub demo: bool,
    pub connection_label: String,
    pub poll_interval: Duration,
    pub scoreboard: QueryView<BTreeMap<u32, ScoreboardEntry>>,
    pub full_scoreboard: QueryView<Vec<ScoreboardEntry>>,
    pub challenges: QueryView<Vec<Challenge>>,
    pub submissions: QueryView<SubmissionsPage>,
    pub submission_filter: SubmissionFilter,
    pub ctf_info: QueryView<CtfInfo>,
    pub challenge_detail: Option<ChallengeDetailView>,
    pub first_bloods: HashMap<u64, ChallengeSolve>,
    pub events: VecDeque<DashboardEvent>,
    pub banner: Option<ActiveBanner>,
    pub banner_duration: Duration,
    pub logs: VecDeque<String>,
    pub help_overlay: bool,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    pub fn new() -> Self {
        Self {
            screen: Screen::Scoreboard,
            selected: 0,
            configured: false,
            demo: false,
            connection_label: String::new(),
            poll_interval: Duration::from_secs(30),
            scoreboard: QueryView::default(),
            full_scoreboard: QueryView::default(),
            challenges: QueryView::default(),
            submissions: QueryView::default(),
            submission_filter: SubmissionFilter::default(),
            ctf_info: QueryView::default(),
            challenge_detail: None,
            first_bloods: HashMap::with_capacity(64),
            events: VecDeque::with_capacity(8),
            banner: None,
            banner_duration: Duration::from_secs(DEFAULT_BANNER_SECS),
            logs: VecDeque::with_capacity(MAX_LOGS),
            help_overlay: false,
        }
    }

    pub fn push_log(&mut self, msg: impl Into<String>) {
        self.logs.push_back(msg.into());
        while self.logs.len() > MAX_LOGS {
            self.logs.pop_front();
        }
    }

    pub fn set_screen(&mut self, screen: Screen) {
        if self.screen != screen {
            self.screen = screen;
            self.selected = 0;
        }
    }

    pub fn row_count(&self) -> usize {
        match self.screen {
            Screen::Scoreboard => self.ranked_entries().len(),
            Screen::Challenges => self.challenges.data.as_ref().map(Vec::len).unwrap_or(0),
            Screen::Submissions => self
                .submissions
                .data
                .as_ref()
                .map(|p| p.submissions.len())
                .unwrap_or(0),
        }
    }

    pub fn select_next(&mut self) {
        let len = self.row_count();
        if len == 0 {
            self.selected = 0;
            return;
        }
        self.selected = (self.selected + 1).min(len - 1);
    }

    pub fn select_prev(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    pub fn clamp_selection(&mut self) {
        let len = self.row_count();
        if len == 0 {
            self.selected = 0;
        } else if self.selected >= len {
            self.selected = len - 1;
        }
    }

    /// Full scoreboard when available, otherwise the top-N summary in rank order.
    pub fn ranked_entries(&self) -> Vec<(u32, &ScoreboardEntry)> {
        if let Some(full) = self.full_scoreboard.data.as_ref() {
            if !full.is_empty() {
                return full
                    .iter()
                    .enumerate()
                    .map(|(idx, entry)| (idx as u32 + 1, entry))
                    .collect();
            }
        }
        self.scoreboard
            .data
            .as_ref()
            .map(|top| top.iter().map(|(rank, entry)| (*rank, entry)).collect())
            .unwrap_or_default()
    }

    /// Challenges grouped by category, cheapest first within a category.
    pub fn sorted_challenges(&self) -> Vec<&Challenge> {
        let mut rows: Vec<&Challenge> = self
            .challenges
            .data
            .as_ref()
            .map(|list| list.iter().collect())
            .unwrap_or_default();
        rows.sort_by(|a, b| {
            a.category
                .to_ascii_lowercase()
                .cmp(&b.category.to_ascii_lowercase())
                .then(a.value.cmp(&b.value))
                .then(a.name.cmp(&b.name))
        });
        rows
    }

    pub fn selected_challenge(&self) -> Option<&Challenge> {
        if self.screen != Screen::Challenges {
            return None;
        }
        self.sorted_challenges().get(self.selected).copied()
    }

    pub fn first_bloods_for(&self, account_id: u64) -> usize {
        self.first_bloods
            .values()
            .filter(|solve| solve.account_id == account_id)
            .count()
    }

    pub fn stats(&self) -> DashboardStats {
        let entries = self.ranked_entries();
        let total_entrants = entries.len();
        let entrants_with_points = entries.iter().filter(|(_, e)| e.score > 0).count();
        let sum: i64 = entries.iter().map(|(_, e)| e.score).sum();
        let average_score = if total_entrants > 0 {
            (sum as f64 / total_entrants as f64).round() as i64
        } else {
            0
        };
        let top_score = entries.iter().map(|(_, e)| e.score).max().unwrap_or(0);
        let challenges = self.challenges.data.as_deref().unwrap_or(&[]);
        DashboardStats {
            total_entrants,
            entrants_with_points,
            average_score,
            top_score,
            total_challenges: challenges.len(),
            solved_by_me: challenges.iter().filter(|c| c.solved_by_me).count(),
            total_submissions: self
                .submissions
                .data
                .as_ref()
                .map(|p| p.pagination.total)
                .unwrap_or(0),
            total_first_bloods: self.first_bloods.len(),
        }
    }

    /// Next submission filter in the all -> correct -> incorrect cycle, starting from page 1.
    pub fn cycled_submission_filter(&self) -> SubmissionFilter {
        let kind = match self.submission_filter.kind {
            None => Some(SubmissionKind::Correct),
            Some(SubmissionKind::Correct) => Some(SubmissionKind::Incorrect),
            Some(_) => None,
        };
        SubmissionFilter {
            kind,
            page: Some(1),
            ..self.submission_filter.clone()
        }
    }

    pub fn submission_page_step(&self, forward: bool) -> Option<SubmissionFilter> {
        let pagination = self.submissions.data.as_ref()?.pagination;
        let target = if forward {
            pagination.next?
        } else {
            pagination.prev?
        };
        Some(SubmissionFilter {
            page: Some(target),
            ..self.submission_filter.clone()
        })
    }

    pub fn push_event(&mut self, event: DashboardEvent) {
        self.events.push_back(event);
    }

    /// Expires the current banner and promotes the next queued event.
    /// Returns true when a new banner became visible.
    pub fn tick_banner(&mut self, now: Instant) -> bool {
        if let Some(active) = &self.banner {
            if now.saturating_duration_since(active.shown_at) < self.banner_duration {
                return false;
            }
            self.banner = None;
        }
        match self.events.pop_front() {
            Some(event) => {
                self.banner = Some(ActiveBanner {
                    event,
                    shown_at: now,
                });
                true
            }
            None => false,
        }
    }

    pub fn dismiss_banner(&mut self) {
        self.banner = None;
    }

    /// The detail view, only while it still shows challenge `id`.
    pub fn open_detail(&mut self, id: u64) -> Option<&mut ChallengeDetailView> {
        self.challenge_detail.as_mut().filter(|view| view.id == id)
    }

    /// Queues a made-up banner so the alert path can be checked without a
    /// live event. Neither the roster nor the console is touched.
    pub fn queue_test_banner(&mut self, kind: TestBanner, date: String) {
        let event = match kind {
            TestBanner::FirstBlood => DashboardEvent::FirstBlood(FirstBloodEvent {
                challenge_id: 0,
                challenge_name: "Super Hard Challenge".to_string(),
                solver: ChallengeSolve {
                    account_id: 1234,
                    name: "TestUser".to_string(),
                    date,
                    account_url: Some("/users/1234".to_string()),
                },
            }),
            TestBanner::LeaderChange => DashboardEvent::LeaderChange(LeaderChange {
                previous_leader: LeaderSnapshot {
                    id: 1,
                    name: "OldChampion".to_string(),
                    score: 4850,
                },
                new_leader: LeaderSnapshot {
                    id: 2,
                    name: "NewChampion".to_string(),
                    score: 5200,
                },
            }),
        };
        self.push_event(event);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestBanner {
    FirstBlood,
    LeaderChange,
}

#[derive(Debug, Clone)]
pub enum Delta {
    Loading(Resource),
    SetScoreboard(BTreeMap<u32, ScoreboardEntry>),
    SetFullScoreboard(Vec<ScoreboardEntry>),
    SetChallenges(Vec<Challenge>),
    SetSubmissions(SubmissionsPage),
    SetChallengeDetail { id: u64, detail: Challenge },
    SetChallengeSolves { id: u64, solves: Vec<ChallengeSolve> },
    SetCtfInfo(CtfInfo),
    SetFirstBloods(HashMap<u64, ChallengeSolve>),
    FetchFailed { resource: Resource, error: String },
    FirstBlood(FirstBloodEvent),
    LeaderChanged(LeaderChange),
    PollInterval(Duration),
    Log(String),
}

#[derive(Debug, Clone)]
pub enum ProviderCommand {
    RefreshAll,
    RefreshIfStale(Resource),
    OpenChallenge { id: u64 },
    CloseChallenge,
    SetSubmissionFilter(SubmissionFilter),
    SetPollInterval(Duration),
    ResetDetectors,
}

pub fn apply_delta(state: &mut AppState, delta: Delta) {
    let now = Instant::now();
    match delta {
        Delta::Loading(resource) => match resource {
            Resource::Scoreboard => state.scoreboard.mark_loading(),
            Resource::FullScoreboard => state.full_scoreboard.mark_loading(),
            Resource::Challenges => state.challenges.mark_loading(),
            Resource::Submissions => state.submissions.mark_loading(),
            Resource::CtfInfo => state.ctf_info.mark_loading(),
            Resource::ChallengeDetail(id) => {
                if let Some(view) = state.open_detail(id) {
                    view.detail.mark_loading();
                }
            }
            Resource::ChallengeSolves(id) => {
                if let Some(view) = state.open_detail(id) {
                    view.solves.mark_loading();
                }
            }
        },
        Delta::SetScoreboard(top) => {
            state.scoreboard.resolve(top, now);
            state.clamp_selection();
        }
        Delta::SetFullScoreboard(entries) => {
            state.full_scoreboard.resolve(entries, now);
            state.clamp_selection();
        }
        Delta::SetChallenges(challenges) => {
            state.challenges.resolve(challenges, now);
            state.clamp_selection();
        }
        Delta::SetSubmissions(page) => {
            state.submissions.resolve(page, now);
            state.clamp_selection();
        }
        Delta::SetChallengeDetail { id, detail } => {
            if let Some(view) = state.open_detail(id) {
                view.detail.resolve(detail, now);
            }
        }
        Delta::SetChallengeSolves { id, solves } => {
            if let Some(view) = state.open_detail(id) {
                view.solves.resolve(solves, now);
            }
        }
        Delta::SetCtfInfo(info) => state.ctf_info.resolve(info, now),
        Delta::SetFirstBloods(roster) => state.first_bloods = roster,
        Delta::FetchFailed { resource, error } => {
            state.push_log(format!("[WARN] {} fetch error: {error}", resource.label()));
            match resource {
                Resource::Scoreboard => state.scoreboard.fail(error),
                Resource::FullScoreboard => state.full_scoreboard.fail(error),
                Resource::Challenges => state.challenges.fail(error),
                Resource::Submissions => state.submissions.fail(error),
                Resource::CtfInfo => state.ctf_info.fail(error),
                Resource::ChallengeDetail(id) => {
                    if let Some(view) = state.open_detail(id) {
                        view.detail.fail(error);
                    }
                }
                Resource::ChallengeSolves(id) => {
                    if let Some(view) = state.open_detail(id) {
                        view.solves.fail(error);
                    }
                }
            }
        }
        Delta::FirstBlood(event) => {
            state.push_log(format!(
                "[ALERT] First blood: {} solved {}",
                event.solver.name, event.challenge_name
            ));
            state
                .first_bloods
                .insert(event.challenge_id, event.solver.clone());
            state.push_event(DashboardEvent::FirstBlood(event));
        }
        Delta::LeaderChanged(change) => {
            state.push_log(format!(
                "[ALERT] New leader: {} ({}) overtakes {} ({})",
                change.new_leader.name,
                change.new_leader.score,
                change.previous_leader.name,
                change.previous_leader.score
            ));
            state.push_event(DashboardEvent::LeaderChange(change));
        }
        Delta::PollInterval(interval) => state.poll_interval = interval,
        Delta::Log(msg) => state.push_log(msg),
    }
}
