use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::backoff::{BackoffPolicy, Clock, SystemClock};
use crate::config::{DashboardConfig, clamp_poll_interval};
use crate::ctfd_fetch::{Connection, CtfdClient, SubmissionFilter};
use crate::error::UpstreamError;
use crate::fake_feed::{DEMO_BASE_URL, DEMO_TOKEN, DemoCtfd};
use crate::first_blood::{FirstBloodRoster, FirstBloodTracker, SolveHistory};
use crate::http_client::{HttpTransport, Transport};
use crate::leader::LeaderTracker;
use crate::poller::{PollSpec, Query, QueryKey};
use crate::state::{
    Challenge, ChallengeSolve, CtfInfo, Delta, ProviderCommand, Resource, ScoreboardEntry,
    SubmissionsPage,
};

const LOOP_SLEEP: Duration = Duration::from_millis(250);
const ROSTER_BATCH: usize = 4;

pub fn spawn_provider(
    config: DashboardConfig,
    tx: Sender<Delta>,
    cmd_rx: Receiver<ProviderCommand>,
) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (connection, transport): (Connection, Arc<dyn Transport>) = if config.demo {
        (
            Connection::new(DEMO_BASE_URL, DEMO_TOKEN),
            Arc::new(DemoCtfd::new()),
        )
    } else {
        (config.connection.clone(), Arc::new(HttpTransport::new()?))
    };
    let client = CtfdClient::new(connection, transport, clock.clone(), BackoffPolicy::shared());
    let mut provider = Provider::new(&config, client, clock, tx);

    thread::spawn(move || provider.run(cmd_rx));
    Ok(())
}

struct DetailQueries {
    id: u64,
    detail: Query<Challenge>,
    solves: Query<Vec<ChallengeSolve>>,
}

/// Owns every query and both detectors. Runs on one thread, so fetches and
/// detector passes never overlap.
pub struct Provider {
    client: CtfdClient,
    clock: Arc<dyn Clock>,
    tx: Sender<Delta>,
    enabled: bool,
    poll: Duration,
    top_n: u32,
    scoreboard: Query<BTreeMap<u32, ScoreboardEntry>>,
    full_scoreboard: Query<Vec<ScoreboardEntry>>,
    challenges: Query<Vec<Challenge>>,
    submissions: Query<SubmissionsPage>,
    submission_filter: SubmissionFilter,
    ctf_info: Query<CtfInfo>,
    detail: Option<DetailQueries>,
    first_blood: FirstBloodTracker,
    roster: FirstBloodRoster,
    leader: LeaderTracker,
    penalty_seen: u32,
}

impl Provider {
    pub fn new(
        config: &DashboardConfig,
        client: CtfdClient,
        clock: Arc<dyn Clock>,
        tx: Sender<Delta>,
    ) -> Self {
        let poll = config.poll_interval;
        let enabled = config.is_enabled();
        let submission_filter = SubmissionFilter {
            per_page: Some(config.submissions_per_page),
            page: Some(1),
            ..SubmissionFilter::default()
        };
        let conn = client.connection().clone();
        let key = |resource: &str, params: &str| {
            QueryKey::new(resource, &conn.base_url, &conn.token, params)
        };

        let mut provider = Self {
            scoreboard: Query::new(
                key("scoreboard-top", &config.top_n.to_string()),
                PollSpec::live(poll),
            ),
            full_scoreboard: Query::new(key("full-scoreboard", ""), PollSpec::live(poll)),
            challenges: Query::new(key("challenges", ""), PollSpec::live(poll)),
            submissions: Query::new(
                key("submissions", &submission_filter.query_string()),
                PollSpec::live(poll),
            ),
            ctf_info: Query::new(key("ctf-info", ""), PollSpec::static_info()),
            submission_filter,
            client,
            clock,
            tx,
            enabled,
            poll,
            top_n: config.top_n,
            detail: None,
            first_blood: FirstBloodTracker::new(),
            roster: FirstBloodRoster::new(),
            leader: LeaderTracker::new(),
            penalty_seen: 0,
        };
        provider.set_enabled(enabled);
        if !enabled {
            provider.log("[INFO] Set CTFD_URL and CTFD_TOKEN (or CTFD_DEMO=1) to start polling");
        }
        provider
    }

    pub fn first_blood(&self) -> &FirstBloodTracker {
        &self.first_blood
    }

    pub fn leader(&self) -> &LeaderTracker {
        &self.leader
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.scoreboard.set_enabled(enabled);
        self.full_scoreboard.set_enabled(enabled);
        self.challenges.set_enabled(enabled);
        self.submissions.set_enabled(enabled);
        self.ctf_info.set_enabled(enabled);
    }

    fn send(&self, delta: Delta) {
        let _ = self.tx.send(delta);
    }

    fn log(&self, msg: impl Into<String>) {
        self.send(Delta::Log(msg.into()));
    }

    fn key(&self, resource: &str, params: &str) -> QueryKey {
        let conn = self.client.connection();
        QueryKey::new(resource, &conn.base_url, &conn.token, params)
    }

    pub fn run(&mut self, cmd_rx: Receiver<ProviderCommand>) {
        loop {
            loop {
                match cmd_rx.try_recv() {
                    Ok(cmd) => self.handle(cmd),
                    Err(TryRecvError::Empty) => break,
                    // UI is gone: late results have nowhere to land.
                    Err(TryRecvError::Disconnected) => return,
                }
            }
            self.tick();
            self.clock.sleep(LOOP_SLEEP);
        }
    }

    pub fn handle(&mut self, cmd: ProviderCommand) {
        let now = self.clock.now();
        match cmd {
            ProviderCommand::RefreshAll => {
                self.scoreboard.invalidate();
                self.full_scoreboard.invalidate();
                self.challenges.invalidate();
                self.submissions.invalidate();
                self.ctf_info.invalidate();
                if let Some(detail) = self.detail.as_mut() {
                    detail.detail.invalidate();
                    detail.solves.invalidate();
                }
                if self.enabled {
                    self.log("[INFO] Refresh requested");
                }
            }
            ProviderCommand::RefreshIfStale(resource) => {
                match resource {
                    Resource::Scoreboard => self.scoreboard.refresh_if_stale(now),
                    Resource::FullScoreboard => self.full_scoreboard.refresh_if_stale(now),
                    Resource::Challenges => self.challenges.refresh_if_stale(now),
                    Resource::Submissions => self.submissions.refresh_if_stale(now),
                    Resource::CtfInfo => self.ctf_info.refresh_if_stale(now),
                    Resource::ChallengeDetail(id) => self
                        .open_detail(id)
                        .is_some_and(|d| d.detail.refresh_if_stale(now)),
                    Resource::ChallengeSolves(id) => self
                        .open_detail(id)
                        .is_some_and(|d| d.solves.refresh_if_stale(now)),
                };
            }
            ProviderCommand::OpenChallenge { id } => {
                let mut detail = Query::new(
                    self.key("challenge", &id.to_string()),
                    PollSpec::on_demand(self.poll),
                );
                let mut solves = Query::new(
                    self.key("challenge-solves", &id.to_string()),
                    PollSpec::live(self.poll),
                );
                detail.set_enabled(self.enabled);
                solves.set_enabled(self.enabled);
                self.detail = Some(DetailQueries { id, detail, solves });
            }
            ProviderCommand::CloseChallenge => self.detail = None,
            ProviderCommand::SetSubmissionFilter(filter) => {
                let key = self.key("submissions", &filter.query_string());
                self.submission_filter = filter;
                self.submissions.rekey(key);
                self.submissions.invalidate();
            }
            ProviderCommand::SetPollInterval(interval) => {
                let poll = clamp_poll_interval(interval);
                self.poll = poll;
                self.scoreboard.set_spec(PollSpec::live(poll));
                self.full_scoreboard.set_spec(PollSpec::live(poll));
                self.challenges.set_spec(PollSpec::live(poll));
                self.submissions.set_spec(PollSpec::live(poll));
                if let Some(detail) = self.detail.as_mut() {
                    detail.detail.set_spec(PollSpec::on_demand(poll));
                    detail.solves.set_spec(PollSpec::live(poll));
                }
                self.send(Delta::PollInterval(poll));
                self.log(format!("[INFO] Poll interval set to {}s", poll.as_secs()));
            }
            ProviderCommand::ResetDetectors => {
                self.first_blood.reset();
                self.leader.reset();
                self.log("[INFO] First blood and leader tracking reset");
            }
        }
    }

    /// One pass over every due query.
    pub fn tick(&mut self) {
        if !self.enabled {
            return;
        }

        let ctf_info = poll(&mut self.ctf_info, Resource::CtfInfo, &*self.clock, &self.tx, || {
            self.client.ctf_info()
        });
        if let Some(info) = ctf_info {
            self.send(Delta::SetCtfInfo(info));
        }

        let top_n = self.top_n;
        let top = poll(
            &mut self.scoreboard,
            Resource::Scoreboard,
            &*self.clock,
            &self.tx,
            || self.client.scoreboard_top(top_n),
        );
        if let Some(top) = top {
            let change = self.leader.process(&top);
            self.send(Delta::SetScoreboard(top));
            if let Some(change) = change {
                self.send(Delta::LeaderChanged(change));
            }
        }

        let full = poll(
            &mut self.full_scoreboard,
            Resource::FullScoreboard,
            &*self.clock,
            &self.tx,
            || self.client.full_scoreboard(),
        );
        if let Some(full) = full {
            self.send(Delta::SetFullScoreboard(full));
        }

        let challenges = poll(
            &mut self.challenges,
            Resource::Challenges,
            &*self.clock,
            &self.tx,
            || self.client.challenges(),
        );
        if let Some(challenges) = challenges {
            self.send(Delta::SetChallenges(challenges.clone()));
            self.detect_first_bloods(&challenges);
        }

        let filter = self.submission_filter.clone();
        let submissions = poll(
            &mut self.submissions,
            Resource::Submissions,
            &*self.clock,
            &self.tx,
            || self.client.submissions(&filter),
        );
        if let Some(page) = submissions {
            self.send(Delta::SetSubmissions(page));
        }

        self.tick_detail();
        self.report_penalty();
    }

    fn detect_first_bloods(&mut self, challenges: &[Challenge]) {
        let history = LoggedHistory {
            client: &self.client,
            tx: &self.tx,
        };
        let events = self.first_blood.check_challenges(challenges, &history);
        for event in events {
            self.roster.record(&event);
            self.send(Delta::FirstBlood(event));
        }
        let history = LoggedHistory {
            client: &self.client,
            tx: &self.tx,
        };
        if self.roster.backfill(challenges, &history, ROSTER_BATCH) {
            self.send(Delta::SetFirstBloods(self.roster.owners().clone()));
        }
    }

    fn open_detail(&mut self, id: u64) -> Option<&mut DetailQueries> {
        self.detail.as_mut().filter(|d| d.id == id)
    }

    fn tick_detail(&mut self) {
        let Some(detail) = self.detail.as_mut() else {
            return;
        };
        let id = detail.id;
        let client = &self.client;
        let fetched = poll(
            &mut detail.detail,
            Resource::ChallengeDetail(id),
            &*self.clock,
            &self.tx,
            || client.challenge_by_id(id),
        );
        if let Some(challenge) = fetched {
            let _ = self.tx.send(Delta::SetChallengeDetail {
                id,
                detail: challenge,
            });
        }
        let solves = poll(
            &mut detail.solves,
            Resource::ChallengeSolves(id),
            &*self.clock,
            &self.tx,
            || client.challenge_solves(id),
        );
        if let Some(solves) = solves {
            let _ = self.tx.send(Delta::SetChallengeSolves { id, solves });
        }
    }

    fn report_penalty(&mut self) {
        let (counter, delay) = {
            let guard = match self.client.backoff().lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            (guard.counter(), guard.current_delay(self.clock.now()))
        };
        if counter > self.penalty_seen {
            self.log(format!(
                "[WARN] Rate limited by CTFd; delaying requests {}ms (penalty {counter})",
                delay.as_millis()
            ));
        } else if counter < self.penalty_seen && counter == 0 {
            self.log("[INFO] Rate-limit penalty cleared");
        }
        self.penalty_seen = counter;
    }
}

/// Detector lookups never surface as panel errors; failures only reach the console.
struct LoggedHistory<'a> {
    client: &'a CtfdClient,
    tx: &'a Sender<Delta>,
}

impl SolveHistory for LoggedHistory<'_> {
    fn challenge_solves(&self, challenge_id: u64) -> Result<Vec<ChallengeSolve>, UpstreamError> {
        self.client.challenge_solves(challenge_id).inspect_err(|err| {
            let _ = self.tx.send(Delta::Log(format!(
                "[WARN] solve lookup for challenge {challenge_id} failed: {err}"
            )));
        })
    }
}

/// Runs `fetch` when the query is due and records the outcome on the query.
/// Only a successful value is handed back; errors go to the UI as `FetchFailed`.
fn poll<T, F>(
    query: &mut Query<T>,
    resource: Resource,
    clock: &dyn Clock,
    tx: &Sender<Delta>,
    fetch: F,
) -> Option<T>
where
    T: Clone,
    F: FnOnce() -> Result<T, UpstreamError>,
{
    let now = clock.now();
    if !query.is_due(now) || !query.begin(now) {
        return None;
    }
    let _ = tx.send(Delta::Loading(resource));
    let result = fetch();
    let settled_at: Instant = clock.now();
    match result {
        Ok(data) => {
            query.settle(Ok(data.clone()), settled_at);
            Some(data)
        }
        Err(err) => {
            let error = err.to_string();
            query.settle(Err(error.clone()), settled_at);
            let _ = tx.send(Delta::FetchFailed { resource, error });
            None
        }
    }
}
