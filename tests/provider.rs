use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ctfd_terminal::backoff::{BackoffPolicy, Clock};
use ctfd_terminal::config::DashboardConfig;
use ctfd_terminal::ctfd_fetch::{Connection, CtfdClient, SubmissionFilter};
use ctfd_terminal::fake_feed::{DEMO_BASE_URL, DEMO_TOKEN, DemoCtfd};
use ctfd_terminal::feed::Provider;
use ctfd_terminal::state::{
    AppState, Delta, ProviderCommand, Resource, SubmissionKind, apply_delta,
};

struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    fn advance(&self, dur: Duration) {
        *self.offset.lock().unwrap() += dur;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap()
    }

    fn sleep(&self, dur: Duration) {
        self.advance(dur);
    }
}

fn demo_config() -> DashboardConfig {
    DashboardConfig::from_lookup(|key| match key {
        "CTFD_DEMO" => Some("1".to_string()),
        "CTFD_TOP_N" => Some("5".to_string()),
        _ => None,
    })
}

fn demo_provider(config: &DashboardConfig) -> (Provider, Receiver<Delta>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock {
        base: Instant::now(),
        offset: Mutex::new(Duration::ZERO),
    });
    let client = CtfdClient::new(
        Connection::new(DEMO_BASE_URL, DEMO_TOKEN),
        Arc::new(DemoCtfd::with_seed(11, 0.0)),
        clock.clone(),
        BackoffPolicy::shared(),
    );
    let (tx, rx) = mpsc::channel();
    let provider = Provider::new(config, client, clock.clone(), tx);
    (provider, rx, clock)
}

fn drain(rx: &Receiver<Delta>) -> Vec<Delta> {
    rx.try_iter().collect()
}

fn count(deltas: &[Delta], pred: impl Fn(&Delta) -> bool) -> usize {
    deltas.iter().filter(|d| pred(d)).count()
}

#[test]
fn first_tick_loads_every_resource() {
    let config = demo_config();
    let (mut provider, rx, _) = demo_provider(&config);
    provider.tick();
    let deltas = drain(&rx);

    assert_eq!(count(&deltas, |d| matches!(d, Delta::SetCtfInfo(_))), 1);
    assert_eq!(count(&deltas, |d| matches!(d, Delta::SetScoreboard(_))), 1);
    assert_eq!(count(&deltas, |d| matches!(d, Delta::SetFullScoreboard(_))), 1);
    assert_eq!(count(&deltas, |d| matches!(d, Delta::SetChallenges(_))), 1);
    assert_eq!(count(&deltas, |d| matches!(d, Delta::SetSubmissions(_))), 1);
    assert_eq!(count(&deltas, |d| matches!(d, Delta::FetchFailed { .. })), 0);

    let top = deltas.iter().find_map(|d| match d {
        Delta::SetScoreboard(top) => Some(top),
        _ => None,
    });
    assert!(top.is_some_and(|t| t.len() <= 5));

    // Leader baseline is silent.
    assert_eq!(count(&deltas, |d| matches!(d, Delta::LeaderChanged(_))), 0);
    assert!(provider.leader().current().is_some());
}

#[test]
fn nothing_is_refetched_before_the_interval() {
    let config = demo_config();
    let (mut provider, rx, clock) = demo_provider(&config);
    provider.tick();
    drain(&rx);

    clock.advance(Duration::from_secs(5));
    provider.tick();
    assert!(drain(&rx).is_empty());

    clock.advance(config.poll_interval);
    provider.tick();
    let deltas = drain(&rx);
    assert_eq!(count(&deltas, |d| matches!(d, Delta::SetScoreboard(_))), 1);
    // Competition info is static and not yet stale.
    assert_eq!(count(&deltas, |d| matches!(d, Delta::SetCtfInfo(_))), 0);
}

#[test]
fn refresh_all_refetches_immediately() {
    let config = demo_config();
    let (mut provider, rx, _) = demo_provider(&config);
    provider.tick();
    drain(&rx);

    provider.handle(ProviderCommand::RefreshAll);
    provider.tick();
    let deltas = drain(&rx);
    assert_eq!(count(&deltas, |d| matches!(d, Delta::SetScoreboard(_))), 1);
    assert_eq!(count(&deltas, |d| matches!(d, Delta::SetCtfInfo(_))), 1);
}

#[test]
fn opening_a_challenge_fetches_detail_and_solves() {
    let config = demo_config();
    let (mut provider, rx, _) = demo_provider(&config);
    provider.handle(ProviderCommand::OpenChallenge { id: 1 });
    provider.tick();
    let deltas = drain(&rx);
    assert_eq!(
        count(&deltas, |d| matches!(d, Delta::SetChallengeDetail { id: 1, .. })),
        1
    );
    assert_eq!(
        count(&deltas, |d| matches!(d, Delta::SetChallengeSolves { id: 1, .. })),
        1
    );

    provider.handle(ProviderCommand::CloseChallenge);
    provider.handle(ProviderCommand::RefreshAll);
    provider.tick();
    let deltas = drain(&rx);
    assert_eq!(
        count(&deltas, |d| matches!(d, Delta::SetChallengeDetail { .. })),
        0
    );
}

#[test]
fn open_challenge_detail_refetches_only_on_request() {
    let config = demo_config();
    let (mut provider, rx, clock) = demo_provider(&config);
    provider.tick();
    provider.handle(ProviderCommand::OpenChallenge { id: 1 });
    provider.tick();
    let deltas = drain(&rx);
    assert_eq!(
        count(&deltas, |d| matches!(d, Delta::Loading(Resource::ChallengeDetail(1)))),
        1
    );

    clock.advance(config.poll_interval / 2);
    provider.tick();
    assert!(drain(&rx).is_empty());

    // A hint for some other challenge is ignored.
    provider.handle(ProviderCommand::RefreshIfStale(Resource::ChallengeDetail(9)));
    provider.tick();
    assert!(drain(&rx).is_empty());

    provider.handle(ProviderCommand::RefreshIfStale(Resource::ChallengeDetail(1)));
    provider.tick();
    let deltas = drain(&rx);
    assert_eq!(
        count(&deltas, |d| matches!(d, Delta::SetChallengeDetail { id: 1, .. })),
        1
    );
}

#[test]
fn submission_filter_change_refetches() {
    let config = demo_config();
    let (mut provider, rx, _) = demo_provider(&config);
    provider.tick();
    drain(&rx);

    provider.handle(ProviderCommand::SetSubmissionFilter(SubmissionFilter {
        kind: Some(SubmissionKind::Correct),
        per_page: Some(5),
        page: Some(1),
        ..SubmissionFilter::default()
    }));
    provider.tick();
    let page = drain(&rx).into_iter().find_map(|d| match d {
        Delta::SetSubmissions(page) => Some(page),
        _ => None,
    });
    let page = page.expect("submissions refetched");
    assert!(page.submissions.len() <= 5);
    assert!(page.submissions.iter().all(|s| s.kind == SubmissionKind::Correct));
}

#[test]
fn poll_interval_is_clamped_and_reported() {
    let config = demo_config();
    let (mut provider, rx, _) = demo_provider(&config);
    provider.handle(ProviderCommand::SetPollInterval(Duration::from_secs(1)));
    let deltas = drain(&rx);
    assert!(deltas.iter().any(|d| matches!(
        d,
        Delta::PollInterval(interval) if *interval == Duration::from_secs(5)
    )));
}

#[test]
fn unconfigured_provider_stays_idle() {
    let config = DashboardConfig::from_lookup(|_| None);
    let (mut provider, rx, _) = demo_provider(&config);
    provider.tick();
    let deltas = drain(&rx);
    assert!(deltas.iter().all(|d| matches!(d, Delta::Log(_))));
}

#[test]
fn deltas_drive_the_app_state() {
    let config = demo_config();
    let (mut provider, rx, _) = demo_provider(&config);
    provider.tick();

    let mut state = AppState::new();
    for delta in drain(&rx) {
        apply_delta(&mut state, delta);
    }
    assert!(state.scoreboard.data.is_some());
    assert!(!state.challenges.is_loading);
    assert!(state.ctf_info.data.as_ref().and_then(|i| i.name.clone()).is_some());
    assert!(state.stats().total_challenges > 0);

    apply_delta(
        &mut state,
        Delta::FetchFailed {
            resource: Resource::Challenges,
            error: "rate limit exceeded".to_string(),
        },
    );
    assert!(state.challenges.data.is_some());
    assert!(state.challenges.is_error());
}
