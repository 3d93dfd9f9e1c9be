use std::sync::Arc;

use anyhow::{Context, Result, anyhow};

use ctfd_terminal::backoff::{BackoffPolicy, SystemClock};
use ctfd_terminal::config::DashboardConfig;
use ctfd_terminal::countdown;
use ctfd_terminal::ctfd_fetch::{Connection, CtfdClient, SubmissionFilter};
use ctfd_terminal::fake_feed::{DEMO_BASE_URL, DEMO_TOKEN, DemoCtfd};
use ctfd_terminal::http_client::{HttpTransport, Transport};

/// One-shot connectivity check: prints what the dashboard would show on its
/// first poll, without the terminal UI.
fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");

    let config = DashboardConfig::from_env();
    if !config.is_enabled() {
        return Err(anyhow!(
            "CTFD_URL and CTFD_TOKEN must be set (or CTFD_DEMO=1)"
        ));
    }

    let (connection, transport): (Connection, Arc<dyn Transport>) = if config.demo {
        (
            Connection::new(DEMO_BASE_URL, DEMO_TOKEN),
            Arc::new(DemoCtfd::with_seed(7, 0.0)),
        )
    } else {
        (config.connection.clone(), Arc::new(HttpTransport::new()?))
    };
    let client = CtfdClient::new(
        connection,
        transport,
        Arc::new(SystemClock),
        BackoffPolicy::shared(),
    );

    println!("Server: {}", config.label());

    let info = client.ctf_info().context("ctf info request failed")?;
    let now = chrono::Utc::now().timestamp();
    println!("Event: {}", countdown::window_title(&info, now));
    if let Some((phase, left)) = countdown::remaining(&info, now) {
        println!("Phase: {} ({} left)", countdown::phase_label(phase), left.clock());
    }

    let top = client
        .scoreboard_top(config.top_n)
        .context("scoreboard request failed")?;
    println!("Top {}:", config.top_n);
    for (rank, entry) in &top {
        println!(
            "  {rank:>3}. {:<24} {:>6} pts  {} solves",
            entry.name,
            entry.score,
            entry.solves.len()
        );
    }

    let challenges = client.challenges().context("challenges request failed")?;
    let solved = challenges.iter().filter(|c| c.solves > 0).count();
    println!(
        "Challenges: {} visible, {} solved at least once",
        challenges.len(),
        solved
    );

    let filter = SubmissionFilter {
        per_page: Some(1),
        ..SubmissionFilter::default()
    };
    match client.submissions(&filter) {
        Ok(page) => println!("Submissions: {}", page.pagination.total),
        // Non-admin tokens cannot list submissions.
        Err(err) => println!("Submissions: unavailable ({err})"),
    }

    Ok(())
}
