use std::io::{self, Write};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, SetTitle, disable_raw_mode, enable_raw_mode,
};
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::prelude::*;
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};

use ctfd_terminal::config::DashboardConfig;
use ctfd_terminal::countdown::{self, CtfPhase};
use ctfd_terminal::feed;
use ctfd_terminal::poller::QueryView;
use ctfd_terminal::state::{
    AppState, ChallengeDetailView, CtfInfo, DashboardEvent, Delta, ProviderCommand, Resource,
    Screen, SubmissionKind, TestBanner, apply_delta,
};

const POLL_STEP: Duration = Duration::from_secs(5);

struct App {
    state: AppState,
    should_quit: bool,
    bell: bool,
    cmd_tx: mpsc::Sender<ProviderCommand>,
    title: String,
}

impl App {
    fn new(config: &DashboardConfig, cmd_tx: mpsc::Sender<ProviderCommand>) -> Self {
        let mut state = AppState::new();
        state.configured = config.is_enabled();
        state.demo = config.demo;
        state.connection_label = config.label();
        state.poll_interval = config.poll_interval;
        state.banner_duration = config.banner_duration;
        state.submission_filter.per_page = Some(config.submissions_per_page);
        state.submission_filter.page = Some(1);
        Self {
            state,
            should_quit: false,
            bell: config.bell,
            cmd_tx,
            title: String::new(),
        }
    }

    fn send(&self, cmd: ProviderCommand) {
        let _ = self.cmd_tx.send(cmd);
    }

    fn on_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Char('?') => self.state.help_overlay = !self.state.help_overlay,
            KeyCode::Char('1') => self.switch_screen(Screen::Scoreboard),
            KeyCode::Char('2') => self.switch_screen(Screen::Challenges),
            KeyCode::Char('3') => self.switch_screen(Screen::Submissions),
            KeyCode::Char('j') | KeyCode::Down => self.state.select_next(),
            KeyCode::Char('k') | KeyCode::Up => self.state.select_prev(),
            KeyCode::Enter | KeyCode::Char('d') => self.open_selected_challenge(),
            KeyCode::Char('b') | KeyCode::Esc => self.back(),
            KeyCode::Char('f') if self.state.screen == Screen::Submissions => {
                let filter = self.state.cycled_submission_filter();
                self.state.submission_filter = filter.clone();
                self.state.selected = 0;
                self.send(ProviderCommand::SetSubmissionFilter(filter));
            }
            KeyCode::Char('n') | KeyCode::Char('p') if self.state.screen == Screen::Submissions => {
                let forward = key.code == KeyCode::Char('n');
                if let Some(filter) = self.state.submission_page_step(forward) {
                    self.state.submission_filter = filter.clone();
                    self.state.selected = 0;
                    self.send(ProviderCommand::SetSubmissionFilter(filter));
                }
            }
            KeyCode::Char('r') => self.send(ProviderCommand::RefreshAll),
            KeyCode::Char('+') | KeyCode::Char('=') => {
                let next = self.state.poll_interval + POLL_STEP;
                self.send(ProviderCommand::SetPollInterval(next));
            }
            KeyCode::Char('-') => {
                let next = self.state.poll_interval.saturating_sub(POLL_STEP);
                self.send(ProviderCommand::SetPollInterval(next));
            }
            KeyCode::Char('R') => self.send(ProviderCommand::ResetDetectors),
            KeyCode::Char('F') => self.test_banner(TestBanner::FirstBlood),
            KeyCode::Char('L') => self.test_banner(TestBanner::LeaderChange),
            KeyCode::Char('x') => self.state.dismiss_banner(),
            _ => {}
        }
    }

    fn test_banner(&mut self, kind: TestBanner) {
        self.state.queue_test_banner(kind, Utc::now().to_rfc3339());
    }

    /// Returning to a screen refetches its data when it has gone stale.
    /// Competition info rides along since the header shows it everywhere.
    fn switch_screen(&mut self, screen: Screen) {
        if self.state.screen == screen {
            return;
        }
        self.state.set_screen(screen);
        let resources: &[Resource] = match screen {
            Screen::Scoreboard => &[Resource::Scoreboard, Resource::FullScoreboard],
            Screen::Challenges => &[Resource::Challenges],
            Screen::Submissions => &[Resource::Submissions],
        };
        for resource in resources {
            self.send(ProviderCommand::RefreshIfStale(*resource));
        }
        self.send(ProviderCommand::RefreshIfStale(Resource::CtfInfo));
    }

    fn open_selected_challenge(&mut self) {
        let Some(id) = self.state.selected_challenge().map(|c| c.id) else {
            return;
        };
        self.state.challenge_detail = Some(ChallengeDetailView::new(id));
        self.send(ProviderCommand::OpenChallenge { id });
    }

    fn back(&mut self) {
        if self.state.help_overlay {
            self.state.help_overlay = false;
        } else if self.state.challenge_detail.take().is_some() {
            self.send(ProviderCommand::CloseChallenge);
        } else {
            self.state.dismiss_banner();
        }
    }
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");

    let config = DashboardConfig::from_env();
    let (tx, rx) = mpsc::channel();
    let (cmd_tx, cmd_rx) = mpsc::channel();
    feed::spawn_provider(config.clone(), tx, cmd_rx)?;

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = ratatui::backend::CrosstermBackend::new(stdout);
    let mut terminal = ratatui::Terminal::new(backend)?;

    let mut app = App::new(&config, cmd_tx);
    let res = run_app(&mut terminal, &mut app, rx);

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        eprintln!("error: {err}");
    }
    Ok(())
}

fn run_app<B: Backend + Write>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    rx: mpsc::Receiver<Delta>,
) -> io::Result<()> {
    let tick_rate = Duration::from_millis(250);
    let mut last_tick = Instant::now();

    loop {
        while let Ok(delta) = rx.try_recv() {
            apply_delta(&mut app.state, delta);
        }

        if app.state.tick_banner(Instant::now()) && app.bell {
            terminal.backend_mut().write_all(b"\x07")?;
        }

        let title = countdown::window_title(ctf_info(&app.state), Utc::now().timestamp());
        if title != app.title {
            execute!(terminal.backend_mut(), SetTitle(&title))?;
            app.title = title;
        }

        terminal.draw(|f| ui(f, app))?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.on_key(key);
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            last_tick = Instant::now();
        }

        if app.should_quit {
            return Ok(());
        }
    }
}

fn ctf_info(state: &AppState) -> &CtfInfo {
    static EMPTY: CtfInfo = CtfInfo {
        name: None,
        start: None,
        end: None,
    };
    state.ctf_info.data.as_ref().unwrap_or(&EMPTY)
}

fn ui(frame: &mut Frame, app: &App) {
    let banner_height = if app.state.banner.is_some() { 3 } else { 0 };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(banner_height),
            Constraint::Length(1),
            Constraint::Min(1),
            Constraint::Length(5),
            Constraint::Length(1),
        ])
        .split(frame.size());

    let header = Paragraph::new(header_text(&app.state))
        .block(Block::default().borders(Borders::BOTTOM));
    frame.render_widget(header, chunks[0]);

    if app.state.banner.is_some() {
        render_banner(frame, chunks[1], &app.state);
    }

    let stats = Paragraph::new(stats_text(&app.state)).style(Style::default().fg(Color::Cyan));
    frame.render_widget(stats, chunks[2]);

    if !app.state.configured {
        render_not_configured(frame, chunks[3]);
    } else {
        match app.state.screen {
            Screen::Scoreboard => render_scoreboard(frame, chunks[3], &app.state),
            Screen::Challenges => render_challenges(frame, chunks[3], &app.state),
            Screen::Submissions => render_submissions(frame, chunks[3], &app.state),
        }
    }

    let console = Paragraph::new(console_text(&app.state))
        .block(Block::default().title("Console").borders(Borders::ALL));
    frame.render_widget(console, chunks[4]);

    let footer = Paragraph::new(footer_text(&app.state));
    frame.render_widget(footer, chunks[5]);

    if let Some(view) = app.state.challenge_detail.as_ref() {
        render_challenge_detail(frame, frame.size(), view);
    }

    if app.state.help_overlay {
        render_help_overlay(frame, frame.size());
    }
}

fn header_text(state: &AppState) -> String {
    let info = ctf_info(state);
    let now = Utc::now().timestamp();
    let title = countdown::window_title(info, now);
    let clock = match countdown::remaining(info, now) {
        Some((CtfPhase::Upcoming, left)) => format!("Starts in {}", left.clock()),
        Some((CtfPhase::Live, left)) => format!("Ends in {}", left.clock()),
        Some((CtfPhase::Ended, _)) => "CTF over".to_string(),
        _ => "Timing unknown".to_string(),
    };
    let screen = match state.screen {
        Screen::Scoreboard => "SCOREBOARD",
        Screen::Challenges => "CHALLENGES",
        Screen::Submissions => "SUBMISSIONS",
    };
    let line1 = format!(" [#]  {title} | {screen}");
    let line2 = format!(
        " |_|  {clock} | {} | poll {}s",
        state.connection_label,
        state.poll_interval.as_secs()
    );
    format!("{line1}\n{line2}")
}

fn footer_text(state: &AppState) -> String {
    match state.screen {
        Screen::Scoreboard => {
            "1/2/3 Screens | j/k Move | r Refresh | +/- Poll | R Reset alerts | ? Help | q Quit"
                .to_string()
        }
        Screen::Challenges => {
            "1/2/3 Screens | j/k Move | Enter Details | b/Esc Close | r Refresh | ? Help | q Quit"
                .to_string()
        }
        Screen::Submissions => {
            "1/2/3 Screens | j/k Move | f Filter | n/p Page | r Refresh | ? Help | q Quit"
                .to_string()
        }
    }
}

fn stats_text(state: &AppState) -> String {
    let s = state.stats();
    let left = countdown::remaining(ctf_info(state), Utc::now().timestamp())
        .map(|(_, left)| left.short())
        .unwrap_or_else(|| "-".to_string());
    format!(
        " Entrants {} ({} scoring) | Avg {} | Top {} | Challenges {} (solved {}) | Submissions {} | First bloods {} | Left {}",
        s.total_entrants,
        s.entrants_with_points,
        s.average_score,
        s.top_score,
        s.total_challenges,
        s.solved_by_me,
        s.total_submissions,
        s.total_first_bloods,
        left
    )
}

fn panel_title<T>(label: &str, view: &QueryView<T>) -> String {
    if view.is_loading {
        format!("{label} (updating)")
    } else if view.is_error() {
        format!("{label} (stale: fetch failed)")
    } else {
        label.to_string()
    }
}

fn render_not_configured(frame: &mut Frame, area: Rect) {
    let text = [
        "No CTFd server configured.",
        "",
        "Set CTFD_URL and CTFD_TOKEN (in the environment or .env.local),",
        "or run with CTFD_DEMO=1 for a simulated event.",
    ]
    .join("\n");
    let panel = Paragraph::new(text)
        .style(Style::default().fg(Color::DarkGray))
        .block(Block::default().title("Setup").borders(Borders::ALL));
    frame.render_widget(panel, area);
}

fn render_scoreboard(frame: &mut Frame, area: Rect, state: &AppState) {
    let block = Block::default()
        .title(panel_title("Scoreboard", &state.scoreboard))
        .borders(Borders::ALL);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let sections = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(1)])
        .split(inner);
    let widths = scoreboard_columns();
    render_header_row(
        frame,
        sections[0],
        &widths,
        &["#", "Name", "Score", "Solves", "FB", "Last solve"],
    );

    let entries = state.ranked_entries();
    let list_area = sections[1];
    if entries.is_empty() {
        let text = if state.scoreboard.is_loading {
            "Loading scoreboard..."
        } else {
            "No entries yet"
        };
        render_empty(frame, list_area, text);
        return;
    }

    let (start, end) = visible_range(state.selected, entries.len(), list_area.height as usize);
    for (i, idx) in (start..end).enumerate() {
        let (rank, entry) = entries[idx];
        let row_area = row_rect(list_area, i);
        let style = row_style(idx == state.selected, rank == 1);
        if idx == state.selected {
            frame.render_widget(Block::default().style(style), row_area);
        }
        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(widths)
            .split(row_area);
        let fb = state.first_bloods_for(entry.id);
        let last = entry
            .last_solve()
            .map(format_solve_time)
            .unwrap_or_else(|| "-".to_string());
        render_cell_text(frame, cols[0], &rank.to_string(), style);
        render_cell_text(frame, cols[1], &entry.name, style);
        render_cell_text(frame, cols[2], &entry.score.to_string(), style);
        render_cell_text(frame, cols[3], &entry.solves.len().to_string(), style);
        render_cell_text(
            frame,
            cols[4],
            &if fb > 0 { fb.to_string() } else { "-".to_string() },
            style,
        );
        render_cell_text(frame, cols[5], &last, style);
    }
}

fn render_challenges(frame: &mut Frame, area: Rect, state: &AppState) {
    let block = Block::default()
        .title(panel_title("Challenges", &state.challenges))
        .borders(Borders::ALL);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let sections = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(1)])
        .split(inner);
    let widths = challenge_columns();
    render_header_row(
        frame,
        sections[0],
        &widths,
        &["Category", "Name", "Value", "Solves", "Mine", "First blood"],
    );

    let rows = state.sorted_challenges();
    let list_area = sections[1];
    if rows.is_empty() {
        let text = if state.challenges.is_loading {
            "Loading challenges..."
        } else {
            "No visible challenges"
        };
        render_empty(frame, list_area, text);
        return;
    }

    let (start, end) = visible_range(state.selected, rows.len(), list_area.height as usize);
    for (i, idx) in (start..end).enumerate() {
        let c = rows[idx];
        let row_area = row_rect(list_area, i);
        let style = row_style(idx == state.selected, false);
        if idx == state.selected {
            frame.render_widget(Block::default().style(style), row_area);
        }
        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(widths)
            .split(row_area);
        let first_blood = state
            .first_bloods
            .get(&c.id)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| if c.solves == 0 { "unsolved".to_string() } else { "-".to_string() });
        render_cell_text(frame, cols[0], &c.category, style);
        render_cell_text(frame, cols[1], &c.name, style);
        render_cell_text(frame, cols[2], &c.value.to_string(), style);
        render_cell_text(frame, cols[3], &c.solves.to_string(), style);
        render_cell_text(frame, cols[4], if c.solved_by_me { "yes" } else { "" }, style);
        render_cell_text(frame, cols[5], &first_blood, style);
    }
}

fn render_submissions(frame: &mut Frame, area: Rect, state: &AppState) {
    let filter = match state.submission_filter.kind {
        Some(SubmissionKind::Correct) => "correct",
        Some(SubmissionKind::Incorrect) => "incorrect",
        _ => "all",
    };
    let page = state
        .submissions
        .data
        .as_ref()
        .map(|p| format!("page {}/{}", p.pagination.page, p.pagination.pages.max(1)))
        .unwrap_or_default();
    let label = format!("Submissions [{filter}] {page}");
    let block = Block::default()
        .title(panel_title(&label, &state.submissions))
        .borders(Borders::ALL);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let sections = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(1)])
        .split(inner);
    let widths = submission_columns();
    render_header_row(
        frame,
        sections[0],
        &widths,
        &["Time", "User", "Challenge", "Result", "Provided"],
    );

    let list_area = sections[1];
    let rows = state
        .submissions
        .data
        .as_ref()
        .map(|p| p.submissions.as_slice())
        .unwrap_or(&[]);
    if rows.is_empty() {
        let text = if state.submissions.is_loading {
            "Loading submissions..."
        } else {
            "No submissions yet"
        };
        render_empty(frame, list_area, text);
        return;
    }

    let (start, end) = visible_range(state.selected, rows.len(), list_area.height as usize);
    for (i, idx) in (start..end).enumerate() {
        let sub = &rows[idx];
        let row_area = row_rect(list_area, i);
        let selected = idx == state.selected;
        let style = row_style(selected, false);
        if selected {
            frame.render_widget(Block::default().style(style), row_area);
        }
        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(widths)
            .split(row_area);
        let (result, result_style) = match sub.kind {
            SubmissionKind::Correct => ("correct", style.fg(Color::Green)),
            SubmissionKind::Incorrect => ("incorrect", style.fg(Color::Red)),
            SubmissionKind::Other => ("other", style),
        };
        let user = sub
            .user
            .as_ref()
            .map(|u| u.name.clone())
            .unwrap_or_else(|| "-".to_string());
        render_cell_text(frame, cols[0], &format_solve_time(&sub.date), style);
        render_cell_text(frame, cols[1], &user, style);
        render_cell_text(frame, cols[2], &sub.challenge.name, style);
        render_cell_text(frame, cols[3], result, result_style);
        render_cell_text(frame, cols[4], sub.provided.as_deref().unwrap_or(""), style);
    }
}

fn render_challenge_detail(frame: &mut Frame, area: Rect, view: &ChallengeDetailView) {
    let popup_area = centered_rect(70, 70, area);
    frame.render_widget(Clear, popup_area);

    let mut lines = Vec::new();
    let title = match view.detail.data.as_ref() {
        Some(c) => {
            lines.push(format!("{} | {} pts | {} solves", c.category, c.value, c.solves));
            if let Some(max) = c.max_attempts.filter(|m| *m > 0) {
                lines.push(format!("Max attempts: {max}"));
            }
            lines.push(String::new());
            lines.push(c.description.trim().to_string());
            c.name.clone()
        }
        None if view.detail.is_error() => {
            lines.push(format!(
                "Could not load challenge: {}",
                view.detail.error.as_deref().unwrap_or("unknown error")
            ));
            format!("Challenge #{}", view.id)
        }
        None => {
            lines.push("Loading challenge...".to_string());
            format!("Challenge #{}", view.id)
        }
    };

    lines.push(String::new());
    lines.push("Solves:".to_string());
    match view.solves.data.as_ref() {
        Some(solves) if solves.is_empty() => lines.push("  nobody yet".to_string()),
        Some(solves) => {
            for (idx, solve) in solves.iter().enumerate() {
                let marker = if idx == 0 { " (first blood)" } else { "" };
                lines.push(format!(
                    "  {:>3}. {} {}{marker}",
                    idx + 1,
                    format_solve_time(&solve.date),
                    solve.name
                ));
            }
        }
        None if view.solves.is_error() => lines.push("  failed to load solves".to_string()),
        None => lines.push("  loading...".to_string()),
    }

    let detail = Paragraph::new(lines.join("\n"))
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .title(format!("{title} (b/Esc to close)"))
                .borders(Borders::ALL),
        );
    frame.render_widget(detail, popup_area);
}

fn render_banner(frame: &mut Frame, area: Rect, state: &AppState) {
    let Some(banner) = state.banner.as_ref() else {
        return;
    };
    let (title, text, color) = match &banner.event {
        DashboardEvent::FirstBlood(event) => (
            "FIRST BLOOD",
            format!("{} solved {}", event.solver.name, event.challenge_name),
            Color::Red,
        ),
        DashboardEvent::LeaderChange(change) => (
            "NEW LEADER",
            format!(
                "{} ({}) overtakes {} ({})",
                change.new_leader.name,
                change.new_leader.score,
                change.previous_leader.name,
                change.previous_leader.score
            ),
            Color::Yellow,
        ),
    };
    let queued = if state.events.is_empty() {
        String::new()
    } else {
        format!("  (+{} more)", state.events.len())
    };
    let paragraph = Paragraph::new(format!("{text}{queued}"))
        .style(
            Style::default()
                .fg(Color::Black)
                .bg(color)
                .add_modifier(Modifier::BOLD),
        )
        .block(Block::default().title(title).borders(Borders::ALL));
    frame.render_widget(paragraph, area);
}

fn scoreboard_columns() -> [Constraint; 6] {
    [
        Constraint::Length(5),
        Constraint::Min(20),
        Constraint::Length(8),
        Constraint::Length(7),
        Constraint::Length(4),
        Constraint::Length(12),
    ]
}

fn challenge_columns() -> [Constraint; 6] {
    [
        Constraint::Length(14),
        Constraint::Min(20),
        Constraint::Length(7),
        Constraint::Length(7),
        Constraint::Length(5),
        Constraint::Length(18),
    ]
}

fn submission_columns() -> [Constraint; 5] {
    [
        Constraint::Length(10),
        Constraint::Length(18),
        Constraint::Min(20),
        Constraint::Length(10),
        Constraint::Length(24),
    ]
}

fn render_header_row(frame: &mut Frame, area: Rect, widths: &[Constraint], labels: &[&str]) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints(widths)
        .split(area);
    let style = Style::default().add_modifier(Modifier::BOLD);
    for (col, label) in cols.iter().zip(labels) {
        render_cell_text(frame, *col, label, style);
    }
}

fn render_empty(frame: &mut Frame, area: Rect, text: &str) {
    let empty = Paragraph::new(text).style(Style::default().fg(Color::DarkGray));
    frame.render_widget(empty, area);
}

fn row_rect(list_area: Rect, offset: usize) -> Rect {
    Rect {
        x: list_area.x,
        y: list_area.y + offset as u16,
        width: list_area.width,
        height: 1,
    }
}

fn row_style(selected: bool, highlight: bool) -> Style {
    if selected {
        Style::default().fg(Color::White).bg(Color::DarkGray)
    } else if highlight {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    }
}

fn render_cell_text(frame: &mut Frame, area: Rect, text: &str, style: Style) {
    let text_area = Rect {
        x: area.x,
        y: area.y + (area.height / 2),
        width: area.width,
        height: 1,
    };
    let paragraph = Paragraph::new(text).style(style);
    frame.render_widget(paragraph, text_area);
}

fn visible_range(selected: usize, total: usize, visible: usize) -> (usize, usize) {
    if total == 0 || visible == 0 {
        return (0, 0);
    }
    if total <= visible {
        return (0, total);
    }

    let mut start = selected.saturating_sub(visible / 2);
    if start + visible > total {
        start = total - visible;
    }
    (start, start + visible)
}

/// Local wall-clock time for an ISO-8601 timestamp; the raw text if it does not parse.
fn format_solve_time(raw: &str) -> String {
    match DateTime::parse_from_rfc3339(raw.trim()) {
        Ok(dt) => dt.with_timezone(&Local).format("%H:%M:%S").to_string(),
        Err(_) if raw.is_empty() => "-".to_string(),
        Err(_) => raw.chars().take(19).collect::<String>().replace('T', " "),
    }
}

fn console_text(state: &AppState) -> String {
    if state.logs.is_empty() {
        return "No alerts yet".to_string();
    }
    state
        .logs
        .iter()
        .rev()
        .take(3)
        .cloned()
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_help_overlay(frame: &mut Frame, area: Rect) {
    let popup_area = centered_rect(60, 70, area);
    frame.render_widget(Clear, popup_area);

    let text = [
        "CTFd Terminal - Help",
        "",
        "Global:",
        "  1 / 2 / 3    Scoreboard / Challenges / Submissions",
        "  j/k or ↑/↓   Move",
        "  r            Refresh everything now",
        "  + / -        Poll interval up / down (5s steps)",
        "  R            Reset first blood and leader tracking",
        "  F / L        Show a test first blood / leader banner",
        "  x            Dismiss banner",
        "  ?            Toggle help",
        "  q            Quit",
        "",
        "Challenges:",
        "  Enter / d    Challenge details and solves",
        "  b / Esc      Close details",
        "",
        "Submissions:",
        "  f            Cycle filter (all, correct, incorrect)",
        "  n / p        Next / previous page",
    ]
    .join("\n");

    let help = Paragraph::new(text)
        .block(Block::default().title("Help").borders(Borders::ALL))
        .style(Style::default());
    frame.render_widget(help, popup_area);
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1]);

    horizontal[1]
}
