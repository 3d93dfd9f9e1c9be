use crate::state::CtfInfo;

const DEFAULT_TITLE: &str = "CTFd Scoreboard";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtfPhase {
    Upcoming,
    Live,
    Ended,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeRemaining {
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
    pub total_secs: i64,
}

impl TimeRemaining {
    pub fn until(target: i64, now: i64) -> Self {
        let total = target - now;
        if total <= 0 {
            return Self::default();
        }
        Self {
            days: total / 86_400,
            hours: (total % 86_400) / 3_600,
            minutes: (total % 3_600) / 60,
            seconds: total % 60,
            total_secs: total,
        }
    }

    /// `2d 03:04:05`, or `03:04:05` under a day.
    pub fn clock(&self) -> String {
        if self.days > 0 {
            format!(
                "{}d {:02}:{:02}:{:02}",
                self.days, self.hours, self.minutes, self.seconds
            )
        } else {
            format!("{:02}:{:02}:{:02}", self.hours, self.minutes, self.seconds)
        }
    }

    /// Coarse form for the stats strip: `2d 3h`, `3h 4m` or `4m`.
    pub fn short(&self) -> String {
        if self.total_secs <= 0 {
            "Ended".to_string()
        } else if self.days > 0 {
            format!("{}d {}h", self.days, self.hours)
        } else if self.hours > 0 {
            format!("{}h {}m", self.hours, self.minutes)
        } else {
            format!("{}m", self.minutes)
        }
    }
}

pub fn phase(start: Option<i64>, end: Option<i64>, now: i64) -> CtfPhase {
    let (Some(start), Some(end)) = (start, end) else {
        return CtfPhase::Unknown;
    };
    if now < start {
        CtfPhase::Upcoming
    } else if now < end {
        CtfPhase::Live
    } else {
        CtfPhase::Ended
    }
}

/// Countdown to the start while upcoming, to the end while live.
pub fn remaining(info: &CtfInfo, now: i64) -> Option<(CtfPhase, TimeRemaining)> {
    match phase(info.start, info.end, now) {
        CtfPhase::Upcoming => Some((
            CtfPhase::Upcoming,
            TimeRemaining::until(info.start?, now),
        )),
        CtfPhase::Live => Some((CtfPhase::Live, TimeRemaining::until(info.end?, now))),
        CtfPhase::Ended => Some((CtfPhase::Ended, TimeRemaining::default())),
        CtfPhase::Unknown => None,
    }
}

pub fn phase_label(phase: CtfPhase) -> &'static str {
    match phase {
        CtfPhase::Upcoming => "Upcoming",
        CtfPhase::Live => "Live",
        CtfPhase::Ended => "Ended",
        CtfPhase::Unknown => "Unknown",
    }
}

pub fn window_title(info: &CtfInfo, now: i64) -> String {
    let name = info
        .name
        .as_deref()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or(DEFAULT_TITLE);
    match phase(info.start, info.end, now) {
        CtfPhase::Unknown => name.to_string(),
        known => format!("[{}] {name}", phase_label(known)),
    }
}
