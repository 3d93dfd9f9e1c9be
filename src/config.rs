use std::env;
use std::time::Duration;

use crate::ctfd_fetch::{Connection, DEFAULT_TOP_N};

const DEFAULT_POLL_SECS: u64 = 30;
const DEFAULT_PER_PAGE: u32 = 20;
const DEFAULT_BANNER_SECS: u64 = 6;
pub const MIN_POLL_SECS: u64 = 5;
pub const MAX_POLL_SECS: u64 = 3600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardConfig {
    pub connection: Connection,
    pub poll_interval: Duration,
    pub top_n: u32,
    pub submissions_per_page: u32,
    pub demo: bool,
    pub banner_duration: Duration,
    pub bell: bool,
}

impl DashboardConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let number = |key: &str| text(key).and_then(|v| v.parse::<u64>().ok());

        let base_url = text("CTFD_URL").unwrap_or_default();
        let token = text("CTFD_TOKEN").unwrap_or_default();
        let poll_secs = number("CTFD_POLL_SECS")
            .unwrap_or(DEFAULT_POLL_SECS)
            .clamp(MIN_POLL_SECS, MAX_POLL_SECS);
        let top_n = number("CTFD_TOP_N")
            .map(|v| v as u32)
            .unwrap_or(DEFAULT_TOP_N)
            .clamp(1, 50);
        let submissions_per_page = number("CTFD_SUBMISSIONS_PER_PAGE")
            .map(|v| v as u32)
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, 100);
        let banner_secs = number("CTFD_BANNER_SECS")
            .unwrap_or(DEFAULT_BANNER_SECS)
            .clamp(1, 60);

        Self {
            connection: Connection::new(&base_url, &token),
            poll_interval: Duration::from_secs(poll_secs),
            top_n,
            submissions_per_page,
            demo: env_bool(text("CTFD_DEMO"), false),
            banner_duration: Duration::from_secs(banner_secs),
            bell: env_bool(text("CTFD_BELL"), true),
        }
    }

    /// Queries only run against a real server with both URL and token, or in demo mode.
    pub fn is_enabled(&self) -> bool {
        self.demo || self.connection.is_configured()
    }

    pub fn label(&self) -> String {
        if self.demo {
            "demo".to_string()
        } else if self.connection.is_configured() {
            self.connection.base_url.clone()
        } else {
            "not configured".to_string()
        }
    }
}

pub fn clamp_poll_interval(interval: Duration) -> Duration {
    Duration::from_secs(interval.as_secs().clamp(MIN_POLL_SECS, MAX_POLL_SECS))
}

fn env_bool(raw: Option<String>, default: bool) -> bool {
    match raw.map(|v| v.to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        _ => default,
    }
}
