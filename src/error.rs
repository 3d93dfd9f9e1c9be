use thiserror::Error;

/// Failure of one logical request against the CTFd API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rate limit exceeded{}", retry_hint(.retry_after))]
    RateLimited { retry_after: Option<String> },
    #[error("CTFd API error: {status} {body}")]
    Rejected { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl UpstreamError {
    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamError::RateLimited { .. } => Some(429),
            UpstreamError::Rejected { status, .. } => Some(*status),
            UpstreamError::Transport(_) | UpstreamError::Malformed(_) => None,
        }
    }

    pub fn retry_after(&self) -> Option<&str> {
        match self {
            UpstreamError::RateLimited { retry_after } => retry_after.as_deref(),
            _ => None,
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, UpstreamError::RateLimited { .. })
    }
}

fn retry_hint(retry_after: &Option<String>) -> String {
    match retry_after {
        Some(secs) => format!(" (try again after {secs} seconds)"),
        None => " (try increasing the poll interval)".to_string(),
    }
}
