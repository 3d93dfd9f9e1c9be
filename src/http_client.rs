use std::time::Duration;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER, USER_AGENT};

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

static CLIENT: OnceCell<Client> = OnceCell::new();

/// Shared blocking client. Only the connect phase is bounded; slow responses
/// are left to the retry/backoff layer.
pub fn http_client() -> Result<&'static Client> {
    CLIENT.get_or_try_init(|| {
        let connect_secs = std::env::var("CTFD_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS)
            .clamp(1, 120);
        Client::builder()
            .connect_timeout(Duration::from_secs(connect_secs))
            .timeout(None)
            .build()
            .context("failed to build http client")
    })
}

/// Status, body and the one header the retry layer cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub retry_after: Option<String>,
    pub body: String,
}

impl RawResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            retry_after: None,
            body: body.into(),
        }
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One HTTP GET. `Err` means the request never produced a response.
pub trait Transport: Send + Sync {
    fn get(&self, url: &str, token: &str) -> std::result::Result<RawResponse, String>;
}

pub struct HttpTransport {
    client: &'static Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: http_client()?,
        })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str, token: &str) -> std::result::Result<RawResponse, String> {
        let resp = self
            .client
            .get(url)
            .header(USER_AGENT, "ctfd_terminal")
            .header(AUTHORIZATION, format!("Token {token}"))
            .header(CONTENT_TYPE, "application/json")
            .send()
            .map_err(|err| err.to_string())?;
        let status = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string());
        let body = resp.text().map_err(|err| err.to_string())?;
        Ok(RawResponse {
            status,
            retry_after,
            body,
        })
    }
}
