//! Probe module for site monitoring.
//!
//! A probe is a single bounded-time HTTP check. Probes never fail from the
//! caller's point of view: every failure is folded into a down [`ProbeResult`].

mod http;

pub use http::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Why a probe counted as down.
///
/// The display strings are what ends up in `pings.error`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("Request timeout ({})", format_timeout(.0))]
    Timeout(Duration),
    #[error("DNS resolution failed")]
    Dns,
    #[error("Connection refused")]
    ConnectionRefused,
    #[error("Network error")]
    Network,
    #[error("HTTP {0}")]
    Status(u16),
    #[error("{0}")]
    Other(String),
}

impl ProbeError {
    /// Wrap an arbitrary error message, falling back to "Unknown error".
    pub fn other(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.trim().is_empty() {
            ProbeError::Other("Unknown error".to_string())
        } else {
            ProbeError::Other(message)
        }
    }
}

fn format_timeout(timeout: &Duration) -> String {
    if timeout.subsec_millis() == 0 {
        format!("{}s", timeout.as_secs())
    } else {
        format!("{}ms", timeout.as_millis())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Up,
    Down,
}

impl ProbeStatus {
    pub fn is_up(self) -> bool {
        matches!(self, ProbeStatus::Up)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProbeStatus::Up => "up",
            ProbeStatus::Down => "down",
        }
    }
}

/// Outcome of one probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub status: ProbeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeResult {
    /// Classify a completed HTTP exchange. Up iff the code is in [200, 400).
    pub fn from_status(status_code: u16, response_time_ms: u64) -> Self {
        if (200..400).contains(&status_code) {
            Self {
                status: ProbeStatus::Up,
                status_code: Some(status_code),
                response_time_ms,
                error: None,
            }
        } else {
            Self {
                status: ProbeStatus::Down,
                status_code: Some(status_code),
                response_time_ms,
                error: Some(ProbeError::Status(status_code).to_string()),
            }
        }
    }

    /// A probe that never produced a response.
    pub fn failed(error: &ProbeError, response_time_ms: u64) -> Self {
        Self {
            status: ProbeStatus::Down,
            status_code: None,
            response_time_ms,
            error: Some(error.to_string()),
        }
    }

    pub fn is_up(&self) -> bool {
        self.status.is_up()
    }
}

/// Anything that can check a URL.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn check(&self, url: &str) -> ProbeResult;
}
