//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::probe::ProbeStatus;

/// Lifecycle state of a registered site. Only `Active` sites are probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteStatus {
    Active,
    Archive,
    NotTracking,
    Delete,
}

impl SiteStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SiteStatus::Active => "active",
            SiteStatus::Archive => "archive",
            SiteStatus::NotTracking => "not_tracking",
            SiteStatus::Delete => "delete",
        }
    }
}

impl fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SiteStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SiteStatus::Active),
            "archive" => Ok(SiteStatus::Archive),
            "not_tracking" => Ok(SiteStatus::NotTracking),
            "delete" => Ok(SiteStatus::Delete),
            other => Err(format!("unknown site status: {}", other)),
        }
    }
}

/// A monitored site, as registered by the site management API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    pub id: String,
    pub name: String,
    pub url: String,
    /// Check interval as entered by the user, minutes unless suffixed
    pub interval: String,
    pub status: SiteStatus,
}

impl Default for Site {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            url: String::new(),
            interval: "5".to_string(),
            status: SiteStatus::Active,
        }
    }
}

/// An active site together with the time of its newest ping, if any.
#[derive(Debug, Clone)]
pub struct SiteCheckState {
    pub site: Site,
    pub last_checked: Option<DateTime<Utc>>,
}

/// A single recorded probe. Never updated after insert.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PingRecord {
    pub id: String,
    pub site_id: String,
    pub checked_at: DateTime<Utc>,
    pub is_up: bool,
    /// Milliseconds; absent when the probe was down
    pub response_time_ms: Option<i64>,
    pub status_code: Option<i64>,
    pub error: Option<String>,
    pub location: Option<String>,
    pub region_code: Option<String>,
}

/// Derived per-site statistics. One row per site, fully replaced on recompute.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteStats {
    pub site_id: String,
    pub total_checks: i64,
    pub successful_checks: i64,
    #[serde(rename = "uptime1h")]
    pub uptime_1h: f64,
    #[serde(rename = "uptime24h")]
    pub uptime_24h: f64,
    #[serde(rename = "uptime7d")]
    pub uptime_7d: f64,
    #[serde(rename = "avgResponseTime1h")]
    pub avg_response_time_1h: i64,
    #[serde(rename = "avgResponseTime24h")]
    pub avg_response_time_24h: i64,
    #[serde(rename = "avgResponseTime7d")]
    pub avg_response_time_7d: i64,
    pub uptime_all_time: f64,
    pub avg_response_time_all_time: i64,
    pub current_status: ProbeStatus,
    pub last_checked: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_status_round_trip_names() {
        for status in [
            SiteStatus::Active,
            SiteStatus::Archive,
            SiteStatus::NotTracking,
            SiteStatus::Delete,
        ] {
            assert_eq!(status.as_str().parse::<SiteStatus>(), Ok(status));
        }
        assert!("paused".parse::<SiteStatus>().is_err());
    }

    #[test]
    fn test_site_stats_json_names() {
        let stats = SiteStats {
            site_id: "s1".to_string(),
            total_checks: 2,
            successful_checks: 1,
            uptime_1h: 50.0,
            uptime_24h: 50.0,
            uptime_7d: 50.0,
            avg_response_time_1h: 10,
            avg_response_time_24h: 10,
            avg_response_time_7d: 10,
            uptime_all_time: 50.0,
            avg_response_time_all_time: 10,
            current_status: ProbeStatus::Down,
            last_checked: Utc::now(),
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["siteId"], "s1");
        assert_eq!(json["uptime24h"], 50.0);
        assert_eq!(json["avgResponseTime7d"], 10);
        assert_eq!(json["currentStatus"], "down");
    }
}
