//! Due/not-due reporting for active sites.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

use crate::db::SiteCheckState;

/// How the status report decides whether a site is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DueMode {
    /// Due once `interval` has elapsed since the last ping.
    #[default]
    Interval,
    /// Every active site is always due.
    Always,
}

/// Due state of one site.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteDue {
    pub site_id: String,
    pub site_name: String,
    pub url: String,
    pub interval: String,
    pub last_pinged: Option<DateTime<Utc>>,
    pub is_due: bool,
    pub next_ping_due: DateTime<Utc>,
    /// Whole seconds until the site becomes due; absent when already due
    pub time_until_due: Option<i64>,
}

/// Summary over all active sites.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DueReport {
    pub total_active_sites: usize,
    pub sites_due: usize,
    pub sites_not_due: usize,
    pub sites: Vec<SiteDue>,
    pub timestamp: DateTime<Utc>,
}

fn interval_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^\s*(\d{1,9})\s*([smhd])?\s*$").expect("interval pattern is valid")
    })
}

/// Parse a site's check interval.
///
/// A bare number is minutes (`"5"`); `s`, `m`, `h` and `d` suffixes are
/// accepted. Zero and anything else yield `None`.
pub fn parse_interval(raw: &str) -> Option<ChronoDuration> {
    let caps = interval_pattern().captures(raw)?;
    let amount: i64 = caps.get(1)?.as_str().parse().ok()?;
    if amount == 0 {
        return None;
    }

    let unit = caps
        .get(2)
        .map(|m| m.as_str().to_ascii_lowercase())
        .unwrap_or_else(|| "m".to_string());

    match unit.as_str() {
        "s" => ChronoDuration::try_seconds(amount),
        "m" => ChronoDuration::try_minutes(amount),
        "h" => ChronoDuration::try_hours(amount),
        "d" => ChronoDuration::try_days(amount),
        _ => None,
    }
}

/// Seconds from `now` to `next`, rounded up so a pending site never reads 0.
fn whole_seconds_until(now: DateTime<Utc>, next: DateTime<Utc>) -> i64 {
    let ms = (next - now).num_milliseconds();
    (ms + 999) / 1000
}

/// Decide whether one site is due at `now`.
pub fn evaluate(state: &SiteCheckState, now: DateTime<Utc>, mode: DueMode) -> SiteDue {
    let site = &state.site;

    let next_due = match mode {
        DueMode::Always => None,
        DueMode::Interval => match (state.last_checked, parse_interval(&site.interval)) {
            (Some(last), Some(interval)) => match last.checked_add_signed(interval) {
                Some(next) => Some(next),
                None => {
                    tracing::debug!("Site {} interval {:?} runs past the calendar, treating as due", site.id, site.interval);
                    None
                }
            },
            (Some(_), None) => {
                tracing::debug!("Site {} has unusable interval {:?}, treating as due", site.id, site.interval);
                None
            }
            (None, _) => None,
        },
    };

    let (is_due, next_ping_due, time_until_due) = match next_due {
        Some(next) if next > now => (false, next, Some(whole_seconds_until(now, next))),
        _ => (true, now, None),
    };

    SiteDue {
        site_id: site.id.clone(),
        site_name: site.name.clone(),
        url: site.url.clone(),
        interval: site.interval.clone(),
        last_pinged: state.last_checked,
        is_due,
        next_ping_due,
        time_until_due,
    }
}

/// Build the status report for the given active sites.
pub fn report(states: &[SiteCheckState], now: DateTime<Utc>, mode: DueMode) -> DueReport {
    let sites: Vec<SiteDue> = states.iter().map(|s| evaluate(s, now, mode)).collect();
    let sites_due = sites.iter().filter(|s| s.is_due).count();

    DueReport {
        total_active_sites: sites.len(),
        sites_due,
        sites_not_due: sites.len() - sites_due,
        sites,
        timestamp: now,
    }
}
