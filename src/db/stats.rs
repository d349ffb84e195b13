//! Rolling site statistics derived from ping history.
//!
//! Stats are a projection of the `pings` table and can be rebuilt from it at
//! any time. A recompute reads every window's counts and replaces the site's
//! `site_stats` row inside one write transaction, so concurrent recomputes for
//! the same site (from this process or another one sharing the file) never
//! leave a row mixing fields from two computations.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

#[cfg(test)]
use super::models::PingRecord;
use super::models::SiteStats;
use super::store::{format_db_time, parse_probe_status, time_from_text, DbError, Store};
use crate::probe::ProbeStatus;

/// Raw counts for a set of checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckCounts {
    pub total: i64,
    pub successful: i64,
    /// Sum of response times over successful checks that have one
    pub response_sum: i64,
    /// Number of successful checks that have a response time
    pub response_count: i64,
}

impl CheckCounts {
    /// In-memory counterpart of the SQL aggregate, used to check it.
    #[cfg(test)]
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a PingRecord>,
    {
        records.into_iter().fold(Self::default(), |mut acc, r| {
            acc.total += 1;
            if r.is_up {
                acc.successful += 1;
                if let Some(ms) = r.response_time_ms {
                    acc.response_sum += ms;
                    acc.response_count += 1;
                }
            }
            acc
        })
    }

    /// Percentage of successful checks, 0 when there are none.
    pub fn uptime_percentage(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.successful as f64 / self.total as f64 * 100.0
        }
    }

    /// Mean response time of successful checks, rounded to the millisecond.
    pub fn avg_response_time(&self) -> i64 {
        if self.response_count == 0 {
            0
        } else {
            (self.response_sum as f64 / self.response_count as f64).round() as i64
        }
    }
}

/// Time windows reported on every stats row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsWindow {
    Hour,
    Day,
    Week,
}

impl StatsWindow {
    pub fn duration(self) -> ChronoDuration {
        match self {
            StatsWindow::Hour => ChronoDuration::hours(1),
            StatsWindow::Day => ChronoDuration::hours(24),
            StatsWindow::Week => ChronoDuration::days(7),
        }
    }
}

/// Counts per window plus all-time, as one coherent snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowedCounts {
    pub hour: CheckCounts,
    pub day: CheckCounts,
    pub week: CheckCounts,
    pub all_time: CheckCounts,
}

impl WindowedCounts {
    /// Bucket records by window, ending at `anchor` inclusive.
    #[cfg(test)]
    pub fn from_records(records: &[PingRecord], anchor: DateTime<Utc>) -> Self {
        let within = |window: StatsWindow| {
            let since = anchor - window.duration();
            CheckCounts::from_records(
                records
                    .iter()
                    .filter(move |r| r.checked_at >= since && r.checked_at <= anchor),
            )
        };
        Self {
            hour: within(StatsWindow::Hour),
            day: within(StatsWindow::Day),
            week: within(StatsWindow::Week),
            all_time: CheckCounts::from_records(records),
        }
    }

    /// Build a full stats row.
    pub fn into_stats(self, site_id: &str, current_status: ProbeStatus, last_checked: DateTime<Utc>) -> SiteStats {
        SiteStats {
            site_id: site_id.to_string(),
            total_checks: self.all_time.total,
            successful_checks: self.all_time.successful,
            uptime_1h: self.hour.uptime_percentage(),
            uptime_24h: self.day.uptime_percentage(),
            uptime_7d: self.week.uptime_percentage(),
            avg_response_time_1h: self.hour.avg_response_time(),
            avg_response_time_24h: self.day.avg_response_time(),
            avg_response_time_7d: self.week.avg_response_time(),
            uptime_all_time: self.all_time.uptime_percentage(),
            avg_response_time_all_time: self.all_time.avg_response_time(),
            current_status,
            last_checked,
        }
    }
}

const COUNT_COLUMNS: &str = "COUNT(*),
        COALESCE(SUM(is_up), 0),
        COALESCE(SUM(CASE WHEN is_up = 1 THEN response_time_ms END), 0),
        COUNT(CASE WHEN is_up = 1 THEN response_time_ms END)";

fn counts_from_row(row: &Row<'_>) -> rusqlite::Result<CheckCounts> {
    Ok(CheckCounts {
        total: row.get(0)?,
        successful: row.get(1)?,
        response_sum: row.get(2)?,
        response_count: row.get(3)?,
    })
}

fn count_checks(
    conn: &Connection,
    site_id: &str,
    range: Option<(DateTime<Utc>, DateTime<Utc>)>,
) -> rusqlite::Result<CheckCounts> {
    match range {
        Some((since, until)) => conn.query_row(
            &format!(
                "SELECT {} FROM pings WHERE site_id = ?1 AND checked_at >= ?2 AND checked_at <= ?3",
                COUNT_COLUMNS
            ),
            params![site_id, format_db_time(&since), format_db_time(&until)],
            counts_from_row,
        ),
        None => conn.query_row(
            &format!("SELECT {} FROM pings WHERE site_id = ?1", COUNT_COLUMNS),
            params![site_id],
            counts_from_row,
        ),
    }
}

fn windowed_counts(conn: &Connection, site_id: &str, anchor: DateTime<Utc>) -> rusqlite::Result<WindowedCounts> {
    let window = |w: StatsWindow| count_checks(conn, site_id, Some((anchor - w.duration(), anchor)));
    Ok(WindowedCounts {
        hour: window(StatsWindow::Hour)?,
        day: window(StatsWindow::Day)?,
        week: window(StatsWindow::Week)?,
        all_time: count_checks(conn, site_id, None)?,
    })
}

fn latest_observation(conn: &Connection, site_id: &str) -> rusqlite::Result<Option<(ProbeStatus, DateTime<Utc>)>> {
    conn.query_row(
        "SELECT is_up, checked_at FROM pings WHERE site_id = ?1 ORDER BY checked_at DESC, rowid DESC LIMIT 1",
        params![site_id],
        |row| {
            let is_up: bool = row.get(0)?;
            let raw: String = row.get(1)?;
            let status = if is_up { ProbeStatus::Up } else { ProbeStatus::Down };
            Ok((status, time_from_text(1, &raw)?))
        },
    )
    .optional()
}

const UPSERT_STATS: &str = "INSERT INTO site_stats (
        site_id, total_checks, successful_checks,
        uptime_1h, uptime_24h, uptime_7d,
        avg_response_time_1h, avg_response_time_24h, avg_response_time_7d,
        uptime_all_time, avg_response_time_all_time,
        current_status, last_checked
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
    ON CONFLICT(site_id) DO UPDATE SET
        total_checks = excluded.total_checks,
        successful_checks = excluded.successful_checks,
        uptime_1h = excluded.uptime_1h,
        uptime_24h = excluded.uptime_24h,
        uptime_7d = excluded.uptime_7d,
        avg_response_time_1h = excluded.avg_response_time_1h,
        avg_response_time_24h = excluded.avg_response_time_24h,
        avg_response_time_7d = excluded.avg_response_time_7d,
        uptime_all_time = excluded.uptime_all_time,
        avg_response_time_all_time = excluded.avg_response_time_all_time,
        current_status = excluded.current_status,
        last_checked = excluded.last_checked";

impl Store {
    /// Recompute a site's stats row from its full history and upsert it.
    ///
    /// `observed_status`/`observed_at` describe the probe that triggered the
    /// recompute. When history already holds a record at least as new, that
    /// record wins, so a late recompute never moves `last_checked` backwards.
    /// Windows end at the chosen `last_checked`, which makes the result a pure
    /// function of history.
    pub fn recompute_site_stats(
        &self,
        site_id: &str,
        observed_status: ProbeStatus,
        observed_at: DateTime<Utc>,
    ) -> Result<SiteStats, DbError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (current_status, last_checked) = match latest_observation(&tx, site_id)? {
            Some((status, at)) if at >= observed_at => (status, at),
            _ => (observed_status, observed_at),
        };

        let counts = windowed_counts(&tx, site_id, last_checked)?;
        let stats = counts.into_stats(site_id, current_status, last_checked);

        tx.execute(
            UPSERT_STATS,
            params![
                stats.site_id,
                stats.total_checks,
                stats.successful_checks,
                stats.uptime_1h,
                stats.uptime_24h,
                stats.uptime_7d,
                stats.avg_response_time_1h,
                stats.avg_response_time_24h,
                stats.avg_response_time_7d,
                stats.uptime_all_time,
                stats.avg_response_time_all_time,
                stats.current_status.as_str(),
                format_db_time(&stats.last_checked),
            ],
        )?;
        tx.commit()?;

        Ok(stats)
    }

    /// Read the current stats row for a site.
    pub fn site_stats(&self, site_id: &str) -> Result<Option<SiteStats>, DbError> {
        let conn = self.lock()?;
        let stats = conn
            .query_row(
                "SELECT site_id, total_checks, successful_checks,
                        uptime_1h, uptime_24h, uptime_7d,
                        avg_response_time_1h, avg_response_time_24h, avg_response_time_7d,
                        uptime_all_time, avg_response_time_all_time,
                        current_status, last_checked
                 FROM site_stats WHERE site_id = ?1",
                params![site_id],
                |row| {
                    let raw_status: String = row.get(11)?;
                    let raw_checked: String = row.get(12)?;
                    Ok(SiteStats {
                        site_id: row.get(0)?,
                        total_checks: row.get(1)?,
                        successful_checks: row.get(2)?,
                        uptime_1h: row.get(3)?,
                        uptime_24h: row.get(4)?,
                        uptime_7d: row.get(5)?,
                        avg_response_time_1h: row.get(6)?,
                        avg_response_time_24h: row.get(7)?,
                        avg_response_time_7d: row.get(8)?,
                        uptime_all_time: row.get(9)?,
                        avg_response_time_all_time: row.get(10)?,
                        current_status: parse_probe_status(11, &raw_status)?,
                        last_checked: time_from_text(12, &raw_checked)?,
                    })
                },
            )
            .optional()?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{site, temp_store};
    use crate::db::{PingOrigin, SiteStatus};
    use crate::probe::{ProbeError, ProbeResult};
    use chrono::TimeZone;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn record(at: DateTime<Utc>, is_up: bool, response_time_ms: Option<i64>) -> PingRecord {
        PingRecord {
            id: String::new(),
            site_id: "s".to_string(),
            checked_at: at,
            is_up,
            response_time_ms,
            status_code: None,
            error: None,
            location: None,
            region_code: None,
        }
    }

    #[test]
    fn test_empty_counts() {
        let counts = CheckCounts::from_records(&Vec::<PingRecord>::new());
        assert_eq!(counts.total, 0);
        assert_eq!(counts.uptime_percentage(), 0.0);
        assert_eq!(counts.avg_response_time(), 0);
    }

    #[test]
    fn test_uptime_and_average() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let records = vec![
            record(t, true, Some(100)),
            record(t, true, Some(201)),
            record(t, true, None),
            record(t, false, Some(9999)),
        ];
        let counts = CheckCounts::from_records(&records);
        assert_eq!(counts.total, 4);
        assert_eq!(counts.successful, 3);
        assert!(counts.successful <= counts.total);
        assert_eq!(counts.uptime_percentage(), 75.0);
        // Only successful checks with a response time count: (100 + 201) / 2
        assert_eq!(counts.avg_response_time(), 151);
    }

    #[test]
    fn test_uptime_formula_across_mixes() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for total in 1..=12usize {
            for up in 0..=total {
                let records: Vec<_> = (0..total).map(|i| record(t, i < up, Some(10))).collect();
                let counts = CheckCounts::from_records(&records);
                let expected = 100.0 * up as f64 / total as f64;
                assert!((counts.uptime_percentage() - expected).abs() < 1e-9);
                let expected_avg = if up == 0 { 0 } else { 10 };
                assert_eq!(counts.avg_response_time(), expected_avg);
            }
        }
    }

    #[test]
    fn test_windows_bucket_by_age() {
        let anchor = Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap();
        let records = vec![
            record(anchor, true, Some(10)),
            record(anchor - ChronoDuration::minutes(30), false, None),
            record(anchor - ChronoDuration::hours(5), true, Some(30)),
            record(anchor - ChronoDuration::days(3), true, Some(50)),
            record(anchor - ChronoDuration::days(30), false, None),
        ];
        let counts = WindowedCounts::from_records(&records, anchor);

        assert_eq!(counts.hour.total, 2);
        assert_eq!(counts.hour.uptime_percentage(), 50.0);
        assert_eq!(counts.day.total, 3);
        assert_eq!(counts.day.avg_response_time(), 20);
        assert_eq!(counts.week.total, 4);
        assert_eq!(counts.week.uptime_percentage(), 75.0);
        assert_eq!(counts.all_time.total, 5);
        assert_eq!(counts.all_time.uptime_percentage(), 60.0);
    }

    fn append(store: &Store, site_id: &str, result: &ProbeResult, at: DateTime<Utc>) {
        store.append_ping(site_id, result, at, &PingOrigin::default()).unwrap();
    }

    #[test]
    fn test_recompute_matches_history() {
        let (_tmp, store) = temp_store();
        store.add_site(&mut site("s", SiteStatus::Active)).unwrap();

        let anchor = Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap();
        append(&store, "s", &ProbeResult::from_status(200, 100), anchor - ChronoDuration::days(2));
        append(&store, "s", &ProbeResult::from_status(500, 20), anchor - ChronoDuration::hours(2));
        append(&store, "s", &ProbeResult::from_status(200, 40), anchor - ChronoDuration::minutes(10));
        append(&store, "s", &ProbeResult::failed(&ProbeError::Dns, 3), anchor);

        let stats = store.recompute_site_stats("s", ProbeStatus::Down, anchor).unwrap();
        assert_eq!(stats.total_checks, 4);
        assert_eq!(stats.successful_checks, 2);
        assert_eq!(stats.uptime_1h, 50.0);
        assert_eq!(stats.avg_response_time_1h, 40);
        assert!((stats.uptime_24h - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.uptime_7d, 50.0);
        assert_eq!(stats.avg_response_time_7d, 70);
        assert_eq!(stats.uptime_all_time, 50.0);
        assert_eq!(stats.avg_response_time_all_time, 70);
        assert_eq!(stats.current_status, ProbeStatus::Down);
        assert_eq!(stats.last_checked, anchor);

        // The SQL aggregation agrees with the in-memory one
        let history = store.recent_pings("s", 100).unwrap();
        let expected = WindowedCounts::from_records(&history, anchor).into_stats("s", ProbeStatus::Down, anchor);
        assert_eq!(stats, expected);

        assert_eq!(store.site_stats("s").unwrap(), Some(stats));
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let (_tmp, store) = temp_store();
        store.add_site(&mut site("s", SiteStatus::Active)).unwrap();

        let t = Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap();
        append(&store, "s", &ProbeResult::from_status(200, 12), t);
        append(&store, "s", &ProbeResult::from_status(404, 8), t + ChronoDuration::seconds(60));

        let first = store
            .recompute_site_stats("s", ProbeStatus::Down, t + ChronoDuration::seconds(60))
            .unwrap();
        let second = store
            .recompute_site_stats("s", ProbeStatus::Down, t + ChronoDuration::seconds(60))
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(store.site_stats("s").unwrap(), Some(second));
    }

    #[test]
    fn test_stale_recompute_keeps_newest_observation() {
        let (_tmp, store) = temp_store();
        store.add_site(&mut site("s", SiteStatus::Active)).unwrap();

        let t = Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap();
        append(&store, "s", &ProbeResult::from_status(500, 5), t);
        append(&store, "s", &ProbeResult::from_status(200, 5), t + ChronoDuration::seconds(30));

        // A recompute for the older probe arrives last
        let stats = store.recompute_site_stats("s", ProbeStatus::Down, t).unwrap();
        assert_eq!(stats.current_status, ProbeStatus::Up);
        assert_eq!(stats.last_checked, t + ChronoDuration::seconds(30));
    }

    #[test]
    fn test_single_row_per_site() {
        let (_tmp, store) = temp_store();
        store.add_site(&mut site("s", SiteStatus::Active)).unwrap();

        let t = Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap();
        for i in 0..5 {
            let at = t + ChronoDuration::seconds(i);
            append(&store, "s", &ProbeResult::from_status(200, 10), at);
            store.recompute_site_stats("s", ProbeStatus::Up, at).unwrap();
        }

        let conn = store.lock().unwrap();
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM site_stats WHERE site_id = 's'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_site_stats_missing() {
        let (_tmp, store) = temp_store();
        assert_eq!(store.site_stats("nope").unwrap(), None);
    }

    #[test]
    fn test_concurrent_recomputes_stay_coherent() {
        let (tmp, store) = temp_store();
        store.add_site(&mut site("s", SiteStatus::Active)).unwrap();

        // A second connection to the same file stands in for another instance
        let other = Store::new(tmp.path(), Duration::from_secs(5)).unwrap();
        let stores = [Arc::new(store), Arc::new(other)];

        let base = Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap();
        let handles: Vec<_> = stores
            .iter()
            .enumerate()
            .map(|(n, store)| {
                let store = Arc::clone(store);
                thread::spawn(move || {
                    for i in 0..20 {
                        let at = base + ChronoDuration::milliseconds((i * 2 + n as i64) * 100);
                        let result = if i % 3 == 0 {
                            ProbeResult::from_status(503, 50)
                        } else {
                            ProbeResult::from_status(200, 10 + i as u64)
                        };
                        store.append_ping("s", &result, at, &PingOrigin::default()).unwrap();
                        store.recompute_site_stats("s", result.status, at).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let row = stores[0].site_stats("s").unwrap().unwrap();
        let history = stores[0].recent_pings("s", 1000).unwrap();
        assert_eq!(history.len(), 40);

        let newest = &history[0];
        let status = if newest.is_up { ProbeStatus::Up } else { ProbeStatus::Down };
        let expected = WindowedCounts::from_records(&history, newest.checked_at)
            .into_stats("s", status, newest.checked_at);
        assert_eq!(row, expected);
    }
}
