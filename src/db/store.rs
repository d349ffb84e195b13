//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

use super::models::*;
use crate::probe::{ProbeResult, ProbeStatus};

mod embedded {
    refinery::embed_migrations!("migrations");
}

const DB_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

const SITE_COLUMNS: &str = "id, name, url, check_interval, status";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(#[from] refinery::Error),
    #[error("database connection lock poisoned")]
    Poisoned,
    #[error("Not found")]
    NotFound,
}

/// Where a probe ran from. Stamped onto every ping record.
#[derive(Debug, Clone, Default)]
pub struct PingOrigin {
    pub location: Option<String>,
    pub region_code: Option<String>,
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open the store at `path`, waiting up to `busy_timeout` for locks held
    /// by other connections to the same file.
    pub fn new<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Apply embedded migrations.
    fn init(&self) -> Result<(), DbError> {
        let mut conn = self.lock()?;
        let report = embedded::migrations::runner().run(&mut *conn)?;
        for migration in report.applied_migrations() {
            tracing::info!("Applied migration {}", migration);
        }
        Ok(())
    }

    pub(super) fn lock(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // --- Sites ---

    /// Register a site. An empty id is replaced with a fresh UUID.
    pub fn add_site(&self, site: &mut Site) -> Result<String, DbError> {
        if site.id.trim().is_empty() {
            site.id = uuid::Uuid::new_v4().to_string();
        }

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sites (id, name, url, check_interval, status) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![site.id, site.name, site.url, site.interval, site.status.as_str()],
        )?;
        Ok(site.id.clone())
    }

    /// Get a site by ID, whatever its status.
    pub fn get_site(&self, id: &str) -> Result<Site, DbError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM sites WHERE id = ?1", SITE_COLUMNS),
            params![id],
            site_from_row,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    /// Count all registered sites regardless of status.
    pub fn count_sites(&self) -> Result<i64, DbError> {
        let conn = self.lock()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM sites", [], |r| r.get(0))?)
    }

    /// List active sites, optionally restricted to the given ids.
    ///
    /// An empty filter slice means no restriction.
    pub fn active_sites(&self, ids: Option<&[String]>) -> Result<Vec<Site>, DbError> {
        let conn = self.lock()?;

        let sites = match ids.filter(|ids| !ids.is_empty()) {
            Some(ids) => {
                let placeholders = (2..ids.len() + 2)
                    .map(|i| format!("?{}", i))
                    .collect::<Vec<_>>()
                    .join(", ");
                let sql = format!(
                    "SELECT {} FROM sites WHERE status = ?1 AND id IN ({}) ORDER BY name, id",
                    SITE_COLUMNS, placeholders
                );
                let mut stmt = conn.prepare(&sql)?;
                let args = std::iter::once(SiteStatus::Active.as_str()).chain(ids.iter().map(String::as_str));
                let rows = stmt.query_map(params_from_iter(args), site_from_row)?;
                rows.collect::<SqlResult<Vec<_>>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM sites WHERE status = ?1 ORDER BY name, id",
                    SITE_COLUMNS
                ))?;
                let rows = stmt.query_map(params![SiteStatus::Active.as_str()], site_from_row)?;
                rows.collect::<SqlResult<Vec<_>>>()?
            }
        };

        Ok(sites)
    }

    /// List active sites with the time of their newest ping.
    pub fn active_sites_with_last_check(&self) -> Result<Vec<SiteCheckState>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT s.id, s.name, s.url, s.check_interval, s.status, p.last_checked
             FROM sites s
             LEFT JOIN (
                 SELECT site_id, MAX(checked_at) AS last_checked FROM pings GROUP BY site_id
             ) p ON p.site_id = s.id
             WHERE s.status = ?1
             ORDER BY s.name, s.id",
        )?;

        let states = stmt
            .query_map(params![SiteStatus::Active.as_str()], |row| {
                let last_checked = match row.get::<_, Option<String>>(5)? {
                    Some(raw) => Some(time_from_text(5, &raw)?),
                    None => None,
                };
                Ok(SiteCheckState {
                    site: site_from_row(row)?,
                    last_checked,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(states)
    }

    // --- Pings ---

    /// Append one immutable ping record for a probe outcome.
    ///
    /// Response time is only stored for successful probes.
    pub fn append_ping(
        &self,
        site_id: &str,
        result: &ProbeResult,
        checked_at: DateTime<Utc>,
        origin: &PingOrigin,
    ) -> Result<PingRecord, DbError> {
        let record = PingRecord {
            id: uuid::Uuid::new_v4().to_string(),
            site_id: site_id.to_string(),
            checked_at,
            is_up: result.is_up(),
            response_time_ms: result
                .is_up()
                .then(|| i64::try_from(result.response_time_ms).unwrap_or(i64::MAX)),
            status_code: result.status_code.map(i64::from),
            error: result.error.clone(),
            location: origin.location.clone(),
            region_code: origin.region_code.clone(),
        };

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO pings (id, site_id, checked_at, is_up, response_time_ms, status_code, error, location, region_code)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.id,
                record.site_id,
                format_db_time(&record.checked_at),
                record.is_up,
                record.response_time_ms,
                record.status_code,
                record.error,
                record.location,
                record.region_code,
            ],
        )?;

        Ok(record)
    }

    /// Get the newest pings for a site, newest first.
    pub fn recent_pings(&self, site_id: &str, limit: u32) -> Result<Vec<PingRecord>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, site_id, checked_at, is_up, response_time_ms, status_code, error, location, region_code
             FROM pings WHERE site_id = ?1 ORDER BY checked_at DESC, rowid DESC LIMIT ?2",
        )?;

        let records = stmt
            .query_map(params![site_id, limit], |row| {
                let raw_time: String = row.get(2)?;
                Ok(PingRecord {
                    id: row.get(0)?,
                    site_id: row.get(1)?,
                    checked_at: time_from_text(2, &raw_time)?,
                    is_up: row.get(3)?,
                    response_time_ms: row.get(4)?,
                    status_code: row.get(5)?,
                    error: row.get(6)?,
                    location: row.get(7)?,
                    region_code: row.get(8)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(records)
    }

    #[cfg(test)]
    pub(crate) fn count_pings(&self, site_id: &str) -> Result<i64, DbError> {
        let conn = self.lock()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM pings WHERE site_id = ?1",
            params![site_id],
            |r| r.get(0),
        )?)
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<(), DbError> {
        self.lock()?.execute_batch(sql)?;
        Ok(())
    }
}

fn site_from_row(row: &Row<'_>) -> SqlResult<Site> {
    let raw_status: String = row.get(4)?;
    let status = raw_status
        .parse::<SiteStatus>()
        .map_err(|e| conversion_error(4, e))?;
    Ok(Site {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        interval: row.get(3)?,
        status,
    })
}

pub(super) fn parse_probe_status(idx: usize, raw: &str) -> SqlResult<ProbeStatus> {
    match raw {
        "up" => Ok(ProbeStatus::Up),
        "down" => Ok(ProbeStatus::Down),
        other => Err(conversion_error(idx, format!("unknown probe status: {}", other))),
    }
}

pub(super) fn time_from_text(idx: usize, raw: &str) -> SqlResult<DateTime<Utc>> {
    parse_db_time(raw).ok_or_else(|| conversion_error(idx, format!("bad timestamp: {}", raw)))
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

/// Format a timestamp for storage. The format sorts lexicographically.
pub(super) fn format_db_time(dt: &DateTime<Utc>) -> String {
    dt.format(DB_TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        DB_TIME_FORMAT,
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
