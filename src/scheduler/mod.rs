//! Scheduler module: fans probe units out over the active sites.
//!
//! A trigger resolves the candidate sites synchronously and spawns one unit
//! per site (probe, record, recompute stats), then returns without waiting.
//! Units share a semaphore so a large site list cannot open an unbounded
//! number of connections at once.

pub mod status;

pub use status::{DueMode, DueReport};

use crate::db::{DbError, PingOrigin, Site, Store};
use crate::probe::{ProbeResult, Prober};

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Log target for units that failed after fan-out.
pub const DEAD_LETTER_TARGET: &str = "pingwatch::dead_letter";

/// Failure of one site's probe unit. Never reaches the trigger caller.
#[derive(Error, Debug)]
pub enum UnitError {
    #[error("failed to record ping: {0}")]
    Record(#[source] DbError),
    #[error("failed to recompute stats: {0}")]
    Recompute(#[source] DbError),
    #[error("worker pool closed")]
    PoolClosed,
    #[error("unit task aborted: {0}")]
    Aborted(String),
}

impl UnitError {
    /// Which stage of the unit failed.
    pub fn stage(&self) -> &'static str {
        match self {
            UnitError::Record(_) => "record",
            UnitError::Recompute(_) => "recompute",
            UnitError::PoolClosed => "acquire",
            UnitError::Aborted(_) => "task",
        }
    }
}

/// Final state of one unit.
#[derive(Debug)]
pub struct UnitReport {
    pub site_id: String,
    pub outcome: Result<ProbeResult, UnitError>,
}

/// Work launched by one trigger.
///
/// Dropping it leaves the units running. Awaiting [`Dispatch::completion`]
/// only observes them.
#[derive(Debug)]
pub struct Dispatch {
    pub sites_checked: usize,
    units: Vec<(String, JoinHandle<Result<ProbeResult, UnitError>>)>,
}

impl Dispatch {
    /// Wait for every unit and collect their outcomes, in launch order.
    pub async fn completion(self) -> Vec<UnitReport> {
        let mut reports = Vec::with_capacity(self.units.len());
        for (site_id, handle) in self.units {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(UnitError::Aborted(e.to_string())),
            };
            reports.push(UnitReport { site_id, outcome });
        }
        reports
    }
}

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub max_concurrent_probes: usize,
    pub origin: PingOrigin,
    pub due_mode: DueMode,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            max_concurrent_probes: 32,
            origin: PingOrigin::default(),
            due_mode: DueMode::Interval,
        }
    }
}

/// The main scheduler that orchestrates probe execution.
pub struct Scheduler {
    store: Arc<Store>,
    prober: Arc<dyn Prober>,
    limiter: Arc<Semaphore>,
    origin: Arc<PingOrigin>,
    due_mode: DueMode,
}

impl Scheduler {
    /// Create a new scheduler with the given store and prober.
    pub fn new(store: Arc<Store>, prober: Arc<dyn Prober>, options: SchedulerOptions) -> Self {
        Self {
            store,
            prober,
            limiter: Arc::new(Semaphore::new(options.max_concurrent_probes.max(1))),
            origin: Arc::new(options.origin),
            due_mode: options.due_mode,
        }
    }

    /// Resolve the active sites to probe.
    ///
    /// Blank ids are ignored. If nothing is left, every active site is a
    /// candidate; otherwise only active sites named in the filter are.
    pub fn resolve_sites(&self, filter: Option<&[String]>) -> Result<Vec<Site>, DbError> {
        let ids = filter.map(normalize_site_ids).unwrap_or_default();

        if ids.is_empty() {
            tracing::debug!("Scheduler: Resolving all active sites");
            self.store.active_sites(None)
        } else {
            tracing::debug!("Scheduler: Resolving active sites among {}", ids.join(", "));
            self.store.active_sites(Some(&ids))
        }
    }

    /// Launch one probe unit per candidate site and return immediately.
    ///
    /// Must be called from within a tokio runtime. Only a failure to read the
    /// site list is reported; unit failures are logged.
    pub fn trigger(&self, filter: Option<&[String]>) -> Result<Dispatch, DbError> {
        let sites = self.resolve_sites(filter)?;

        tracing::info!("Scheduler: Triggering {} background pings", sites.len());

        let units = sites
            .into_iter()
            .map(|site| {
                let site_id = site.id.clone();
                let handle = tokio::spawn(run_unit(
                    site,
                    self.prober.clone(),
                    self.store.clone(),
                    self.origin.clone(),
                    self.limiter.clone(),
                ));
                (site_id, handle)
            })
            .collect::<Vec<_>>();

        Ok(Dispatch {
            sites_checked: units.len(),
            units,
        })
    }

    /// Report which active sites are due for a check at `now`.
    pub fn status(&self, now: DateTime<Utc>) -> Result<DueReport, DbError> {
        let states = self.store.active_sites_with_last_check()?;
        Ok(status::report(&states, now, self.due_mode))
    }
}

/// Drop blank ids and duplicates, keeping first-seen order.
pub fn normalize_site_ids(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .filter(|id| !id.trim().is_empty())
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

/// Run one site's unit and log its outcome.
async fn run_unit(
    site: Site,
    prober: Arc<dyn Prober>,
    store: Arc<Store>,
    origin: Arc<PingOrigin>,
    limiter: Arc<Semaphore>,
) -> Result<ProbeResult, UnitError> {
    let outcome = probe_and_record(&site, prober.as_ref(), &store, &origin, limiter).await;

    match &outcome {
        Ok(result) => tracing::info!(
            "Scheduler: Ping completed for {}: {}",
            site.id,
            result.status.as_str()
        ),
        Err(e) => tracing::error!(
            target: DEAD_LETTER_TARGET,
            site_id = %site.id,
            url = %site.url,
            stage = e.stage(),
            error = %e,
            "probe unit failed"
        ),
    }

    outcome
}

async fn probe_and_record(
    site: &Site,
    prober: &dyn Prober,
    store: &Store,
    origin: &PingOrigin,
    limiter: Arc<Semaphore>,
) -> Result<ProbeResult, UnitError> {
    let _permit = limiter
        .acquire_owned()
        .await
        .map_err(|_| UnitError::PoolClosed)?;

    tracing::debug!("Scheduler: Probing {} ({})", site.id, site.url);
    let result = prober.check(&site.url).await;
    let checked_at = Utc::now();

    store
        .append_ping(&site.id, &result, checked_at, origin)
        .map_err(UnitError::Record)?;

    // The ping stays recorded even if this fails; stats can be rebuilt later
    store
        .recompute_site_stats(&site.id, result.status, checked_at)
        .map_err(UnitError::Recompute)?;

    Ok(result)
}
