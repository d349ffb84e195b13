//! HTTP request handlers.

use super::AppState;
use crate::db::DbError;
use crate::scheduler::normalize_site_ids;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const DEFAULT_PING_LIMIT: u32 = 50;
const MAX_PING_LIMIT: u32 = 1000;

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (status, Json(json!({ "error": message }))).into_response()
}

pub async fn handle_health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

// ============================================================================
// Check cycle
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    pub message: String,
    pub sites_checked: usize,
    /// Always empty: the trigger does not wait for outcomes
    pub results: Vec<Value>,
    pub skipped: Vec<Value>,
    pub timestamp: DateTime<Utc>,
}

/// Pull string ids out of a `{"siteIds": [...]}` body.
///
/// A missing or malformed body means no filter, and non-string entries are
/// dropped.
pub fn requested_site_ids(body: &[u8]) -> Vec<String> {
    let parsed: Value = serde_json::from_slice(body).unwrap_or(Value::Null);
    match parsed.get("siteIds") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

pub async fn handle_trigger(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let ids = requested_site_ids(&body);

    match state.scheduler.trigger(Some(&ids)) {
        Ok(dispatch) => {
            let sites_checked = dispatch.sites_checked;
            let message = format!("Triggered {} background pings", sites_checked);
            tracing::info!("{}", message);

            tokio::spawn(async move {
                let reports = dispatch.completion().await;
                let failed: Vec<&str> = reports
                    .iter()
                    .filter(|r| r.outcome.is_err())
                    .map(|r| r.site_id.as_str())
                    .collect();
                if failed.is_empty() {
                    tracing::info!("Background pings finished: {} ok", reports.len());
                } else {
                    tracing::warn!(
                        "Background pings finished: {} ok, {} failed ({})",
                        reports.len() - failed.len(),
                        failed.len(),
                        failed.join(", ")
                    );
                }
            });

            Json(TriggerResponse {
                message,
                sites_checked,
                results: Vec::new(),
                skipped: Vec::new(),
                timestamp: Utc::now(),
            })
            .into_response()
        }
        Err(e) => {
            tracing::error!("Error in ping trigger: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to trigger pings")
        }
    }
}

pub async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    match state.scheduler.status(Utc::now()) {
        Ok(report) => Json(report).into_response(),
        Err(e) => {
            tracing::error!("Error getting trigger status: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to get trigger status")
        }
    }
}

// ============================================================================
// Sites
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SitesQuery {
    /// Comma-separated site ids
    #[serde(default)]
    pub ids: Option<String>,
}

pub async fn handle_list_sites(
    State(state): State<AppState>,
    Query(query): Query<SitesQuery>,
) -> impl IntoResponse {
    let ids: Vec<String> = query
        .ids
        .as_deref()
        .map(|raw| raw.split(',').map(|id| id.trim().to_string()).collect())
        .unwrap_or_default();

    match state.scheduler.resolve_sites(Some(&ids)) {
        Ok(sites) => Json(sites).into_response(),
        Err(e) => {
            tracing::error!("Failed to list sites: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list sites")
        }
    }
}

pub async fn handle_site_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.site_stats(&id) {
        Ok(Some(stats)) => Json(stats).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Site stats not found"),
        Err(e) => {
            tracing::error!("Failed to read stats for {}: {}", id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read site stats")
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PingsQuery {
    #[serde(default)]
    pub limit: Option<u32>,
}

pub async fn handle_site_pings(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PingsQuery>,
) -> impl IntoResponse {
    if let Err(e) = state.store.get_site(&id) {
        return match e {
            DbError::NotFound => error_response(StatusCode::NOT_FOUND, "Site not found"),
            other => {
                tracing::error!("Failed to look up site {}: {}", id, other);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read pings")
            }
        };
    }

    let limit = query.limit.unwrap_or(DEFAULT_PING_LIMIT).clamp(1, MAX_PING_LIMIT);
    match state.store.recent_pings(&id, limit) {
        Ok(pings) => Json(pings).into_response(),
        Err(e) => {
            tracing::error!("Failed to read pings for {}: {}", id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read pings")
        }
    }
}
