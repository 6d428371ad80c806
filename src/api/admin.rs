//! Key-gated admin endpoints: metrics and forced cleanup.

use super::auth::require_admin_key;
use super::AppState;
use crate::metrics::MetricsSnapshot;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Routes are nested under `/admin` and all sit behind
/// [`require_admin_key`].
pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs/metrics", get(metrics))
        .route("/jobs/cleanup", post(cleanup))
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            require_admin_key,
        ))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResponse {
    pub ok: bool,
    pub ran: bool,
    pub records_removed: usize,
    pub files_removed: usize,
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.engine.metrics())
}

pub async fn cleanup(State(state): State<Arc<AppState>>) -> Json<CleanupResponse> {
    let outcome = state.engine.force_cleanup().await;
    info!(
        ran = outcome.ran,
        records_removed = outcome.report.records_removed,
        files_removed = outcome.report.files_removed,
        "Forced cleanup requested"
    );
    Json(CleanupResponse {
        ok: true,
        ran: outcome.ran,
        records_removed: outcome.report.records_removed,
        files_removed: outcome.report.files_removed,
    })
}
