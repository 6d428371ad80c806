//! Axum router over a [`JobEngine`].
//!
//! [`router`] assembles:
//! - `/jobs` submission, status, cancellation and download routes
//! - `/admin/jobs` metrics and cleanup, gated by `x-admin-key`
//! - `/health`
//! - request tracing and the submission body limit

mod admin;
mod auth;
mod error;
mod jobs;

pub use auth::{AdminKey, ADMIN_KEY_HEADER};
pub use error::ApiError;
pub use jobs::{JobStatusResponse, SubmitJobRequest};

use crate::engine::JobEngine;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<JobEngine>,
    /// `None` keeps the admin surface closed. Blank keys count as `None`.
    pub admin_key: Option<AdminKey>,
}

impl AppState {
    pub fn new(engine: Arc<JobEngine>, admin_key: Option<&str>) -> Self {
        Self {
            engine,
            admin_key: admin_key.and_then(AdminKey::new),
        }
    }
}

/// Build the complete application router.
pub fn router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .merge(jobs::router())
        .nest("/admin", admin::router(state.clone()))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
