//! Public job endpoints: submission, status polling, cancellation, download.

use super::error::ApiError;
use super::AppState;
use crate::converter::{ConversionRequest, InputFile};
use crate::error::JobError;
use crate::job::{JobId, JobRecord, JobStatus};
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::debug;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", post(submit_job))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/cancel", post(cancel_job))
        .route("/jobs/download/{id}", get(download_job))
}

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub kind: String,
    #[serde(default)]
    pub options: serde_json::Value,
    #[serde(default)]
    pub inputs: Vec<InputPayload>,
}

#[derive(Debug, Deserialize)]
pub struct InputPayload {
    pub name: String,
    /// Base64-encoded file content.
    pub data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobResponse {
    pub id: JobId,
    pub status: JobStatus,
    pub status_url: String,
}

/// Public projection of a job record. Never exposes the artifact path.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub id: JobId,
    pub kind: String,
    pub status: JobStatus,
    pub progress: u8,
    pub error: Option<JobError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<JobRecord> for JobStatusResponse {
    fn from(record: JobRecord) -> Self {
        let download_url =
            (record.status == JobStatus::Succeeded).then(|| download_url(&record.id));
        Self {
            id: record.id,
            kind: record.kind,
            status: record.status,
            progress: record.progress,
            error: record.error,
            download_url,
            created_at: record.created_at,
            started_at: record.started_at,
            finished_at: record.finished_at,
        }
    }
}

fn status_url(id: &JobId) -> String {
    format!("/jobs/{}", id)
}

fn download_url(id: &JobId) -> String {
    format!("/jobs/download/{}", id)
}

/// Unparseable ids cannot name a job, so they are simply unknown.
fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    JobId::parse_str(raw)
        .map_err(|_| ApiError::from(JobError::not_found(format!("job {} not found", raw))))
}

fn decode_inputs(inputs: Vec<InputPayload>) -> Result<Vec<InputFile>, JobError> {
    inputs
        .into_iter()
        .enumerate()
        .map(|(idx, input)| {
            let data = base64::engine::general_purpose::STANDARD
                .decode(input.data.as_bytes())
                .map_err(|e| JobError::validation(format!("inputs[{}].data is not valid base64: {}", idx, e)))?;
            Ok(InputFile {
                name: input.name,
                data,
            })
        })
        .collect()
}

pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SubmitJobRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitJobResponse>), ApiError> {
    let Json(body) = payload?;
    let request = ConversionRequest {
        kind: body.kind,
        options: body.options,
        inputs: decode_inputs(body.inputs)?,
    };

    let id = state.engine.submit(request)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            id,
            status: JobStatus::Queued,
            status_url: status_url(&id),
        }),
    ))
}

pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let id = parse_job_id(&id)?;
    let record = state.engine.status(&id)?;
    Ok(Json(record.into()))
}

pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = parse_job_id(&id)?;
    state.engine.cancel(&id)?;
    Ok(Json(serde_json::json!({ "id": id, "cancelled": true })))
}

pub async fn download_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_job_id(&id)?;
    let artifact = state.engine.resolve_download(&id)?;

    // The reaper may win the race between resolution and open.
    let file = tokio::fs::File::open(&artifact.path).await.map_err(|e| {
        debug!(job_id = %id, error = %e, "Artifact could not be opened");
        JobError::not_found(format!("artifact for job {} has expired", id))
    })?;
    let length = file.metadata().await.ok().map(|m| m.len());

    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        artifact.download_name
    ))
    .map_err(|e| JobError::internal(format!("invalid content-disposition: {}", e)))?;
    let content_type = HeaderValue::from_str(&artifact.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store"),
    );
    if let Some(length) = length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    Ok(response)
}
