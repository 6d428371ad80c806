//! Shared-secret gate for the admin routes.

use super::error::ApiError;
use super::AppState;
use crate::error::JobError;
use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::warn;

pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Configured admin secret. Only its digest is kept.
#[derive(Clone)]
pub struct AdminKey {
    digest: [u8; 32],
}

impl AdminKey {
    /// Returns `None` for a blank secret, which leaves the admin surface closed.
    pub fn new(secret: &str) -> Option<Self> {
        if secret.trim().is_empty() {
            return None;
        }
        Some(Self {
            digest: Sha256::digest(secret.as_bytes()).into(),
        })
    }

    /// Compares digests in time independent of where they differ.
    pub fn verify(&self, provided: &str) -> bool {
        let provided: [u8; 32] = Sha256::digest(provided.as_bytes()).into();
        self.digest
            .iter()
            .zip(provided.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl std::fmt::Debug for AdminKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AdminKey(..)")
    }
}

/// Rejects the request with `403 forbidden` unless `x-admin-key` matches the
/// configured key. With no key configured every request is rejected.
pub async fn require_admin_key(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let provided = req
        .headers()
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    let authorized = match (&state.admin_key, provided) {
        (Some(key), Some(provided)) => key.verify(provided),
        _ => false,
    };

    if !authorized {
        warn!(
            target: "security",
            path = %req.uri().path(),
            key_configured = state.admin_key.is_some(),
            key_present = provided.is_some(),
            "Rejected admin request"
        );
        return ApiError::from(JobError::forbidden("admin access denied")).into_response();
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify() {
        let key = AdminKey::new("s3cret").unwrap();
        assert!(key.verify("s3cret"));
        assert!(!key.verify("s3cret "));
        assert!(!key.verify(""));
        assert!(!key.verify("S3CRET"));
    }

    #[test]
    fn test_debug_does_not_print_secret() {
        let key = AdminKey::new("s3cret").unwrap();
        assert!(!format!("{:?}", key).contains("s3cret"));
    }

    #[test]
    fn test_blank_secret_is_no_key() {
        assert!(AdminKey::new("").is_none());
        assert!(AdminKey::new("   ").is_none());
    }
}
