/// Integration tests for the HTTP surface.
///
/// Requests go straight through the axum router with `tower::ServiceExt`,
/// so no socket is bound.
///
/// ## Running Tests
///
/// ```bash
/// cargo test --test http_api_test
/// ```

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use axum::Router;
    use base64::Engine as _;
    use http_body_util::BodyExt;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;
    use worker_convert::{
        api::{self, AppState, ADMIN_KEY_HEADER},
        config::EngineConfig,
        converter::{self, ConversionRequest, ConverterRegistry, JobContext, OutputFormat},
        engine::JobEngine,
        job::JobId,
    };

    const ADMIN_KEY: &str = "test-admin-key";

    struct TestApp {
        app: Router,
        engine: Arc<JobEngine>,
        _dir: TempDir,
    }

    fn test_app(admin_key: Option<&str>, retention: Duration) -> TestApp {
        let dir = TempDir::new().unwrap();
        let mut registry = ConverterRegistry::with_builtin();
        registry.register(
            "ok",
            OutputFormat::new("txt", "text/plain"),
            converter::from_fn(|_req: &ConversionRequest, _ctx: &JobContext| {
                std::thread::sleep(Duration::from_millis(50));
                Ok(b"OK".to_vec())
            }),
        );
        let engine = Arc::new(
            JobEngine::start(
                EngineConfig::new(dir.path())
                    .with_workers(2)
                    .with_retention(retention)
                    .with_reaper_interval(None),
                registry,
            )
            .unwrap(),
        );
        let state = Arc::new(AppState::new(engine.clone(), admin_key));
        TestApp {
            app: api::router(state, 1024 * 1024),
            engine,
            _dir: dir,
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, headers, body)
    }

    async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let (status, _, body) = send(app, request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn submission(kind: &str, name: &str, data: &[u8]) -> Value {
        json!({
            "kind": kind,
            "inputs": [{
                "name": name,
                "data": base64::engine::general_purpose::STANDARD.encode(data),
            }]
        })
    }

    async fn submit(app: &Router, kind: &str, name: &str, data: &[u8]) -> JobId {
        let (status, body) = send_json(app, post_json("/jobs", submission(kind, name, data))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "queued");
        body["id"].as_str().unwrap().parse().unwrap()
    }

    async fn wait_terminal(app: &Router, id: &JobId) -> Value {
        for _ in 0..1000 {
            let (status, body) = send_json(app, get(&format!("/jobs/{}", id))).await;
            assert_eq!(status, StatusCode::OK);
            if body["status"] == "succeeded" || body["status"] == "failed" {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {} did not finish", id);
    }

    #[tokio::test]
    async fn test_submit_poll_and_download() {
        let t = test_app(None, Duration::from_secs(3600));

        let (status, body) =
            send_json(&t.app, post_json("/jobs", submission("ok", "Quarterly Report.txt", b"x"))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let id = body["id"].as_str().unwrap().to_string();
        assert_eq!(body["statusUrl"], format!("/jobs/{}", id));

        let id: JobId = id.parse().unwrap();
        let finished = wait_terminal(&t.app, &id).await;
        assert_eq!(finished["status"], "succeeded");
        assert_eq!(finished["progress"], 100);
        assert_eq!(finished["error"], Value::Null);
        assert_eq!(finished["downloadUrl"], format!("/jobs/download/{}", id));
        assert!(finished.get("outputPath").is_none());

        let (status, headers, body) = send(&t.app, get(&format!("/jobs/download/{}", id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"OK");
        assert_eq!(headers[header::CONTENT_TYPE], "text/plain");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=\"Quarterly_Report.txt\""
        );
        t.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_job_reports_error_and_is_not_downloadable() {
        let t = test_app(None, Duration::from_secs(3600));

        let id = submit(&t.app, "svg-to-pdf", "broken.svg", b"<not>valid</svg>").await;
        let finished = wait_terminal(&t.app, &id).await;
        assert_eq!(finished["status"], "failed");
        assert_eq!(finished["error"]["code"], "bad_input");
        assert!(finished.get("downloadUrl").is_none());

        let (status, body) = send_json(&t.app, get(&format!("/jobs/download/{}", id))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "not_ready");
        t.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_ids_are_not_found() {
        let t = test_app(None, Duration::from_secs(3600));

        for uri in [
            format!("/jobs/{}", uuid::Uuid::new_v4()),
            "/jobs/not-a-uuid".to_string(),
            format!("/jobs/download/{}", uuid::Uuid::new_v4()),
        ] {
            let (status, body) = send_json(&t.app, get(&uri)).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
            assert_eq!(body["error"]["code"], "not_found");
        }
        t.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_submissions_are_rejected() {
        let t = test_app(None, Duration::from_secs(3600));

        let cases = [
            submission("merge-pdf", "a.pdf", b"x"),
            json!({ "kind": "ok", "inputs": [] }),
            json!({ "kind": "ok", "inputs": [{ "name": "a.txt", "data": "***" }] }),
            json!({ "inputs": [] }),
        ];
        for case in cases {
            let (status, body) = send_json(&t.app, post_json("/jobs", case.clone())).await;
            assert!(status.is_client_error(), "{}", case);
            assert_eq!(body["error"]["code"], "validation", "{}", case);
        }
        assert!(t.engine.store().is_empty());
        t.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_finished_job_is_rejected() {
        let t = test_app(None, Duration::from_secs(3600));

        let id = submit(&t.app, "ok", "a.txt", b"x").await;
        wait_terminal(&t.app, &id).await;

        let (status, body) =
            send_json(&t.app, post_json(&format!("/jobs/{}/cancel", id), json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "validation");
        t.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_admin_routes_require_key() {
        let t = test_app(Some(ADMIN_KEY), Duration::from_secs(3600));

        let (status, body) = send_json(&t.app, get("/admin/jobs/metrics")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "forbidden");

        let wrong = Request::builder()
            .uri("/admin/jobs/metrics")
            .header(ADMIN_KEY_HEADER, "nope")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send_json(&t.app, wrong).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let right = Request::builder()
            .uri("/admin/jobs/metrics")
            .header(ADMIN_KEY_HEADER, ADMIN_KEY)
            .body(Body::empty())
            .unwrap();
        let (status, body) = send_json(&t.app, right).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["workers"], 2);
        assert_eq!(body["queued"], 0);
        t.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_admin_routes_closed_without_configured_key() {
        let t = test_app(None, Duration::from_secs(3600));

        let request = Request::builder()
            .method("POST")
            .uri("/admin/jobs/cleanup")
            .header(ADMIN_KEY_HEADER, "")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send_json(&t.app, request).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        t.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_blank_configured_key_keeps_admin_closed() {
        let t = test_app(Some(""), Duration::from_secs(3600));

        let request = Request::builder()
            .uri("/admin/jobs/metrics")
            .header(ADMIN_KEY_HEADER, "")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send_json(&t.app, request).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "forbidden");
        t.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_forced_cleanup_expires_downloads() {
        let t = test_app(Some(ADMIN_KEY), Duration::ZERO);

        let id = submit(&t.app, "ok", "a.txt", b"x").await;
        wait_terminal(&t.app, &id).await;

        let cleanup = Request::builder()
            .method("POST")
            .uri("/admin/jobs/cleanup")
            .header(ADMIN_KEY_HEADER, ADMIN_KEY)
            .body(Body::empty())
            .unwrap();
        let (status, body) = send_json(&t.app, cleanup).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["ran"], true);
        assert_eq!(body["recordsRemoved"], 1);
        assert_eq!(body["filesRemoved"], 1);

        let (status, _) = send_json(&t.app, get(&format!("/jobs/download/{}", id))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        t.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_health() {
        let t = test_app(None, Duration::from_secs(3600));
        let (status, _, body) = send(&t.app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"ok");
        t.engine.shutdown().await;
    }
}
