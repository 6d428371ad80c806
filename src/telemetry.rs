//! Telemetry and structured logging for the conversion worker.

use crate::job::{JobRecord, JobStatus};
use crate::reaper::SweepReport;
use opentelemetry::trace::{Span, Tracer};
use opentelemetry::{global, KeyValue};
use tracing::{info, warn};

const TRACER_NAME: &str = "worker-convert";

/// Warn when a single conversion takes longer than this.
const SLOW_JOB_THRESHOLD_MS: i64 = 5000;

/// Records telemetry for a completed or failed job.
///
/// Emits one OpenTelemetry span per finished job plus a structured log line.
/// Attributes: job id, kind, status, duration, progress and error code.
pub fn record_job_telemetry(job: &JobRecord) {
    let tracer = global::tracer(TRACER_NAME);
    let mut span = tracer.start("conversion_job");

    span.set_attribute(KeyValue::new("job_id", job.id.to_string()));
    span.set_attribute(KeyValue::new("kind", job.kind.clone()));
    span.set_attribute(KeyValue::new("status", job.status.to_string()));
    span.set_attribute(KeyValue::new("progress", job.progress as i64));

    if let Some(duration_ms) = job.processing_duration_ms() {
        span.set_attribute(KeyValue::new("duration_ms", duration_ms));

        info!(
            job_id = %job.id,
            kind = %job.kind,
            duration_ms = duration_ms,
            status = %job.status,
            "Conversion job finished"
        );

        if duration_ms > SLOW_JOB_THRESHOLD_MS {
            warn!(
                job_id = %job.id,
                duration_ms = duration_ms,
                "Conversion exceeded performance threshold ({}ms)",
                SLOW_JOB_THRESHOLD_MS
            );
        }
    }

    if job.status == JobStatus::Failed {
        if let Some(ref error) = job.error {
            span.set_attribute(KeyValue::new("error_code", error.code.as_str()));
            span.set_attribute(KeyValue::new("error", error.message.clone()));
        }
    }

    span.end();
}

/// Records one reaper sweep.
pub fn record_sweep_telemetry(report: &SweepReport) {
    let tracer = global::tracer(TRACER_NAME);
    let mut span = tracer.start("reaper_sweep");

    span.set_attribute(KeyValue::new("records_removed", report.records_removed as i64));
    span.set_attribute(KeyValue::new("files_removed", report.files_removed as i64));
    span.set_attribute(KeyValue::new("errors", report.errors as i64));
    span.end();
}

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` wins over `log_level`; an invalid filter falls back to `info`.
pub fn init_tracing(log_level: &str, json: bool) {
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: log filter '{}' is invalid ({}); falling back to 'info'",
                    log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);

    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Initializes OpenTelemetry with OTLP exporter.
///
/// This should be called once at startup, from within the tokio runtime.
/// Reads configuration from environment variables:
/// - `OTEL_EXPORTER_OTLP_ENDPOINT` - Collector endpoint (default: http://localhost:4317)
/// - `OTEL_SERVICE_NAME` - Service name (default: worker-convert)
pub fn init_telemetry() -> Result<(), Box<dyn std::error::Error>> {
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::Config;

    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4317".to_string());

    let service_name = std::env::var("OTEL_SERVICE_NAME")
        .unwrap_or_else(|_| TRACER_NAME.to_string());

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(&endpoint),
        )
        .with_trace_config(Config::default().with_resource(
            opentelemetry_sdk::Resource::new(vec![
                KeyValue::new("service.name", service_name),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            ]),
        ))
        .install_batch(opentelemetry_sdk::runtime::Tokio)?;

    global::set_tracer_provider(tracer.provider().ok_or("tracer has no provider")?);

    info!("Telemetry initialized: endpoint={}", endpoint);
    Ok(())
}

/// Flushes pending spans. Call before process exit.
pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;
    use std::path::PathBuf;

    #[test]
    fn test_record_job_telemetry() {
        let mut job = JobRecord::new("svg-to-pdf", "a.pdf");
        job.start().unwrap();
        job.succeed(PathBuf::from("/tmp/a.pdf")).unwrap();

        // No provider installed: the global no-op tracer must not panic.
        record_job_telemetry(&job);
    }

    #[test]
    fn test_record_failed_job() {
        let mut job = JobRecord::new("svg-to-pdf", "a.pdf");
        job.start().unwrap();
        job.fail(JobError::bad_input("Test error")).unwrap();

        record_job_telemetry(&job);
    }

    #[test]
    fn test_record_sweep() {
        record_sweep_telemetry(&SweepReport {
            records_removed: 2,
            files_removed: 1,
            errors: 0,
        });
    }
}
