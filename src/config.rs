//! Configuration, loaded from environment variables at startup.

use std::path::PathBuf;
use std::time::Duration;

/// Settings for the job engine itself: pool, queue, artifacts, reaper.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory artifacts are written to and served from.
    pub output_dir: PathBuf,
    /// Number of concurrent worker slots.
    pub workers: usize,
    /// Optional bound on pending jobs; `None` means unbounded.
    pub queue_capacity: Option<usize>,
    /// Optional wall-clock limit per conversion.
    pub job_timeout: Option<Duration>,
    /// How long finished artifacts are kept.
    pub retention: Duration,
    /// Reaper tick. `None` disables the periodic reaper; forced sweeps
    /// still work.
    pub reaper_interval: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output_dir: std::env::temp_dir().join("worker-convert"),
            workers: 4,
            queue_capacity: None,
            job_timeout: None,
            retention: Duration::from_secs(24 * 3600),
            reaper_interval: Some(Duration::from_secs(300)),
        }
    }
}

impl EngineConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: Option<usize>) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_reaper_interval(mut self, interval: Option<Duration>) -> Self {
        self.reaper_interval = interval;
        self
    }
}

/// Runtime configuration for the service binary.
///
/// Every field has a default so the service starts without any environment
/// variables set. The admin surface stays closed unless `WORKER_ADMIN_KEY`
/// is provided.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:8080"`).
    pub bind_address: String,
    /// Shared secret for `/admin` routes.
    pub admin_key: Option<String>,
    /// Maximum accepted submission body size in bytes.
    pub max_upload_bytes: usize,
    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,
    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,
    pub engine: EngineConfig,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = EngineConfig::default();
        let engine = EngineConfig {
            output_dir: std::env::var("WORKER_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            workers: parse_env("WORKER_CONCURRENCY", defaults.workers).max(1),
            queue_capacity: parse_opt_env("WORKER_QUEUE_CAPACITY"),
            job_timeout: parse_opt_env("WORKER_JOB_TIMEOUT_SECS").map(Duration::from_secs),
            retention: Duration::from_secs(parse_env("WORKER_RETENTION_HOURS", 24u64) * 3600),
            reaper_interval: Some(Duration::from_secs(
                parse_env("WORKER_REAPER_INTERVAL_SECS", 300u64).max(1),
            )),
        };

        Self {
            bind_address: env_or("WORKER_BIND", "0.0.0.0:8080"),
            admin_key: std::env::var("WORKER_ADMIN_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            max_upload_bytes: parse_env("WORKER_MAX_UPLOAD_BYTES", 50 * 1024 * 1024),
            log_level: env_or("WORKER_LOG", "info"),
            log_json: std::env::var("WORKER_LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            engine,
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    parse_opt_env(key).unwrap_or(default)
}

fn parse_opt_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.workers, 4);
        assert!(config.queue_capacity.is_none());
        assert!(config.job_timeout.is_none());
        assert_eq!(config.retention, Duration::from_secs(86400));
    }

    #[test]
    fn test_builder_methods() {
        let config = EngineConfig::new("/srv/out")
            .with_workers(2)
            .with_queue_capacity(Some(10))
            .with_job_timeout(Some(Duration::from_secs(30)))
            .with_retention(Duration::ZERO)
            .with_reaper_interval(None);

        assert_eq!(config.output_dir, PathBuf::from("/srv/out"));
        assert_eq!(config.workers, 2);
        assert_eq!(config.queue_capacity, Some(10));
        assert_eq!(config.job_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.retention, Duration::ZERO);
        assert!(config.reaper_interval.is_none());
    }
}
