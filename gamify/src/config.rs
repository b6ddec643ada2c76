//! Engine configuration
//!
//! Every knob can be set from the environment; unset keys fall back to the
//! defaults below.

use std::time::Duration;

use serde::Deserialize;

/// Tunables for the ingest queue, worker pool, cascades, and retention.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Poll interval for idle workers.
    #[serde(with = "duration_ms")]
    pub processing_interval: Duration,
    /// Number of workers driving the pipeline in parallel.
    pub max_concurrent_processing: usize,
    /// Admission bound of the ingest queue.
    pub max_queue_size: usize,
    /// Retry transiently failed events instead of dropping them.
    pub enable_retry_on_failure: bool,
    /// Retry budget per event.
    pub max_retry_attempts: u32,
    /// Events older than this many days are swept.
    pub retention_days: i64,
    /// Rows deleted per retention batch.
    pub retention_batch_size: usize,
    /// Interval between retention sweeps.
    #[serde(with = "duration_ms")]
    pub cleanup_interval: Duration,
    /// Synthetic events beyond this depth are not re-enqueued.
    pub max_cascade_depth: u32,
    /// Evaluations slower than this are logged and their trace marked degraded.
    pub max_eval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            processing_interval: Duration::from_millis(100),
            max_concurrent_processing: 4,
            max_queue_size: 10_000,
            enable_retry_on_failure: true,
            max_retry_attempts: 3,
            retention_days: 90,
            retention_batch_size: 500,
            cleanup_interval: Duration::from_secs(3600),
            max_cascade_depth: 8,
            max_eval_ms: 250,
        }
    }
}

impl EngineConfig {
    /// Build a configuration from `GAMIFY_*` environment variables, using
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            processing_interval: env_duration_ms(
                "GAMIFY_PROCESSING_INTERVAL_MS",
                d.processing_interval,
            ),
            max_concurrent_processing: env_parse(
                "GAMIFY_MAX_CONCURRENT_PROCESSING",
                d.max_concurrent_processing,
            ),
            max_queue_size: env_parse("GAMIFY_MAX_QUEUE_SIZE", d.max_queue_size),
            enable_retry_on_failure: env_parse(
                "GAMIFY_ENABLE_RETRY_ON_FAILURE",
                d.enable_retry_on_failure,
            ),
            max_retry_attempts: env_parse("GAMIFY_MAX_RETRY_ATTEMPTS", d.max_retry_attempts),
            retention_days: env_parse("GAMIFY_RETENTION_DAYS", d.retention_days),
            retention_batch_size: env_parse(
                "GAMIFY_RETENTION_BATCH_SIZE",
                d.retention_batch_size,
            ),
            cleanup_interval: env_duration_ms("GAMIFY_CLEANUP_INTERVAL_MS", d.cleanup_interval),
            max_cascade_depth: env_parse("GAMIFY_MAX_CASCADE_DEPTH", d.max_cascade_depth),
            max_eval_ms: env_parse("GAMIFY_MAX_EVAL_MS", d.max_eval_ms),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_duration_ms(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
