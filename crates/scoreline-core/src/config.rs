//! Configuration and data directory management.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Read and parse an environment variable, falling back to `default` when it
/// is missing or malformed.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                warn!("Ignoring invalid value for {}: {:?}", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}

/// Upstream provider connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    /// Never serialized into status output.
    #[serde(skip_serializing, default)]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api/v1".into(),
            api_key: None,
            timeout_secs: 10,
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Request governor: token bucket, circuit breaker and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorConfig {
    /// Burst capacity.
    pub max_tokens: u32,
    pub refill_per_sec: f64,
    pub failure_threshold: u32,
    pub failure_window_secs: u64,
    pub open_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            max_tokens: 5,
            refill_per_sec: 1.0,
            failure_threshold: 5,
            failure_window_secs: 60,
            open_secs: 120,
            max_retries: 2,
            backoff_base_ms: 500,
            backoff_max_ms: 8_000,
        }
    }
}

/// Staleness detector thresholds and recovery ladder policy, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub interval_secs: u64,
    pub live_idle_secs: i64,
    pub intermission_secs: i64,
    pub second_phase_no_progress_secs: i64,
    pub interrupted_secs: i64,
    /// How long past its scheduled start a pre-match record may sit.
    pub should_be_active_grace_secs: i64,
    pub cooldown_secs: i64,
    pub auto_terminate_secs: i64,
    pub cooldown_retention_secs: i64,
    /// Records scheduled further back than this are ignored by the scan.
    pub lookback_secs: i64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            live_idle_secs: 120,
            intermission_secs: 900,
            second_phase_no_progress_secs: 180,
            interrupted_secs: 1_800,
            should_be_active_grace_secs: 600,
            cooldown_secs: 300,
            auto_terminate_secs: 7_200,
            cooldown_retention_secs: 3_600,
            lookback_secs: 12 * 3_600,
        }
    }
}

/// Reconcile queue drain policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub drain_interval_ms: u64,
    pub batch_limit: usize,
    pub inter_item_delay_ms: u64,
    pub max_pending: usize,
    pub max_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            drain_interval_ms: 1_000,
            batch_limit: 10,
            inter_item_delay_ms: 250,
            max_pending: 5_000,
            max_attempts: 5,
        }
    }
}

impl QueueConfig {
    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    pub fn inter_item_delay(&self) -> Duration {
        Duration::from_millis(self.inter_item_delay_ms)
    }
}

/// Cadences for the producer scans that feed the reconcile queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    pub live_interval_secs: u64,
    pub upcoming_interval_secs: u64,
    /// How far ahead of its scheduled start a record becomes interesting.
    pub upcoming_window_secs: i64,
    pub change_feed_interval_secs: u64,
    pub job_timeout_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            live_interval_secs: 15,
            upcoming_interval_secs: 60,
            upcoming_window_secs: 15 * 60,
            change_feed_interval_secs: 10,
            job_timeout_secs: 120,
        }
    }
}

/// Top-level Scoreline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorelineConfig {
    /// Operational HTTP port.
    pub port: u16,
    pub data_dir: PathBuf,
    /// SQLite database file (`<data_dir>/scoreline.db`).
    pub db_path: PathBuf,
    pub lock_ttl_secs: i64,
    pub upstream: UpstreamConfig,
    pub governor: GovernorConfig,
    pub detector: DetectorConfig,
    pub queue: QueueConfig,
    pub scans: ScanConfig,
}

impl ScorelineConfig {
    /// Defaults rooted at `data_dir`, without touching the environment.
    pub fn with_data_dir(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref().to_path_buf();
        Self {
            port: 3004,
            db_path: data_dir.join("scoreline.db"),
            data_dir,
            lock_ttl_secs: 30,
            upstream: UpstreamConfig::default(),
            governor: GovernorConfig::default(),
            detector: DetectorConfig::default(),
            queue: QueueConfig::default(),
            scans: ScanConfig::default(),
        }
    }

    /// Create configuration from environment and defaults. Creates the data
    /// directory if needed.
    pub fn from_env(data_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        std::fs::create_dir_all(data_dir.as_ref())?;
        let mut config = Self::with_data_dir(data_dir);

        config.port = env_or("PORT", config.port);
        config.lock_ttl_secs = env_or("SCORELINE_LOCK_TTL_SECS", config.lock_ttl_secs);

        let up = &mut config.upstream;
        up.base_url = env_or("UPSTREAM_BASE_URL", up.base_url.clone());
        up.api_key = std::env::var("UPSTREAM_API_KEY").ok().filter(|k| !k.is_empty());
        up.timeout_secs = env_or("UPSTREAM_TIMEOUT_SECS", up.timeout_secs);

        let gov = &mut config.governor;
        gov.max_tokens = env_or("GOVERNOR_MAX_TOKENS", gov.max_tokens);
        gov.refill_per_sec = env_or("GOVERNOR_REFILL_PER_SEC", gov.refill_per_sec);
        gov.failure_threshold = env_or("GOVERNOR_FAILURE_THRESHOLD", gov.failure_threshold);
        gov.failure_window_secs = env_or("GOVERNOR_FAILURE_WINDOW_SECS", gov.failure_window_secs);
        gov.open_secs = env_or("GOVERNOR_OPEN_SECS", gov.open_secs);
        gov.max_retries = env_or("GOVERNOR_MAX_RETRIES", gov.max_retries);
        gov.backoff_base_ms = env_or("GOVERNOR_BACKOFF_MS", gov.backoff_base_ms);

        let det = &mut config.detector;
        det.interval_secs = env_or("DETECTOR_INTERVAL_SECS", det.interval_secs);
        det.cooldown_secs = env_or("detector.cooldown_secs", det.cooldown_secs);
        det.auto_terminate_secs = env_or("DETECTOR_AUTO_TERMINATE_SECS", det.auto_terminate_secs);

        let queue = &mut config.queue;
        queue.batch_limit = env_or("QUEUE_BATCH_LIMIT", queue.batch_limit);
        queue.inter_item_delay_ms = env_or("QUEUE_ITEM_DELAY_MS", queue.inter_item_delay_ms);
        queue.max_pending = env_or("QUEUE_MAX_PENDING", queue.max_pending);

        config.validate();
        Ok(config)
    }

    /// Clamp values that would stall or divide by zero.
    fn validate(&mut self) {
        if self.governor.refill_per_sec <= 0.0 || !self.governor.refill_per_sec.is_finite() {
            warn!("GOVERNOR_REFILL_PER_SEC must be positive, using 1.0");
            self.governor.refill_per_sec = 1.0;
        }
        if self.governor.max_tokens == 0 {
            warn!("GOVERNOR_MAX_TOKENS must be at least 1");
            self.governor.max_tokens = 1;
        }
        if self.queue.batch_limit == 0 {
            self.queue.batch_limit = 1;
        }

        // Zero periods panic in `tokio::time::interval`.
        at_least("detector.interval_secs", &mut self.detector.interval_secs, 1);
        at_least("detector.cooldown_secs", &mut self.detector.cooldown_secs, 1);
        at_least("queue.drain_interval_ms", &mut self.queue.drain_interval_ms, 1);
        at_least("scans.live_interval_secs", &mut self.scans.live_interval_secs, 1);
        at_least("scans.upcoming_interval_secs", &mut self.scans.upcoming_interval_secs, 1);
        at_least("scans.change_feed_interval_secs", &mut self.scans.change_feed_interval_secs, 1);
        at_least("scans.job_timeout_secs", &mut self.scans.job_timeout_secs, 1);
        at_least("upstream.timeout_secs", &mut self.upstream.timeout_secs, 1);
    }
}

fn at_least<T: PartialOrd + Copy + std::fmt::Display>(key: &str, value: &mut T, min: T) {
    if *value < min {
        warn!("{} must be at least {}, using {}", key, min, min);
        *value = min;
    }
}
