//! Engine configuration
//!
//! All orchestration tunables flow through this struct so that worker
//! concurrency, retention caps, and sweep timings can be adjusted per
//! deployment without code changes.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{EngineError, Result};

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of concurrent build workers draining the queue
    pub worker_concurrency: usize,

    /// Maximum build log entries retained per build (FIFO eviction)
    pub log_cap: usize,

    /// Automatic retry attempts for transient queue-level failures
    pub retry_attempts: u32,

    /// Ceiling on how long a build may stay RUNNING before the sweep
    /// force-fails it
    pub build_timeout: Duration,

    /// How often the timeout/stuck-status sweeps run
    pub sweep_interval: Duration,

    /// Push events with at least this many commits bypass the monorepo
    /// base-dir diff check
    pub monorepo_commit_threshold: usize,

    /// Commit-message marker that suppresses webhook-triggered builds
    pub skip_marker: String,

    /// Root directory for per-container build workspaces and artifacts
    pub data_dir: PathBuf,
}

impl EngineConfig {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            worker_concurrency: 1,
            log_cap: 5000,
            retry_attempts: 3,
            build_timeout: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
            monorepo_commit_threshold: 20,
            skip_marker: "[skip ci]".to_string(),
            data_dir,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - DRYDOCK_DATA_DIR (optional, default: /var/lib/drydock)
    /// - WORKER_CONCURRENCY (optional, default: 1)
    /// - BUILD_LOG_CAP (optional, default: 5000)
    /// - RETRY_ATTEMPTS (optional, default: 3)
    /// - BUILD_TIMEOUT (optional, seconds, default: 3600)
    /// - SWEEP_INTERVAL (optional, seconds, default: 60)
    /// - MONOREPO_COMMIT_THRESHOLD (optional, default: 20)
    /// - SKIP_MARKER (optional, default: "[skip ci]")
    pub fn from_env() -> Result<Self> {
        let data_dir = std::env::var("DRYDOCK_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/var/lib/drydock"));

        let mut config = Self::new(data_dir);

        if let Some(n) = env_parse::<usize>("WORKER_CONCURRENCY") {
            config.worker_concurrency = n;
        }
        if let Some(n) = env_parse::<usize>("BUILD_LOG_CAP") {
            config.log_cap = n;
        }
        if let Some(n) = env_parse::<u32>("RETRY_ATTEMPTS") {
            config.retry_attempts = n;
        }
        if let Some(n) = env_parse::<u64>("BUILD_TIMEOUT") {
            config.build_timeout = Duration::from_secs(n);
        }
        if let Some(n) = env_parse::<u64>("SWEEP_INTERVAL") {
            config.sweep_interval = Duration::from_secs(n);
        }
        if let Some(n) = env_parse::<usize>("MONOREPO_COMMIT_THRESHOLD") {
            config.monorepo_commit_threshold = n;
        }
        if let Ok(marker) = std::env::var("SKIP_MARKER") {
            config.skip_marker = marker;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.worker_concurrency == 0 {
            return Err(EngineError::Validation(
                "worker_concurrency must be greater than 0".into(),
            ));
        }
        if self.log_cap == 0 {
            return Err(EngineError::Validation(
                "log_cap must be greater than 0".into(),
            ));
        }
        if self.build_timeout.as_secs() == 0 {
            return Err(EngineError::Validation(
                "build_timeout must be greater than 0".into(),
            ));
        }
        if self.sweep_interval.as_secs() == 0 {
            return Err(EngineError::Validation(
                "sweep_interval must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse::<T>().ok())
}
