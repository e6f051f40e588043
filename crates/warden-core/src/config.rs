//! Timing and sizing knobs for the reactive worker and media processor
//! (C14). Env-var-first, mirroring `warden_channels::ChannelsConfig`'s
//! `from_env()` shape.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Messages loaded into the classify/execute conversation window (§4.3).
    pub context_window: i64,
    pub classify_timeout_secs: u64,
    pub executor_timeout_secs: u64,
    /// Total wait for an approval to resolve before giving up (§5).
    pub approval_timeout_secs: u64,
    pub reactive_poll_min_ms: u64,
    pub reactive_poll_max_ms: u64,
    pub media_poll_interval_secs: u64,
    pub media_batch_size: i64,
    pub media_max_attempts: i64,
    pub blob_store_root: PathBuf,
}

impl CoreConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            context_window: env_i64("WARDEN_CONTEXT_WINDOW", 30)?,
            classify_timeout_secs: env_u64("WARDEN_CLASSIFY_TIMEOUT_SECS", 30)?,
            executor_timeout_secs: env_u64("WARDEN_EXECUTOR_TIMEOUT_SECS", 120)?,
            approval_timeout_secs: env_u64("WARDEN_APPROVAL_TIMEOUT_SECS", 3600)?,
            reactive_poll_min_ms: env_u64("WARDEN_REACTIVE_POLL_MIN_MS", 50)?,
            reactive_poll_max_ms: env_u64("WARDEN_REACTIVE_POLL_MAX_MS", 200)?,
            media_poll_interval_secs: env_u64("WARDEN_MEDIA_POLL_INTERVAL_SECS", 5)?,
            media_batch_size: env_i64("WARDEN_MEDIA_BATCH_SIZE", 10)?,
            media_max_attempts: env_i64("WARDEN_MEDIA_MAX_ATTEMPTS", 3)?,
            blob_store_root: std::env::var("WARDEN_BLOB_STORE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data/blobs")),
        })
    }
}

fn env_u64(name: &str, default: u64) -> anyhow::Result<u64> {
    match std::env::var(name) {
        Ok(v) => v.parse().map_err(|_| anyhow::anyhow!("{name} must be a non-negative integer")),
        Err(_) => Ok(default),
    }
}

fn env_i64(name: &str, default: i64) -> anyhow::Result<i64> {
    match std::env::var(name) {
        Ok(v) => v.parse().map_err(|_| anyhow::anyhow!("{name} must be an integer")),
        Err(_) => Ok(default),
    }
}
