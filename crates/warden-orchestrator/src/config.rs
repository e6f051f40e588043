//! Scheduler, budget, and self-modification knobs for the proactive loop
//! (C14). Env-var-first, mirroring `warden_core::CoreConfig`'s `from_env()`
//! shape.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Daily token budget for `scope=proactive` (§4.11).
    pub proactive_daily_limit: i64,
    /// Hard floor below which the scheduler "meditates" instead of acting (§4.7).
    pub proactive_budget_floor: i64,
    pub budget_warn_ratio: f64,
    pub budget_critical_ratio: f64,
    pub scheduler_min_interval_secs: u64,
    pub scheduler_max_interval_secs: u64,
    /// Per-attempt timeout for the task executor backend call (§4.6).
    pub task_attempt_timeout_secs: u64,
    /// Timeout for the `ask_master` action's approval poll (§4.9).
    pub ask_master_timeout_secs: u64,
    /// Grace delay before a self-modification restart takes effect (§4.6).
    pub restart_delay_secs: u64,
    /// Root directory whose contents are digested to detect self-modification.
    pub source_root: PathBuf,
    /// Default rate-limit cooldown when a provider error carries no reset time (§4.7).
    pub rate_limit_default_cooldown_secs: u64,
}

impl OrchestratorConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            proactive_daily_limit: env_i64("WARDEN_PROACTIVE_DAILY_LIMIT", 200_000)?,
            proactive_budget_floor: env_i64("WARDEN_PROACTIVE_BUDGET_FLOOR", 10_000)?,
            budget_warn_ratio: env_f64("WARDEN_BUDGET_WARN_RATIO", 0.8)?,
            budget_critical_ratio: env_f64("WARDEN_BUDGET_CRITICAL_RATIO", 0.95)?,
            scheduler_min_interval_secs: env_u64("WARDEN_SCHEDULER_MIN_INTERVAL_SECS", 60)?,
            scheduler_max_interval_secs: env_u64("WARDEN_SCHEDULER_MAX_INTERVAL_SECS", 3600)?,
            task_attempt_timeout_secs: env_u64("WARDEN_TASK_ATTEMPT_TIMEOUT_SECS", 600)?,
            ask_master_timeout_secs: env_u64("WARDEN_ASK_MASTER_TIMEOUT_SECS", 3600)?,
            restart_delay_secs: env_u64("WARDEN_RESTART_DELAY_SECS", 5)?,
            source_root: std::env::var("WARDEN_SOURCE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./crates")),
            rate_limit_default_cooldown_secs: env_u64("WARDEN_RATE_LIMIT_DEFAULT_COOLDOWN_SECS", 3600)?,
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

fn env_f64(name: &str, default: f64) -> anyhow::Result<f64> {
    match std::env::var(name) {
        Ok(v) => v.parse().map_err(|_| anyhow::anyhow!("{name} must be a number")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_env_unset() {
        std::env::remove_var("WARDEN_PROACTIVE_DAILY_LIMIT");
        std::env::remove_var("WARDEN_BUDGET_WARN_RATIO");
        let config = OrchestratorConfig::from_env().unwrap();
        assert_eq!(config.proactive_daily_limit, 200_000);
        assert_eq!(config.budget_warn_ratio, 0.8);
    }

    #[test]
    fn rejects_non_numeric_override() {
        std::env::set_var("WARDEN_BUDGET_CRITICAL_RATIO", "not-a-number");
        let result = OrchestratorConfig::from_env();
        std::env::remove_var("WARDEN_BUDGET_CRITICAL_RATIO");
        assert!(result.is_err());
    }
}
