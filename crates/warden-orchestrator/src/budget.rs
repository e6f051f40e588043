//! Budget & Ledger (C11): thin queries atop `warden_storage::LedgerRepo`.
//! No runtime state lives here — every figure is recomputed from the
//! ledger, the limit and thresholds come from configuration alone.

use chrono::{TimeZone, Utc};
use warden_storage::{LedgerRepo, Pool};
use warden_types::{PersistError, TokenScope};

use crate::config::OrchestratorConfig;

#[derive(Debug, Clone, Copy)]
pub struct BudgetStatus {
    pub used_today: i64,
    pub limit: i64,
    pub remaining: i64,
    pub ratio: f64,
}

impl BudgetStatus {
    pub fn is_warn(&self, config: &OrchestratorConfig) -> bool {
        self.ratio >= config.budget_warn_ratio
    }

    pub fn is_critical(&self, config: &OrchestratorConfig) -> bool {
        self.ratio >= config.budget_critical_ratio
    }
}

/// Today's `scope=proactive` usage against the configured daily limit.
pub async fn proactive_status(pool: &Pool, config: &OrchestratorConfig) -> Result<BudgetStatus, PersistError> {
    let ledger = LedgerRepo::new(pool);
    let used = ledger.usage_since(TokenScope::Proactive, today_midnight_utc()).await?;
    let limit = config.proactive_daily_limit;
    let remaining = (limit - used).max(0);
    let ratio = if limit > 0 { used as f64 / limit as f64 } else { 0.0 };
    Ok(BudgetStatus { used_today: used, limit, remaining, ratio })
}

/// `remaining(scope)` per §4.11: bounded for proactive, effectively
/// unbounded for reactive (no ceiling is ever enforced there).
pub async fn remaining(pool: &Pool, config: &OrchestratorConfig, scope: TokenScope) -> Result<i64, PersistError> {
    match scope {
        TokenScope::Proactive => Ok(proactive_status(pool, config).await?.remaining),
        TokenScope::Reactive => Ok(i64::MAX),
    }
}

fn today_midnight_utc() -> chrono::DateTime<Utc> {
    use chrono::Datelike;
    let now = Utc::now();
    Utc.with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0).single().unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_storage::Pool as StoragePool;

    fn config() -> OrchestratorConfig {
        OrchestratorConfig {
            proactive_daily_limit: 1_000,
            proactive_budget_floor: 100,
            budget_warn_ratio: 0.8,
            budget_critical_ratio: 0.95,
            scheduler_min_interval_secs: 60,
            scheduler_max_interval_secs: 3600,
            task_attempt_timeout_secs: 600,
            ask_master_timeout_secs: 3600,
            restart_delay_secs: 5,
            source_root: std::path::PathBuf::from("./crates"),
            rate_limit_default_cooldown_secs: 3600,
        }
    }

    #[tokio::test]
    async fn ratio_crosses_warn_then_critical_thresholds() {
        let dir = tempfile::tempdir().unwrap();
        let pool = StoragePool::open(dir.path().join("warden.db"), 1, 2).unwrap();
        let ledger = LedgerRepo::new(&pool);
        let cfg = config();

        let status = proactive_status(&pool, &cfg).await.unwrap();
        assert!(!status.is_warn(&cfg));

        ledger.record(TokenScope::Proactive, "openai", 800, 50, serde_json::json!({})).await.unwrap();
        let status = proactive_status(&pool, &cfg).await.unwrap();
        assert!(status.is_warn(&cfg));
        assert!(!status.is_critical(&cfg));

        ledger.record(TokenScope::Proactive, "openai", 200, 0, serde_json::json!({})).await.unwrap();
        let status = proactive_status(&pool, &cfg).await.unwrap();
        assert!(status.is_critical(&cfg));
        assert_eq!(status.remaining, 0);
    }

    #[tokio::test]
    async fn reactive_scope_is_unbounded() {
        let dir = tempfile::tempdir().unwrap();
        let pool = StoragePool::open(dir.path().join("warden.db"), 1, 2).unwrap();
        let cfg = config();
        assert_eq!(remaining(&pool, &cfg, TokenScope::Reactive).await.unwrap(), i64::MAX);
    }
}
