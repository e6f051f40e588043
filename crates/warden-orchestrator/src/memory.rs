//! Memory (C10): append-only cycle summaries and "prompt aroma" snapshots,
//! backed by `warden_storage::MemoryRepo`. Retrieval always reads back
//! newest-first, which is what biases the next cycle's prompt.

use serde_json::{json, Value};
use warden_storage::{MemoryEntry, MemoryKind, MemoryRepo, Pool};
use warden_types::PersistError;

pub const DEFAULT_RECENT_LIMIT: i64 = 10;

/// One entry per finished proactive cycle (§4.9's closing line: "the
/// scheduler writes a cycle summary to Memory keyed off" the handler's
/// result dictionary).
pub struct CycleSummary {
    pub action: String,
    pub certainty: f64,
    pub significance: f64,
    pub result_status: String,
    pub result_summary: String,
}

pub async fn record_cycle(pool: &Pool, summary: CycleSummary) -> Result<MemoryEntry, PersistError> {
    let payload = json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "action": summary.action,
        "certainty": summary.certainty,
        "significance": summary.significance,
        "result_status": summary.result_status,
        "result_summary": summary.result_summary,
    });
    MemoryRepo::new(pool).append(MemoryKind::CycleSummary, payload).await
}

/// A small snapshot of "what I was just doing" that gets folded into the
/// next proactive prompt, separate from the durable cycle log.
pub async fn record_aroma(pool: &Pool, last_action: &str, current_focus: &str) -> Result<MemoryEntry, PersistError> {
    let payload = json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "last_action": last_action,
        "current_focus": current_focus,
    });
    MemoryRepo::new(pool).append(MemoryKind::PromptAroma, payload).await
}

pub async fn recent_cycles(pool: &Pool, limit: i64) -> Result<Vec<Value>, PersistError> {
    Ok(MemoryRepo::new(pool)
        .recent(MemoryKind::CycleSummary, limit)
        .await?
        .into_iter()
        .map(|e| e.payload)
        .collect())
}

pub async fn recent_aroma(pool: &Pool, limit: i64) -> Result<Vec<Value>, PersistError> {
    Ok(MemoryRepo::new(pool)
        .recent(MemoryKind::PromptAroma, limit)
        .await?
        .into_iter()
        .map(|e| e.payload)
        .collect())
}
