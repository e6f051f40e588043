use rusqlite::params;
use warden_types::{Id, PersistError};

use crate::codec::{json_to_str, str_to_json, str_to_ts, ts_to_str};
use crate::err::map_sql;
use crate::pool::Pool;

/// The two kinds of rows the proactive loop appends: `cycle_summary`
/// (what the last decision cycle did) and `prompt_aroma` (a small snapshot
/// biasing the next cycle's prompt).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKind {
    CycleSummary,
    PromptAroma,
}

impl MemoryKind {
    fn as_str(self) -> &'static str {
        match self {
            MemoryKind::CycleSummary => "cycle_summary",
            MemoryKind::PromptAroma => "prompt_aroma",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "cycle_summary" => Some(MemoryKind::CycleSummary),
            "prompt_aroma" => Some(MemoryKind::PromptAroma),
            _ => None,
        }
    }
}

pub struct MemoryEntry {
    pub id: Id,
    pub kind: MemoryKind,
    pub payload: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

pub struct MemoryRepo<'a> {
    pool: &'a Pool,
}

impl<'a> MemoryRepo<'a> {
    pub fn new(pool: &'a Pool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, kind: MemoryKind, payload: serde_json::Value) -> Result<MemoryEntry, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        let entry = MemoryEntry {
            id: Id::new_v4(),
            kind,
            payload,
            created_at: chrono::Utc::now(),
        };
        conn.execute(
            "INSERT INTO memory_entries (id, kind, payload, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![entry.id.to_string(), kind.as_str(), json_to_str(&entry.payload)?, ts_to_str(entry.created_at)],
        )
        .map_err(map_sql)?;
        Ok(entry)
    }

    /// Most recent `limit` entries of `kind`, newest first — the window the
    /// proactive prompt builder reads before asking the provider what to do
    /// next.
    pub async fn recent(&self, kind: MemoryKind, limit: i64) -> Result<Vec<MemoryEntry>, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        let mut stmt = conn
            .prepare(
                "SELECT id, kind, payload, created_at FROM memory_entries
                 WHERE kind = ?1 ORDER BY created_at DESC LIMIT ?2",
            )
            .map_err(map_sql)?;
        let rows = stmt
            .query_map(params![kind.as_str(), limit], row_to_entry)
            .map_err(map_sql)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql)
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryEntry> {
    let id: String = row.get(0)?;
    let kind: String = row.get(1)?;
    let payload: String = row.get(2)?;
    Ok(MemoryEntry {
        id: id.parse().map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, "bad uuid".into())
        })?,
        kind: MemoryKind::parse(&kind).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, "bad memory kind".into())
        })?,
        payload: str_to_json(2, &payload)?,
        created_at: str_to_ts(3, &row.get::<_, String>(3)?)?,
    })
}
