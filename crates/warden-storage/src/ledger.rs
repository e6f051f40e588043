use rusqlite::params;
use warden_types::{PersistError, TokenLedgerEntry, TokenScope};

use crate::codec::{enum_to_str, json_to_str, str_to_json, str_to_ts, ts_to_str};
use crate::err::map_sql;
use crate::pool::Pool;

pub struct LedgerRepo<'a> {
    pool: &'a Pool,
}

impl<'a> LedgerRepo<'a> {
    pub fn new(pool: &'a Pool) -> Self {
        Self { pool }
    }

    pub async fn record(
        &self,
        scope: TokenScope,
        provider: &str,
        tokens_input: i64,
        tokens_output: i64,
        meta: serde_json::Value,
    ) -> Result<TokenLedgerEntry, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        let entry = TokenLedgerEntry {
            id: uuid::Uuid::new_v4(),
            scope,
            provider: provider.to_string(),
            tokens_input,
            tokens_output,
            tokens_total: tokens_input + tokens_output,
            meta,
            created_at: chrono::Utc::now(),
        };
        conn.execute(
            "INSERT INTO token_ledger (id, scope, provider, tokens_input, tokens_output, tokens_total, meta, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.id.to_string(),
                enum_to_str(&scope)?,
                provider,
                tokens_input,
                tokens_output,
                entry.tokens_total,
                json_to_str(&entry.meta)?,
                ts_to_str(entry.created_at),
            ],
        )
        .map_err(map_sql)?;
        Ok(entry)
    }

    /// Sums `tokens_total` for a scope since a UTC midnight cutoff, the
    /// figure the proactive budget gate (C9) checks before every cycle.
    pub async fn usage_since(&self, scope: TokenScope, since: chrono::DateTime<chrono::Utc>) -> Result<i64, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        conn.query_row(
            "SELECT COALESCE(SUM(tokens_total), 0) FROM token_ledger WHERE scope = ?1 AND created_at >= ?2",
            params![enum_to_str(&scope)?, ts_to_str(since)],
            |row| row.get(0),
        )
        .map_err(map_sql)
    }

    pub async fn recent(&self, scope: TokenScope, limit: i64) -> Result<Vec<TokenLedgerEntry>, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        let mut stmt = conn
            .prepare(
                "SELECT id, scope, provider, tokens_input, tokens_output, tokens_total, meta, created_at
                 FROM token_ledger WHERE scope = ?1 ORDER BY created_at DESC LIMIT ?2",
            )
            .map_err(map_sql)?;
        let rows = stmt
            .query_map(params![enum_to_str(&scope)?, limit], row_to_entry)
            .map_err(map_sql)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql)
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<TokenLedgerEntry> {
    let id: String = row.get(0)?;
    let scope: String = row.get(1)?;
    let meta: String = row.get(6)?;
    Ok(TokenLedgerEntry {
        id: id.parse().map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, "bad uuid".into())
        })?,
        scope: crate::codec::str_to_enum::<TokenScope>(1, &scope)?,
        provider: row.get(2)?,
        tokens_input: row.get(3)?,
        tokens_output: row.get(4)?,
        tokens_total: row.get(5)?,
        meta: str_to_json(6, &meta)?,
        created_at: str_to_ts(7, &row.get::<_, String>(7)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn usage_since_sums_only_matching_scope() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::open(dir.path().join("warden.db"), 1, 2).unwrap();
        let repo = LedgerRepo::new(&pool);
        let epoch = chrono::DateTime::<chrono::Utc>::from_timestamp(0, 0).unwrap();

        repo.record(TokenScope::Proactive, "openai", 100, 50, serde_json::json!({})).await.unwrap();
        repo.record(TokenScope::Reactive, "openai", 10, 10, serde_json::json!({})).await.unwrap();

        let proactive_total = repo.usage_since(TokenScope::Proactive, epoch).await.unwrap();
        assert_eq!(proactive_total, 150);
    }
}
