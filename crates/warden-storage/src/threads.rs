use rusqlite::{params, OptionalExtension};
use warden_types::{Id, PersistError, Thread};

use crate::codec::{str_to_ts, ts_to_str};
use crate::err::map_sql;
use crate::pool::Pool;

pub struct ThreadRepo<'a> {
    pool: &'a Pool,
}

impl<'a> ThreadRepo<'a> {
    pub fn new(pool: &'a Pool) -> Self {
        Self { pool }
    }

    /// Finds the thread for a `(platform, external_chat_id)` pair, creating
    /// it on first contact. This is the single entry point ingestion (C2)
    /// uses to resolve a thread id from an inbound webhook payload.
    pub async fn get_or_create(
        &self,
        platform: &str,
        external_chat_id: &str,
    ) -> Result<Thread, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        let existing = conn
            .query_row(
                "SELECT id, platform, external_chat_id, created_at, updated_at
                 FROM chat_threads WHERE platform = ?1 AND external_chat_id = ?2",
                params![platform, external_chat_id],
                row_to_thread,
            )
            .optional()
            .map_err(map_sql)?;

        if let Some(thread) = existing {
            return Ok(thread);
        }

        let thread = Thread {
            id: Id::new_v4(),
            platform: platform.to_string(),
            external_chat_id: external_chat_id.to_string(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        let result = conn.execute(
            "INSERT INTO chat_threads (id, platform, external_chat_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                thread.id.to_string(),
                thread.platform,
                thread.external_chat_id,
                ts_to_str(thread.created_at),
                ts_to_str(thread.updated_at),
            ],
        );

        match result {
            Ok(_) => Ok(thread),
            // Lost a race with a concurrent webhook for the same chat; the
            // other writer's row is now authoritative.
            Err(e) if matches!(map_sql(e), PersistError::Conflict(_)) => conn
                .query_row(
                    "SELECT id, platform, external_chat_id, created_at, updated_at
                     FROM chat_threads WHERE platform = ?1 AND external_chat_id = ?2",
                    params![platform, external_chat_id],
                    row_to_thread,
                )
                .map_err(map_sql),
            Err(e) => Err(map_sql(e)),
        }
    }

    pub async fn get(&self, id: Id) -> Result<Thread, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        conn.query_row(
            "SELECT id, platform, external_chat_id, created_at, updated_at
             FROM chat_threads WHERE id = ?1",
            params![id.to_string()],
            row_to_thread,
        )
        .map_err(map_sql)
    }

    pub async fn touch(&self, id: Id) -> Result<(), PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        conn.execute(
            "UPDATE chat_threads SET updated_at = ?2 WHERE id = ?1",
            params![id.to_string(), ts_to_str(chrono::Utc::now())],
        )
        .map_err(map_sql)?;
        Ok(())
    }
}

fn row_to_thread(row: &rusqlite::Row<'_>) -> rusqlite::Result<Thread> {
    let id: String = row.get(0)?;
    Ok(Thread {
        id: id.parse().map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, "bad uuid".into())
        })?,
        platform: row.get(1)?,
        external_chat_id: row.get(2)?,
        created_at: str_to_ts(3, &row.get::<_, String>(3)?)?,
        updated_at: str_to_ts(4, &row.get::<_, String>(4)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> Pool {
        let dir = tempfile::tempdir().unwrap();
        Pool::open(dir.path().join("warden.db"), 1, 2).unwrap()
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let pool = test_pool().await;
        let repo = ThreadRepo::new(&pool);
        let a = repo.get_or_create("telegram", "1001").await.unwrap();
        let b = repo.get_or_create("telegram", "1001").await.unwrap();
        assert_eq!(a.id, b.id);
        let c = repo.get_or_create("telegram", "1002").await.unwrap();
        assert_ne!(a.id, c.id);
    }
}
