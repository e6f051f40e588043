use rusqlite::params;
use warden_types::{Id, Message, MessageRole, PersistError};

use crate::codec::{enum_to_str, json_to_str, str_to_enum, str_to_json, str_to_ts, ts_to_str};
use crate::err::map_sql;
use crate::pool::Pool;

pub struct MessageRepo<'a> {
    pool: &'a Pool,
}

impl<'a> MessageRepo<'a> {
    pub fn new(pool: &'a Pool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, message: &Message) -> Result<(), PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        conn.execute(
            "INSERT INTO chat_messages
                (id, thread_id, external_message_id, role, author_id, text, raw_payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                message.id.to_string(),
                message.thread_id.to_string(),
                message.external_message_id,
                enum_to_str(&message.role)?,
                message.author_id,
                message.text,
                json_to_str(&message.raw_payload)?,
                ts_to_str(message.created_at),
            ],
        )
        .map_err(map_sql)?;
        Ok(())
    }

    pub async fn get(&self, id: Id) -> Result<Message, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        conn.query_row(
            "SELECT id, thread_id, external_message_id, role, author_id, text, raw_payload, created_at
             FROM chat_messages WHERE id = ?1",
            params![id.to_string()],
            row_to_message,
        )
        .map_err(map_sql)
    }

    /// Total message count across all threads, surfaced by `GET /stats`.
    pub async fn count_all(&self) -> Result<i64, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        conn.query_row("SELECT COUNT(*) FROM chat_messages", [], |row| row.get(0)).map_err(map_sql)
    }

    /// Most-recent-first window used to build conversation context for a job.
    pub async fn recent_for_thread(&self, thread_id: Id, limit: i64) -> Result<Vec<Message>, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        let mut stmt = conn
            .prepare(
                "SELECT id, thread_id, external_message_id, role, author_id, text, raw_payload, created_at
                 FROM chat_messages WHERE thread_id = ?1
                 ORDER BY created_at DESC LIMIT ?2",
            )
            .map_err(map_sql)?;
        let rows = stmt
            .query_map(params![thread_id.to_string(), limit], row_to_message)
            .map_err(map_sql)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id: String = row.get(0)?;
    let thread_id: String = row.get(1)?;
    let role: String = row.get(3)?;
    let raw_payload: String = row.get(6)?;
    Ok(Message {
        id: id.parse().map_err(|_| bad_uuid(0))?,
        thread_id: thread_id.parse().map_err(|_| bad_uuid(1))?,
        external_message_id: row.get(2)?,
        role: str_to_enum::<MessageRole>(3, &role)?,
        author_id: row.get(4)?,
        text: row.get(5)?,
        raw_payload: str_to_json(6, &raw_payload)?,
        created_at: str_to_ts(7, &row.get::<_, String>(7)?)?,
    })
}

fn bad_uuid(column: usize) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, "bad uuid".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threads::ThreadRepo;
    use serde_json::json;

    async fn test_pool() -> Pool {
        let dir = tempfile::tempdir().unwrap();
        Pool::open(dir.path().join("warden.db"), 1, 2).unwrap()
    }

    #[tokio::test]
    async fn inserts_and_orders_recent_messages() {
        let pool = test_pool().await;
        let thread = ThreadRepo::new(&pool).get_or_create("telegram", "42").await.unwrap();
        let repo = MessageRepo::new(&pool);

        for i in 0..3 {
            let msg = Message {
                id: Id::new_v4(),
                thread_id: thread.id,
                external_message_id: Some(i.to_string()),
                role: MessageRole::User,
                author_id: Some("u1".into()),
                text: Some(format!("msg {i}")),
                raw_payload: json!({"i": i}),
                created_at: chrono::Utc::now() + chrono::Duration::seconds(i),
            };
            repo.insert(&msg).await.unwrap();
        }

        let recent = repo.recent_for_thread(thread.id, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].text.as_deref(), Some("msg 2"));

        assert_eq!(repo.count_all().await.unwrap(), 3);
    }
}
