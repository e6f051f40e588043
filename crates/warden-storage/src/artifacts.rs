use rusqlite::params;
use warden_types::{Artifact, ArtifactKind, ArtifactStatus, Id, PersistError};

use crate::codec::{
    enum_to_str, json_to_str, opt_str_to_ts, str_to_enum, str_to_json, str_to_ts, ts_to_str,
};
use crate::err::map_sql;
use crate::pool::Pool;

pub struct ArtifactRepo<'a> {
    pool: &'a Pool,
}

impl<'a> ArtifactRepo<'a> {
    pub fn new(pool: &'a Pool) -> Self {
        Self { pool }
    }

    /// `uri` carries the platform's opaque file reference (e.g. a Telegram
    /// `file_id`) so the media processor (C5) knows what to fetch — it is
    /// overwritten with a durable storage URI once extraction completes.
    pub async fn insert_pending(&self, message_id: Id, kind: ArtifactKind, uri: Option<&str>) -> Result<Artifact, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        let artifact = Artifact {
            id: Id::new_v4(),
            message_id,
            kind,
            status: ArtifactStatus::Pending,
            attempt_count: 0,
            content: serde_json::json!({}),
            error: None,
            uri: uri.map(str::to_string),
            created_at: chrono::Utc::now(),
            last_attempt_at: None,
            completed_at: None,
        };
        conn.execute(
            "INSERT INTO message_artifacts
                (id, message_id, kind, status, attempt_count, content, error, uri, created_at, last_attempt_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, NULL, ?6, ?7, NULL, NULL)",
            params![
                artifact.id.to_string(),
                message_id.to_string(),
                enum_to_str(&kind)?,
                enum_to_str(&ArtifactStatus::Pending)?,
                json_to_str(&artifact.content)?,
                uri,
                ts_to_str(artifact.created_at),
            ],
        )
        .map_err(map_sql)?;
        Ok(artifact)
    }

    /// Transitions an artifact to `Done`, recording the extracted content.
    pub async fn complete(&self, id: Id, content: serde_json::Value, uri: Option<&str>) -> Result<(), PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        let now = chrono::Utc::now();
        let changed = conn
            .execute(
                "UPDATE message_artifacts
                 SET status = ?2, content = ?3, uri = ?4, last_attempt_at = ?5, completed_at = ?5
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    enum_to_str(&ArtifactStatus::Done)?,
                    json_to_str(&content)?,
                    uri,
                    ts_to_str(now),
                ],
            )
            .map_err(map_sql)?;
        if changed == 0 {
            return Err(PersistError::NotFound);
        }
        Ok(())
    }

    /// Bumps the attempt counter and, once `max_attempts` is exceeded, marks
    /// the artifact `Failed` instead of leaving it retryable forever.
    pub async fn record_failure(&self, id: Id, error: &str, max_attempts: i64) -> Result<ArtifactStatus, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        let now = chrono::Utc::now();
        let attempt_count: i64 = conn
            .query_row(
                "SELECT attempt_count FROM message_artifacts WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .map_err(map_sql)?;
        let next_attempt = attempt_count + 1;
        let status = if next_attempt >= max_attempts {
            ArtifactStatus::Failed
        } else {
            ArtifactStatus::Pending
        };
        conn.execute(
            "UPDATE message_artifacts
             SET attempt_count = ?2, status = ?3, error = ?4, last_attempt_at = ?5
             WHERE id = ?1",
            params![
                id.to_string(),
                next_attempt,
                enum_to_str(&status)?,
                error,
                ts_to_str(now),
            ],
        )
        .map_err(map_sql)?;
        Ok(status)
    }

    pub async fn get(&self, id: Id) -> Result<Artifact, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        conn.query_row(
            "SELECT id, message_id, kind, status, attempt_count, content, error, uri, created_at, last_attempt_at, completed_at
             FROM message_artifacts WHERE id = ?1",
            params![id.to_string()],
            row_to_artifact,
        )
        .map_err(map_sql)
    }

    /// Selects up to `limit` artifacts due for a Media Processor pass:
    /// `pending` or `failed`, under the retry ceiling, oldest first.
    pub async fn due_for_processing(&self, limit: i64, max_attempts: i64) -> Result<Vec<Artifact>, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        let mut stmt = conn
            .prepare(
                "SELECT id, message_id, kind, status, attempt_count, content, error, uri, created_at, last_attempt_at, completed_at
                 FROM message_artifacts
                 WHERE status IN (?1, ?2) AND attempt_count < ?3
                 ORDER BY created_at ASC LIMIT ?4",
            )
            .map_err(map_sql)?;
        let rows = stmt
            .query_map(
                params![
                    enum_to_str(&ArtifactStatus::Pending)?,
                    enum_to_str(&ArtifactStatus::Failed)?,
                    max_attempts,
                    limit,
                ],
                row_to_artifact,
            )
            .map_err(map_sql)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql)
    }

    /// Atomically claims an artifact for processing, conditioned on it
    /// still being `pending`/`failed` — the same "conditional UPDATE wins
    /// the race" idiom `JobRepo::lease_next` uses, so two media processor
    /// loops never double-process the same artifact.
    pub async fn claim(&self, id: Id) -> Result<Artifact, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        let now = chrono::Utc::now();
        let changed = conn
            .execute(
                "UPDATE message_artifacts
                 SET status = ?2, attempt_count = attempt_count + 1, last_attempt_at = ?3
                 WHERE id = ?1 AND status IN (?4, ?5)",
                params![
                    id.to_string(),
                    enum_to_str(&ArtifactStatus::Processing)?,
                    ts_to_str(now),
                    enum_to_str(&ArtifactStatus::Pending)?,
                    enum_to_str(&ArtifactStatus::Failed)?,
                ],
            )
            .map_err(map_sql)?;
        if changed == 0 {
            return Err(PersistError::Conflict("artifact already claimed".into()));
        }
        self.get(id).await
    }

    pub async fn for_message(&self, message_id: Id) -> Result<Vec<Artifact>, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        let mut stmt = conn
            .prepare(
                "SELECT id, message_id, kind, status, attempt_count, content, error, uri, created_at, last_attempt_at, completed_at
                 FROM message_artifacts WHERE message_id = ?1 ORDER BY created_at",
            )
            .map_err(map_sql)?;
        let rows = stmt
            .query_map(params![message_id.to_string()], row_to_artifact)
            .map_err(map_sql)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql)
    }
}

fn row_to_artifact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Artifact> {
    let id: String = row.get(0)?;
    let message_id: String = row.get(1)?;
    let kind: String = row.get(2)?;
    let status: String = row.get(3)?;
    let content: String = row.get(5)?;
    Ok(Artifact {
        id: id.parse().map_err(|_| bad_uuid(0))?,
        message_id: message_id.parse().map_err(|_| bad_uuid(1))?,
        kind: str_to_enum::<ArtifactKind>(2, &kind)?,
        status: str_to_enum::<ArtifactStatus>(3, &status)?,
        attempt_count: row.get(4)?,
        content: str_to_json(5, &content)?,
        error: row.get(6)?,
        uri: row.get(7)?,
        created_at: str_to_ts(8, &row.get::<_, String>(8)?)?,
        last_attempt_at: opt_str_to_ts(9, row.get(9)?)?,
        completed_at: opt_str_to_ts(10, row.get(10)?)?,
    })
}

fn bad_uuid(column: usize) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, "bad uuid".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MessageRepo;
    use crate::threads::ThreadRepo;
    use warden_types::{Message, MessageRole};

    async fn seed_message(pool: &Pool) -> Id {
        let thread = ThreadRepo::new(pool).get_or_create("telegram", "7").await.unwrap();
        let msg = Message {
            id: Id::new_v4(),
            thread_id: thread.id,
            external_message_id: None,
            role: MessageRole::User,
            author_id: None,
            text: None,
            raw_payload: serde_json::json!({}),
            created_at: chrono::Utc::now(),
        };
        MessageRepo::new(pool).insert(&msg).await.unwrap();
        msg.id
    }

    #[tokio::test]
    async fn failure_then_retry_then_permanent_failure() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::open(dir.path().join("warden.db"), 1, 2).unwrap();
        let message_id = seed_message(&pool).await;
        let repo = ArtifactRepo::new(&pool);
        let artifact = repo.insert_pending(message_id, ArtifactKind::VoiceTranscript, Some("file123")).await.unwrap();

        let status = repo.record_failure(artifact.id, "boom", 2).await.unwrap();
        assert_eq!(status, ArtifactStatus::Pending);
        let status = repo.record_failure(artifact.id, "boom again", 2).await.unwrap();
        assert_eq!(status, ArtifactStatus::Failed);
    }

    #[tokio::test]
    async fn complete_sets_done_and_content() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::open(dir.path().join("warden.db"), 1, 2).unwrap();
        let message_id = seed_message(&pool).await;
        let repo = ArtifactRepo::new(&pool);
        let artifact = repo.insert_pending(message_id, ArtifactKind::OcrText, None).await.unwrap();
        repo.complete(artifact.id, serde_json::json!({"text": "hello"}), None).await.unwrap();
        let fetched = repo.get(artifact.id).await.unwrap();
        assert_eq!(fetched.status, ArtifactStatus::Done);
        assert_eq!(fetched.content["text"], "hello");
    }

    #[tokio::test]
    async fn claim_is_exclusive_and_due_for_processing_skips_claimed() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::open(dir.path().join("warden.db"), 1, 2).unwrap();
        let message_id = seed_message(&pool).await;
        let repo = ArtifactRepo::new(&pool);
        let artifact = repo.insert_pending(message_id, ArtifactKind::ImageJson, Some("f1")).await.unwrap();

        let due = repo.due_for_processing(10, 3).await.unwrap();
        assert_eq!(due.len(), 1);

        let claimed = repo.claim(artifact.id).await.unwrap();
        assert_eq!(claimed.status, ArtifactStatus::Processing);
        assert_eq!(claimed.attempt_count, 1);

        let second_claim = repo.claim(artifact.id).await;
        assert!(matches!(second_claim, Err(PersistError::Conflict(_))));

        let due_after = repo.due_for_processing(10, 3).await.unwrap();
        assert!(due_after.is_empty());
    }
}
