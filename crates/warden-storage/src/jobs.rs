use rusqlite::params;
use warden_types::{Id, JobMode, JobStatus, PersistError, ReactiveJob};

use crate::codec::{enum_to_str, json_to_str, opt_str_to_ts, str_to_enum, str_to_json, str_to_ts, ts_to_str};
use crate::err::map_sql;
use crate::pool::Pool;

pub struct JobRepo<'a> {
    pool: &'a Pool,
}

impl<'a> JobRepo<'a> {
    pub fn new(pool: &'a Pool) -> Self {
        Self { pool }
    }

    pub async fn enqueue(
        &self,
        thread_id: Id,
        trigger_message_id: Id,
        mode: JobMode,
        payload: serde_json::Value,
    ) -> Result<ReactiveJob, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        let job = ReactiveJob {
            id: Id::new_v4(),
            thread_id,
            trigger_message_id,
            mode,
            status: JobStatus::Queued,
            payload,
            created_at: chrono::Utc::now(),
            started_at: None,
            finished_at: None,
        };
        conn.execute(
            "INSERT INTO reactive_jobs (id, thread_id, trigger_message_id, mode, status, payload, created_at, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, NULL)",
            params![
                job.id.to_string(),
                thread_id.to_string(),
                trigger_message_id.to_string(),
                enum_to_str(&mode)?,
                enum_to_str(&JobStatus::Queued)?,
                json_to_str(&job.payload)?,
                ts_to_str(job.created_at),
            ],
        )
        .map_err(map_sql)?;
        Ok(job)
    }

    /// Leases the oldest queued job, atomically flipping it to `Running` so
    /// two reactive worker loops never pick up the same job (C3 FIFO
    /// ordering + at-most-one-worker invariant).
    pub async fn lease_next(&self) -> Result<Option<ReactiveJob>, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        let now = chrono::Utc::now();
        let id: Option<String> = conn
            .query_row(
                "SELECT id FROM reactive_jobs WHERE status = ?1 ORDER BY created_at ASC LIMIT 1",
                params![enum_to_str(&JobStatus::Queued)?],
                |row| row.get(0),
            )
            .optional_none_on_no_rows()?;

        let Some(id) = id else { return Ok(None) };

        let changed = conn
            .execute(
                "UPDATE reactive_jobs SET status = ?2, started_at = ?3
                 WHERE id = ?1 AND status = ?4",
                params![
                    id,
                    enum_to_str(&JobStatus::Running)?,
                    ts_to_str(now),
                    enum_to_str(&JobStatus::Queued)?,
                ],
            )
            .map_err(map_sql)?;

        if changed == 0 {
            // Lost the lease race to another worker; caller retries.
            return Ok(None);
        }

        conn.query_row(
            "SELECT id, thread_id, trigger_message_id, mode, status, payload, created_at, started_at, finished_at
             FROM reactive_jobs WHERE id = ?1",
            params![id],
            row_to_job,
        )
        .map(Some)
        .map_err(map_sql)
    }

    /// Defensive fallback for the `job_id` linked to a resolved approval
    /// that never made it out of `classify` (§4.2 callback path): flips it
    /// back to `queued`/`execute` so the worker re-leases it instead of
    /// leaving it stranded `done` in the wrong mode. No-op (returns `false`)
    /// if the job isn't currently `done`+`classify` — the common case, where
    /// the execute handler already created the approval itself.
    pub async fn flip_to_execute(&self, id: Id) -> Result<bool, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        let changed = conn
            .execute(
                "UPDATE reactive_jobs SET mode = ?2, status = ?3, started_at = NULL, finished_at = NULL
                 WHERE id = ?1 AND mode = ?4 AND status = ?5",
                params![
                    id.to_string(),
                    enum_to_str(&JobMode::Execute)?,
                    enum_to_str(&JobStatus::Queued)?,
                    enum_to_str(&JobMode::Classify)?,
                    enum_to_str(&JobStatus::Done)?,
                ],
            )
            .map_err(map_sql)?;
        Ok(changed > 0)
    }

    pub async fn finish(&self, id: Id, status: JobStatus) -> Result<(), PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        let changed = conn
            .execute(
                "UPDATE reactive_jobs SET status = ?2, finished_at = ?3 WHERE id = ?1",
                params![id.to_string(), enum_to_str(&status)?, ts_to_str(chrono::Utc::now())],
            )
            .map_err(map_sql)?;
        if changed == 0 {
            return Err(PersistError::NotFound);
        }
        Ok(())
    }

    pub async fn get(&self, id: Id) -> Result<ReactiveJob, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        conn.query_row(
            "SELECT id, thread_id, trigger_message_id, mode, status, payload, created_at, started_at, finished_at
             FROM reactive_jobs WHERE id = ?1",
            params![id.to_string()],
            row_to_job,
        )
        .map_err(map_sql)
    }

    /// Today's job count for one status, surfaced by `GET /stats`.
    pub async fn count_by_status(&self, status: JobStatus) -> Result<i64, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        conn.query_row(
            "SELECT COUNT(*) FROM reactive_jobs WHERE status = ?1 AND created_at >= ?2",
            params![enum_to_str(&status)?, ts_to_str(crate::codec::today_midnight_utc())],
            |row| row.get(0),
        )
        .map_err(map_sql)
    }

    /// Resets every job still `Running` to terminal `Failed` on boot: a job
    /// whose worker died mid-flight may have already produced a side
    /// effect (a sent chat reply), so it is not safe to silently re-lease
    /// it — the operator sees it as a failure rather than a stall.
    pub async fn recover_stuck_running(&self) -> Result<usize, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        conn.execute(
            "UPDATE reactive_jobs SET status = ?1, finished_at = ?2 WHERE status = ?3",
            params![
                enum_to_str(&JobStatus::Failed)?,
                ts_to_str(chrono::Utc::now()),
                enum_to_str(&JobStatus::Running)?,
            ],
        )
        .map_err(map_sql)
    }
}

trait OptionalNoRows<T> {
    fn optional_none_on_no_rows(self) -> Result<Option<T>, PersistError>;
}

impl<T> OptionalNoRows<T> for rusqlite::Result<T> {
    fn optional_none_on_no_rows(self) -> Result<Option<T>, PersistError> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(map_sql(e)),
        }
    }
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReactiveJob> {
    let id: String = row.get(0)?;
    let thread_id: String = row.get(1)?;
    let trigger_message_id: String = row.get(2)?;
    let mode: String = row.get(3)?;
    let status: String = row.get(4)?;
    let payload: String = row.get(5)?;
    Ok(ReactiveJob {
        id: id.parse().map_err(|_| bad_uuid(0))?,
        thread_id: thread_id.parse().map_err(|_| bad_uuid(1))?,
        trigger_message_id: trigger_message_id.parse().map_err(|_| bad_uuid(2))?,
        mode: str_to_enum::<JobMode>(3, &mode)?,
        status: str_to_enum::<JobStatus>(4, &status)?,
        payload: str_to_json(5, &payload)?,
        created_at: str_to_ts(6, &row.get::<_, String>(6)?)?,
        started_at: opt_str_to_ts(7, row.get(7)?)?,
        finished_at: opt_str_to_ts(8, row.get(8)?)?,
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

    async fn seed(pool: &Pool) -> (Id, Id) {
        let thread = ThreadRepo::new(pool).get_or_create("telegram", "9").await.unwrap();
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
        (thread.id, msg.id)
    }

    #[tokio::test]
    async fn leases_in_fifo_order_and_wont_double_lease() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::open(dir.path().join("warden.db"), 1, 2).unwrap();
        let (thread_id, message_id) = seed(&pool).await;
        let repo = JobRepo::new(&pool);

        let first = repo.enqueue(thread_id, message_id, JobMode::Classify, serde_json::json!({})).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = repo.enqueue(thread_id, message_id, JobMode::Classify, serde_json::json!({})).await.unwrap();

        let leased = repo.lease_next().await.unwrap().unwrap();
        assert_eq!(leased.id, first.id);
        assert_eq!(leased.status, JobStatus::Running);

        let leased_again = repo.lease_next().await.unwrap().unwrap();
        assert_eq!(leased_again.id, second.id);

        assert!(repo.lease_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recovery_fails_stuck_running_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::open(dir.path().join("warden.db"), 1, 2).unwrap();
        let (thread_id, message_id) = seed(&pool).await;
        let repo = JobRepo::new(&pool);
        let job = repo.enqueue(thread_id, message_id, JobMode::Execute, serde_json::json!({})).await.unwrap();
        repo.lease_next().await.unwrap();

        let recovered = repo.recover_stuck_running().await.unwrap();
        assert_eq!(recovered, 1);
        let refetched = repo.get(job.id).await.unwrap();
        assert_eq!(refetched.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn counts_by_status_reflect_lease_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::open(dir.path().join("warden.db"), 1, 2).unwrap();
        let (thread_id, message_id) = seed(&pool).await;
        let repo = JobRepo::new(&pool);
        repo.enqueue(thread_id, message_id, JobMode::Classify, serde_json::json!({})).await.unwrap();

        assert_eq!(repo.count_by_status(JobStatus::Queued).await.unwrap(), 1);
        assert_eq!(repo.count_by_status(JobStatus::Running).await.unwrap(), 0);

        repo.lease_next().await.unwrap();
        assert_eq!(repo.count_by_status(JobStatus::Queued).await.unwrap(), 0);
        assert_eq!(repo.count_by_status(JobStatus::Running).await.unwrap(), 1);
    }
}
