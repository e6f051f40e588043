use rusqlite::params;
use warden_types::{Approval, ApprovalStatus, Id, PersistError};

use crate::codec::{enum_to_str, opt_str_to_ts, str_to_enum, str_to_ts, ts_to_str};
use crate::err::map_sql;
use crate::pool::Pool;

pub struct ApprovalRepo<'a> {
    pool: &'a Pool,
}

impl<'a> ApprovalRepo<'a> {
    pub fn new(pool: &'a Pool) -> Self {
        Self { pool }
    }

    /// Creates a new pending approval, superseding any still-pending
    /// approval already open on the same thread (only the newest proposal
    /// should be awaiting a reply at once).
    pub async fn create(
        &self,
        thread_id: Id,
        job_id: Option<Id>,
        proposal_text: &str,
    ) -> Result<Approval, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        let now = chrono::Utc::now();

        conn.execute(
            "UPDATE approvals SET status = ?2, resolved_at = ?3
             WHERE thread_id = ?1 AND status = ?4",
            params![
                thread_id.to_string(),
                enum_to_str(&ApprovalStatus::Superseded)?,
                ts_to_str(now),
                enum_to_str(&ApprovalStatus::Pending)?,
            ],
        )
        .map_err(map_sql)?;

        let approval = Approval {
            id: Id::new_v4(),
            thread_id,
            job_id,
            proposal_text: proposal_text.to_string(),
            status: ApprovalStatus::Pending,
            prompt_message_id: None,
            created_at: now,
            resolved_at: None,
        };
        conn.execute(
            "INSERT INTO approvals (id, thread_id, job_id, proposal_text, status, prompt_message_id, created_at, resolved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, NULL)",
            params![
                approval.id.to_string(),
                thread_id.to_string(),
                job_id.map(|id| id.to_string()),
                proposal_text,
                enum_to_str(&ApprovalStatus::Pending)?,
                ts_to_str(now),
            ],
        )
        .map_err(map_sql)?;
        Ok(approval)
    }

    /// Supersedes every still-pending approval on a thread unconditionally —
    /// called on every inbound user message (§4.4 invariant: a fresh message
    /// always clears the slate, whether or not it goes on to open a new
    /// approval of its own).
    pub async fn supersede_pending_for_thread(&self, thread_id: Id) -> Result<usize, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        let now = chrono::Utc::now();
        conn.execute(
            "UPDATE approvals SET status = ?2, resolved_at = ?3
             WHERE thread_id = ?1 AND status = ?4",
            params![
                thread_id.to_string(),
                enum_to_str(&ApprovalStatus::Superseded)?,
                ts_to_str(now),
                enum_to_str(&ApprovalStatus::Pending)?,
            ],
        )
        .map_err(map_sql)
    }

    pub async fn attach_prompt_message(&self, id: Id, prompt_message_id: &str) -> Result<(), PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        conn.execute(
            "UPDATE approvals SET prompt_message_id = ?2 WHERE id = ?1",
            params![id.to_string(), prompt_message_id],
        )
        .map_err(map_sql)?;
        Ok(())
    }

    /// Resolves a still-pending approval. Returns `Conflict` if it was
    /// already resolved or superseded, so callers (e.g. a duplicate webhook
    /// delivery) don't silently double-apply a decision.
    pub async fn resolve(&self, id: Id, status: ApprovalStatus) -> Result<Approval, PersistError> {
        if matches!(status, ApprovalStatus::Pending) {
            return Err(PersistError::Conflict("cannot resolve to pending".into()));
        }
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        let now = chrono::Utc::now();
        let changed = conn
            .execute(
                "UPDATE approvals SET status = ?2, resolved_at = ?3 WHERE id = ?1 AND status = ?4",
                params![
                    id.to_string(),
                    enum_to_str(&status)?,
                    ts_to_str(now),
                    enum_to_str(&ApprovalStatus::Pending)?,
                ],
            )
            .map_err(map_sql)?;
        if changed == 0 {
            return Err(PersistError::Conflict("approval already resolved".into()));
        }
        self.get(id).await
    }

    pub async fn get(&self, id: Id) -> Result<Approval, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        conn.query_row(
            "SELECT id, thread_id, job_id, proposal_text, status, prompt_message_id, created_at, resolved_at
             FROM approvals WHERE id = ?1",
            params![id.to_string()],
            row_to_approval,
        )
        .map_err(map_sql)
    }

    /// Every still-pending approval across all threads, oldest first — the
    /// listing behind `GET /admin/approvals`.
    pub async fn pending(&self) -> Result<Vec<Approval>, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        let mut stmt = conn
            .prepare(
                "SELECT id, thread_id, job_id, proposal_text, status, prompt_message_id, created_at, resolved_at
                 FROM approvals WHERE status = ?1 ORDER BY created_at ASC",
            )
            .map_err(map_sql)?;
        let rows = stmt
            .query_map(params![enum_to_str(&ApprovalStatus::Pending)?], row_to_approval)
            .map_err(map_sql)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql)
    }

    pub async fn pending_for_job(&self, job_id: Id) -> Result<Option<Approval>, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        conn.query_row(
            "SELECT id, thread_id, job_id, proposal_text, status, prompt_message_id, created_at, resolved_at
             FROM approvals WHERE job_id = ?1 AND status = ?2",
            params![job_id.to_string(), enum_to_str(&ApprovalStatus::Pending)?],
            row_to_approval,
        )
        .map_err(map_sql)
        .map(Some)
        .or_else(|e| if matches!(e, PersistError::NotFound) { Ok(None) } else { Err(e) })
    }
}

fn row_to_approval(row: &rusqlite::Row<'_>) -> rusqlite::Result<Approval> {
    let id: String = row.get(0)?;
    let thread_id: String = row.get(1)?;
    let job_id: Option<String> = row.get(2)?;
    let status: String = row.get(4)?;
    Ok(Approval {
        id: id.parse().map_err(|_| bad_uuid(0))?,
        thread_id: thread_id.parse().map_err(|_| bad_uuid(1))?,
        job_id: job_id.map(|s| s.parse()).transpose().map_err(|_| bad_uuid(2))?,
        proposal_text: row.get(3)?,
        status: str_to_enum::<ApprovalStatus>(4, &status)?,
        prompt_message_id: row.get(5)?,
        created_at: str_to_ts(6, &row.get::<_, String>(6)?)?,
        resolved_at: opt_str_to_ts(7, row.get(7)?)?,
    })
}

fn bad_uuid(column: usize) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, "bad uuid".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threads::ThreadRepo;

    #[tokio::test]
    async fn creating_a_new_approval_supersedes_the_old_pending_one() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::open(dir.path().join("warden.db"), 1, 2).unwrap();
        let thread = ThreadRepo::new(&pool).get_or_create("telegram", "5").await.unwrap();
        let repo = ApprovalRepo::new(&pool);

        let first = repo.create(thread.id, None, "deploy v1?").await.unwrap();
        let second = repo.create(thread.id, None, "deploy v2?").await.unwrap();

        let first_refetched = repo.get(first.id).await.unwrap();
        assert_eq!(first_refetched.status, ApprovalStatus::Superseded);
        assert_eq!(repo.get(second.id).await.unwrap().status, ApprovalStatus::Pending);
    }

    #[tokio::test]
    async fn resolving_twice_is_a_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::open(dir.path().join("warden.db"), 1, 2).unwrap();
        let thread = ThreadRepo::new(&pool).get_or_create("telegram", "6").await.unwrap();
        let repo = ApprovalRepo::new(&pool);
        let approval = repo.create(thread.id, None, "ship it?").await.unwrap();

        repo.resolve(approval.id, ApprovalStatus::Approved).await.unwrap();
        let second = repo.resolve(approval.id, ApprovalStatus::Rejected).await;
        assert!(matches!(second, Err(PersistError::Conflict(_))));
    }

    #[tokio::test]
    async fn pending_lists_only_unresolved_approvals() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::open(dir.path().join("warden.db"), 1, 2).unwrap();
        let thread = ThreadRepo::new(&pool).get_or_create("telegram", "7").await.unwrap();
        let repo = ApprovalRepo::new(&pool);

        let resolved = repo.create(thread.id, None, "ignore me").await.unwrap();
        repo.resolve(resolved.id, ApprovalStatus::Approved).await.unwrap();
        let open = repo.create(thread.id, None, "deploy?").await.unwrap();

        let pending = repo.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, open.id);
    }
}
