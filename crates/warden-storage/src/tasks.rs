use rusqlite::{params, OptionalExtension};
use warden_types::{Id, PersistError, Priority, Task, TaskSource, TaskStatus};

use crate::codec::{enum_to_str, opt_str_to_ts, str_to_enum, str_to_ts, ts_to_str};
use crate::err::map_sql;
use crate::pool::Pool;

pub struct TaskRepo<'a> {
    pool: &'a Pool,
}

impl<'a> TaskRepo<'a> {
    pub fn new(pool: &'a Pool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, task: &Task) -> Result<(), PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        conn.execute(
            "INSERT INTO agent_tasks
                (id, title, description, priority, status, source, goal_criteria, attempts, max_attempts,
                 last_result, parent_id, order_index, depth, goal_id, created_at, started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                task.id.to_string(),
                task.title,
                task.description,
                enum_to_str(&task.priority)?,
                enum_to_str(&task.status)?,
                enum_to_str(&task.source)?,
                task.goal_criteria,
                task.attempts,
                task.max_attempts,
                task.last_result,
                task.parent_id.map(|id| id.to_string()),
                task.order_index,
                task.depth,
                task.goal_id.map(|id| id.to_string()),
                ts_to_str(task.created_at),
                opt_str_to_ts_out(task.started_at),
                opt_str_to_ts_out(task.completed_at),
            ],
        )
        .map_err(map_sql)?;
        Ok(())
    }

    /// Picks the next pending task per §4.6's selection rule: among *root*
    /// (`depth = 0`) pending tasks, `master`-sourced work beats self-sourced,
    /// then priority, then arrival order (oldest first); only root tasks
    /// compete at the top level (rule 4). If the chosen root has a pending
    /// subtask, recurse into it — its lowest-`order_index` pending child
    /// runs first while the root itself stays `pending` (rule 5).
    pub async fn next_pending(&self) -> Result<Option<Task>, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        let root = conn
            .query_row(
                "SELECT id, title, description, priority, status, source, goal_criteria, attempts, max_attempts,
                        last_result, parent_id, order_index, depth, goal_id, created_at, started_at, completed_at
                 FROM agent_tasks
                 WHERE status = ?1 AND depth = 0
                 ORDER BY CASE source WHEN 'master' THEN 0 ELSE 1 END ASC,
                          CASE priority WHEN 'critical' THEN 0 WHEN 'high' THEN 1 WHEN 'medium' THEN 2 ELSE 3 END ASC,
                          created_at ASC
                 LIMIT 1",
                params![enum_to_str(&TaskStatus::Pending)?],
                row_to_task,
            )
            .optional()
            .map_err(map_sql)?;

        let Some(root) = root else { return Ok(None) };

        let child = conn
            .query_row(
                "SELECT id, title, description, priority, status, source, goal_criteria, attempts, max_attempts,
                        last_result, parent_id, order_index, depth, goal_id, created_at, started_at, completed_at
                 FROM agent_tasks
                 WHERE parent_id = ?1 AND status = ?2
                 ORDER BY order_index ASC
                 LIMIT 1",
                params![root.id.to_string(), enum_to_str(&TaskStatus::Pending)?],
                row_to_task,
            )
            .optional()
            .map_err(map_sql)?;

        Ok(Some(child.unwrap_or(root)))
    }

    /// All children of a task (any status), ordered by `order_index` —
    /// used to check whether any sibling is still `pending`/`running`
    /// before auto-completing a parent (§3 invariant: a parent cannot be
    /// completed while any child is pending/running).
    pub async fn children(&self, parent_id: Id) -> Result<Vec<Task>, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        let mut stmt = conn
            .prepare(
                "SELECT id, title, description, priority, status, source, goal_criteria, attempts, max_attempts,
                        last_result, parent_id, order_index, depth, goal_id, created_at, started_at, completed_at
                 FROM agent_tasks WHERE parent_id = ?1 ORDER BY order_index ASC",
            )
            .map_err(map_sql)?;
        let rows = stmt.query_map(params![parent_id.to_string()], row_to_task).map_err(map_sql)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql)
    }

    pub async fn mark_running(&self, id: Id) -> Result<(), PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        let changed = conn
            .execute(
                "UPDATE agent_tasks SET status = ?2, started_at = ?3, attempts = attempts + 1
                 WHERE id = ?1 AND status = ?4",
                params![
                    id.to_string(),
                    enum_to_str(&TaskStatus::Running)?,
                    ts_to_str(chrono::Utc::now()),
                    enum_to_str(&TaskStatus::Pending)?,
                ],
            )
            .map_err(map_sql)?;
        if changed == 0 {
            return Err(PersistError::Conflict("task not pending".into()));
        }
        Ok(())
    }

    /// Returns a task to `pending` without bumping `attempts` — used when a
    /// root task decomposes into subtasks instead of succeeding or failing
    /// outright (§4.6: the parent stays pending while its subtasks run).
    /// `last_result` records the decomposition summary so the row reflects
    /// why the task is pending again rather than fresh.
    pub async fn revert_to_pending(&self, id: Id, last_result: &str) -> Result<(), PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        let truncated: String = last_result.chars().take(Task::MAX_RESULT_BYTES).collect();
        let changed = conn
            .execute(
                "UPDATE agent_tasks SET status = ?2, started_at = NULL, last_result = ?3 WHERE id = ?1",
                params![id.to_string(), enum_to_str(&TaskStatus::Pending)?, truncated],
            )
            .map_err(map_sql)?;
        if changed == 0 {
            return Err(PersistError::NotFound);
        }
        Ok(())
    }

    /// Records the outcome of a task run. On failure, tasks below
    /// `max_attempts` go back to `Pending` for a later retry; at or above
    /// it they become terminally `Failed`.
    pub async fn finish(&self, id: Id, succeeded: bool, result: &str) -> Result<TaskStatus, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        let truncated: String = result.chars().take(Task::MAX_RESULT_BYTES).collect();
        let now = ts_to_str(chrono::Utc::now());

        if succeeded {
            conn.execute(
                "UPDATE agent_tasks SET status = ?2, last_result = ?3, completed_at = ?4 WHERE id = ?1",
                params![id.to_string(), enum_to_str(&TaskStatus::Completed)?, truncated, now],
            )
            .map_err(map_sql)?;
            return Ok(TaskStatus::Completed);
        }

        let attempts: i64 = conn
            .query_row("SELECT attempts FROM agent_tasks WHERE id = ?1", params![id.to_string()], |row| row.get(0))
            .map_err(map_sql)?;
        let max_attempts: i64 = conn
            .query_row("SELECT max_attempts FROM agent_tasks WHERE id = ?1", params![id.to_string()], |row| row.get(0))
            .map_err(map_sql)?;

        let status = if attempts >= max_attempts { TaskStatus::Failed } else { TaskStatus::Pending };
        let completed_at = matches!(status, TaskStatus::Failed).then(|| now.clone());
        conn.execute(
            "UPDATE agent_tasks SET status = ?2, last_result = ?3, completed_at = ?4 WHERE id = ?1",
            params![id.to_string(), enum_to_str(&status)?, truncated, completed_at],
        )
        .map_err(map_sql)?;
        Ok(status)
    }

    pub async fn get(&self, id: Id) -> Result<Task, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        conn.query_row(
            "SELECT id, title, description, priority, status, source, goal_criteria, attempts, max_attempts,
                    last_result, parent_id, order_index, depth, goal_id, created_at, started_at, completed_at
             FROM agent_tasks WHERE id = ?1",
            params![id.to_string()],
            row_to_task,
        )
        .map_err(map_sql)
    }

    pub async fn for_goal(&self, goal_id: Id) -> Result<Vec<Task>, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        let mut stmt = conn
            .prepare(
                "SELECT id, title, description, priority, status, source, goal_criteria, attempts, max_attempts,
                        last_result, parent_id, order_index, depth, goal_id, created_at, started_at, completed_at
                 FROM agent_tasks WHERE goal_id = ?1 ORDER BY order_index ASC",
            )
            .map_err(map_sql)?;
        let rows = stmt.query_map(params![goal_id.to_string()], row_to_task).map_err(map_sql)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql)
    }
}

fn opt_str_to_ts_out(dt: Option<chrono::DateTime<chrono::Utc>>) -> Option<String> {
    dt.map(ts_to_str)
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let id: String = row.get(0)?;
    let priority: String = row.get(3)?;
    let status: String = row.get(4)?;
    let source: String = row.get(5)?;
    let parent_id: Option<String> = row.get(10)?;
    let goal_id: Option<String> = row.get(13)?;
    Ok(Task {
        id: id.parse().map_err(|_| bad_uuid(0))?,
        title: row.get(1)?,
        description: row.get(2)?,
        priority: str_to_enum::<Priority>(3, &priority)?,
        status: str_to_enum::<TaskStatus>(4, &status)?,
        source: str_to_enum::<TaskSource>(5, &source)?,
        goal_criteria: row.get(6)?,
        attempts: row.get(7)?,
        max_attempts: row.get(8)?,
        last_result: row.get(9)?,
        parent_id: parent_id.map(|s| s.parse()).transpose().map_err(|_| bad_uuid(10))?,
        order_index: row.get(11)?,
        depth: row.get(12)?,
        goal_id: goal_id.map(|s| s.parse()).transpose().map_err(|_| bad_uuid(13))?,
        created_at: str_to_ts(14, &row.get::<_, String>(14)?)?,
        started_at: opt_str_to_ts(15, row.get(15)?)?,
        completed_at: opt_str_to_ts(16, row.get(16)?)?,
    })
}

fn bad_uuid(column: usize) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, "bad uuid".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_task(title: &str, priority: Priority, source: TaskSource, depth: i64) -> Task {
        Task {
            id: Id::new_v4(),
            title: title.into(),
            description: "".into(),
            priority,
            status: TaskStatus::Pending,
            source,
            goal_criteria: None,
            attempts: 0,
            max_attempts: Task::DEFAULT_MAX_ATTEMPTS,
            last_result: None,
            parent_id: None,
            order_index: 0,
            depth,
            goal_id: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn prefers_shallow_master_high_priority_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::open(dir.path().join("warden.db"), 1, 2).unwrap();
        let repo = TaskRepo::new(&pool);

        let low_self = new_task("low self", Priority::Low, TaskSource::Itself, 0);
        let high_master = new_task("high master", Priority::High, TaskSource::Master, 0);
        repo.insert(&low_self).await.unwrap();
        repo.insert(&high_master).await.unwrap();

        let next = repo.next_pending().await.unwrap().unwrap();
        assert_eq!(next.id, high_master.id);
    }

    #[tokio::test]
    async fn revert_to_pending_undoes_a_running_transition_without_bumping_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::open(dir.path().join("warden.db"), 1, 2).unwrap();
        let repo = TaskRepo::new(&pool);
        let task = new_task("decomposable", Priority::Medium, TaskSource::Master, 0);
        repo.insert(&task).await.unwrap();

        repo.mark_running(task.id).await.unwrap();
        repo.revert_to_pending(task.id, "Decomposed into 2 subtasks: a, b").await.unwrap();

        let fetched = repo.get(task.id).await.unwrap();
        assert_eq!(fetched.status, TaskStatus::Pending);
        assert_eq!(fetched.attempts, 1);
        assert!(fetched.started_at.is_none());
        assert_eq!(fetched.last_result.as_deref(), Some("Decomposed into 2 subtasks: a, b"));
    }

    #[tokio::test]
    async fn exhausting_attempts_terminally_fails_a_task() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::open(dir.path().join("warden.db"), 1, 2).unwrap();
        let repo = TaskRepo::new(&pool);
        let mut task = new_task("flaky", Priority::Medium, TaskSource::Master, 0);
        task.max_attempts = 1;
        repo.insert(&task).await.unwrap();

        repo.mark_running(task.id).await.unwrap();
        let status = repo.finish(task.id, false, "boom").await.unwrap();
        assert_eq!(status, TaskStatus::Failed);
    }
}
