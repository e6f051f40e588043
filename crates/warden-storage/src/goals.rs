use rusqlite::params;
use warden_types::{Goal, GoalStatus, Id, PersistError, Priority, TaskSource};

use crate::codec::{enum_to_str, opt_str_to_ts, str_to_enum, str_to_ts, ts_to_str};
use crate::err::map_sql;
use crate::pool::Pool;

pub struct GoalRepo<'a> {
    pool: &'a Pool,
}

impl<'a> GoalRepo<'a> {
    pub fn new(pool: &'a Pool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, goal: &Goal) -> Result<(), PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        conn.execute(
            "INSERT INTO agent_goals
                (id, title, description, success_criteria, source, priority, status,
                 total_tasks, completed_tasks, failed_tasks, verified_by_master, master_feedback, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                goal.id.to_string(),
                goal.title,
                goal.description,
                goal.success_criteria,
                enum_to_str(&goal.source)?,
                enum_to_str(&goal.priority)?,
                enum_to_str(&goal.status)?,
                goal.total_tasks,
                goal.completed_tasks,
                goal.failed_tasks,
                goal.verified_by_master as i64,
                goal.master_feedback,
                ts_to_str(goal.created_at),
                goal.updated_at.map(ts_to_str),
            ],
        )
        .map_err(map_sql)?;
        Ok(())
    }

    /// Bumps the goal's task counters when a child task finishes, so
    /// `ready_for_verification`/`needs_attention` stay accurate without a
    /// recompute-from-scratch scan.
    pub async fn record_task_outcome(&self, goal_id: Id, completed: bool) -> Result<Goal, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        if completed {
            conn.execute(
                "UPDATE agent_goals SET completed_tasks = completed_tasks + 1, updated_at = ?2 WHERE id = ?1",
                params![goal_id.to_string(), ts_to_str(chrono::Utc::now())],
            )
        } else {
            conn.execute(
                "UPDATE agent_goals SET failed_tasks = failed_tasks + 1, updated_at = ?2 WHERE id = ?1",
                params![goal_id.to_string(), ts_to_str(chrono::Utc::now())],
            )
        }
        .map_err(map_sql)?;
        self.get(goal_id).await
    }

    pub async fn mark_verified(&self, goal_id: Id, feedback: Option<&str>) -> Result<(), PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        conn.execute(
            "UPDATE agent_goals SET status = ?2, verified_by_master = 1, master_feedback = ?3, updated_at = ?4 WHERE id = ?1",
            params![
                goal_id.to_string(),
                enum_to_str(&GoalStatus::Completed)?,
                feedback,
                ts_to_str(chrono::Utc::now()),
            ],
        )
        .map_err(map_sql)?;
        Ok(())
    }

    pub async fn get(&self, id: Id) -> Result<Goal, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        conn.query_row(
            "SELECT id, title, description, success_criteria, source, priority, status,
                    total_tasks, completed_tasks, failed_tasks, verified_by_master, master_feedback, created_at, updated_at
             FROM agent_goals WHERE id = ?1",
            params![id.to_string()],
            row_to_goal,
        )
        .map_err(map_sql)
    }

    pub async fn active(&self) -> Result<Vec<Goal>, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        let mut stmt = conn
            .prepare(
                "SELECT id, title, description, success_criteria, source, priority, status,
                        total_tasks, completed_tasks, failed_tasks, verified_by_master, master_feedback, created_at, updated_at
                 FROM agent_goals WHERE status = ?1 ORDER BY created_at ASC",
            )
            .map_err(map_sql)?;
        let rows = stmt
            .query_map(params![enum_to_str(&GoalStatus::Active)?], row_to_goal)
            .map_err(map_sql)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql)
    }
}

fn row_to_goal(row: &rusqlite::Row<'_>) -> rusqlite::Result<Goal> {
    let id: String = row.get(0)?;
    let source: String = row.get(4)?;
    let priority: String = row.get(5)?;
    let status: String = row.get(6)?;
    let verified: i64 = row.get(10)?;
    Ok(Goal {
        id: id.parse().map_err(|_| bad_uuid(0))?,
        title: row.get(1)?,
        description: row.get(2)?,
        success_criteria: row.get(3)?,
        source: str_to_enum::<TaskSource>(4, &source)?,
        priority: str_to_enum::<Priority>(5, &priority)?,
        status: str_to_enum::<GoalStatus>(6, &status)?,
        total_tasks: row.get(7)?,
        completed_tasks: row.get(8)?,
        failed_tasks: row.get(9)?,
        verified_by_master: verified != 0,
        master_feedback: row.get(11)?,
        created_at: str_to_ts(12, &row.get::<_, String>(12)?)?,
        updated_at: opt_str_to_ts(13, row.get(13)?)?,
    })
}

fn bad_uuid(column: usize) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, "bad uuid".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_goal(total: i64) -> Goal {
        Goal {
            id: Id::new_v4(),
            title: "ship feature".into(),
            description: "".into(),
            success_criteria: "tests pass".into(),
            source: TaskSource::Master,
            priority: Priority::High,
            status: GoalStatus::Active,
            total_tasks: total,
            completed_tasks: 0,
            failed_tasks: 0,
            verified_by_master: false,
            master_feedback: None,
            created_at: chrono::Utc::now(),
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn ready_for_verification_once_all_tasks_complete() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::open(dir.path().join("warden.db"), 1, 2).unwrap();
        let repo = GoalRepo::new(&pool);
        let goal = new_goal(2);
        repo.insert(&goal).await.unwrap();

        repo.record_task_outcome(goal.id, true).await.unwrap();
        let mid = repo.get(goal.id).await.unwrap();
        assert!(!mid.ready_for_verification());

        let done = repo.record_task_outcome(goal.id, true).await.unwrap();
        assert!(done.ready_for_verification());
    }
}
