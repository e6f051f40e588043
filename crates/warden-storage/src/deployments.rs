use rusqlite::params;
use warden_types::{Deployment, DeploymentStatus, Id, PersistError};

use crate::codec::{enum_to_str, opt_str_to_ts, str_to_enum, str_to_ts, ts_to_str};
use crate::err::map_sql;
use crate::pool::Pool;

pub struct DeploymentRepo<'a> {
    pool: &'a Pool,
}

impl<'a> DeploymentRepo<'a> {
    pub fn new(pool: &'a Pool) -> Self {
        Self { pool }
    }

    pub async fn start(&self, sha: &str, branch: &str) -> Result<Deployment, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        let deployment = Deployment {
            id: Id::new_v4(),
            sha: sha.to_string(),
            branch: branch.to_string(),
            status: DeploymentStatus::Building,
            started_at: Some(chrono::Utc::now()),
            finished_at: None,
            report: None,
        };
        conn.execute(
            "INSERT INTO deployments (id, sha, branch, status, started_at, finished_at, report)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, NULL)",
            params![
                deployment.id.to_string(),
                sha,
                branch,
                enum_to_str(&DeploymentStatus::Building)?,
                deployment.started_at.map(ts_to_str),
            ],
        )
        .map_err(map_sql)?;
        Ok(deployment)
    }

    pub async fn advance(&self, id: Id, status: DeploymentStatus) -> Result<(), PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        let terminal = matches!(
            status,
            DeploymentStatus::Healthy | DeploymentStatus::RolledBack | DeploymentStatus::Failed
        );
        let finished_at = terminal.then(|| ts_to_str(chrono::Utc::now()));
        conn.execute(
            "UPDATE deployments SET status = ?2, finished_at = COALESCE(?3, finished_at) WHERE id = ?1",
            params![id.to_string(), enum_to_str(&status)?, finished_at],
        )
        .map_err(map_sql)?;
        Ok(())
    }

    pub async fn attach_report(&self, id: Id, report: serde_json::Value) -> Result<(), PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        conn.execute(
            "UPDATE deployments SET report = ?2 WHERE id = ?1",
            params![id.to_string(), crate::codec::json_to_str(&report)?],
        )
        .map_err(map_sql)?;
        Ok(())
    }

    pub async fn get(&self, id: Id) -> Result<Deployment, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        conn.query_row(
            "SELECT id, sha, branch, status, started_at, finished_at, report FROM deployments WHERE id = ?1",
            params![id.to_string()],
            row_to_deployment,
        )
        .map_err(map_sql)
    }

    pub async fn latest(&self) -> Result<Option<Deployment>, PersistError> {
        let conn = self.pool.get().await.map_err(|e| PersistError::Transient(e.to_string()))?;
        match conn.query_row(
            "SELECT id, sha, branch, status, started_at, finished_at, report
             FROM deployments ORDER BY started_at DESC LIMIT 1",
            [],
            row_to_deployment,
        ) {
            Ok(d) => Ok(Some(d)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(map_sql(e)),
        }
    }
}

fn row_to_deployment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Deployment> {
    let id: String = row.get(0)?;
    let status: String = row.get(3)?;
    let report: Option<String> = row.get(6)?;
    Ok(Deployment {
        id: id.parse().map_err(|_| bad_uuid(0))?,
        sha: row.get(1)?,
        branch: row.get(2)?,
        status: str_to_enum::<DeploymentStatus>(3, &status)?,
        started_at: opt_str_to_ts(4, row.get(4)?)?,
        finished_at: opt_str_to_ts(5, row.get(5)?)?,
        report: report.map(|s| crate::codec::str_to_json(6, &s)).transpose()?,
    })
}

fn bad_uuid(column: usize) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, "bad uuid".into())
}
