use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::{mpsc, Semaphore, SemaphorePermit};

use crate::schema;

/// A small connection pool bounded by `min`..`max` open connections.
///
/// Mirrors the pool-size knob the spec (§4.1, §5) asks for without pulling in
/// a generic pooling crate: connections are opened eagerly up to `min` at
/// startup, and lazily up to `max` under contention. A `Semaphore` caps
/// concurrent checkouts so callers never spin; returned connections flow
/// back through an unbounded channel rather than a `Drop` impl that would
/// need to block.
pub struct Pool {
    path: std::path::PathBuf,
    max: usize,
    semaphore: Arc<Semaphore>,
    idle_tx: mpsc::UnboundedSender<Connection>,
    idle_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Connection>>,
}

pub struct PooledConnection<'a> {
    conn: Option<Connection>,
    _permit: SemaphorePermit<'a>,
    return_tx: mpsc::UnboundedSender<Connection>,
}

impl<'a> std::ops::Deref for PooledConnection<'a> {
    type Target = Connection;
    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection taken")
    }
}

impl<'a> std::ops::DerefMut for PooledConnection<'a> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection taken")
    }
}

impl<'a> Drop for PooledConnection<'a> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let _ = self.return_tx.send(conn);
        }
    }
}

impl Pool {
    pub fn open(path: impl AsRef<Path>, min: usize, max: usize) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let (idle_tx, idle_rx) = mpsc::unbounded_channel();
        for _ in 0..min.max(1) {
            idle_tx.send(open_connection(&path)?).ok();
        }
        Ok(Self {
            path,
            max: max.max(min).max(1),
            semaphore: Arc::new(Semaphore::new(max.max(min).max(1))),
            idle_tx,
            idle_rx: tokio::sync::Mutex::new(idle_rx),
        })
    }

    pub async fn get(&self) -> anyhow::Result<PooledConnection<'_>> {
        let permit = self
            .semaphore
            .acquire()
            .await
            .expect("pool semaphore closed");
        let mut idle = self.idle_rx.lock().await;
        let conn = match idle.try_recv() {
            Ok(conn) => conn,
            Err(_) => open_connection(&self.path)?,
        };
        drop(idle);
        Ok(PooledConnection {
            conn: Some(conn),
            _permit: permit,
            return_tx: self.idle_tx.clone(),
        })
    }

    pub fn max_size(&self) -> usize {
        self.max
    }
}

fn open_connection(path: &Path) -> anyhow::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "busy_timeout", 5_000i64)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    schema::ensure_schema(&conn)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn checks_out_and_returns_connections() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::open(dir.path().join("warden.db"), 1, 2).unwrap();
        {
            let conn = pool.get().await.unwrap();
            conn.execute_batch("SELECT 1;").unwrap();
        }
        let _conn2 = pool.get().await.unwrap();
        assert_eq!(pool.max_size(), 2);
    }
}
