use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::audit::SESSION_TABLE;
use crate::database::{Database, ListQuery, Row, Table};
use crate::record::{Entity, RecordError};

const SESSION_KEY: &str = "id_session";

/// A login session. Audited writes are refused unless the actor's session is
/// active and unexpired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id_session: i64,
    pub user_id: i64,
    pub active: bool,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Entity for Session {
    const TABLE: &'static str = SESSION_TABLE;
    const PRIMARY_KEY: Option<&'static str> = Some(SESSION_KEY);
    const AUDITED: bool = false;
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

fn table() -> Table<'static> {
    Table::new(SESSION_TABLE, SESSION_KEY)
}

/// Opens a session for `user_id` valid for `ttl`.
pub async fn open_session(db: &Database, user_id: i64, ttl: chrono::Duration) -> Result<Session, RecordError> {
    let now = Utc::now();
    let mut row = Row::new();
    row.insert("user_id".into(), user_id.into());
    row.insert("active".into(), true.into());
    row.insert("expires_at".into(), (now + ttl).to_rfc3339().into());
    row.insert("created_at".into(), now.to_rfc3339().into());

    let mut uow = db.begin().await?;
    let stored = uow.insert(table(), row).await?;
    uow.commit().await?;
    Session::from_row(stored)
}

/// Marks a session inactive. Returns false if it did not exist.
pub async fn close_session(db: &Database, session_id: i64) -> Result<bool, RecordError> {
    let mut uow = db.begin().await?;
    let closed = uow.update(table(), session_id, deactivation(Utc::now())).await?.is_some();
    uow.commit().await?;
    Ok(closed)
}

/// Marks every active session past its expiry inactive and returns how many.
pub async fn sweep_expired(db: &Database) -> Result<u64, RecordError> {
    let now = Utc::now();
    let mut uow = db.begin().await?;

    let rows = uow.select(table(), &ListQuery::new()).await?;
    let mut expired = Vec::new();
    for row in rows {
        let session = Session::from_row(row)?;
        if session.is_expired(now) {
            expired.push(session.id_session);
        }
    }

    for id in &expired {
        uow.update(table(), *id, deactivation(now)).await?;
    }
    uow.commit().await?;
    Ok(expired.len() as u64)
}

fn deactivation(now: DateTime<Utc>) -> Row {
    Row::from_iter([
        ("active".to_string(), Value::Bool(false)),
        ("updated_at".to_string(), Value::String(now.to_rfc3339())),
    ])
}

/// Background task that periodically expires sessions. Constructed and owned
/// by the caller; nothing runs until `start`.
pub struct SessionSweeper {
    db: Database,
    interval: Duration,
}

impl SessionSweeper {
    pub fn new(db: Database, interval: Duration) -> Self {
        Self { db, interval }
    }

    pub fn start(self) -> SweeperHandle {
        let (shutdown, mut stop) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            info!("Session sweeper started, interval {:?}", self.interval);
            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    _ = ticker.tick() => match sweep_expired(&self.db).await {
                        Ok(0) => {}
                        Ok(count) => debug!(count, "Expired sessions deactivated"),
                        Err(e) => error!("Session sweep failed: {}", e),
                    },
                }
            }
            info!("Session sweeper stopped");
        });
        SweeperHandle { shutdown: Some(shutdown), task }
    }
}

pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signals the task and waits for it to finish its current sweep.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            error!("Session sweeper task failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sweep_only_touches_expired_sessions() {
        let db = Database::in_memory();
        let live = open_session(&db, 1, chrono::Duration::hours(1)).await.unwrap();
        let stale = open_session(&db, 2, chrono::Duration::seconds(-5)).await.unwrap();

        assert_eq!(sweep_expired(&db).await.unwrap(), 1);
        assert_eq!(sweep_expired(&db).await.unwrap(), 0);

        let mut uow = db.begin().await.unwrap();
        let stale_row = uow.fetch(table(), stale.id_session, false).await.unwrap().unwrap();
        let live_row = uow.fetch(table(), live.id_session, false).await.unwrap().unwrap();
        uow.rollback().await.unwrap();
        assert_eq!(stale_row.get("active"), Some(&Value::Bool(false)));
        assert_eq!(live_row.get("active"), Some(&Value::Bool(true)));
    }

    #[tokio::test]
    async fn sweeper_runs_until_stopped() {
        let db = Database::in_memory();
        let stale = open_session(&db, 7, chrono::Duration::seconds(-1)).await.unwrap();

        let handle = SessionSweeper::new(db.clone(), Duration::from_millis(10)).start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop().await;

        let mut uow = db.begin().await.unwrap();
        let row = uow.fetch(table(), stale.id_session, false).await.unwrap().unwrap();
        uow.rollback().await.unwrap();
        assert_eq!(row.get("active"), Some(&Value::Bool(false)));
    }

    #[tokio::test]
    async fn close_marks_inactive() {
        let db = Database::in_memory();
        let session = open_session(&db, 3, chrono::Duration::hours(1)).await.unwrap();
        assert!(close_session(&db, session.id_session).await.unwrap());
        assert!(!close_session(&db, 999).await.unwrap());
    }
}
