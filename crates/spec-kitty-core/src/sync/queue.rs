//! Durable offline queue for event envelopes.
//!
//! Backed by SQLite in WAL mode; concurrent writers are tolerated by the
//! store's own locking. Rows are keyed by account scope so switching
//! accounts never leaks events from the previous account's queue. The queue
//! holds at most 10 000 pending events per scope: over-cap writes are
//! rejected with a warning and existing entries are never dropped to make
//! room.

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::warn;

use crate::error::Result;
use crate::sync::envelope::EventEnvelope;

/// Maximum pending events per account scope.
pub const QUEUE_CAP: u64 = 10_000;

/// Replay status of a queued event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayStatus {
    Pending,
    Delivered,
    Failed,
}

impl ReplayStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }
}

/// One queue row.
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    pub id: i64,
    pub envelope: EventEnvelope,
    pub replay_status: ReplayStatus,
    pub retry_count: u32,
    pub last_retry_at: Option<DateTime<Utc>>,
}

/// SQLite-backed offline queue.
#[derive(Debug, Clone)]
pub struct OfflineQueue {
    pool: SqlitePool,
    cap: u64,
}

impl OfflineQueue {
    /// Open (or create) the queue database at `db_path`.
    pub async fn open(db_path: &Path) -> Result<Self> {
        Self::open_with_cap(db_path, QUEUE_CAP).await
    }

    /// Open with an explicit per-scope capacity (tests exercise the cap
    /// without ten thousand inserts).
    pub async fn open_with_cap(db_path: &Path, cap: u64) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| crate::Error::io(parent, e))?;
        }
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))
            .unwrap_or_else(|_| SqliteConnectOptions::new().filename(db_path))
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let queue = Self { pool, cap };
        queue.init_schema().await?;
        Ok(queue)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS event_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scope TEXT NOT NULL,
                event_id TEXT NOT NULL,
                envelope TEXT NOT NULL,
                replay_status TEXT NOT NULL DEFAULT 'pending',
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_retry_at TEXT
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_event_queue_scope_status
             ON event_queue (scope, replay_status)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Enqueue an envelope under a scope.
    ///
    /// Returns `false` (with a warning) when the scope is at capacity;
    /// nothing already queued is ever dropped.
    pub async fn enqueue(&self, scope: &str, envelope: &EventEnvelope) -> Result<bool> {
        let pending = self.size(scope).await?;
        if pending >= self.cap {
            warn!(scope, pending, cap = self.cap, "offline queue at capacity; rejecting event");
            return Ok(false);
        }
        let raw = serde_json::to_string(envelope)?;
        sqlx::query(
            "INSERT INTO event_queue (scope, event_id, envelope, replay_status, retry_count)
             VALUES (?1, ?2, ?3, 'pending', 0)",
        )
        .bind(scope)
        .bind(&envelope.event_id)
        .bind(raw)
        .execute(&self.pool)
        .await?;
        Ok(true)
    }

    /// Number of pending events in a scope.
    pub async fn size(&self, scope: &str) -> Result<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM event_queue WHERE scope = ?1 AND replay_status = 'pending'",
        )
        .bind(scope)
        .fetch_one(&self.pool)
        .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n.max(0) as u64)
    }

    /// Up to `limit` pending events in insertion order.
    ///
    /// Rows with corrupt envelope JSON are skipped (with one warning) and
    /// marked failed so they stop blocking the drain.
    pub async fn pending(&self, scope: &str, limit: u32) -> Result<Vec<QueuedEvent>> {
        let rows = sqlx::query(
            "SELECT id, envelope, replay_status, retry_count, last_retry_at
             FROM event_queue
             WHERE scope = ?1 AND replay_status = 'pending'
             ORDER BY id ASC
             LIMIT ?2",
        )
        .bind(scope)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        let mut corrupt_ids: Vec<i64> = Vec::new();
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let raw: String = row.try_get("envelope")?;
            match serde_json::from_str::<EventEnvelope>(&raw) {
                Ok(envelope) => {
                    let retry_count: i64 = row.try_get("retry_count")?;
                    let last_retry_at: Option<String> = row.try_get("last_retry_at")?;
                    events.push(QueuedEvent {
                        id,
                        envelope,
                        replay_status: ReplayStatus::Pending,
                        retry_count: retry_count.max(0) as u32,
                        last_retry_at: last_retry_at
                            .as_deref()
                            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                            .map(|dt| dt.with_timezone(&Utc)),
                    });
                }
                Err(_) => corrupt_ids.push(id),
            }
        }
        if !corrupt_ids.is_empty() {
            warn!(scope, corrupt = corrupt_ids.len(), "skipping corrupt queue rows");
            for id in corrupt_ids {
                sqlx::query("UPDATE event_queue SET replay_status = 'failed' WHERE id = ?1")
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(events)
    }

    /// Remove delivered events from the pending set.
    pub async fn mark_delivered(&self, scope: &str, event_ids: &[String]) -> Result<()> {
        for event_id in event_ids {
            sqlx::query(
                "DELETE FROM event_queue
                 WHERE scope = ?1 AND event_id = ?2 AND replay_status = 'pending'",
            )
            .bind(scope)
            .bind(event_id)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Record a failed delivery attempt; the event stays pending.
    pub async fn mark_retry(&self, scope: &str, event_ids: &[String]) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        for event_id in event_ids {
            sqlx::query(
                "UPDATE event_queue
                 SET retry_count = retry_count + 1, last_retry_at = ?3
                 WHERE scope = ?1 AND event_id = ?2 AND replay_status = 'pending'",
            )
            .bind(scope)
            .bind(event_id)
            .bind(&now)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}
