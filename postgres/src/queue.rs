//! Admission queue storage over `PostgreSQL`.
//!
//! Waiting positions and the active count are properties of the whole
//! queue, so row locks cannot serialize writers: two concurrent joins
//! would each read `MAX(position)` without blocking one another and
//! insert the same position. `begin` therefore takes a transaction-scoped
//! advisory lock; it is released automatically on commit or rollback and
//! cannot leak if a connection dies mid-transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use boxoffice_core::error::StoreError;
use boxoffice_core::store::{QueueStore, QueueTxn};
use boxoffice_core::types::{QueueEntry, QueueEntryId, QueueStatus, SessionId, UserId};

use crate::map_db_err;

/// Advisory lock key for the queue; the bytes spell "QUEUE".
const QUEUE_LOCK_KEY: i64 = 0x0051_5545_5545;

/// [`QueueStore`] backed by a `PostgreSQL` advisory lock.
pub struct PostgresQueueStore {
    pool: PgPool,
}

impl PostgresQueueStore {
    /// Create a store over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueStore for PostgresQueueStore {
    async fn begin(&self) -> Result<Box<dyn QueueTxn>, StoreError> {
        let mut txn = self.pool.begin().await.map_err(map_db_err)?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(QUEUE_LOCK_KEY)
            .execute(&mut *txn)
            .await
            .map_err(map_db_err)?;

        Ok(Box::new(PostgresQueueTxn { txn }))
    }
}

struct PostgresQueueTxn {
    txn: Transaction<'static, Postgres>,
}

impl PostgresQueueTxn {
    async fn count_by_status(&mut self, status: QueueStatus) -> Result<u32, StoreError> {
        let row = sqlx::query(
            r"
            SELECT COUNT(*) AS entry_count
            FROM queue_entries
            WHERE status = $1
            ",
        )
        .bind(status.as_str())
        .fetch_one(&mut *self.txn)
        .await
        .map_err(map_db_err)?;

        let count: i64 = row.get("entry_count");
        u32::try_from(count)
            .map_err(|_| StoreError::Corrupt(format!("implausible {status} count: {count}")))
    }
}

#[async_trait]
impl QueueTxn for PostgresQueueTxn {
    async fn live_entry(
        &mut self,
        session_id: &SessionId,
    ) -> Result<Option<QueueEntry>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT id, session_id, user_id, position, status, joined_at, expires_at
            FROM queue_entries
            WHERE session_id = $1 AND status IN ('waiting', 'active')
            ",
        )
        .bind(session_id.as_str())
        .fetch_optional(&mut *self.txn)
        .await
        .map_err(map_db_err)?;
        row.as_ref().map(row_to_entry).transpose()
    }

    async fn latest_entry(
        &mut self,
        session_id: &SessionId,
    ) -> Result<Option<QueueEntry>, StoreError> {
        if let Some(live) = self.live_entry(session_id).await? {
            return Ok(Some(live));
        }

        let row = sqlx::query(
            r"
            SELECT id, session_id, user_id, position, status, joined_at, expires_at
            FROM queue_entries
            WHERE session_id = $1
            ORDER BY joined_at DESC
            LIMIT 1
            ",
        )
        .bind(session_id.as_str())
        .fetch_optional(&mut *self.txn)
        .await
        .map_err(map_db_err)?;
        row.as_ref().map(row_to_entry).transpose()
    }

    async fn expire_overdue(&mut self, now: DateTime<Utc>) -> Result<u32, StoreError> {
        // expires_at is kept on the row so a later status poll can report
        // when the lease lapsed.
        let result = sqlx::query(
            r"
            UPDATE queue_entries
            SET status = 'expired'
            WHERE status = 'active' AND expires_at < $1
            ",
        )
        .bind(now)
        .execute(&mut *self.txn)
        .await
        .map_err(map_db_err)?;
        Ok(u32::try_from(result.rows_affected()).unwrap_or(u32::MAX))
    }

    async fn count_active(&mut self) -> Result<u32, StoreError> {
        self.count_by_status(QueueStatus::Active).await
    }

    async fn count_waiting(&mut self) -> Result<u32, StoreError> {
        self.count_by_status(QueueStatus::Waiting).await
    }

    async fn max_waiting_position(&mut self) -> Result<u32, StoreError> {
        let row = sqlx::query(
            r"
            SELECT COALESCE(MAX(position), 0) AS max_position
            FROM queue_entries
            WHERE status = 'waiting'
            ",
        )
        .fetch_one(&mut *self.txn)
        .await
        .map_err(map_db_err)?;

        let max: i32 = row.get("max_position");
        u32::try_from(max)
            .map_err(|_| StoreError::Corrupt(format!("negative waiting position: {max}")))
    }

    async fn insert_entry(&mut self, entry: &QueueEntry) -> Result<(), StoreError> {
        #[allow(clippy::cast_possible_wrap)] // Positions fit comfortably in i32
        let position = entry.position.map(|p| p as i32);

        sqlx::query(
            r"
            INSERT INTO queue_entries (id, session_id, user_id, position, status, joined_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(*entry.id.as_uuid())
        .bind(entry.session_id.as_str())
        .bind(entry.user_id.map(|user| *user.as_uuid()))
        .bind(position)
        .bind(entry.status.as_str())
        .bind(entry.joined_at)
        .bind(entry.expires_at)
        .execute(&mut *self.txn)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn front_waiting(&mut self, limit: u32) -> Result<Vec<QueueEntry>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT id, session_id, user_id, position, status, joined_at, expires_at
            FROM queue_entries
            WHERE status = 'waiting'
            ORDER BY position ASC, joined_at ASC
            LIMIT $1
            ",
        )
        .bind(i64::from(limit))
        .fetch_all(&mut *self.txn)
        .await
        .map_err(map_db_err)?;
        rows.iter().map(row_to_entry).collect()
    }

    async fn mark_active(
        &mut self,
        ids: &[QueueEntryId],
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let raw_ids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();

        sqlx::query(
            r"
            UPDATE queue_entries
            SET status = 'active', position = NULL, expires_at = $2
            WHERE id = ANY($1)
            ",
        )
        .bind(raw_ids)
        .bind(expires_at)
        .execute(&mut *self.txn)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn renumber_waiting(&mut self) -> Result<u32, StoreError> {
        // Rows already at their dense position are excluded so the
        // returned count reflects actual moves.
        let result = sqlx::query(
            r"
            WITH ranked AS (
                SELECT id, ROW_NUMBER() OVER (ORDER BY position ASC, joined_at ASC) AS dense
                FROM queue_entries
                WHERE status = 'waiting'
            )
            UPDATE queue_entries q
            SET position = ranked.dense::int
            FROM ranked
            WHERE q.id = ranked.id AND q.position IS DISTINCT FROM ranked.dense::int
            ",
        )
        .execute(&mut *self.txn)
        .await
        .map_err(map_db_err)?;
        Ok(u32::try_from(result.rows_affected()).unwrap_or(u32::MAX))
    }

    async fn delete_live(
        &mut self,
        session_id: &SessionId,
    ) -> Result<Option<QueueEntry>, StoreError> {
        let row = sqlx::query(
            r"
            DELETE FROM queue_entries
            WHERE session_id = $1 AND status IN ('waiting', 'active')
            RETURNING id, session_id, user_id, position, status, joined_at, expires_at
            ",
        )
        .bind(session_id.as_str())
        .fetch_optional(&mut *self.txn)
        .await
        .map_err(map_db_err)?;
        row.as_ref().map(row_to_entry).transpose()
    }

    async fn delete_by_status(&mut self, status: QueueStatus) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM queue_entries WHERE status = $1")
            .bind(status.as_str())
            .execute(&mut *self.txn)
            .await
            .map_err(map_db_err)?;
        Ok(result.rows_affected())
    }

    async fn all_entries(&mut self) -> Result<Vec<QueueEntry>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT id, session_id, user_id, position, status, joined_at, expires_at
            FROM queue_entries
            ORDER BY joined_at ASC
            ",
        )
        .fetch_all(&mut *self.txn)
        .await
        .map_err(map_db_err)?;
        rows.iter().map(row_to_entry).collect()
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.txn.commit().await.map_err(map_db_err)
    }
}

/// Convert a database row to a `QueueEntry`.
fn row_to_entry(row: &PgRow) -> Result<QueueEntry, StoreError> {
    let position: Option<i32> = row.get("position");
    let status_str: String = row.get("status");
    Ok(QueueEntry {
        id: QueueEntryId::from_uuid(row.get("id")),
        session_id: SessionId::new(row.get::<String, _>("session_id")),
        user_id: row.get::<Option<Uuid>, _>("user_id").map(UserId::from_uuid),
        position: position
            .map(|p| {
                u32::try_from(p)
                    .map_err(|_| StoreError::Corrupt(format!("negative position: {p}")))
            })
            .transpose()?,
        status: QueueStatus::parse(&status_str)?,
        joined_at: row.get("joined_at"),
        expires_at: row.get("expires_at"),
    })
}
