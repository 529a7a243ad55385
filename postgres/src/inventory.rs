//! Inventory storage over `PostgreSQL`.
//!
//! `begin` opens a database transaction and takes `SELECT ... FOR UPDATE`
//! on the event row. Every later statement runs inside that transaction,
//! so the availability check and the count mutation the ledger performs
//! commit as one atomic step. A second transaction on the same event
//! blocks on the row lock until the first commits or rolls back.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use boxoffice_core::error::StoreError;
use boxoffice_core::store::{InventoryStore, InventoryTxn};
use boxoffice_core::types::{
    EventId, EventRecord, Money, TicketId, TicketRecord, TicketStatus,
};

use crate::map_db_err;

/// [`InventoryStore`] backed by `PostgreSQL` row locks.
pub struct PostgresInventoryStore {
    pool: PgPool,
}

impl PostgresInventoryStore {
    /// Create a store over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InventoryStore for PostgresInventoryStore {
    async fn begin(&self, event_id: EventId) -> Result<Option<Box<dyn InventoryTxn>>, StoreError> {
        let mut txn = self.pool.begin().await.map_err(map_db_err)?;

        let row = sqlx::query(
            r"
            SELECT id, total_tickets, available_tickets, starts_at, ends_at
            FROM events
            WHERE id = $1
            FOR UPDATE
            ",
        )
        .bind(*event_id.as_uuid())
        .fetch_optional(&mut *txn)
        .await
        .map_err(map_db_err)?;
        let Some(row) = row else {
            // Dropping the transaction rolls it back.
            return Ok(None);
        };

        let event = row_to_event(&row)?;
        Ok(Some(Box::new(PostgresInventoryTxn { txn, event })))
    }

    async fn find_ticket(&self, ticket_id: TicketId) -> Result<Option<TicketRecord>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT id, event_id, price_cents, status, purchased_at, cancelled_at, used_at
            FROM tickets
            WHERE id = $1
            ",
        )
        .bind(*ticket_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?;
        row.as_ref().map(row_to_ticket).transpose()
    }

    async fn event_snapshot(&self, event_id: EventId) -> Result<Option<EventRecord>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT id, total_tickets, available_tickets, starts_at, ends_at
            FROM events
            WHERE id = $1
            ",
        )
        .bind(*event_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?;
        row.as_ref().map(row_to_event).transpose()
    }

    async fn insert_event(&self, event: &EventRecord) -> Result<(), StoreError> {
        #[allow(clippy::cast_possible_wrap)] // Ticket counts fit comfortably in i32
        let (total, available) = (
            event.total_tickets as i32,
            event.available_tickets as i32,
        );

        sqlx::query(
            r"
            INSERT INTO events (id, total_tickets, available_tickets, starts_at, ends_at)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(*event.id.as_uuid())
        .bind(total)
        .bind(available)
        .bind(event.starts_at)
        .bind(event.ends_at)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }
}

struct PostgresInventoryTxn {
    txn: Transaction<'static, Postgres>,
    event: EventRecord,
}

#[async_trait]
impl InventoryTxn for PostgresInventoryTxn {
    fn event(&self) -> &EventRecord {
        &self.event
    }

    async fn ticket(&mut self, ticket_id: TicketId) -> Result<Option<TicketRecord>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT id, event_id, price_cents, status, purchased_at, cancelled_at, used_at
            FROM tickets
            WHERE id = $1
            ",
        )
        .bind(*ticket_id.as_uuid())
        .fetch_optional(&mut *self.txn)
        .await
        .map_err(map_db_err)?;
        row.as_ref().map(row_to_ticket).transpose()
    }

    async fn insert_ticket(&mut self, ticket: &TicketRecord) -> Result<(), StoreError> {
        #[allow(clippy::cast_possible_wrap)] // Prices in cents fit comfortably in i64
        let price = ticket.price.cents() as i64;

        sqlx::query(
            r"
            INSERT INTO tickets (id, event_id, price_cents, status, purchased_at, cancelled_at, used_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(*ticket.id.as_uuid())
        .bind(*ticket.event_id.as_uuid())
        .bind(price)
        .bind(ticket.status.as_str())
        .bind(ticket.purchased_at)
        .bind(ticket.cancelled_at)
        .bind(ticket.used_at)
        .execute(&mut *self.txn)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn update_ticket(&mut self, ticket: &TicketRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r"
            UPDATE tickets
            SET status = $2, cancelled_at = $3, used_at = $4
            WHERE id = $1
            ",
        )
        .bind(*ticket.id.as_uuid())
        .bind(ticket.status.as_str())
        .bind(ticket.cancelled_at)
        .bind(ticket.used_at)
        .execute(&mut *self.txn)
        .await
        .map_err(map_db_err)?;

        if result.rows_affected() != 1 {
            return Err(StoreError::Database(format!(
                "ticket {} not found for update",
                ticket.id
            )));
        }
        Ok(())
    }

    async fn set_counts(&mut self, total: u32, available: u32) -> Result<(), StoreError> {
        #[allow(clippy::cast_possible_wrap)] // Ticket counts fit comfortably in i32
        let (total_i, available_i) = (total as i32, available as i32);

        sqlx::query(
            r"
            UPDATE events
            SET total_tickets = $2, available_tickets = $3
            WHERE id = $1
            ",
        )
        .bind(*self.event.id.as_uuid())
        .bind(total_i)
        .bind(available_i)
        .execute(&mut *self.txn)
        .await
        .map_err(map_db_err)?;

        self.event.total_tickets = total;
        self.event.available_tickets = available;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.txn.commit().await.map_err(map_db_err)
    }
}

/// Convert a database row to an `EventRecord`.
fn row_to_event(row: &PgRow) -> Result<EventRecord, StoreError> {
    let total: i32 = row.get("total_tickets");
    let available: i32 = row.get("available_tickets");
    Ok(EventRecord {
        id: EventId::from_uuid(row.get("id")),
        total_tickets: u32::try_from(total)
            .map_err(|_| StoreError::Corrupt(format!("negative total_tickets: {total}")))?,
        available_tickets: u32::try_from(available)
            .map_err(|_| StoreError::Corrupt(format!("negative available_tickets: {available}")))?,
        starts_at: row.get("starts_at"),
        ends_at: row.get("ends_at"),
    })
}

/// Convert a database row to a `TicketRecord`.
fn row_to_ticket(row: &PgRow) -> Result<TicketRecord, StoreError> {
    let price: i64 = row.get("price_cents");
    let status_str: String = row.get("status");
    Ok(TicketRecord {
        id: TicketId::from_uuid(row.get("id")),
        event_id: EventId::from_uuid(row.get("event_id")),
        price: Money::from_cents(
            u64::try_from(price)
                .map_err(|_| StoreError::Corrupt(format!("negative price_cents: {price}")))?,
        ),
        status: TicketStatus::parse(&status_str)?,
        purchased_at: row.get("purchased_at"),
        cancelled_at: row.get("cancelled_at"),
        used_at: row.get("used_at"),
    })
}
