//! Persistence seam for the inventory ledger and the admission queue.
//!
//! Stores hand out transaction guards rather than executing whole
//! operations: the ledger and the controller own the business rules, a
//! backend owns locking and durability. Dropping a guard without calling
//! `commit` aborts the transaction with no partial state, which is what
//! makes conflict retries safe.
//!
//! # Locking contract
//!
//! [`InventoryStore::begin`] acquires an exclusive lock on one event and
//! everything reachable from it (its tickets). Two transactions on the
//! same event serialize; transactions on different events never contend.
//! [`QueueStore::begin`] acquires one global queue lock, because waiting
//! positions and the active count are properties of the whole queue.
//! Backends may surface lock acquisition failures as
//! [`StoreError::Conflict`]; callers retry those.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::types::{
    EventId, EventRecord, QueueEntry, QueueEntryId, QueueStatus, SessionId, TicketId, TicketRecord,
};

/// Storage for events and their tickets.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Opens a transaction holding the exclusive lock on the event.
    ///
    /// Returns `Ok(None)` when the event does not exist; the distinction
    /// between a missing row and a backend fault matters to callers.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the transaction or the lock cannot be
    /// acquired.
    async fn begin(&self, event_id: EventId) -> Result<Option<Box<dyn InventoryTxn>>, StoreError>;

    /// Unlocked point read of a ticket; used to resolve the owning event
    /// before taking its lock, and for diagnostics.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on backend failure.
    async fn find_ticket(&self, ticket_id: TicketId) -> Result<Option<TicketRecord>, StoreError>;

    /// Unlocked snapshot of an event row.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on backend failure.
    async fn event_snapshot(&self, event_id: EventId) -> Result<Option<EventRecord>, StoreError>;

    /// Inserts a new event row. Seeding surface; event CRUD beyond this
    /// lives outside the core.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on backend failure or duplicate id.
    async fn insert_event(&self, event: &EventRecord) -> Result<(), StoreError>;
}

/// One open inventory transaction, holding its event's exclusive lock.
///
/// `event()` exposes the row as it was read under the lock; mutations do
/// not refresh it. Dropping the guard without `commit` rolls back.
#[async_trait]
pub trait InventoryTxn: Send {
    /// The locked event row as read at `begin`
    fn event(&self) -> &EventRecord;

    /// Reads a ticket under the event lock.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on backend failure.
    async fn ticket(&mut self, ticket_id: TicketId) -> Result<Option<TicketRecord>, StoreError>;

    /// Stages a new ticket row.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on backend failure.
    async fn insert_ticket(&mut self, ticket: &TicketRecord) -> Result<(), StoreError>;

    /// Stages an update to an existing ticket row.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on backend failure.
    async fn update_ticket(&mut self, ticket: &TicketRecord) -> Result<(), StoreError>;

    /// Stages new capacity counts on the event row.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on backend failure.
    async fn set_counts(&mut self, total: u32, available: u32) -> Result<(), StoreError>;

    /// Commits every staged mutation atomically and releases the lock.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the commit fails; nothing was applied.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Storage for the admission queue.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Opens a transaction holding the global queue lock.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the transaction or the lock cannot be
    /// acquired.
    async fn begin(&self) -> Result<Box<dyn QueueTxn>, StoreError>;
}

/// One open queue transaction, holding the global queue lock.
///
/// Set-level operations exist so the controller's flows stay single
/// statements per step in SQL backends. Dropping without `commit` rolls
/// back.
#[async_trait]
pub trait QueueTxn: Send {
    /// The session's non-terminal entry (Waiting or Active), if any.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on backend failure.
    async fn live_entry(
        &mut self,
        session_id: &SessionId,
    ) -> Result<Option<QueueEntry>, StoreError>;

    /// The session's most relevant entry: its live one, else its newest
    /// expired one. `None` means the session never joined or was purged.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on backend failure.
    async fn latest_entry(
        &mut self,
        session_id: &SessionId,
    ) -> Result<Option<QueueEntry>, StoreError>;

    /// Marks every Active entry whose lease deadline is strictly before
    /// `now` as Expired. Returns how many lapsed.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on backend failure.
    async fn expire_overdue(&mut self, now: DateTime<Utc>) -> Result<u32, StoreError>;

    /// Number of Active entries.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on backend failure.
    async fn count_active(&mut self) -> Result<u32, StoreError>;

    /// Number of Waiting entries.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on backend failure.
    async fn count_waiting(&mut self) -> Result<u32, StoreError>;

    /// Highest waiting position, 0 when nobody waits.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on backend failure.
    async fn max_waiting_position(&mut self) -> Result<u32, StoreError>;

    /// Stages a new entry row.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on backend failure.
    async fn insert_entry(&mut self, entry: &QueueEntry) -> Result<(), StoreError>;

    /// Up to `limit` Waiting entries in position order.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on backend failure.
    async fn front_waiting(&mut self, limit: u32) -> Result<Vec<QueueEntry>, StoreError>;

    /// Promotes the given entries to Active with the given lease deadline,
    /// clearing their positions.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on backend failure.
    async fn mark_active(
        &mut self,
        ids: &[QueueEntryId],
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Rewrites waiting positions to dense 1..=W in current position
    /// order. Returns how many rows moved.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on backend failure.
    async fn renumber_waiting(&mut self) -> Result<u32, StoreError>;

    /// Deletes the session's non-terminal entry, returning it.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on backend failure.
    async fn delete_live(
        &mut self,
        session_id: &SessionId,
    ) -> Result<Option<QueueEntry>, StoreError>;

    /// Deletes every entry with the given status, returning the count.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on backend failure.
    async fn delete_by_status(&mut self, status: QueueStatus) -> Result<u64, StoreError>;

    /// Every entry in the queue, for stats recomputation.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on backend failure.
    async fn all_entries(&mut self) -> Result<Vec<QueueEntry>, StoreError>;

    /// Commits every staged mutation atomically and releases the lock.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the commit fails; nothing was applied.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
