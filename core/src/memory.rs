//! In-memory storage backend.
//!
//! The row-lock discipline of the SQL backend maps onto async mutexes: one
//! mutex per event (held for the whole transaction, so same-event
//! operations serialize and different events never contend) and one global
//! mutex for the queue. Guards operate on a working copy and write back on
//! commit, which gives the same abort semantics as a rolled-back database
//! transaction: dropping a guard without committing leaves state untouched.
//!
//! Intended for tests and single-node deployments that do not need
//! durability.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::StoreError;
use crate::store::{InventoryStore, InventoryTxn, QueueStore, QueueTxn};
use crate::types::{
    EventId, EventRecord, QueueEntry, QueueEntryId, QueueStatus, SessionId, TicketId, TicketRecord,
};

// ============================================================================
// Inventory
// ============================================================================

#[derive(Clone, Debug)]
struct EventShard {
    event: EventRecord,
    tickets: HashMap<TicketId, TicketRecord>,
}

#[derive(Debug, Default)]
struct InventoryInner {
    shards: Mutex<HashMap<EventId, Arc<Mutex<EventShard>>>>,
    // ticket -> owning event, maintained on commit; never held across a
    // shard lock acquisition
    ticket_index: Mutex<HashMap<TicketId, EventId>>,
}

/// In-memory [`InventoryStore`] with a per-event mutex as the row lock.
#[derive(Clone, Debug, Default)]
pub struct MemoryInventoryStore {
    inner: Arc<InventoryInner>,
}

impl MemoryInventoryStore {
    /// Creates an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InventoryStore for MemoryInventoryStore {
    async fn begin(&self, event_id: EventId) -> Result<Option<Box<dyn InventoryTxn>>, StoreError> {
        let shard = {
            let shards = self.inner.shards.lock().await;
            shards.get(&event_id).cloned()
        };
        let Some(shard) = shard else {
            return Ok(None);
        };

        let guard = shard.lock_owned().await;
        let work = guard.clone();
        Ok(Some(Box::new(MemoryInventoryTxn {
            inner: Arc::clone(&self.inner),
            event_id,
            guard,
            work,
            inserted: Vec::new(),
        })))
    }

    async fn find_ticket(&self, ticket_id: TicketId) -> Result<Option<TicketRecord>, StoreError> {
        let owner = {
            let index = self.inner.ticket_index.lock().await;
            index.get(&ticket_id).copied()
        };
        let Some(event_id) = owner else {
            return Ok(None);
        };
        let shard = {
            let shards = self.inner.shards.lock().await;
            shards.get(&event_id).cloned()
        };
        let Some(shard) = shard else {
            return Ok(None);
        };
        let locked = shard.lock().await;
        Ok(locked.tickets.get(&ticket_id).cloned())
    }

    async fn event_snapshot(&self, event_id: EventId) -> Result<Option<EventRecord>, StoreError> {
        let shard = {
            let shards = self.inner.shards.lock().await;
            shards.get(&event_id).cloned()
        };
        let Some(shard) = shard else {
            return Ok(None);
        };
        let locked = shard.lock().await;
        Ok(Some(locked.event.clone()))
    }

    async fn insert_event(&self, event: &EventRecord) -> Result<(), StoreError> {
        let mut shards = self.inner.shards.lock().await;
        if shards.contains_key(&event.id) {
            return Err(StoreError::Database(format!(
                "event {} already exists",
                event.id
            )));
        }
        shards.insert(
            event.id,
            Arc::new(Mutex::new(EventShard {
                event: event.clone(),
                tickets: HashMap::new(),
            })),
        );
        Ok(())
    }
}

struct MemoryInventoryTxn {
    inner: Arc<InventoryInner>,
    event_id: EventId,
    guard: OwnedMutexGuard<EventShard>,
    work: EventShard,
    inserted: Vec<TicketId>,
}

#[async_trait]
impl InventoryTxn for MemoryInventoryTxn {
    fn event(&self) -> &EventRecord {
        &self.work.event
    }

    async fn ticket(&mut self, ticket_id: TicketId) -> Result<Option<TicketRecord>, StoreError> {
        Ok(self.work.tickets.get(&ticket_id).cloned())
    }

    async fn insert_ticket(&mut self, ticket: &TicketRecord) -> Result<(), StoreError> {
        self.work.tickets.insert(ticket.id, ticket.clone());
        self.inserted.push(ticket.id);
        Ok(())
    }

    async fn update_ticket(&mut self, ticket: &TicketRecord) -> Result<(), StoreError> {
        if !self.work.tickets.contains_key(&ticket.id) {
            return Err(StoreError::Database(format!(
                "ticket {} not in event {}",
                ticket.id, self.event_id
            )));
        }
        self.work.tickets.insert(ticket.id, ticket.clone());
        Ok(())
    }

    async fn set_counts(&mut self, total: u32, available: u32) -> Result<(), StoreError> {
        self.work.event.total_tickets = total;
        self.work.event.available_tickets = available;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        let MemoryInventoryTxn {
            inner,
            event_id,
            mut guard,
            work,
            inserted,
        } = this;

        *guard = work;
        drop(guard);

        if !inserted.is_empty() {
            let mut index = inner.ticket_index.lock().await;
            for id in inserted {
                index.insert(id, event_id);
            }
        }
        Ok(())
    }
}

// ============================================================================
// Queue
// ============================================================================

#[derive(Clone, Debug, Default)]
struct QueueTable {
    entries: Vec<QueueEntry>,
}

/// In-memory [`QueueStore`] with one global mutex as the queue lock.
#[derive(Clone, Debug, Default)]
pub struct MemoryQueueStore {
    table: Arc<Mutex<QueueTable>>,
}

impl MemoryQueueStore {
    /// Creates an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn begin(&self) -> Result<Box<dyn QueueTxn>, StoreError> {
        let guard = Arc::clone(&self.table).lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryQueueTxn { guard, work }))
    }
}

struct MemoryQueueTxn {
    guard: OwnedMutexGuard<QueueTable>,
    work: QueueTable,
}

fn len_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

#[async_trait]
impl QueueTxn for MemoryQueueTxn {
    async fn live_entry(
        &mut self,
        session_id: &SessionId,
    ) -> Result<Option<QueueEntry>, StoreError> {
        Ok(self
            .work
            .entries
            .iter()
            .find(|e| e.session_id == *session_id && e.is_live())
            .cloned())
    }

    async fn latest_entry(
        &mut self,
        session_id: &SessionId,
    ) -> Result<Option<QueueEntry>, StoreError> {
        if let Some(live) = self.live_entry(session_id).await? {
            return Ok(Some(live));
        }
        Ok(self
            .work
            .entries
            .iter()
            .filter(|e| e.session_id == *session_id)
            .max_by_key(|e| e.joined_at)
            .cloned())
    }

    async fn expire_overdue(&mut self, now: DateTime<Utc>) -> Result<u32, StoreError> {
        let mut lapsed = 0;
        for entry in &mut self.work.entries {
            if entry.lease_lapsed(now) {
                entry.status = QueueStatus::Expired;
                lapsed += 1;
            }
        }
        Ok(lapsed)
    }

    async fn count_active(&mut self) -> Result<u32, StoreError> {
        Ok(len_u32(
            self.work
                .entries
                .iter()
                .filter(|e| e.status == QueueStatus::Active)
                .count(),
        ))
    }

    async fn count_waiting(&mut self) -> Result<u32, StoreError> {
        Ok(len_u32(
            self.work
                .entries
                .iter()
                .filter(|e| e.status == QueueStatus::Waiting)
                .count(),
        ))
    }

    async fn max_waiting_position(&mut self) -> Result<u32, StoreError> {
        Ok(self
            .work
            .entries
            .iter()
            .filter(|e| e.status == QueueStatus::Waiting)
            .filter_map(|e| e.position)
            .max()
            .unwrap_or(0))
    }

    async fn insert_entry(&mut self, entry: &QueueEntry) -> Result<(), StoreError> {
        self.work.entries.push(entry.clone());
        Ok(())
    }

    async fn front_waiting(&mut self, limit: u32) -> Result<Vec<QueueEntry>, StoreError> {
        let mut waiting: Vec<QueueEntry> = self
            .work
            .entries
            .iter()
            .filter(|e| e.status == QueueStatus::Waiting)
            .cloned()
            .collect();
        waiting.sort_by_key(|e| (e.position, e.joined_at));
        waiting.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(waiting)
    }

    async fn mark_active(
        &mut self,
        ids: &[QueueEntryId],
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        for entry in &mut self.work.entries {
            if ids.contains(&entry.id) {
                entry.status = QueueStatus::Active;
                entry.position = None;
                entry.expires_at = Some(expires_at);
            }
        }
        Ok(())
    }

    async fn renumber_waiting(&mut self) -> Result<u32, StoreError> {
        let mut order: Vec<usize> = (0..self.work.entries.len())
            .filter(|&i| self.work.entries[i].status == QueueStatus::Waiting)
            .collect();
        order.sort_by_key(|&i| (self.work.entries[i].position, self.work.entries[i].joined_at));

        let mut moved = 0;
        for (rank, &i) in order.iter().enumerate() {
            let dense = len_u32(rank) + 1;
            if self.work.entries[i].position != Some(dense) {
                self.work.entries[i].position = Some(dense);
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn delete_live(
        &mut self,
        session_id: &SessionId,
    ) -> Result<Option<QueueEntry>, StoreError> {
        let found = self
            .work
            .entries
            .iter()
            .position(|e| e.session_id == *session_id && e.is_live());
        Ok(found.map(|i| self.work.entries.remove(i)))
    }

    async fn delete_by_status(&mut self, status: QueueStatus) -> Result<u64, StoreError> {
        let before = self.work.entries.len();
        self.work.entries.retain(|e| e.status != status);
        Ok(u64::try_from(before - self.work.entries.len()).unwrap_or(u64::MAX))
    }

    async fn all_entries(&mut self) -> Result<Vec<QueueEntry>, StoreError> {
        Ok(self.work.entries.clone())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        let MemoryQueueTxn { mut guard, work } = this;
        *guard = work;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Money;
    use chrono::TimeZone;

    #[allow(clippy::expect_used)]
    fn ts(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, h, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn sample_event() -> EventRecord {
        EventRecord {
            id: EventId::new(),
            total_tickets: 5,
            available_tickets: 5,
            starts_at: ts(18),
            ends_at: ts(23),
        }
    }

    #[tokio::test]
    #[allow(clippy::expect_used)]
    async fn begin_returns_none_for_unknown_event() {
        let store = MemoryInventoryStore::new();
        assert!(store.begin(EventId::new()).await.expect("begin").is_none());
    }

    #[tokio::test]
    #[allow(clippy::expect_used)]
    async fn dropped_txn_leaves_state_unchanged() {
        let store = MemoryInventoryStore::new();
        let event = sample_event();
        store.insert_event(&event).await.expect("insert event");

        {
            let mut txn = store.begin(event.id).await.expect("begin").expect("event exists");
            let ticket =
                TicketRecord::issued(TicketId::new(), event.id, Money::from_cents(100), ts(10));
            txn.insert_ticket(&ticket).await.expect("insert ticket");
            txn.set_counts(5, 4).await.expect("set counts");
            // dropped without commit
        }

        let snapshot = store
            .event_snapshot(event.id)
            .await
            .expect("snapshot")
            .expect("event exists");
        assert_eq!(snapshot.available_tickets, 5);
    }

    #[tokio::test]
    #[allow(clippy::expect_used)]
    async fn committed_txn_is_visible_and_indexed() {
        let store = MemoryInventoryStore::new();
        let event = sample_event();
        store.insert_event(&event).await.expect("insert event");

        let ticket_id = TicketId::new();
        let mut txn = store.begin(event.id).await.expect("begin").expect("event exists");
        let ticket = TicketRecord::issued(ticket_id, event.id, Money::from_cents(100), ts(10));
        txn.insert_ticket(&ticket).await.expect("insert ticket");
        txn.set_counts(5, 4).await.expect("set counts");
        txn.commit().await.expect("commit");

        let snapshot = store
            .event_snapshot(event.id)
            .await
            .expect("snapshot")
            .expect("event exists");
        assert_eq!(snapshot.available_tickets, 4);
        let found = store
            .find_ticket(ticket_id)
            .await
            .expect("find ticket")
            .expect("ticket exists");
        assert_eq!(found.event_id, event.id);
    }

    #[tokio::test]
    #[allow(clippy::expect_used)]
    async fn duplicate_event_insert_is_rejected() {
        let store = MemoryInventoryStore::new();
        let event = sample_event();
        store.insert_event(&event).await.expect("insert event");
        assert!(store.insert_event(&event).await.is_err());
    }

    #[tokio::test]
    #[allow(clippy::expect_used)]
    async fn queue_renumber_compacts_positions() {
        let store = MemoryQueueStore::new();
        let mut txn = store.begin().await.expect("begin");
        for (session, position) in [("s1", 2), ("s2", 5), ("s3", 9)] {
            let entry = QueueEntry::waiting(SessionId::from(session), None, position, ts(9));
            txn.insert_entry(&entry).await.expect("insert entry");
        }
        let moved = txn.renumber_waiting().await.expect("renumber");
        assert_eq!(moved, 3);

        let front = txn.front_waiting(10).await.expect("front");
        let positions: Vec<Option<u32>> = front.iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![Some(1), Some(2), Some(3)]);
        let sessions: Vec<&str> = front.iter().map(|e| e.session_id.as_str()).collect();
        assert_eq!(sessions, vec!["s1", "s2", "s3"]);
    }

    #[tokio::test]
    #[allow(clippy::expect_used)]
    async fn queue_expiry_only_touches_lapsed_leases() {
        let store = MemoryQueueStore::new();
        let mut txn = store.begin().await.expect("begin");
        let fresh = QueueEntry::admitted(SessionId::from("fresh"), None, ts(9), ts(12));
        let stale = QueueEntry::admitted(SessionId::from("stale"), None, ts(8), ts(10));
        txn.insert_entry(&fresh).await.expect("insert entry");
        txn.insert_entry(&stale).await.expect("insert entry");

        assert_eq!(txn.expire_overdue(ts(11)).await.expect("expire"), 1);
        assert_eq!(txn.count_active().await.expect("count"), 1);
        let stale_now = txn
            .latest_entry(&SessionId::from("stale"))
            .await
            .expect("latest")
            .expect("entry exists");
        assert_eq!(stale_now.status, QueueStatus::Expired);
        // the lapsed deadline stays visible
        assert_eq!(stale_now.expires_at, Some(ts(10)));
    }

    #[tokio::test]
    #[allow(clippy::expect_used)]
    async fn queue_commit_and_rollback() {
        let store = MemoryQueueStore::new();
        {
            let mut txn = store.begin().await.expect("begin");
            let entry = QueueEntry::waiting(SessionId::from("s1"), None, 1, ts(9));
            txn.insert_entry(&entry).await.expect("insert entry");
            // dropped without commit
        }
        {
            let mut txn = store.begin().await.expect("begin");
            assert_eq!(txn.count_waiting().await.expect("count"), 0);
            let entry = QueueEntry::waiting(SessionId::from("s1"), None, 1, ts(9));
            txn.insert_entry(&entry).await.expect("insert entry");
            txn.commit().await.expect("commit");
        }
        let mut txn = store.begin().await.expect("begin");
        assert_eq!(txn.count_waiting().await.expect("count"), 1);
    }
}
