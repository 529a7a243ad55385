//! The inventory ledger: atomic reserve, release, redeem and resize.
//!
//! Every mutation runs inside one store transaction that holds the owning
//! event's exclusive lock, so the capacity check and the count mutation
//! are a single atomic step. The ledger upholds one invariant at every
//! commit point:
//!
//! ```text
//! available_tickets == total_tickets - count(tickets in {Active, Used})
//! ```
//!
//! Overselling is impossible: the count is only decremented after being
//! observed positive under the same lock. Two requests racing for the
//! last ticket serialize; the loser sees zero and is rejected.
//!
//! Transient lock conflicts are retried internally (the aborted
//! transaction left no partial state); everything else surfaces
//! immediately.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::clock::Clock;
use crate::error::LedgerError;
use crate::metrics;
use crate::notify::TicketNotifier;
use crate::retry::{RetryPolicy, retry_if};
use crate::store::InventoryStore;
use crate::types::{EventId, EventRecord, Money, TicketId, TicketRecord, TicketStatus};

/// Issues, cancels, redeems and counts tickets for events.
pub struct InventoryLedger {
    store: Arc<dyn InventoryStore>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    notifier: Option<Arc<dyn TicketNotifier>>,
}

impl InventoryLedger {
    /// Creates a ledger over a store with the default conflict retry
    /// budget and no notifier.
    #[must_use]
    pub fn new(store: Arc<dyn InventoryStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            retry: RetryPolicy::conflict(),
            notifier: None,
        }
    }

    /// Replaces the conflict retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Attaches a post-commit notifier.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn TicketNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    fn is_transient(err: &LedgerError) -> bool {
        matches!(err, LedgerError::Store(store) if store.is_transient())
    }

    /// Issues one ticket for the event at the given price.
    ///
    /// The price arrives fully computed; discounts are upstream concerns.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::EventNotFound`] for an unknown event
    /// - [`LedgerError::NotPurchasable`] outside the sales window
    /// - [`LedgerError::NoCapacity`] when sold out
    /// - [`LedgerError::Store`] after the conflict retry budget is spent
    pub async fn reserve(
        &self,
        event_id: EventId,
        price: Money,
    ) -> Result<TicketRecord, LedgerError> {
        let attempts = AtomicUsize::new(0);
        let ticket = retry_if(
            &self.retry,
            || {
                if attempts.fetch_add(1, Ordering::Relaxed) > 0 {
                    metrics::record_txn_retry("reserve");
                }
                self.try_reserve(event_id, price)
            },
            Self::is_transient,
        )
        .await?;

        if let Some(notifier) = &self.notifier {
            if let Err(err) = notifier.ticket_issued(&ticket).await {
                tracing::warn!(
                    ticket_id = %ticket.id,
                    error = %err,
                    "issue notification failed"
                );
            }
        }
        Ok(ticket)
    }

    async fn try_reserve(
        &self,
        event_id: EventId,
        price: Money,
    ) -> Result<TicketRecord, LedgerError> {
        let now = self.clock.now();
        let mut txn = self
            .store
            .begin(event_id)
            .await?
            .ok_or(LedgerError::EventNotFound(event_id))?;
        let event = txn.event().clone();

        if let Err(reason) = event.purchasable_at(now) {
            metrics::record_reserve_rejected("not_purchasable");
            tracing::debug!(event_id = %event_id, %reason, "reserve rejected outside sales window");
            return Err(LedgerError::NotPurchasable { id: event_id, reason });
        }
        if event.available_tickets == 0 {
            metrics::record_reserve_rejected("no_capacity");
            tracing::debug!(event_id = %event_id, "reserve rejected, sold out");
            return Err(LedgerError::NoCapacity(event_id));
        }

        let available = event.available_tickets - 1;
        let ticket = TicketRecord::issued(TicketId::new(), event_id, price, now);
        txn.insert_ticket(&ticket).await?;
        txn.set_counts(event.total_tickets, available).await?;
        txn.commit().await?;

        metrics::record_ticket_issued(&event_id.to_string(), available);
        tracing::info!(
            ticket_id = %ticket.id,
            event_id = %event_id,
            available,
            "ticket issued"
        );
        Ok(ticket)
    }

    /// Cancels an active ticket and returns its capacity to the pool.
    ///
    /// Exactly one increment per ticket lifetime: a second release finds
    /// the ticket already terminal and fails without touching counts.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::TicketNotFound`] for an unknown ticket
    /// - [`LedgerError::InvalidState`] when the ticket is already used or
    ///   cancelled
    /// - [`LedgerError::Store`] after the conflict retry budget is spent
    pub async fn release(&self, ticket_id: TicketId) -> Result<TicketRecord, LedgerError> {
        let attempts = AtomicUsize::new(0);
        let ticket = retry_if(
            &self.retry,
            || {
                if attempts.fetch_add(1, Ordering::Relaxed) > 0 {
                    metrics::record_txn_retry("release");
                }
                self.try_release(ticket_id)
            },
            Self::is_transient,
        )
        .await?;

        if let Some(notifier) = &self.notifier {
            if let Err(err) = notifier.ticket_cancelled(&ticket).await {
                tracing::warn!(
                    ticket_id = %ticket.id,
                    error = %err,
                    "cancel notification failed"
                );
            }
        }
        Ok(ticket)
    }

    async fn try_release(&self, ticket_id: TicketId) -> Result<TicketRecord, LedgerError> {
        // Unlocked read only resolves the owning event; the decision is
        // made on the re-read under the lock.
        let probe = self
            .store
            .find_ticket(ticket_id)
            .await?
            .ok_or(LedgerError::TicketNotFound(ticket_id))?;

        let mut txn = self
            .store
            .begin(probe.event_id)
            .await?
            .ok_or(LedgerError::EventNotFound(probe.event_id))?;
        let event = txn.event().clone();
        let ticket = txn
            .ticket(ticket_id)
            .await?
            .ok_or(LedgerError::TicketNotFound(ticket_id))?;

        if ticket.status != TicketStatus::Active {
            return Err(LedgerError::InvalidState {
                id: ticket_id,
                status: ticket.status,
            });
        }

        let now = self.clock.now();
        let mut cancelled = ticket;
        cancelled.status = TicketStatus::Cancelled;
        cancelled.cancelled_at = Some(now);

        let available = event.available_tickets + 1;
        txn.update_ticket(&cancelled).await?;
        txn.set_counts(event.total_tickets, available).await?;
        txn.commit().await?;

        metrics::record_ticket_cancelled(&cancelled.event_id.to_string(), available);
        tracing::info!(
            ticket_id = %ticket_id,
            event_id = %cancelled.event_id,
            available,
            "ticket cancelled"
        );
        Ok(cancelled)
    }

    /// Redeems an active ticket at the door.
    ///
    /// Capacity is untouched: a used ticket still counts against the
    /// allocation. Used and cancelled are mutually exclusive terminals.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::TicketNotFound`] for an unknown ticket
    /// - [`LedgerError::InvalidState`] when the ticket is already used or
    ///   cancelled
    /// - [`LedgerError::Store`] after the conflict retry budget is spent
    pub async fn redeem(&self, ticket_id: TicketId) -> Result<TicketRecord, LedgerError> {
        let attempts = AtomicUsize::new(0);
        retry_if(
            &self.retry,
            || {
                if attempts.fetch_add(1, Ordering::Relaxed) > 0 {
                    metrics::record_txn_retry("redeem");
                }
                self.try_redeem(ticket_id)
            },
            Self::is_transient,
        )
        .await
    }

    async fn try_redeem(&self, ticket_id: TicketId) -> Result<TicketRecord, LedgerError> {
        let probe = self
            .store
            .find_ticket(ticket_id)
            .await?
            .ok_or(LedgerError::TicketNotFound(ticket_id))?;

        let mut txn = self
            .store
            .begin(probe.event_id)
            .await?
            .ok_or(LedgerError::EventNotFound(probe.event_id))?;
        let ticket = txn
            .ticket(ticket_id)
            .await?
            .ok_or(LedgerError::TicketNotFound(ticket_id))?;

        if ticket.status != TicketStatus::Active {
            return Err(LedgerError::InvalidState {
                id: ticket_id,
                status: ticket.status,
            });
        }

        let mut used = ticket;
        used.status = TicketStatus::Used;
        used.used_at = Some(self.clock.now());
        txn.update_ticket(&used).await?;
        txn.commit().await?;

        metrics::record_ticket_redeemed();
        tracing::info!(ticket_id = %ticket_id, event_id = %used.event_id, "ticket redeemed");
        Ok(used)
    }

    /// Changes the event's total allocation.
    ///
    /// Growth extends availability by the difference; shrinking is
    /// bounded below by the already-sold count so existing tickets are
    /// never stranded.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::EventNotFound`] for an unknown event
    /// - [`LedgerError::BelowSoldFloor`] when `new_total` is under the
    ///   sold count (or zero; events keep at least one sellable ticket)
    /// - [`LedgerError::Store`] after the conflict retry budget is spent
    pub async fn resize(
        &self,
        event_id: EventId,
        new_total: u32,
    ) -> Result<EventRecord, LedgerError> {
        let attempts = AtomicUsize::new(0);
        retry_if(
            &self.retry,
            || {
                if attempts.fetch_add(1, Ordering::Relaxed) > 0 {
                    metrics::record_txn_retry("resize");
                }
                self.try_resize(event_id, new_total)
            },
            Self::is_transient,
        )
        .await
    }

    async fn try_resize(
        &self,
        event_id: EventId,
        new_total: u32,
    ) -> Result<EventRecord, LedgerError> {
        let mut txn = self
            .store
            .begin(event_id)
            .await?
            .ok_or(LedgerError::EventNotFound(event_id))?;
        let mut event = txn.event().clone();
        let sold = event.sold();

        if new_total < sold || new_total == 0 {
            tracing::debug!(
                event_id = %event_id,
                new_total,
                sold,
                "resize rejected below sold floor"
            );
            return Err(LedgerError::BelowSoldFloor {
                requested: new_total,
                sold,
            });
        }

        let available = new_total - sold;
        txn.set_counts(new_total, available).await?;
        txn.commit().await?;

        event.total_tickets = new_total;
        event.available_tickets = available;
        metrics::record_capacity_resized(&event_id.to_string(), available);
        tracing::info!(event_id = %event_id, new_total, available, "capacity resized");
        Ok(event)
    }

    /// Unlocked availability snapshot for dashboards.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::EventNotFound`] for an unknown event
    /// - [`LedgerError::Store`] on backend failure
    pub async fn availability(&self, event_id: EventId) -> Result<EventRecord, LedgerError> {
        self.store
            .event_snapshot(event_id)
            .await?
            .ok_or(LedgerError::EventNotFound(event_id))
    }

    /// Creates an event with a full allocation. Seeding surface; event
    /// CRUD beyond this lives outside the core.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidEvent`] for zero capacity or an inverted
    ///   time window
    /// - [`LedgerError::Store`] on backend failure
    pub async fn create_event(
        &self,
        total_tickets: u32,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Result<EventRecord, LedgerError> {
        if total_tickets == 0 {
            return Err(LedgerError::InvalidEvent(
                "total_tickets must be at least 1".to_string(),
            ));
        }
        if starts_at >= ends_at {
            return Err(LedgerError::InvalidEvent(
                "event must end after it starts".to_string(),
            ));
        }

        let event = EventRecord {
            id: EventId::new(),
            total_tickets,
            available_tickets: total_tickets,
            starts_at,
            ends_at,
        };
        self.store.insert_event(&event).await?;
        tracing::info!(event_id = %event.id, total_tickets, "event created");
        Ok(event)
    }
}
