//! Integration tests for the inventory ledger over the in-memory store.
//!
//! Each case drives the public API the way the platform would at an
//! on-sale: reserve under contention, cancel, redeem at the door, resize
//! capacity mid-sale. The concurrency cases spawn real tasks against one
//! event; correctness comes from the per-event lock, not from test
//! ordering.

#![allow(clippy::expect_used)] // Test code uses expect for clear failure messages

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use boxoffice_core::clock::Clock;
use boxoffice_core::memory::MemoryInventoryStore;
use boxoffice_core::notify::{NotifyError, TicketNotifier};
use boxoffice_core::store::{InventoryStore, InventoryTxn};
use boxoffice_core::types::{
    ClosedReason, EventId, EventRecord, TicketId, TicketRecord, TicketStatus,
};
use boxoffice_core::{InventoryLedger, LedgerError, StoreError};
use boxoffice_testing::fixtures::{
    ended_window, standard_price, started_window, upcoming_window,
};
use boxoffice_testing::properties;
use boxoffice_testing::{init_test_logging, test_clock};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use tokio::sync::Mutex;

/// Ledger over a fresh in-memory store with one purchasable event seeded.
async fn seeded_ledger(total: u32) -> (Arc<InventoryLedger>, EventId) {
    init_test_logging();
    let clock = Arc::new(test_clock());
    let now = clock.now();
    let (starts_at, ends_at) = upcoming_window(now);

    let store = Arc::new(MemoryInventoryStore::new());
    let ledger = Arc::new(InventoryLedger::new(store, clock));
    let event = ledger
        .create_event(total, starts_at, ends_at)
        .await
        .expect("seed event");
    (ledger, event.id)
}

#[tokio::test]
async fn test_reserve_issues_a_ticket_and_decrements_availability() {
    let (ledger, event_id) = seeded_ledger(5).await;

    let ticket = ledger
        .reserve(event_id, standard_price())
        .await
        .expect("reserve should succeed with capacity");

    assert_eq!(ticket.event_id, event_id);
    assert_eq!(ticket.status, TicketStatus::Active);
    assert_eq!(ticket.price, standard_price());

    let snapshot = ledger.availability(event_id).await.expect("snapshot");
    assert_eq!(snapshot.total_tickets, 5);
    assert_eq!(snapshot.available_tickets, 4);
    assert_eq!(snapshot.sold(), 1);
}

#[tokio::test]
async fn test_two_racers_for_the_last_ticket() {
    let (ledger, event_id) = seeded_ledger(1).await;

    let first = tokio::spawn({
        let ledger = Arc::clone(&ledger);
        async move { ledger.reserve(event_id, standard_price()).await }
    });
    let second = tokio::spawn({
        let ledger = Arc::clone(&ledger);
        async move { ledger.reserve(event_id, standard_price()).await }
    });

    let outcomes = [
        first.await.expect("task"),
        second.await.expect("task"),
    ];
    let successes = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one racer gets the last ticket");

    let loser = outcomes
        .iter()
        .find_map(|r| r.as_ref().err())
        .expect("one racer must lose");
    assert_eq!(*loser, LedgerError::NoCapacity(event_id));

    let snapshot = ledger.availability(event_id).await.expect("snapshot");
    assert_eq!(snapshot.available_tickets, 0);
}

#[tokio::test]
async fn test_oversell_is_impossible_under_contention() {
    let total = 10u32;
    let requests = 50u32;
    let (ledger, event_id) = seeded_ledger(total).await;

    let mut handles = Vec::new();
    for _ in 0..requests {
        handles.push(tokio::spawn({
            let ledger = Arc::clone(&ledger);
            async move { ledger.reserve(event_id, standard_price()).await }
        }));
    }

    let mut issued = 0u32;
    let mut sold_out = 0u32;
    for handle in handles {
        match handle.await.expect("task") {
            Ok(_) => issued += 1,
            Err(err) => {
                assert_eq!(err, LedgerError::NoCapacity(event_id), "only sold-out may be refused");
                sold_out += 1;
            }
        }
    }

    assert_eq!(issued, total);
    assert_eq!(sold_out, requests - total);

    let snapshot = ledger.availability(event_id).await.expect("snapshot");
    assert_eq!(snapshot.available_tickets, 0);
    assert_eq!(snapshot.sold(), total);
}

#[tokio::test]
async fn test_release_returns_capacity_exactly_once() {
    let (ledger, event_id) = seeded_ledger(2).await;
    let ticket = ledger
        .reserve(event_id, standard_price())
        .await
        .expect("reserve");

    // Two concurrent cancellations of the same ticket.
    let first = tokio::spawn({
        let ledger = Arc::clone(&ledger);
        let id = ticket.id;
        async move { ledger.release(id).await }
    });
    let second = tokio::spawn({
        let ledger = Arc::clone(&ledger);
        let id = ticket.id;
        async move { ledger.release(id).await }
    });

    let outcomes = [
        first.await.expect("task"),
        second.await.expect("task"),
    ];
    let successes = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "only one cancellation may land");

    let refused = outcomes
        .iter()
        .find_map(|r| r.as_ref().err())
        .expect("the other must be refused");
    assert_eq!(
        *refused,
        LedgerError::InvalidState {
            id: ticket.id,
            status: TicketStatus::Cancelled,
        }
    );

    // Capacity came back exactly once.
    let snapshot = ledger.availability(event_id).await.expect("snapshot");
    assert_eq!(snapshot.available_tickets, 2);

    let cancelled = outcomes
        .iter()
        .find_map(|r| r.as_ref().ok())
        .expect("winner");
    assert_eq!(cancelled.status, TicketStatus::Cancelled);
    assert!(cancelled.cancelled_at.is_some());
}

#[tokio::test]
async fn test_redeem_marks_used_without_touching_capacity() {
    let (ledger, event_id) = seeded_ledger(3).await;
    let ticket = ledger
        .reserve(event_id, standard_price())
        .await
        .expect("reserve");

    let used = ledger.redeem(ticket.id).await.expect("redeem");
    assert_eq!(used.status, TicketStatus::Used);
    assert!(used.used_at.is_some());

    // A used ticket still counts against the allocation.
    let snapshot = ledger.availability(event_id).await.expect("snapshot");
    assert_eq!(snapshot.available_tickets, 2);
    assert_eq!(snapshot.sold(), 1);

    // Terminal states are mutually exclusive.
    let again = ledger.redeem(ticket.id).await;
    assert_eq!(
        again,
        Err(LedgerError::InvalidState {
            id: ticket.id,
            status: TicketStatus::Used,
        })
    );
    let cancel = ledger.release(ticket.id).await;
    assert_eq!(
        cancel,
        Err(LedgerError::InvalidState {
            id: ticket.id,
            status: TicketStatus::Used,
        })
    );
    let snapshot = ledger.availability(event_id).await.expect("snapshot");
    assert_eq!(snapshot.available_tickets, 2);
}

#[tokio::test]
async fn test_cancelled_ticket_cannot_be_redeemed() {
    let (ledger, event_id) = seeded_ledger(2).await;
    let ticket = ledger
        .reserve(event_id, standard_price())
        .await
        .expect("reserve");
    ledger.release(ticket.id).await.expect("release");

    let redeem = ledger.redeem(ticket.id).await;
    assert_eq!(
        redeem,
        Err(LedgerError::InvalidState {
            id: ticket.id,
            status: TicketStatus::Cancelled,
        })
    );
}

#[tokio::test]
async fn test_reserve_is_rejected_outside_the_sales_window() {
    init_test_logging();
    let clock = Arc::new(test_clock());
    let now = clock.now();
    let store = Arc::new(MemoryInventoryStore::new());
    let ledger = InventoryLedger::new(store, clock);

    let (starts_at, ends_at) = started_window(now);
    let started = ledger
        .create_event(10, starts_at, ends_at)
        .await
        .expect("started event");
    let err = ledger
        .reserve(started.id, standard_price())
        .await
        .expect_err("event already started");
    assert_eq!(
        err,
        LedgerError::NotPurchasable {
            id: started.id,
            reason: ClosedReason::AlreadyStarted,
        }
    );

    let (starts_at, ends_at) = ended_window(now);
    let ended = ledger
        .create_event(10, starts_at, ends_at)
        .await
        .expect("ended event");
    let err = ledger
        .reserve(ended.id, standard_price())
        .await
        .expect_err("event already ended");
    assert_eq!(
        err,
        LedgerError::NotPurchasable {
            id: ended.id,
            reason: ClosedReason::AlreadyEnded,
        }
    );

    // Rejections never consume capacity.
    let snapshot = ledger.availability(started.id).await.expect("snapshot");
    assert_eq!(snapshot.available_tickets, 10);
}

#[tokio::test]
async fn test_resize_is_floored_by_sold_tickets() {
    let (ledger, event_id) = seeded_ledger(10).await;
    for _ in 0..7 {
        ledger
            .reserve(event_id, standard_price())
            .await
            .expect("reserve");
    }

    // Shrinking below the sold count would strand issued tickets.
    let err = ledger.resize(event_id, 5).await.expect_err("below floor");
    assert_eq!(
        err,
        LedgerError::BelowSoldFloor {
            requested: 5,
            sold: 7,
        }
    );
    let snapshot = ledger.availability(event_id).await.expect("snapshot");
    assert_eq!(snapshot.total_tickets, 10);
    assert_eq!(snapshot.available_tickets, 3);

    // Growing re-derives availability from the sold count.
    let resized = ledger.resize(event_id, 8).await.expect("resize to 8");
    assert_eq!(resized.total_tickets, 8);
    assert_eq!(resized.available_tickets, 1);

    // Shrinking to exactly the sold count leaves nothing sellable.
    let resized = ledger.resize(event_id, 7).await.expect("resize to 7");
    assert_eq!(resized.available_tickets, 0);
    let err = ledger
        .reserve(event_id, standard_price())
        .await
        .expect_err("sold out after shrink");
    assert_eq!(err, LedgerError::NoCapacity(event_id));

    // Zero capacity is never a valid target.
    let err = ledger.resize(event_id, 0).await.expect_err("zero total");
    assert_eq!(
        err,
        LedgerError::BelowSoldFloor {
            requested: 0,
            sold: 7,
        }
    );
}

#[tokio::test]
async fn test_unknown_ids_are_reported_as_not_found() {
    let (ledger, _) = seeded_ledger(1).await;

    let ghost_event = EventId::new();
    let err = ledger
        .reserve(ghost_event, standard_price())
        .await
        .expect_err("unknown event");
    assert_eq!(err, LedgerError::EventNotFound(ghost_event));

    let err = ledger
        .availability(ghost_event)
        .await
        .expect_err("unknown event");
    assert_eq!(err, LedgerError::EventNotFound(ghost_event));

    let ghost_ticket = TicketId::new();
    let err = ledger.release(ghost_ticket).await.expect_err("unknown ticket");
    assert_eq!(err, LedgerError::TicketNotFound(ghost_ticket));
    let err = ledger.redeem(ghost_ticket).await.expect_err("unknown ticket");
    assert_eq!(err, LedgerError::TicketNotFound(ghost_ticket));
}

#[tokio::test]
async fn test_create_event_validates_its_definition() {
    init_test_logging();
    let clock = Arc::new(test_clock());
    let now = clock.now();
    let (starts_at, ends_at) = upcoming_window(now);
    let ledger = InventoryLedger::new(Arc::new(MemoryInventoryStore::new()), clock);

    let err = ledger
        .create_event(0, starts_at, ends_at)
        .await
        .expect_err("zero capacity");
    assert!(matches!(err, LedgerError::InvalidEvent(_)));

    let err = ledger
        .create_event(10, ends_at, starts_at)
        .await
        .expect_err("inverted window");
    assert!(matches!(err, LedgerError::InvalidEvent(_)));
}

#[tokio::test]
async fn test_availability_invariant_holds_through_mixed_churn() {
    let (ledger, event_id) = seeded_ledger(20).await;

    let mut tickets = Vec::new();
    for _ in 0..15 {
        tickets.push(
            ledger
                .reserve(event_id, standard_price())
                .await
                .expect("reserve"),
        );
    }
    for ticket in tickets.iter().take(5) {
        ledger.release(ticket.id).await.expect("release");
    }
    for ticket in tickets.iter().skip(5).take(3) {
        ledger.redeem(ticket.id).await.expect("redeem");
    }

    // 15 issued, 5 cancelled, 3 used: 10 still count against capacity.
    let snapshot = ledger.availability(event_id).await.expect("snapshot");
    assert_eq!(snapshot.total_tickets, 20);
    assert_eq!(snapshot.sold(), 10);
    assert_eq!(snapshot.available_tickets, 10);
}

// ============================================================================
// Notifier plumbing
// ============================================================================

#[derive(Default)]
struct RecordingNotifier {
    issued: Mutex<Vec<TicketId>>,
    cancelled: Mutex<Vec<TicketId>>,
}

#[async_trait]
impl TicketNotifier for RecordingNotifier {
    async fn ticket_issued(&self, ticket: &TicketRecord) -> Result<(), NotifyError> {
        self.issued.lock().await.push(ticket.id);
        Ok(())
    }

    async fn ticket_cancelled(&self, ticket: &TicketRecord) -> Result<(), NotifyError> {
        self.cancelled.lock().await.push(ticket.id);
        Ok(())
    }
}

struct FailingNotifier;

#[async_trait]
impl TicketNotifier for FailingNotifier {
    async fn ticket_issued(&self, _ticket: &TicketRecord) -> Result<(), NotifyError> {
        Err("smtp relay down".into())
    }

    async fn ticket_cancelled(&self, _ticket: &TicketRecord) -> Result<(), NotifyError> {
        Err("smtp relay down".into())
    }
}

#[tokio::test]
async fn test_notifier_receives_post_commit_events() {
    init_test_logging();
    let clock = Arc::new(test_clock());
    let now = clock.now();
    let (starts_at, ends_at) = upcoming_window(now);
    let notifier = Arc::new(RecordingNotifier::default());
    let ledger = InventoryLedger::new(Arc::new(MemoryInventoryStore::new()), clock)
        .with_notifier(Arc::clone(&notifier) as Arc<dyn TicketNotifier>);

    let event = ledger
        .create_event(3, starts_at, ends_at)
        .await
        .expect("seed event");
    let ticket = ledger
        .reserve(event.id, standard_price())
        .await
        .expect("reserve");
    ledger.release(ticket.id).await.expect("release");

    assert_eq!(*notifier.issued.lock().await, vec![ticket.id]);
    assert_eq!(*notifier.cancelled.lock().await, vec![ticket.id]);
}

#[tokio::test]
async fn test_notification_failure_does_not_fail_the_operation() {
    init_test_logging();
    let clock = Arc::new(test_clock());
    let now = clock.now();
    let (starts_at, ends_at) = upcoming_window(now);
    let ledger = InventoryLedger::new(Arc::new(MemoryInventoryStore::new()), clock)
        .with_notifier(Arc::new(FailingNotifier));

    let event = ledger
        .create_event(2, starts_at, ends_at)
        .await
        .expect("seed event");
    let ticket = ledger
        .reserve(event.id, standard_price())
        .await
        .expect("the reservation committed; delivery is best-effort");
    assert_eq!(ticket.status, TicketStatus::Active);

    let snapshot = ledger.availability(event.id).await.expect("snapshot");
    assert_eq!(snapshot.available_tickets, 1);
}

// ============================================================================
// Conflict retry plumbing
// ============================================================================

/// Store whose `begin` fails a set number of times before delegating.
struct FlakyInventoryStore {
    inner: MemoryInventoryStore,
    failures_left: AtomicUsize,
    error: StoreError,
    begins: AtomicUsize,
}

impl FlakyInventoryStore {
    fn new(failures: usize, error: StoreError) -> Self {
        Self {
            inner: MemoryInventoryStore::new(),
            failures_left: AtomicUsize::new(failures),
            error,
            begins: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl InventoryStore for FlakyInventoryStore {
    async fn begin(
        &self,
        event_id: EventId,
    ) -> Result<Option<Box<dyn InventoryTxn>>, StoreError> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(self.error.clone());
        }
        self.inner.begin(event_id).await
    }

    async fn find_ticket(&self, ticket_id: TicketId) -> Result<Option<TicketRecord>, StoreError> {
        self.inner.find_ticket(ticket_id).await
    }

    async fn event_snapshot(&self, event_id: EventId) -> Result<Option<EventRecord>, StoreError> {
        self.inner.event_snapshot(event_id).await
    }

    async fn insert_event(&self, event: &EventRecord) -> Result<(), StoreError> {
        self.inner.insert_event(event).await
    }
}

#[tokio::test]
async fn test_transient_conflicts_are_retried_to_success() {
    init_test_logging();
    let clock = Arc::new(test_clock());
    let now = clock.now();
    let (starts_at, ends_at) = upcoming_window(now);

    let store = Arc::new(FlakyInventoryStore::new(
        2,
        StoreError::Conflict("deadlock detected".into()),
    ));
    let ledger = InventoryLedger::new(Arc::clone(&store) as Arc<dyn InventoryStore>, clock);
    let event = ledger
        .create_event(5, starts_at, ends_at)
        .await
        .expect("seed event");

    let ticket = ledger
        .reserve(event.id, standard_price())
        .await
        .expect("reserve should survive two conflicts");
    assert_eq!(ticket.status, TicketStatus::Active);
    assert_eq!(store.begins.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_nontransient_store_errors_are_not_retried() {
    init_test_logging();
    let clock = Arc::new(test_clock());
    let now = clock.now();
    let (starts_at, ends_at) = upcoming_window(now);

    let store = Arc::new(FlakyInventoryStore::new(
        usize::MAX,
        StoreError::Database("connection refused".into()),
    ));
    let ledger = InventoryLedger::new(Arc::clone(&store) as Arc<dyn InventoryStore>, clock);
    let event = ledger
        .create_event(5, starts_at, ends_at)
        .await
        .expect("seed event");

    let err = ledger
        .reserve(event.id, standard_price())
        .await
        .expect_err("reserve must surface the fault");
    assert_eq!(
        err,
        LedgerError::Store(StoreError::Database("connection refused".into()))
    );
    assert_eq!(store.begins.load(Ordering::SeqCst), 1, "no retry for hard faults");
}

#[tokio::test]
async fn test_exhausted_retry_budget_surfaces_the_conflict() {
    init_test_logging();
    let clock = Arc::new(test_clock());
    let now = clock.now();
    let (starts_at, ends_at) = upcoming_window(now);

    let store = Arc::new(FlakyInventoryStore::new(
        usize::MAX,
        StoreError::Conflict("lock timeout".into()),
    ));
    let ledger = InventoryLedger::new(Arc::clone(&store) as Arc<dyn InventoryStore>, clock);
    let event = ledger
        .create_event(5, starts_at, ends_at)
        .await
        .expect("seed event");

    let err = ledger
        .reserve(event.id, standard_price())
        .await
        .expect_err("budget must run out");
    assert_eq!(err, LedgerError::Store(StoreError::Conflict("lock timeout".into())));
    // Default conflict budget: first try plus two retries.
    assert_eq!(store.begins.load(Ordering::SeqCst), 3);
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// For any purchasable window, allocation and price, the ledger sells
    /// exactly `total` tickets, refuses the next request, and sells one
    /// more once a cancellation returns capacity.
    #[test]
    fn prop_every_allocation_sells_out_exactly_once(
        (starts_at, ends_at) in properties::open_window(test_clock().now()),
        total in properties::capacity(),
        price in properties::price(),
    ) {
        let outcome: Result<(), TestCaseError> = tokio_test::block_on(async move {
            let clock = Arc::new(test_clock());
            let store = Arc::new(MemoryInventoryStore::new());
            let ledger = InventoryLedger::new(store, clock);
            let event = ledger
                .create_event(total, starts_at, ends_at)
                .await
                .expect("seed event");

            let mut issued = Vec::new();
            for _ in 0..total {
                issued.push(
                    ledger
                        .reserve(event.id, price)
                        .await
                        .expect("reserve within capacity"),
                );
            }

            let refused = ledger.reserve(event.id, price).await.err();
            prop_assert_eq!(refused, Some(LedgerError::NoCapacity(event.id)));

            let snapshot = ledger.availability(event.id).await.expect("snapshot");
            prop_assert_eq!(snapshot.available_tickets, 0);
            prop_assert_eq!(snapshot.sold(), total);

            let cancelled = issued.first().expect("at least one ticket");
            ledger.release(cancelled.id).await.expect("release");
            let reissued = ledger
                .reserve(event.id, price)
                .await
                .expect("reserve after release");
            prop_assert_eq!(reissued.price, price);

            let snapshot = ledger.availability(event.id).await.expect("snapshot");
            prop_assert_eq!(snapshot.available_tickets, 0);
            prop_assert_eq!(snapshot.sold(), total);
            Ok(())
        });
        outcome?;
    }
}
