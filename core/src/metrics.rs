//! Business metrics for the inventory ledger and the admission queue.
//!
//! Recording goes through the `metrics` facade; installing an exporter is
//! the embedding application's job.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `boxoffice_tickets_issued_total` - Tickets issued by reserve
//! - `boxoffice_tickets_cancelled_total` - Tickets cancelled by release
//! - `boxoffice_tickets_redeemed_total` - Tickets redeemed at the door
//! - `boxoffice_reserve_rejected_total{reason}` - Rejected reservations
//! - `boxoffice_capacity_resizes_total` - Successful capacity resizes
//! - `boxoffice_queue_joins_total{outcome}` - Joins by outcome (admitted, queued)
//! - `boxoffice_queue_promotions_total` - Waiting entries promoted to active
//! - `boxoffice_queue_leases_expired_total` - Leases swept after lapsing
//! - `boxoffice_queue_departures_total` - Entries removed by leave
//! - `boxoffice_txn_retries_total{op}` - Conflict retries by operation
//!
//! ## Gauges
//! - `boxoffice_queue_waiting` - Waiting entries after the last reconcile
//! - `boxoffice_queue_active` - Active entries after the last reconcile
//! - `boxoffice_tickets_available{event_id}` - Remaining allocation per event

use metrics::{describe_counter, describe_gauge};

/// Initialize and register all metric descriptions.
///
/// Call once at application startup, before any metrics are recorded.
pub fn register_metrics() {
    describe_counter!(
        "boxoffice_tickets_issued_total",
        "Total number of tickets issued"
    );
    describe_counter!(
        "boxoffice_tickets_cancelled_total",
        "Total number of tickets cancelled and returned to inventory"
    );
    describe_counter!(
        "boxoffice_tickets_redeemed_total",
        "Total number of tickets redeemed at the door"
    );
    describe_counter!(
        "boxoffice_reserve_rejected_total",
        "Reservations rejected, by reason (no_capacity, not_purchasable)"
    );
    describe_counter!(
        "boxoffice_capacity_resizes_total",
        "Successful event capacity resizes"
    );

    describe_counter!(
        "boxoffice_queue_joins_total",
        "Queue joins by outcome (admitted, queued)"
    );
    describe_counter!(
        "boxoffice_queue_promotions_total",
        "Waiting entries promoted into the active pool"
    );
    describe_counter!(
        "boxoffice_queue_leases_expired_total",
        "Admission leases swept after lapsing"
    );
    describe_counter!(
        "boxoffice_queue_departures_total",
        "Entries removed from the queue by an explicit leave"
    );
    describe_counter!(
        "boxoffice_txn_retries_total",
        "Transaction conflict retries, by operation"
    );

    describe_gauge!(
        "boxoffice_queue_waiting",
        "Waiting entries observed at the end of the last reconcile"
    );
    describe_gauge!(
        "boxoffice_queue_active",
        "Active entries observed at the end of the last reconcile"
    );
    describe_gauge!(
        "boxoffice_tickets_available",
        "Remaining ticket allocation per event"
    );

    tracing::info!("Boxoffice metrics registered");
}

/// Record a ticket issued by reserve.
pub fn record_ticket_issued(event_id: &str, available: u32) {
    metrics::counter!("boxoffice_tickets_issued_total").increment(1);
    metrics::gauge!("boxoffice_tickets_available", "event_id" => event_id.to_owned())
        .set(f64::from(available));
}

/// Record a ticket cancelled by release.
pub fn record_ticket_cancelled(event_id: &str, available: u32) {
    metrics::counter!("boxoffice_tickets_cancelled_total").increment(1);
    metrics::gauge!("boxoffice_tickets_available", "event_id" => event_id.to_owned())
        .set(f64::from(available));
}

/// Record a ticket redeemed at the door.
pub fn record_ticket_redeemed() {
    metrics::counter!("boxoffice_tickets_redeemed_total").increment(1);
}

/// Record a rejected reservation.
///
/// # Arguments
///
/// * `reason` - Rejection reason (e.g., "no_capacity", "not_purchasable")
pub fn record_reserve_rejected(reason: &'static str) {
    metrics::counter!("boxoffice_reserve_rejected_total", "reason" => reason).increment(1);
}

/// Record a successful capacity resize.
pub fn record_capacity_resized(event_id: &str, available: u32) {
    metrics::counter!("boxoffice_capacity_resizes_total").increment(1);
    metrics::gauge!("boxoffice_tickets_available", "event_id" => event_id.to_owned())
        .set(f64::from(available));
}

/// Record a queue join outcome.
///
/// # Arguments
///
/// * `outcome` - "admitted" when granted straight in, "queued" when waiting
pub fn record_queue_join(outcome: &'static str) {
    metrics::counter!("boxoffice_queue_joins_total", "outcome" => outcome).increment(1);
}

/// Record waiting entries promoted into the active pool.
pub fn record_queue_promotions(count: u64) {
    if count > 0 {
        metrics::counter!("boxoffice_queue_promotions_total").increment(count);
    }
}

/// Record admission leases swept after lapsing.
pub fn record_leases_expired(count: u64) {
    if count > 0 {
        metrics::counter!("boxoffice_queue_leases_expired_total").increment(count);
    }
}

/// Record an explicit departure from the queue.
pub fn record_queue_departure() {
    metrics::counter!("boxoffice_queue_departures_total").increment(1);
}

/// Record a conflict retry.
///
/// # Arguments
///
/// * `op` - Operation name (e.g., "reserve", "join")
pub fn record_txn_retry(op: &'static str) {
    metrics::counter!("boxoffice_txn_retries_total", "op" => op).increment(1);
}

/// Update the queue depth gauges after a reconcile.
pub fn update_queue_depth(waiting: u32, active: u32) {
    metrics::gauge!("boxoffice_queue_waiting").set(f64::from(waiting));
    metrics::gauge!("boxoffice_queue_active").set(f64::from(active));
}
