//! # Boxoffice Core
//!
//! Concurrency-correct ticket inventory and queue admission for an event
//! ticketing platform.
//!
//! Two public surfaces:
//!
//! - [`InventoryLedger`]: issues, cancels and redeems tickets and resizes
//!   event capacity, each operation one transaction under a per-event
//!   exclusive lock so availability can never oversell
//! - [`AdmissionController`]: gates purchase access through a bounded
//!   active pool with a FIFO waiting line and lazily expired leases
//!
//! ## Core Concepts
//!
//! - **Single-writer events**: every inventory mutation locks its event
//!   row first, so `available == total - issued` holds at each commit
//! - **Guard transactions**: the [`store`] traits hand out transaction
//!   objects; dropping one without `commit` rolls back
//! - **Lazy lease expiry**: nothing fires when a lease lapses, the next
//!   queue transaction sweeps overdue leases before deciding anything
//! - **Fail closed**: when capacity or policy cannot be read, operations
//!   deny rather than grant
//! - **Injected time**: all deadline checks go through [`Clock`], so
//!   tests steer time instead of sleeping
//!
//! The in-memory backend lives in [`memory`]; the `boxoffice-postgres`
//! crate implements the same traits over `PostgreSQL`.
//!
//! ## Example
//!
//! ```ignore
//! use boxoffice_core::{InventoryLedger, Money, SystemClock};
//! use boxoffice_core::memory::MemoryInventoryStore;
//! use std::sync::Arc;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryInventoryStore::new());
//!     let ledger = InventoryLedger::new(store, Arc::new(SystemClock));
//!
//!     let event = ledger.create_event(500, starts_at, ends_at).await?;
//!     let ticket = ledger.reserve(event.id, Money::from_cents(4_500)).await?;
//!     ledger.redeem(ticket.id).await?;
//!     Ok(())
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod admission;
pub mod clock;
pub mod config;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod metrics;
pub mod notify;
pub mod policy;
pub mod retry;
pub mod store;
pub mod types;

pub use admission::{
    AdmissionController, AdmissionState, AdmissionStatus, QueueStats, estimated_wait,
};
pub use clock::{Clock, SystemClock};
pub use config::BoxofficeConfig;
pub use error::{AdmissionError, LedgerError, StoreError};
pub use ledger::InventoryLedger;
pub use notify::{LogNotifier, TicketNotifier};
pub use policy::{AdmissionPolicy, PolicyProvider, SharedPolicy};
pub use retry::RetryPolicy;
pub use types::{
    ClosedReason, EventId, EventRecord, Money, QueueEntry, QueueEntryId, QueueStatus, SessionId,
    TicketId, TicketRecord, TicketStatus, UserId,
};
