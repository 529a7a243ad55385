//! Error taxonomy for the Boxoffice core.
//!
//! Three layers: [`StoreError`] for backend faults, [`LedgerError`] for
//! inventory outcomes, [`AdmissionError`] for queue faults. Expected
//! non-exceptional outcomes (a session not being in the queue, a sold-out
//! event) are modelled where callers branch on them: sold-out is a
//! `LedgerError` because reservation callers must handle it, while
//! not-in-queue is an [`crate::admission::AdmissionState`] variant because
//! it is a status, not a failure.

use thiserror::Error;

use crate::types::{ClosedReason, EventId, TicketId, TicketStatus};

/// Faults raised by a storage backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Transient lock or serialization conflict; safe to retry because the
    /// aborted transaction left no partial state.
    #[error("transaction conflict: {0}")]
    Conflict(String),

    /// Non-retryable backend failure (connection loss, constraint breach).
    #[error("database error: {0}")]
    Database(String),

    /// A stored row violates a domain invariant (unknown status string,
    /// negative count). Indicates external interference with the tables.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether a retry inside the same operation may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Outcomes of inventory ledger operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The event id resolves to nothing.
    #[error("event not found: {0}")]
    EventNotFound(EventId),

    /// The ticket id resolves to nothing.
    #[error("ticket not found: {0}")]
    TicketNotFound(TicketId),

    /// Sold out at decision time. The check and the decrement happen under
    /// the same lock, so two racers for the last ticket serialize and the
    /// loser receives this.
    #[error("no tickets available for event {0}")]
    NoCapacity(EventId),

    /// The sales window has closed.
    #[error("event {id} is not purchasable: {reason}")]
    NotPurchasable {
        /// The event whose window closed
        id: EventId,
        /// Which edge of the window was crossed
        reason: ClosedReason,
    },

    /// The ticket is in a terminal state and cannot transition again.
    /// Covers double release and redeeming a cancelled ticket.
    #[error("ticket {id} is already {status}")]
    InvalidState {
        /// The ticket in a terminal state
        id: TicketId,
        /// Its current status
        status: TicketStatus,
    },

    /// A resize would take total capacity below the already-sold count.
    #[error("cannot resize to {requested}: {sold} tickets already sold")]
    BelowSoldFloor {
        /// Requested new total
        requested: u32,
        /// Tickets currently counting against capacity
        sold: u32,
    },

    /// An invalid event definition was submitted (zero capacity, inverted
    /// time window).
    #[error("invalid event definition: {0}")]
    InvalidEvent(String),

    /// Backend fault, surfaced after the internal retry budget is spent.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Faults raised by the queue admission controller.
///
/// Most queue outcomes are statuses, not errors; this enum only carries
/// genuine failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// `set_max_active` was given zero; the pool must admit at least one.
    #[error("max active users must be at least 1 (got {0})")]
    InvalidCapacity(u32),

    /// Backend fault, surfaced after the internal retry budget is spent.
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_is_the_only_transient_fault() {
        assert!(StoreError::Conflict("deadlock".into()).is_transient());
        assert!(!StoreError::Database("connection reset".into()).is_transient());
        assert!(!StoreError::Corrupt("bad status".into()).is_transient());
    }

    #[test]
    fn ledger_errors_render_their_context() {
        let id = EventId::new();
        let err = LedgerError::NoCapacity(id);
        assert_eq!(err.to_string(), format!("no tickets available for event {id}"));

        let err = LedgerError::BelowSoldFloor { requested: 5, sold: 7 };
        assert_eq!(err.to_string(), "cannot resize to 5: 7 tickets already sold");

        let ticket = TicketId::new();
        let err = LedgerError::InvalidState { id: ticket, status: TicketStatus::Cancelled };
        assert_eq!(err.to_string(), format!("ticket {ticket} is already cancelled"));
    }

    #[test]
    fn store_errors_pass_through_transparently() {
        let err = LedgerError::from(StoreError::Conflict("serialization failure".into()));
        assert_eq!(err.to_string(), "transaction conflict: serialization failure");

        let err = AdmissionError::from(StoreError::Database("timeout".into()));
        assert_eq!(err.to_string(), "database error: timeout");
    }
}
