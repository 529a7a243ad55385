//! Outbound notification seam.
//!
//! Confirmation emails and similar side effects are triggered after a
//! ticket mutation commits, never inside the transaction: a failed
//! delivery must not roll back a successful reservation. The ledger calls
//! the notifier best-effort and logs failures. Real delivery (mail, push)
//! lives outside this workspace; [`LogNotifier`] is the shipped default.

use async_trait::async_trait;

use crate::types::TicketRecord;

/// Boxed error type for notifier implementations
pub type NotifyError = Box<dyn std::error::Error + Send + Sync>;

/// Receives ticket lifecycle notifications after commit.
#[async_trait]
pub trait TicketNotifier: Send + Sync {
    /// A ticket was issued.
    ///
    /// # Errors
    ///
    /// Implementations may fail; the caller logs and continues.
    async fn ticket_issued(&self, ticket: &TicketRecord) -> Result<(), NotifyError>;

    /// A ticket was cancelled and its capacity returned.
    ///
    /// # Errors
    ///
    /// Implementations may fail; the caller logs and continues.
    async fn ticket_cancelled(&self, ticket: &TicketRecord) -> Result<(), NotifyError>;
}

/// Notifier that records deliveries in the log stream.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl TicketNotifier for LogNotifier {
    async fn ticket_issued(&self, ticket: &TicketRecord) -> Result<(), NotifyError> {
        tracing::info!(
            ticket_id = %ticket.id,
            event_id = %ticket.event_id,
            price = %ticket.price,
            "ticket issued notification"
        );
        Ok(())
    }

    async fn ticket_cancelled(&self, ticket: &TicketRecord) -> Result<(), NotifyError> {
        tracing::info!(
            ticket_id = %ticket.id,
            event_id = %ticket.event_id,
            "ticket cancelled notification"
        );
        Ok(())
    }
}
