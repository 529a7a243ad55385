//! Domain types for the Boxoffice core.
//!
//! Value objects and entity records shared by the inventory ledger and the
//! queue admission controller. Identifiers are UUID newtypes except
//! [`SessionId`], which wraps the opaque web-session token handed to us by
//! the transport layer. All timestamps come from a [`crate::clock::Clock`];
//! nothing in this crate calls `Utc::now()` directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::StoreError;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for an event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random `EventId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `EventId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a ticket
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TicketId(Uuid);

impl TicketId {
    /// Creates a new random `TicketId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `TicketId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TicketId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a queue entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueEntryId(Uuid);

impl QueueEntryId {
    /// Creates a new random `QueueEntryId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `QueueEntryId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for QueueEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueueEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an authenticated user
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    /// Creates a new random `UserId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `UserId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque web-session token identifying a visitor in the queue.
///
/// Sessions exist before login, so queue entries key on this rather than
/// [`UserId`]. The token is minted by the transport layer; this crate only
/// compares it for equality.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Wraps a session token
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Borrows the raw token
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(token: &str) -> Self {
        Self(token.to_owned())
    }
}

// ============================================================================
// Money
// ============================================================================

/// Money amount in cents (avoids floating point)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two money amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Events
// ============================================================================

/// An event with a fixed ticket allocation.
///
/// `available_tickets` is the derived count the ledger keeps in lockstep
/// with ticket rows: at every commit point it equals `total_tickets` minus
/// the number of tickets in [`TicketStatus::Active`] or
/// [`TicketStatus::Used`]. Cancelled tickets return their capacity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unique identifier
    pub id: EventId,
    /// Total sellable allocation, at least 1
    pub total_tickets: u32,
    /// Remaining unsold allocation
    pub available_tickets: u32,
    /// When the event begins; ticket sales close at this instant
    pub starts_at: DateTime<Utc>,
    /// When the event ends
    pub ends_at: DateTime<Utc>,
}

impl EventRecord {
    /// Tickets currently counting against capacity (active or used)
    #[must_use]
    pub const fn sold(&self) -> u32 {
        self.total_tickets - self.available_tickets
    }

    /// Whether tickets can be issued at `now`.
    ///
    /// Sales close the moment the event starts. The two rejection reasons
    /// are distinguished so callers can message them differently.
    ///
    /// # Errors
    ///
    /// Returns the [`ClosedReason`] when the sales window has closed.
    pub fn purchasable_at(&self, now: DateTime<Utc>) -> Result<(), ClosedReason> {
        if now >= self.ends_at {
            return Err(ClosedReason::AlreadyEnded);
        }
        if now >= self.starts_at {
            return Err(ClosedReason::AlreadyStarted);
        }
        Ok(())
    }
}

/// Why an event is closed for ticket sales
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClosedReason {
    /// The event has begun; door sales are out of scope
    AlreadyStarted,
    /// The event is over
    AlreadyEnded,
}

impl fmt::Display for ClosedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyStarted => write!(f, "event already started"),
            Self::AlreadyEnded => write!(f, "event already ended"),
        }
    }
}

// ============================================================================
// Tickets
// ============================================================================

/// Lifecycle state of a ticket
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketStatus {
    /// Sold and valid for entry
    Active,
    /// Redeemed at the door (terminal)
    Used,
    /// Cancelled and refunded upstream (terminal)
    Cancelled,
}

impl TicketStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Used => "used",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "active" => Ok(Self::Active),
            "used" => Ok(Self::Used),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(StoreError::Corrupt(format!("invalid ticket status: {s}"))),
        }
    }

    /// Terminal statuses cannot transition further
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Used | Self::Cancelled)
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A sold ticket.
///
/// `Used` and `Cancelled` are mutually exclusive terminals: a used ticket
/// can never be cancelled and a cancelled one can never be redeemed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRecord {
    /// Unique identifier
    pub id: TicketId,
    /// Owning event
    pub event_id: EventId,
    /// Final price as computed upstream (discounts already applied)
    pub price: Money,
    /// Lifecycle state
    pub status: TicketStatus,
    /// When the ticket was issued
    pub purchased_at: DateTime<Utc>,
    /// Set once on the Active -> Cancelled transition
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Set once on the Active -> Used transition
    pub used_at: Option<DateTime<Utc>>,
}

impl TicketRecord {
    /// Builds a freshly issued ticket
    #[must_use]
    pub const fn issued(
        id: TicketId,
        event_id: EventId,
        price: Money,
        purchased_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            event_id,
            price,
            status: TicketStatus::Active,
            purchased_at,
            cancelled_at: None,
            used_at: None,
        }
    }
}

// ============================================================================
// Queue entries
// ============================================================================

/// Lifecycle state of a queue entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueStatus {
    /// In line, holds a position
    Waiting,
    /// Admitted, holds a lease
    Active,
    /// Lease lapsed (terminal until purged)
    Expired,
}

impl QueueStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Expired => "expired",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "active" => Ok(Self::Active),
            "expired" => Ok(Self::Expired),
            _ => Err(StoreError::Corrupt(format!("invalid queue status: {s}"))),
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One visitor's place in the admission queue.
///
/// Invariants the store upholds at every commit point: at most one
/// non-terminal entry per session, `position` present exactly for Waiting
/// entries and dense 1..=W across them, `expires_at` present for entries
/// that hold or held a lease.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Unique identifier
    pub id: QueueEntryId,
    /// Owning session token
    pub session_id: SessionId,
    /// Authenticated user, when known
    pub user_id: Option<UserId>,
    /// 1-based place in line, Waiting entries only
    pub position: Option<u32>,
    /// Lifecycle state
    pub status: QueueStatus,
    /// When the session first joined
    pub joined_at: DateTime<Utc>,
    /// Lease deadline while Active; the lapsed deadline once Expired
    pub expires_at: Option<DateTime<Utc>>,
}

impl QueueEntry {
    /// Builds an entry admitted straight into the active pool
    #[must_use]
    pub fn admitted(
        session_id: SessionId,
        user_id: Option<UserId>,
        joined_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: QueueEntryId::new(),
            session_id,
            user_id,
            position: None,
            status: QueueStatus::Active,
            joined_at,
            expires_at: Some(expires_at),
        }
    }

    /// Builds an entry placed at the back of the waiting line
    #[must_use]
    pub fn waiting(
        session_id: SessionId,
        user_id: Option<UserId>,
        position: u32,
        joined_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: QueueEntryId::new(),
            session_id,
            user_id,
            position: Some(position),
            status: QueueStatus::Waiting,
            joined_at,
            expires_at: None,
        }
    }

    /// Whether this entry still occupies the queue (Waiting or Active)
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self.status, QueueStatus::Waiting | QueueStatus::Active)
    }

    /// Whether an Active lease has lapsed at `now`
    #[must_use]
    pub fn lease_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Active
            && self.expires_at.is_some_and(|deadline| deadline < now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[allow(clippy::expect_used)]
    fn ts(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, h, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn ticket_status_round_trips_through_strings() {
        for status in [TicketStatus::Active, TicketStatus::Used, TicketStatus::Cancelled] {
            assert_eq!(TicketStatus::parse(status.as_str()).expect("parse"), status);
        }
        assert!(TicketStatus::parse("refunded").is_err());
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn queue_status_rejects_unknown_strings() {
        assert!(QueueStatus::parse("paused").is_err());
        assert_eq!(QueueStatus::parse("waiting").expect("parse"), QueueStatus::Waiting);
    }

    #[test]
    fn purchase_window_closes_at_start() {
        let event = EventRecord {
            id: EventId::new(),
            total_tickets: 10,
            available_tickets: 10,
            starts_at: ts(18),
            ends_at: ts(23),
        };
        assert!(event.purchasable_at(ts(12)).is_ok());
        assert_eq!(event.purchasable_at(ts(18)), Err(ClosedReason::AlreadyStarted));
        assert_eq!(event.purchasable_at(ts(20)), Err(ClosedReason::AlreadyStarted));
        assert_eq!(event.purchasable_at(ts(23)), Err(ClosedReason::AlreadyEnded));
    }

    #[test]
    fn sold_tracks_the_count_gap() {
        let event = EventRecord {
            id: EventId::new(),
            total_tickets: 10,
            available_tickets: 3,
            starts_at: ts(18),
            ends_at: ts(23),
        };
        assert_eq!(event.sold(), 7);
    }

    #[test]
    fn lease_lapse_is_strict() {
        let entry = QueueEntry::admitted(SessionId::from("s1"), None, ts(10), ts(11));
        assert!(!entry.lease_lapsed(ts(11)));
        assert!(entry.lease_lapsed(ts(12)));
        assert!(entry.is_live());
    }

    #[test]
    fn money_displays_cents_padded() {
        assert_eq!(Money::from_cents(4205).to_string(), "$42.05");
        assert_eq!(Money::from_cents(7).to_string(), "$0.07");
    }
}
