//! Admission policy and its provider seam.
//!
//! The policy is process-wide configuration, not per-request state. Each
//! admission decision loads it exactly once up front and carries the value
//! through the whole transaction, so a concurrent admin update never splits
//! one decision across two policies. When the load itself fails the
//! controller falls back to [`AdmissionPolicy::fail_closed`], which keeps
//! the queue enforcing rather than waving everyone through.

use async_trait::async_trait;
use chrono::Duration;
use tokio::sync::RwLock;

use crate::error::StoreError;

/// Default bound on concurrently admitted sessions
pub const DEFAULT_MAX_ACTIVE: u32 = 100;

/// Default lease length granted on admission, in minutes
pub const DEFAULT_LEASE_MINUTES: i64 = 15;

/// Knobs governing queue admission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdmissionPolicy {
    /// Whether the queue gates access at all; when false every session is
    /// granted without consulting storage
    pub enabled: bool,
    /// Bound on concurrently admitted sessions, at least 1
    pub max_active: u32,
    /// How long an admitted session may hold its slot
    pub lease: Duration,
}

impl AdmissionPolicy {
    /// Builds a policy with the given capacity and the default lease
    #[must_use]
    pub fn bounded(max_active: u32) -> Self {
        Self {
            enabled: true,
            max_active,
            lease: Duration::minutes(DEFAULT_LEASE_MINUTES),
        }
    }

    /// The fallback used when the policy cannot be read: keep enforcing
    /// with default capacity. Capacity checks that fail must deny, never
    /// grant.
    #[must_use]
    pub fn fail_closed() -> Self {
        Self::bounded(DEFAULT_MAX_ACTIVE)
    }
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self::bounded(DEFAULT_MAX_ACTIVE)
    }
}

/// Source of the current [`AdmissionPolicy`].
///
/// The shipped [`SharedPolicy`] is the value-of-record for single-node
/// deployments; multi-node deployments inject a provider backed by their
/// own configuration service.
#[async_trait]
pub trait PolicyProvider: Send + Sync {
    /// Reads the current policy.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the backing source is unreachable.
    async fn load(&self) -> Result<AdmissionPolicy, StoreError>;

    /// Replaces the current policy.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the backing source rejects the write.
    async fn store(&self, policy: AdmissionPolicy) -> Result<(), StoreError>;
}

/// In-process policy cell behind an async `RwLock`.
#[derive(Debug)]
pub struct SharedPolicy {
    inner: RwLock<AdmissionPolicy>,
}

impl SharedPolicy {
    /// Wraps an initial policy
    #[must_use]
    pub const fn new(policy: AdmissionPolicy) -> Self {
        Self {
            inner: RwLock::const_new(policy),
        }
    }
}

impl Default for SharedPolicy {
    fn default() -> Self {
        Self::new(AdmissionPolicy::default())
    }
}

#[async_trait]
impl PolicyProvider for SharedPolicy {
    async fn load(&self) -> Result<AdmissionPolicy, StoreError> {
        Ok(*self.inner.read().await)
    }

    async fn store(&self, policy: AdmissionPolicy) -> Result<(), StoreError> {
        *self.inner.write().await = policy;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fail_closed_keeps_enforcing() {
        let policy = AdmissionPolicy::fail_closed();
        assert!(policy.enabled);
        assert_eq!(policy.max_active, DEFAULT_MAX_ACTIVE);
        assert_eq!(policy.lease, Duration::minutes(DEFAULT_LEASE_MINUTES));
    }

    #[tokio::test]
    #[allow(clippy::expect_used)]
    async fn shared_policy_round_trips() {
        let shared = SharedPolicy::default();
        let mut policy = shared.load().await.expect("load");
        policy.max_active = 3;
        policy.enabled = false;
        shared.store(policy).await.expect("store");
        assert_eq!(shared.load().await.expect("load"), policy);
    }
}
