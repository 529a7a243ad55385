//! Queue admission control: a bounded pool of active purchasers with a
//! FIFO waiting line behind it.
//!
//! At most `max_active` sessions hold an admission lease at once. Joining
//! when the pool is full appends to the waiting line; waiting positions
//! are dense 1..=W at every commit point. Leases expire lazily: nothing
//! fires when a deadline passes, the next transaction that looks sweeps
//! lapsed leases first and every check compares deadlines against the
//! injected clock. Waiting entries advance only through the reconcile
//! step (run by `check_status` polling and `process_queue`), never as a
//! side effect of someone leaving.
//!
//! Every mutating flow runs in one transaction under the global queue
//! lock, so promotion, renumbering and the sweep are atomic: a queue is
//! never observable with a gap in its positions or more than `max_active`
//! unexpired leases.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::clock::Clock;
use crate::error::AdmissionError;
use crate::metrics;
use crate::policy::{AdmissionPolicy, PolicyProvider};
use crate::retry::{RetryPolicy, retry_if};
use crate::store::{QueueStore, QueueTxn};
use crate::types::{QueueEntry, QueueEntryId, QueueStatus, SessionId, UserId};

/// Minutes of estimated wait per waiting position.
///
/// A fixed constant rather than a measured rate: the estimate is a
/// user-facing promise and staying stable matters more than being sharp.
pub const WAIT_ESTIMATE_MINUTES_PER_POSITION: i64 = 2;

/// Estimated wait for a waiting position.
#[must_use]
pub fn estimated_wait(position: u32) -> Duration {
    Duration::minutes(i64::from(position) * WAIT_ESTIMATE_MINUTES_PER_POSITION)
}

/// Where a session stands with the queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdmissionState {
    /// Holds a lease and may purchase. `expires_at` is `None` only when
    /// enforcement is disabled and no entry was consulted.
    Admitted {
        /// Lease deadline
        expires_at: Option<DateTime<Utc>>,
    },
    /// In line.
    Waiting {
        /// Dense 1-based place in line
        position: u32,
        /// `position` times the per-position estimate
        estimated_wait: Duration,
    },
    /// Lease lapsed; the session must rejoin.
    Expired {
        /// The deadline that lapsed
        expired_at: Option<DateTime<Utc>>,
    },
    /// No entry for this session. A normal outcome, not an error.
    NotInQueue,
}

/// A session's state plus queue-wide counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdmissionStatus {
    /// This session's state
    pub state: AdmissionState,
    /// Waiting entries across the queue (zero in the disabled bypass)
    pub waiting: u32,
    /// Active entries across the queue (zero in the disabled bypass)
    pub active: u32,
}

impl AdmissionStatus {
    /// Whether the platform should let this session purchase
    #[must_use]
    pub const fn can_access(&self) -> bool {
        matches!(self.state, AdmissionState::Admitted { .. })
    }

    const fn bypass() -> Self {
        Self {
            state: AdmissionState::Admitted { expires_at: None },
            waiting: 0,
            active: 0,
        }
    }
}

/// Queue-wide numbers recomputed by full scan for admin dashboards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueStats {
    /// Entries in line
    pub waiting: u32,
    /// Entries holding a lease
    pub active: u32,
    /// Expired entries not yet purged
    pub expired: u32,
    /// Mean time waiting entries have been in line
    pub average_wait: Duration,
    /// Longest time any waiting entry has been in line
    pub longest_wait: Duration,
}

struct ReconcileOutcome {
    lapsed: u32,
    promoted: u32,
}

/// Admits sessions into a bounded purchase pool.
pub struct AdmissionController {
    store: Arc<dyn QueueStore>,
    policy: Arc<dyn PolicyProvider>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl AdmissionController {
    /// Creates a controller with the default conflict retry budget.
    #[must_use]
    pub fn new(
        store: Arc<dyn QueueStore>,
        policy: Arc<dyn PolicyProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            policy,
            clock,
            retry: RetryPolicy::conflict(),
        }
    }

    /// Replaces the conflict retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn is_transient(err: &AdmissionError) -> bool {
        matches!(err, AdmissionError::Store(store) if store.is_transient())
    }

    /// The policy for this decision. A failed load enforces the fallback:
    /// capacity checks that fail must deny, never grant.
    async fn current_policy(&self) -> AdmissionPolicy {
        match self.policy.load().await {
            Ok(policy) => policy,
            Err(err) => {
                tracing::warn!(error = %err, "policy load failed, enforcing fallback policy");
                AdmissionPolicy::fail_closed()
            }
        }
    }

    /// Enters the queue, or reports the session's existing place.
    ///
    /// Idempotent for a session with a live entry. When the pool has room
    /// the session is admitted immediately, even if others are waiting;
    /// waiting entries only advance through the reconcile step, so a free
    /// slot between reconciles goes to whoever asks first.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Store`] after the conflict retry budget
    /// is spent.
    pub async fn join(
        &self,
        session: &SessionId,
        user: Option<UserId>,
    ) -> Result<AdmissionStatus, AdmissionError> {
        let policy = self.current_policy().await;
        if !policy.enabled {
            tracing::debug!(session = %session, "queue disabled, bypassing join");
            return Ok(AdmissionStatus::bypass());
        }

        let attempts = AtomicUsize::new(0);
        retry_if(
            &self.retry,
            || {
                if attempts.fetch_add(1, Ordering::Relaxed) > 0 {
                    metrics::record_txn_retry("join");
                }
                self.try_join(session, user, policy)
            },
            Self::is_transient,
        )
        .await
    }

    async fn try_join(
        &self,
        session: &SessionId,
        user: Option<UserId>,
        policy: AdmissionPolicy,
    ) -> Result<AdmissionStatus, AdmissionError> {
        let now = self.clock.now();
        let mut txn = self.store.begin().await?;
        let lapsed = txn.expire_overdue(now).await?;

        // After the sweep any remaining live entry is current, so an
        // existing one is returned as-is instead of duplicated.
        if let Some(existing) = txn.live_entry(session).await? {
            let waiting = txn.count_waiting().await?;
            let active = txn.count_active().await?;
            txn.commit().await?;
            metrics::record_leases_expired(u64::from(lapsed));
            return Ok(AdmissionStatus {
                state: Self::state_of(&existing),
                waiting,
                active,
            });
        }

        let active = txn.count_active().await?;
        let status = if active < policy.max_active {
            let entry = QueueEntry::admitted(session.clone(), user, now, now + policy.lease);
            txn.insert_entry(&entry).await?;
            let waiting = txn.count_waiting().await?;
            txn.commit().await?;
            metrics::record_queue_join("admitted");
            tracing::info!(session = %session, active = active + 1, "session admitted on join");
            AdmissionStatus {
                state: AdmissionState::Admitted {
                    expires_at: entry.expires_at,
                },
                waiting,
                active: active + 1,
            }
        } else {
            let position = txn.max_waiting_position().await? + 1;
            let entry = QueueEntry::waiting(session.clone(), user, position, now);
            txn.insert_entry(&entry).await?;
            let waiting = txn.count_waiting().await?;
            txn.commit().await?;
            metrics::record_queue_join("queued");
            tracing::info!(session = %session, position, "session queued");
            AdmissionStatus {
                state: AdmissionState::Waiting {
                    position,
                    estimated_wait: estimated_wait(position),
                },
                waiting,
                active,
            }
        };
        metrics::record_leases_expired(u64::from(lapsed));
        Ok(status)
    }

    /// Reports the session's current state after reconciling the queue.
    ///
    /// Polling this is what drives promotion in production: each call
    /// sweeps lapsed leases and fills free slots in FIFO order before
    /// looking the session up.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Store`] after the conflict retry budget
    /// is spent.
    pub async fn check_status(
        &self,
        session: &SessionId,
    ) -> Result<AdmissionStatus, AdmissionError> {
        let policy = self.current_policy().await;
        if !policy.enabled {
            tracing::debug!(session = %session, "queue disabled, bypassing status check");
            return Ok(AdmissionStatus::bypass());
        }

        let attempts = AtomicUsize::new(0);
        retry_if(
            &self.retry,
            || {
                if attempts.fetch_add(1, Ordering::Relaxed) > 0 {
                    metrics::record_txn_retry("check_status");
                }
                self.try_check_status(session, policy)
            },
            Self::is_transient,
        )
        .await
    }

    async fn try_check_status(
        &self,
        session: &SessionId,
        policy: AdmissionPolicy,
    ) -> Result<AdmissionStatus, AdmissionError> {
        let now = self.clock.now();
        let mut txn = self.store.begin().await?;
        let outcome = Self::reconcile(txn.as_mut(), policy.max_active, policy.lease, now).await?;
        let entry = txn.latest_entry(session).await?;
        let waiting = txn.count_waiting().await?;
        let active = txn.count_active().await?;
        txn.commit().await?;

        Self::record_reconcile(&outcome, waiting, active);
        let state = entry.map_or(AdmissionState::NotInQueue, |e| Self::state_of(&e));
        Ok(AdmissionStatus {
            state,
            waiting,
            active,
        })
    }

    /// Removes the session's live entry. Returns whether one existed;
    /// a session with nothing to remove is a no-op, not an error.
    ///
    /// The freed slot is not handed to the next waiter here; the next
    /// reconcile claims it.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Store`] after the conflict retry budget
    /// is spent.
    pub async fn leave(&self, session: &SessionId) -> Result<bool, AdmissionError> {
        let attempts = AtomicUsize::new(0);
        retry_if(
            &self.retry,
            || {
                if attempts.fetch_add(1, Ordering::Relaxed) > 0 {
                    metrics::record_txn_retry("leave");
                }
                self.try_leave(session)
            },
            Self::is_transient,
        )
        .await
    }

    async fn try_leave(&self, session: &SessionId) -> Result<bool, AdmissionError> {
        let mut txn = self.store.begin().await?;
        let removed = txn.delete_live(session).await?;
        if removed.is_some() {
            // Removing a waiting entry leaves a gap; renumbering is
            // harmless when the removed entry was active.
            txn.renumber_waiting().await?;
        }
        txn.commit().await?;

        if let Some(entry) = &removed {
            metrics::record_queue_departure();
            tracing::info!(session = %session, status = %entry.status, "session left the queue");
        }
        Ok(removed.is_some())
    }

    /// Sweeps lapsed leases and promotes waiting entries into free slots,
    /// FIFO. Returns how many were promoted.
    ///
    /// `max_override` reconciles against a different capacity without
    /// persisting any policy change, for admin tooling.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Store`] after the conflict retry budget
    /// is spent.
    pub async fn process_queue(
        &self,
        max_override: Option<u32>,
    ) -> Result<u32, AdmissionError> {
        let policy = self.current_policy().await;
        let cap = max_override.unwrap_or(policy.max_active);

        let attempts = AtomicUsize::new(0);
        retry_if(
            &self.retry,
            || {
                if attempts.fetch_add(1, Ordering::Relaxed) > 0 {
                    metrics::record_txn_retry("process_queue");
                }
                self.try_process_queue(cap, policy.lease)
            },
            Self::is_transient,
        )
        .await
    }

    async fn try_process_queue(&self, cap: u32, lease: Duration) -> Result<u32, AdmissionError> {
        let now = self.clock.now();
        let mut txn = self.store.begin().await?;
        let outcome = Self::reconcile(txn.as_mut(), cap, lease, now).await?;
        let waiting = txn.count_waiting().await?;
        let active = txn.count_active().await?;
        txn.commit().await?;

        Self::record_reconcile(&outcome, waiting, active);
        if outcome.promoted > 0 {
            tracing::info!(
                promoted = outcome.promoted,
                lapsed = outcome.lapsed,
                waiting,
                active,
                "queue processed"
            );
        }
        Ok(outcome.promoted)
    }

    /// One reconcile pass. Designed to be a no-op besides the sweep when
    /// there is no room.
    async fn reconcile(
        txn: &mut dyn QueueTxn,
        cap: u32,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, AdmissionError> {
        let lapsed = txn.expire_overdue(now).await?;
        let active = txn.count_active().await?;
        let room = cap.saturating_sub(active);

        let mut promoted = 0;
        if room > 0 {
            let front = txn.front_waiting(room).await?;
            if !front.is_empty() {
                let ids: Vec<QueueEntryId> = front.iter().map(|e| e.id).collect();
                txn.mark_active(&ids, now + lease).await?;
                txn.renumber_waiting().await?;
                promoted = u32::try_from(ids.len()).unwrap_or(u32::MAX);
            }
        }
        Ok(ReconcileOutcome { lapsed, promoted })
    }

    fn record_reconcile(outcome: &ReconcileOutcome, waiting: u32, active: u32) {
        metrics::record_leases_expired(u64::from(outcome.lapsed));
        metrics::record_queue_promotions(u64::from(outcome.promoted));
        metrics::update_queue_depth(waiting, active);
    }

    fn state_of(entry: &QueueEntry) -> AdmissionState {
        match entry.status {
            QueueStatus::Active => AdmissionState::Admitted {
                expires_at: entry.expires_at,
            },
            QueueStatus::Waiting => {
                let position = entry.position.unwrap_or(0);
                AdmissionState::Waiting {
                    position,
                    estimated_wait: estimated_wait(position),
                }
            }
            QueueStatus::Expired => AdmissionState::Expired {
                expired_at: entry.expires_at,
            },
        }
    }

    /// Rewrites waiting positions to dense 1..=W. The mutating flows
    /// renumber inside their own transactions already; this surface
    /// exists for admin tooling after manual row surgery.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Store`] after the conflict retry budget
    /// is spent.
    pub async fn reorder_queue(&self) -> Result<u32, AdmissionError> {
        let attempts = AtomicUsize::new(0);
        retry_if(
            &self.retry,
            || {
                if attempts.fetch_add(1, Ordering::Relaxed) > 0 {
                    metrics::record_txn_retry("reorder_queue");
                }
                self.try_reorder()
            },
            Self::is_transient,
        )
        .await
    }

    async fn try_reorder(&self) -> Result<u32, AdmissionError> {
        let mut txn = self.store.begin().await?;
        let moved = txn.renumber_waiting().await?;
        txn.commit().await?;
        if moved > 0 {
            tracing::info!(moved, "waiting positions renumbered");
        }
        Ok(moved)
    }

    /// Turns queue enforcement on or off. Disabling stops gating but
    /// deletes nothing; existing entries keep their state for when
    /// enforcement returns.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Store`] when the policy write fails.
    pub async fn set_enabled(&self, enabled: bool) -> Result<(), AdmissionError> {
        let mut policy = self.policy.load().await?;
        policy.enabled = enabled;
        self.policy.store(policy).await?;
        tracing::info!(enabled, "queue enforcement toggled");
        Ok(())
    }

    /// Changes the bound on concurrently admitted sessions.
    ///
    /// Reduction never evicts: current leases run their course and the
    /// pool drains to the new bound as they lapse or leave.
    ///
    /// # Errors
    ///
    /// - [`AdmissionError::InvalidCapacity`] for zero
    /// - [`AdmissionError::Store`] when the policy write fails
    pub async fn set_max_active(&self, max_active: u32) -> Result<(), AdmissionError> {
        if max_active == 0 {
            return Err(AdmissionError::InvalidCapacity(max_active));
        }
        let mut policy = self.policy.load().await?;
        policy.max_active = max_active;
        self.policy.store(policy).await?;
        tracing::info!(max_active, "active pool capacity changed");
        Ok(())
    }

    /// Deletes every waiting entry, returning the count.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Store`] after the conflict retry budget
    /// is spent.
    pub async fn clear_waiting(&self) -> Result<u64, AdmissionError> {
        self.clear(QueueStatus::Waiting).await
    }

    /// Deletes every expired entry, returning the count.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Store`] after the conflict retry budget
    /// is spent.
    pub async fn clear_expired(&self) -> Result<u64, AdmissionError> {
        self.clear(QueueStatus::Expired).await
    }

    async fn clear(&self, status: QueueStatus) -> Result<u64, AdmissionError> {
        let attempts = AtomicUsize::new(0);
        let removed = retry_if(
            &self.retry,
            || {
                if attempts.fetch_add(1, Ordering::Relaxed) > 0 {
                    metrics::record_txn_retry("clear");
                }
                async {
                    let mut txn = self.store.begin().await?;
                    let removed = txn.delete_by_status(status).await?;
                    txn.commit().await?;
                    Ok::<_, AdmissionError>(removed)
                }
            },
            Self::is_transient,
        )
        .await?;
        tracing::info!(removed, status = %status, "queue entries cleared");
        Ok(removed)
    }

    /// Recomputes queue-wide numbers by full scan. Admin-rate traffic;
    /// nothing is cached.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Store`] on backend failure.
    pub async fn stats(&self) -> Result<QueueStats, AdmissionError> {
        let now = self.clock.now();
        let mut txn = self.store.begin().await?;
        let entries = txn.all_entries().await?;
        txn.commit().await?;

        let mut waiting = 0u32;
        let mut active = 0u32;
        let mut expired = 0u32;
        let mut total_wait = Duration::zero();
        let mut longest_wait = Duration::zero();
        for entry in &entries {
            match entry.status {
                QueueStatus::Waiting => {
                    waiting += 1;
                    let waited = now - entry.joined_at;
                    total_wait += waited;
                    if waited > longest_wait {
                        longest_wait = waited;
                    }
                }
                QueueStatus::Active => active += 1,
                QueueStatus::Expired => expired += 1,
            }
        }
        let average_wait = if waiting == 0 {
            Duration::zero()
        } else {
            total_wait / i32::try_from(waiting).unwrap_or(i32::MAX)
        };

        Ok(QueueStats {
            waiting,
            active,
            expired,
            average_wait,
            longest_wait,
        })
    }
}
