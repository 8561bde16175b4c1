//! Exactly-once device provisioning coordinator.
//!
//! Maps a registration key to the device's connection slot. Many workers may
//! race to provision a never-seen device; the atomic insert-if-absent on the
//! slot map elects a single leader per key, the expensive provisioning call
//! happens outside any lock, and every other caller polls the slot until the
//! leader's outcome is visible.
//!
//! Failure never leaves a poisoned slot behind: a failed provisioning or a
//! failed send removes the entry, so the next message for that device starts
//! a fresh provisioning cycle.

use crate::collaborators::DeviceConnection;
use crate::errors::{AcquireError, ProvisioningError};
use crate::metrics_defs::{
    CACHE_EVICTED, CACHE_FOLLOWER_WAIT, CACHE_INVALIDATED, CACHE_LEADER_ELECTED, CACHE_READY_HIT,
};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use shared::counter;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

enum SlotState {
    /// Provisioning in flight on the leader's task.
    Pending,
    /// Connection established; immutable until the slot is removed.
    Ready(Arc<DeviceConnection>),
}

struct Slot {
    /// Identity of one provisioning cycle. A removed and re-inserted key
    /// gets a new epoch, so a stale leader can never complete someone
    /// else's slot.
    epoch: u64,
    state: SlotState,
    last_touched: Instant,
}

/// Removes the leader's Pending placeholder on drop unless defused.
///
/// The leader's future can be dropped at the provisioning await (host
/// deadline, task abort); `invalidate` and `evict_idle` both skip Pending
/// slots, so without this rollback an abandoned placeholder would pin the
/// key forever.
struct PendingRollback<'a> {
    slots: &'a DashMap<String, Slot>,
    key: &'a str,
    epoch: u64,
    armed: bool,
}

impl PendingRollback<'_> {
    fn defuse(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingRollback<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let removed = self
            .slots
            .remove_if(self.key, |_, slot| {
                slot.epoch == self.epoch && matches!(slot.state, SlotState::Pending)
            })
            .is_some();
        if removed {
            tracing::warn!(key = self.key, "provisioning abandoned, placeholder removed");
        }
    }
}

/// Concurrency-safe resolve-or-create cache for device connections.
///
/// One instance is shared by all workers of a process. Thread-safety
/// contract: `acquire` may be called from any number of tasks in parallel
/// for any mix of keys; for each key the provisioning closure runs at most
/// once per cycle.
///
/// There is no internal timeout. A follower polls until the slot resolves;
/// the caller's execution context is responsible for the overall deadline.
pub struct ConnectionCache {
    slots: DashMap<String, Slot>,
    next_epoch: AtomicU64,
    poll_delay: Duration,
}

impl ConnectionCache {
    pub fn new(poll_delay: Duration) -> Self {
        ConnectionCache {
            slots: DashMap::new(),
            next_epoch: AtomicU64::new(1),
            poll_delay,
        }
    }

    /// Returns the connection for `key`, provisioning it first if no cycle
    /// has completed yet.
    ///
    /// The caller that wins the insert-if-absent race invokes `provision`;
    /// on success the slot transitions to Ready and the connection is
    /// returned, on failure the slot is removed and the error surfaces to
    /// this caller only. Losers poll until the slot is Ready (returning the
    /// shared connection) or gone ([`AcquireError::KeyRemovedWhileWaiting`]).
    pub async fn acquire<F, Fut>(
        &self,
        key: &str,
        provision: F,
    ) -> Result<Arc<DeviceConnection>, AcquireError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<DeviceConnection, ProvisioningError>>,
    {
        // The entry guard is held only for the placeholder insert, never
        // across an await.
        let leader_epoch = match self.slots.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
                slot.insert(Slot {
                    epoch,
                    state: SlotState::Pending,
                    last_touched: Instant::now(),
                });
                Some(epoch)
            }
            Entry::Occupied(_) => None,
        };

        match leader_epoch {
            Some(epoch) => self.lead(key, epoch, provision).await,
            None => self.follow(key).await,
        }
    }

    /// Leader path: run provisioning with the Pending placeholder in place,
    /// then publish the result or roll the placeholder back.
    async fn lead<F, Fut>(
        &self,
        key: &str,
        epoch: u64,
        provision: F,
    ) -> Result<Arc<DeviceConnection>, AcquireError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<DeviceConnection, ProvisioningError>>,
    {
        counter!(CACHE_LEADER_ELECTED).increment(1);
        tracing::debug!(key, "provisioning start");

        let mut rollback = PendingRollback {
            slots: &self.slots,
            key,
            epoch,
            armed: true,
        };

        match provision().await {
            Ok(connection) => {
                rollback.defuse();
                let connection = Arc::new(connection);
                if let Some(mut slot) = self.slots.get_mut(key) {
                    if slot.epoch == epoch && matches!(slot.state, SlotState::Pending) {
                        slot.state = SlotState::Ready(connection.clone());
                        slot.last_touched = Instant::now();
                    }
                }
                // If the slot vanished in the meantime the transition is a
                // no-op; the connection is still valid for this message.
                tracing::debug!(key, "provisioning complete");
                Ok(connection)
            }
            Err(err) => {
                rollback.defuse();
                // Roll back only our own placeholder so the key returns to
                // "absent" and a later message can provision from scratch.
                let removed = self
                    .slots
                    .remove_if(key, |_, slot| {
                        slot.epoch == epoch && matches!(slot.state, SlotState::Pending)
                    })
                    .is_some();
                tracing::warn!(key, error = %err, removed, "provisioning failed");
                Err(AcquireError::Provisioning(err))
            }
        }
    }

    /// Follower path: poll the slot with a suspension delay until the
    /// leader's outcome is visible.
    async fn follow(&self, key: &str) -> Result<Arc<DeviceConnection>, AcquireError> {
        let mut first_poll = true;
        loop {
            match self.slots.get_mut(key) {
                None => {
                    tracing::warn!(key, "registration key removed while waiting");
                    return Err(AcquireError::KeyRemovedWhileWaiting);
                }
                Some(mut slot) => {
                    slot.last_touched = Instant::now();
                    if let SlotState::Ready(connection) = &slot.state {
                        if first_poll {
                            counter!(CACHE_READY_HIT).increment(1);
                        }
                        return Ok(connection.clone());
                    }
                }
            }
            if first_poll {
                counter!(CACHE_FOLLOWER_WAIT).increment(1);
                first_poll = false;
            }
            // Guard is dropped above; suspend rather than spin.
            tokio::time::sleep(self.poll_delay).await;
        }
    }

    /// Removes the slot for `key` if it still holds exactly `connection`.
    ///
    /// Compare-and-remove: a Pending placeholder of a racing leader or a
    /// newer connection provisioned after the caller's copy is never
    /// touched. Returns whether a slot was removed.
    pub fn invalidate(&self, key: &str, connection: &Arc<DeviceConnection>) -> bool {
        let removed = self
            .slots
            .remove_if(key, |_, slot| match &slot.state {
                SlotState::Ready(current) => Arc::ptr_eq(current, connection),
                SlotState::Pending => false,
            })
            .is_some();
        if removed {
            counter!(CACHE_INVALIDATED).increment(1);
            tracing::info!(key, "connection invalidated");
        }
        removed
    }

    /// Sliding-expiration sweep: removes Ready slots untouched for longer
    /// than `max_idle`. Pending slots are never evicted. Returns the number
    /// of slots removed.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut evicted = 0;
        self.slots.retain(|_, slot| {
            let keep = matches!(slot.state, SlotState::Pending)
                || slot.last_touched.elapsed() <= max_idle;
            if !keep {
                evicted += 1;
            }
            keep
        });
        if evicted > 0 {
            counter!(CACHE_EVICTED).increment(evicted as u64);
            tracing::info!(evicted, "idle connections evicted");
        }
        evicted
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
