// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Single source of truth for connectivity status.
//!
//! [`StatusStore`] is a cheap, clonable handle. All clones share one current
//! record and one [`ObserverRegistry`]. Updates are applied one at a time
//! under a single lock. While that lock is held the record is published to
//! the stream, matched against pending waiters and queued for callbacks, so
//! every observer sees updates in apply order. Waking waiters and running
//! callbacks happen after the lock is released.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::debug;
use tokio_util::sync::CancellationToken;

use crate::feed::CapabilityEvent;
use crate::observers::{CallbackId, ObserverRegistry, StatusStream, DEFAULT_STREAM_CAPACITY};
use crate::status::StatusRecord;

struct Inner {
    record: Mutex<StatusRecord>,
    observers: ObserverRegistry,
}

/// Shared handle to the current connectivity status.
#[derive(Clone)]
pub struct StatusStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for StatusStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusStore")
            .field("current", &self.current())
            .field("observers", &self.inner.observers)
            .finish()
    }
}

impl Default for StatusStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Deregisters a waiter when the waiting future completes or is dropped.
struct WaiterGuard<'a> {
    observers: &'a ObserverRegistry,
    id: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.observers.remove_waiter(self.id);
    }
}

impl StatusStore {
    /// Create a store with the all-false initial record.
    #[must_use]
    pub fn new() -> Self {
        Self::with_stream_capacity(DEFAULT_STREAM_CAPACITY)
    }

    /// Create a store whose broadcast stream buffers `capacity` records per
    /// subscriber.
    #[must_use]
    pub fn with_stream_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                record: Mutex::new(StatusRecord::default()),
                observers: ObserverRegistry::new(capacity),
            }),
        }
    }

    fn lock_record(&self) -> MutexGuard<'_, StatusRecord> {
        self.inner
            .record
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Current snapshot.
    #[must_use]
    pub fn current(&self) -> StatusRecord {
        *self.lock_record()
    }

    /// The observer registry shared by every clone of this store.
    #[must_use]
    pub fn observers(&self) -> &ObserverRegistry {
        &self.inner.observers
    }

    // If another thread is already running callbacks, this returns once the
    // record is queued and that thread delivers it.
    fn apply(&self, update: impl FnOnce(StatusRecord) -> StatusRecord) -> StatusRecord {
        let (record, committed) = {
            let mut current = self.lock_record();
            let next = update(*current);
            *current = next;
            (next, self.inner.observers.commit(next))
        };

        debug!("Status updated: {}", record);
        self.inner.observers.deliver(committed);
        record
    }

    /// A default network route became available or went away.
    pub fn apply_available(&self, is_available: bool) -> StatusRecord {
        self.apply(|record| record.with_available(is_available))
    }

    /// Capabilities of the active network changed.
    pub fn apply_capabilities(
        &self,
        unmetered: bool,
        has_internet: bool,
        validated: bool,
    ) -> StatusRecord {
        self.apply(|record| record.with_network_capabilities(unmetered, has_internet, validated))
    }

    /// The active network was lost.
    pub fn apply_lost(&self) -> StatusRecord {
        self.apply(|record| record.with_available(false))
    }

    /// Record the outcome of a reachability probe. Observers are notified
    /// even though probe fields never affect waiter matching.
    pub fn apply_probe_result(&self, is_online: bool, at: DateTime<Utc>) -> StatusRecord {
        self.apply(|record| record.with_probe_result(is_online, at))
    }

    /// Apply one capability-change event.
    pub fn apply_event(&self, event: CapabilityEvent) -> StatusRecord {
        match event {
            CapabilityEvent::Available => self.apply_available(true),
            CapabilityEvent::CapabilitiesChanged {
                unmetered,
                has_internet,
                validated,
            } => self.apply_capabilities(unmetered, has_internet, validated),
            CapabilityEvent::Lost => self.apply_lost(),
        }
    }

    /// Register a callback invoked with every new record.
    pub fn subscribe<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&StatusRecord) + Send + Sync + 'static,
    {
        self.inner.observers.subscribe(callback)
    }

    /// Remove a callback. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: CallbackId) {
        self.inner.observers.unsubscribe(id);
    }

    /// Remove every callback.
    pub fn clear_all(&self) {
        self.inner.observers.clear_all();
    }

    /// Subscribe to the broadcast stream of future updates.
    #[must_use]
    pub fn subscribe_stream(&self) -> StatusStream {
        self.inner.observers.subscribe_stream()
    }

    /// Wait until the capability flags equal those of `target`.
    ///
    /// Probe fields are ignored on both sides. Resolves immediately when the
    /// current record already matches. Dropping the future deregisters the
    /// waiter.
    pub async fn wait_for(&self, target: StatusRecord) -> StatusRecord {
        let wanted = target.capabilities();
        self.wait_until(move |record| record.capabilities() == wanted)
            .await
    }

    /// Wait until `predicate` holds for the current record.
    ///
    /// `predicate` runs while internal locks are held and must not call back
    /// into the store.
    pub async fn wait_until<F>(&self, predicate: F) -> StatusRecord
    where
        F: Fn(&StatusRecord) -> bool + Send + Sync + 'static,
    {
        // Check and register under the record lock so no update can land
        // between the two.
        let (id, rx) = {
            let current = self.lock_record();
            if predicate(&*current) {
                return *current;
            }
            self.inner.observers.register_waiter(Box::new(predicate))
        };
        let _guard = WaiterGuard {
            observers: &self.inner.observers,
            id,
        };

        match rx.await {
            Ok(record) => record,
            // The sender only goes away with the registry, which `self` keeps alive.
            Err(_) => std::future::pending().await,
        }
    }

    /// Like [`wait_for`](Self::wait_for), but gives up with `None` once
    /// `cancel` fires.
    pub async fn wait_for_cancellable(
        &self,
        target: StatusRecord,
        cancel: &CancellationToken,
    ) -> Option<StatusRecord> {
        tokio::select! {
            record = self.wait_for(target) => Some(record),
            () = cancel.cancelled() => None,
        }
    }
}
