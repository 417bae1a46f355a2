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

//! Observer fan-out for status updates.
//!
//! Three kinds of consumer are served from one registry:
//!
//! - **Callbacks**: plain functions invoked with every new record, in
//!   registration order. Records are delivered in commit order even when
//!   several threads write at once, and a panicking callback is logged and
//!   skipped.
//! - **Waiters**: one-shot registrations created by `wait_*` calls on the
//!   store. A waiter is removed when it resolves or when its future is
//!   dropped.
//! - **Stream subscribers**: receivers on a bounded broadcast channel. A
//!   subscriber that falls behind skips the oldest records instead of
//!   stalling the writer.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, warn};
use tokio::sync::{broadcast, oneshot};

use crate::status::StatusRecord;

/// Default broadcast channel capacity.
pub const DEFAULT_STREAM_CAPACITY: usize = 64;

/// Callback invoked with every new record.
pub type StatusCallback = Arc<dyn Fn(&StatusRecord) + Send + Sync>;

type Matcher = Box<dyn Fn(&StatusRecord) -> bool + Send + Sync>;

/// Handle returned by [`ObserverRegistry::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

struct Waiter {
    id: u64,
    matcher: Matcher,
    tx: oneshot::Sender<StatusRecord>,
}

#[derive(Default)]
struct Entries {
    next_id: u64,
    callbacks: Vec<(CallbackId, StatusCallback)>,
    waiters: Vec<Waiter>,
}

impl Entries {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Records committed but not yet handed to callbacks.
#[derive(Default)]
struct Delivery {
    queue: VecDeque<StatusRecord>,
    draining: bool,
}

/// Fan-out work produced by [`ObserverRegistry::commit`], finished by
/// [`ObserverRegistry::deliver`] once the store lock is released.
pub(crate) struct Committed {
    record: StatusRecord,
    resolved: Vec<Waiter>,
    drain: bool,
}

/// Registry of everything interested in status updates.
pub struct ObserverRegistry {
    entries: Mutex<Entries>,
    delivery: Mutex<Delivery>,
    stream_tx: broadcast::Sender<StatusRecord>,
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.lock();
        f.debug_struct("ObserverRegistry")
            .field("callbacks", &entries.callbacks.len())
            .field("waiters", &entries.waiters.len())
            .field("stream_subscribers", &self.stream_tx.receiver_count())
            .finish()
    }
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_STREAM_CAPACITY)
    }
}

impl ObserverRegistry {
    /// Create a registry whose broadcast stream buffers `stream_capacity`
    /// records per subscriber.
    #[must_use]
    pub fn new(stream_capacity: usize) -> Self {
        let (stream_tx, _) = broadcast::channel(stream_capacity.max(1));
        Self {
            entries: Mutex::new(Entries::default()),
            delivery: Mutex::new(Delivery::default()),
            stream_tx,
        }
    }

    // Callbacks and matchers run under `catch_unwind`, so poisoning only
    // happens if bookkeeping itself panicked. The entries are still
    // consistent then.
    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_delivery(&self) -> MutexGuard<'_, Delivery> {
        self.delivery
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Register a callback. Registering the same function twice yields two
    /// ids and two invocations per update.
    pub fn subscribe<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&StatusRecord) + Send + Sync + 'static,
    {
        self.subscribe_arc(Arc::new(callback))
    }

    /// Register an already shared callback.
    pub fn subscribe_arc(&self, callback: StatusCallback) -> CallbackId {
        let mut entries = self.lock();
        let id = CallbackId(entries.allocate_id());
        entries.callbacks.push((id, callback));
        id
    }

    /// Remove a callback. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: CallbackId) {
        self.lock().callbacks.retain(|(existing, _)| *existing != id);
    }

    /// Remove every callback. Pending waiters are left alone.
    pub fn clear_all(&self) {
        self.lock().callbacks.clear();
    }

    /// Number of registered callbacks.
    #[must_use]
    pub fn callback_count(&self) -> usize {
        self.lock().callbacks.len()
    }

    /// Number of waiters that have not resolved or been cancelled.
    #[must_use]
    pub fn pending_waiters(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Subscribe to the broadcast stream. Only records published after this
    /// call are delivered.
    #[must_use]
    pub fn subscribe_stream(&self) -> StatusStream {
        StatusStream {
            rx: self.stream_tx.subscribe(),
        }
    }

    /// Number of live stream subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.stream_tx.receiver_count()
    }

    pub(crate) fn register_waiter(&self, matcher: Matcher) -> (u64, oneshot::Receiver<StatusRecord>) {
        let (tx, rx) = oneshot::channel();
        let mut entries = self.lock();
        let id = entries.allocate_id();
        entries.waiters.push(Waiter { id, matcher, tx });
        (id, rx)
    }

    pub(crate) fn remove_waiter(&self, id: u64) {
        self.lock().waiters.retain(|waiter| waiter.id != id);
    }

    /// Publish to stream subscribers. Never blocks; with no subscribers the
    /// record is simply dropped.
    fn publish(&self, record: StatusRecord) {
        if self.stream_tx.receiver_count() > 0 {
            let _ = self.stream_tx.send(record);
        }
    }

    /// Fix the fan-out of a newly committed record.
    ///
    /// Must be called while the store's record lock is held: the record is
    /// published, matching waiters are taken out and the record is queued
    /// for callbacks, all in commit order. Waiters registered later never
    /// see this record.
    pub(crate) fn commit(&self, record: StatusRecord) -> Committed {
        self.publish(record);

        let resolved = {
            let mut entries = self.lock();
            let (resolved, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut entries.waiters)
                .into_iter()
                .partition(|waiter| waiter_matches(waiter, &record));
            entries.waiters = pending;
            resolved
        };

        let drain = {
            let mut delivery = self.lock_delivery();
            delivery.queue.push_back(record);
            !std::mem::replace(&mut delivery.draining, true)
        };

        Committed {
            record,
            resolved,
            drain,
        }
    }

    /// Wake resolved waiters and run callbacks. Called without the record
    /// lock, so callbacks may read or update the store.
    ///
    /// Only one thread delivers to callbacks at a time. A writer that finds
    /// delivery already running leaves its record queued for that thread,
    /// which hands it over after the records committed before it.
    pub(crate) fn deliver(&self, committed: Committed) {
        let Committed {
            record,
            resolved,
            drain,
        } = committed;

        if !resolved.is_empty() {
            debug!("Resolving {} waiter(s) with {}", resolved.len(), record);
        }
        for waiter in resolved {
            // Receiver gone means the waiter was cancelled mid-flight.
            let _ = waiter.tx.send(record);
        }

        if drain {
            self.drain_callbacks();
        }
    }

    fn drain_callbacks(&self) {
        loop {
            let record = {
                let mut delivery = self.lock_delivery();
                match delivery.queue.pop_front() {
                    Some(record) => record,
                    None => {
                        delivery.draining = false;
                        return;
                    }
                }
            };

            let callbacks: Vec<(CallbackId, StatusCallback)> = self.lock().callbacks.clone();
            for (id, callback) in callbacks {
                if catch_unwind(AssertUnwindSafe(|| callback(&record))).is_err() {
                    warn!("Status callback {:?} panicked on {}", id, record);
                }
            }
        }
    }
}

fn waiter_matches(waiter: &Waiter, record: &StatusRecord) -> bool {
    catch_unwind(AssertUnwindSafe(|| (waiter.matcher)(record))).unwrap_or_else(|_| {
        warn!("Wait predicate panicked on {}, treating as no match", record);
        false
    })
}

/// Receiving half of the status broadcast stream.
#[derive(Debug)]
pub struct StatusStream {
    rx: broadcast::Receiver<StatusRecord>,
}

impl StatusStream {
    /// Wait for the next record.
    ///
    /// Returns `None` once the store has been dropped. If this subscriber
    /// fell behind, the missed records are skipped and the oldest record
    /// still buffered is returned.
    pub async fn next(&mut self) -> Option<StatusRecord> {
        loop {
            match self.rx.recv().await {
                Ok(record) => return Some(record),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Status stream subscriber lagged, skipped {} update(s)", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take a buffered record without waiting.
    pub fn try_next(&mut self) -> Option<StatusRecord> {
        loop {
            match self.rx.try_recv() {
                Ok(record) => return Some(record),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!("Status stream subscriber lagged, skipped {} update(s)", skipped);
                }
                Err(_) => return None,
            }
        }
    }
}
