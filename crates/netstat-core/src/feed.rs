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

//! Inbound capability-change events.
//!
//! Whatever learns about network changes from the OS hands them to a
//! [`CapabilityFeed`], which applies them to a [`StatusStore`] one at a time
//! in arrival order. Events also have a small line-oriented text form so
//! they can be scripted:
//!
//! ```text
//! available
//! capabilities unmetered internet validated
//! capabilities internet
//! lost
//! ```

use std::str::FromStr;

use log::{debug, info};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::status::StatusRecord;
use crate::store::StatusStore;

/// Default number of events buffered between the source and the store.
pub const DEFAULT_FEED_BUFFER: usize = 32;

/// A change reported by the platform for the active network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityEvent {
    /// A default route became available.
    Available,
    /// The active network's capabilities changed.
    CapabilitiesChanged {
        unmetered: bool,
        has_internet: bool,
        validated: bool,
    },
    /// The active network was lost.
    Lost,
}

impl CapabilityEvent {
    /// The record that results from applying this event to `record`.
    #[must_use]
    pub fn apply_to(self, record: StatusRecord) -> StatusRecord {
        match self {
            Self::Available => record.with_available(true),
            Self::CapabilitiesChanged {
                unmetered,
                has_internet,
                validated,
            } => record.with_network_capabilities(unmetered, has_internet, validated),
            Self::Lost => record.with_available(false),
        }
    }
}

/// Errors from parsing the text form of an event.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeedParseError {
    #[error("empty event line")]
    Empty,

    #[error("unknown event: {0}")]
    UnknownEvent(String),

    #[error("unknown capability flag: {0}")]
    UnknownFlag(String),
}

impl FromStr for CapabilityEvent {
    type Err = FeedParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let kind = words.next().ok_or(FeedParseError::Empty)?;

        match kind.to_ascii_lowercase().as_str() {
            "available" => Ok(Self::Available),
            "lost" => Ok(Self::Lost),
            "capabilities" | "caps" => {
                let mut unmetered = false;
                let mut has_internet = false;
                let mut validated = false;
                for word in words {
                    match word.to_ascii_lowercase().as_str() {
                        "unmetered" => unmetered = true,
                        "internet" => has_internet = true,
                        "validated" => validated = true,
                        _ => return Err(FeedParseError::UnknownFlag(word.to_string())),
                    }
                }
                Ok(Self::CapabilitiesChanged {
                    unmetered,
                    has_internet,
                    validated,
                })
            }
            _ => Err(FeedParseError::UnknownEvent(kind.to_string())),
        }
    }
}

/// Parse one line of a scripted feed.
///
/// Blank lines and `#` comments yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<CapabilityEvent>, FeedParseError> {
    let line = line.split('#').next().unwrap_or_default().trim();
    if line.is_empty() {
        return Ok(None);
    }
    line.parse().map(Some)
}

/// Returned when sending to a feed that has shut down.
#[derive(Debug, Error)]
#[error("capability feed is closed")]
pub struct FeedClosed;

/// Returned by [`CapabilityFeed::try_send`]. Both variants hand the event
/// back.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeedTrySendError {
    #[error("capability feed buffer is full")]
    Full(CapabilityEvent),

    #[error("capability feed is closed")]
    Closed(CapabilityEvent),
}

/// Handle to a background task that applies events to a store in order.
#[derive(Debug, Clone)]
pub struct CapabilityFeed {
    event_tx: mpsc::Sender<CapabilityEvent>,
    cancel_token: CancellationToken,
    finished: CancellationToken,
}

impl CapabilityFeed {
    /// Spawn the apply task. Must be called from within a Tokio runtime.
    #[must_use]
    pub fn spawn(store: StatusStore, buffer: usize) -> Self {
        let (event_tx, event_rx) = mpsc::channel(buffer.max(1));
        let cancel_token = CancellationToken::new();

        let finished = CancellationToken::new();

        let task_cancel = cancel_token.clone();
        let task_finished = finished.clone();
        tokio::spawn(async move {
            // Fires however the task ends, even if applying an event panics.
            let _finished = task_finished.drop_guard();
            feed_loop(store, event_rx, task_cancel).await;
        });

        Self {
            event_tx,
            cancel_token,
            finished,
        }
    }

    /// Queue an event, waiting for buffer space if needed.
    pub async fn send(&self, event: CapabilityEvent) -> Result<(), FeedClosed> {
        if self.cancel_token.is_cancelled() {
            return Err(FeedClosed);
        }
        self.event_tx.send(event).await.map_err(|_closed| FeedClosed)
    }

    /// Queue an event from a non-async context without waiting.
    pub fn try_send(&self, event: CapabilityEvent) -> Result<(), FeedTrySendError> {
        if self.cancel_token.is_cancelled() {
            return Err(FeedTrySendError::Closed(event));
        }
        self.event_tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(event) => FeedTrySendError::Full(event),
            mpsc::error::TrySendError::Closed(event) => FeedTrySendError::Closed(event),
        })
    }

    /// Stop applying events. Events still queued are discarded.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }

    /// Drop this handle and wait until every queued event has been applied.
    ///
    /// Completes once all other clones are gone too, or on shutdown.
    pub async fn finish(self) {
        let finished = self.finished.clone();
        drop(self);
        finished.cancelled().await;
    }

    /// Whether the apply task is still accepting events.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel_token.is_cancelled() || self.event_tx.is_closed()
    }
}

async fn feed_loop(
    store: StatusStore,
    mut event_rx: mpsc::Receiver<CapabilityEvent>,
    cancel_token: CancellationToken,
) {
    info!("Capability feed started");

    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else {
                    info!("Capability feed closed by all senders");
                    break;
                };
                debug!("Applying capability event {:?}", event);
                store.apply_event(event);
            }
            () = cancel_token.cancelled() => {
                info!("Capability feed cancelled");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_parse_simple_events() {
        assert_eq!("available".parse::<CapabilityEvent>(), Ok(CapabilityEvent::Available));
        assert_eq!("  LOST ".parse::<CapabilityEvent>(), Ok(CapabilityEvent::Lost));
    }

    #[test]
    fn test_parse_capabilities_any_order() {
        assert_eq!(
            "capabilities validated unmetered".parse::<CapabilityEvent>(),
            Ok(CapabilityEvent::CapabilitiesChanged {
                unmetered: true,
                has_internet: false,
                validated: true,
            })
        );
        assert_eq!(
            "caps".parse::<CapabilityEvent>(),
            Ok(CapabilityEvent::CapabilitiesChanged {
                unmetered: false,
                has_internet: false,
                validated: false,
            })
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<CapabilityEvent>(), Err(FeedParseError::Empty));
        assert_eq!(
            "online".parse::<CapabilityEvent>(),
            Err(FeedParseError::UnknownEvent("online".to_string()))
        );
        assert_eq!(
            "capabilities wifi".parse::<CapabilityEvent>(),
            Err(FeedParseError::UnknownFlag("wifi".to_string()))
        );
    }

    #[test]
    fn test_parse_line_skips_comments_and_blanks() {
        assert_eq!(parse_line(""), Ok(None));
        assert_eq!(parse_line("   # nothing here"), Ok(None));
        assert_eq!(
            parse_line("available # wifi came up"),
            Ok(Some(CapabilityEvent::Available))
        );
    }

    #[tokio::test]
    async fn test_feed_applies_events_in_order() {
        let store = StatusStore::new();
        let mut stream = store.subscribe_stream();
        let feed = CapabilityFeed::spawn(store.clone(), 4);

        let events = [
            CapabilityEvent::Available,
            CapabilityEvent::CapabilitiesChanged {
                unmetered: true,
                has_internet: true,
                validated: true,
            },
            CapabilityEvent::Lost,
        ];
        for event in events {
            feed.send(event).await.unwrap();
        }

        let mut expected = StatusRecord::default();
        for event in events {
            expected = event.apply_to(expected);
            let record = timeout(Duration::from_secs(1), stream.next())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(record, expected);
        }
        assert_eq!(store.current(), expected);
    }

    #[tokio::test]
    async fn test_finish_drains_queue() {
        let store = StatusStore::new();
        let feed = CapabilityFeed::spawn(store.clone(), 8);

        feed.send(CapabilityEvent::Available).await.unwrap();
        feed.send(CapabilityEvent::CapabilitiesChanged {
            unmetered: false,
            has_internet: true,
            validated: true,
        })
        .await
        .unwrap();
        timeout(Duration::from_secs(1), feed.finish()).await.unwrap();

        assert_eq!(
            store.current(),
            StatusRecord::with_capabilities(true, true, true, true)
        );
    }

    #[tokio::test]
    async fn test_send_after_shutdown_fails() {
        let feed = CapabilityFeed::spawn(StatusStore::new(), 1);
        feed.shutdown();

        assert!(feed.is_closed());
        assert!(feed.send(CapabilityEvent::Available).await.is_err());
        assert_eq!(
            feed.try_send(CapabilityEvent::Lost),
            Err(FeedTrySendError::Closed(CapabilityEvent::Lost))
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_try_send_reports_full_buffer() {
        let store = StatusStore::new();
        let feed = CapabilityFeed::spawn(store.clone(), 1);

        // The apply task has not run yet on this thread.
        assert_eq!(feed.try_send(CapabilityEvent::Available), Ok(()));
        assert_eq!(
            feed.try_send(CapabilityEvent::Lost),
            Err(FeedTrySendError::Full(CapabilityEvent::Lost))
        );
        assert!(!feed.is_closed());

        timeout(Duration::from_secs(1), feed.finish()).await.unwrap();
        assert!(store.current().available);
    }

    #[tokio::test]
    async fn test_panicking_callback_does_not_stop_feed() {
        let store = StatusStore::new();
        store.subscribe(|record| {
            if record.available {
                panic!("callback failure");
            }
        });
        let feed = CapabilityFeed::spawn(store.clone(), 4);

        feed.send(CapabilityEvent::Available).await.unwrap();
        feed.send(CapabilityEvent::CapabilitiesChanged {
            unmetered: true,
            has_internet: true,
            validated: true,
        })
        .await
        .unwrap();
        timeout(Duration::from_secs(1), feed.finish()).await.unwrap();

        assert_eq!(
            store.current(),
            StatusRecord::with_capabilities(true, false, true, true)
        );
    }
}
