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

//! Connectivity status tracking.
//!
//! This library keeps one consistent view of the device's network status and
//! lets several kinds of consumer observe it:
//!
//! - **Status layer**: [`StatusRecord`] snapshots and the restricted
//!   [`Capabilities`] key used for matching
//! - **Store layer**: [`StatusStore`], the shared handle that applies
//!   capability changes and probe results
//! - **Observer layer**: callbacks, awaitable target states and a
//!   broadcast stream, all driven from the store
//! - **Probe layer**: [`ReachabilityProbe`], an on-demand ping run on a
//!   blocking worker
//! - **Feed layer**: [`CapabilityFeed`], which applies platform events to
//!   the store in order
//!
//! # Quick Start
//!
//! ```no_run
//! use netstat_core::{CapabilityEvent, CapabilityFeed, ProbeConfig, ReachabilityProbe, StatusStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = StatusStore::new();
//!     let feed = CapabilityFeed::spawn(store.clone(), 32);
//!
//!     store.subscribe(|record| println!("status: {record}"));
//!
//!     feed.send(CapabilityEvent::Available).await.unwrap();
//!     let record = store.wait_until(|r| r.available).await;
//!     println!("network up: {record}");
//!
//!     let probe = ReachabilityProbe::with_command(store.clone(), ProbeConfig::default());
//!     let result = probe.probe().await;
//!     println!("reachable: {}", result.online);
//! }
//! ```
//!
//! # Waiting for a target state
//!
//! ```
//! use netstat_core::{StatusRecord, StatusStore};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = StatusStore::new();
//! store.apply_available(true);
//!
//! // Already matches, so this returns without another update.
//! let target = StatusRecord::with_capabilities(true, false, false, false);
//! let record = store.wait_for(target).await;
//! assert!(record.available);
//! # }
//! ```

pub mod feed;
pub mod observers;
pub mod probe;
pub mod status;
pub mod store;

pub use feed::{
    parse_line, CapabilityEvent, CapabilityFeed, FeedClosed, FeedParseError, FeedTrySendError,
    DEFAULT_FEED_BUFFER,
};
pub use observers::{
    CallbackId, ObserverRegistry, StatusCallback, StatusStream, DEFAULT_STREAM_CAPACITY,
};
pub use probe::{
    CommandPinger, Pinger, ProbeConfig, ProbeError, ProbeResult, ReachabilityProbe,
    DEFAULT_PROBE_HOST,
};
pub use status::{Capabilities, StatusRecord};
pub use store::StatusStore;
