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

//! Connectivity status snapshot.
//!
//! A [`StatusRecord`] captures what the platform last told us about the
//! active network route, plus the outcome of the most recent reachability
//! probe. Records are plain values: every update produces a new one.

use std::fmt;

use chrono::{DateTime, Utc};

/// The capability half of a [`StatusRecord`].
///
/// This is the key used when waiting for a target state. Probe history is
/// deliberately absent so that two records differing only in their last
/// probe compare equal here.
#[allow(clippy::struct_excessive_bools, reason = "mirrors independent platform flags")]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Capabilities {
    pub available: bool,
    pub metered: bool,
    pub has_internet: bool,
    pub validated: bool,
}

/// Point-in-time connectivity status.
#[allow(clippy::struct_excessive_bools, reason = "mirrors independent platform flags")]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusRecord {
    /// A default network route currently exists.
    pub available: bool,
    /// The active network is metered (not flagged "unmetered").
    pub metered: bool,
    /// The network declares the internet capability.
    pub has_internet: bool,
    /// The platform has validated that the network reaches the internet.
    pub validated: bool,
    /// When the last on-demand probe finished, if one ever ran.
    pub last_probe_at: Option<DateTime<Utc>>,
    /// Outcome of the last on-demand probe.
    pub last_probe_online: bool,
}

impl StatusRecord {
    /// Build a record from capability flags with no probe history.
    #[must_use]
    #[allow(clippy::fn_params_excessive_bools, reason = "one parameter per capability flag")]
    pub fn with_capabilities(
        available: bool,
        metered: bool,
        has_internet: bool,
        validated: bool,
    ) -> Self {
        Self {
            available,
            metered,
            has_internet,
            validated,
            ..Self::default()
        }
    }

    /// The restricted-equality key.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            available: self.available,
            metered: self.metered,
            has_internet: self.has_internet,
            validated: self.validated,
        }
    }

    /// Compare capability flags only, ignoring probe history.
    #[must_use]
    pub fn same_capabilities(&self, other: &Self) -> bool {
        self.capabilities() == other.capabilities()
    }

    /// Route present, internet capable and validated by the platform.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.available && self.has_internet && self.validated
    }

    /// Record after the platform reports a default route appearing or going away.
    #[must_use]
    pub fn with_available(self, available: bool) -> Self {
        Self { available, ..self }
    }

    /// Record after a capability change on the active network.
    #[must_use]
    pub fn with_network_capabilities(
        self,
        unmetered: bool,
        has_internet: bool,
        validated: bool,
    ) -> Self {
        Self {
            metered: !unmetered,
            has_internet,
            validated,
            ..self
        }
    }

    /// Record after a reachability probe completes.
    #[must_use]
    pub fn with_probe_result(self, online: bool, at: DateTime<Utc>) -> Self {
        Self {
            last_probe_at: Some(at),
            last_probe_online: online,
            ..self
        }
    }
}

fn flag(value: bool) -> char {
    if value {
        '+'
    } else {
        '-'
    }
}

impl fmt::Display for StatusRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}available {}metered {}internet {}validated",
            flag(self.available),
            flag(self.metered),
            flag(self.has_internet),
            flag(self.validated),
        )?;
        match self.last_probe_at {
            Some(at) => write!(
                f,
                " (probe {} at {})",
                if self.last_probe_online { "online" } else { "offline" },
                at.format("%H:%M:%S")
            ),
            None => write!(f, " (never probed)"),
        }
    }
}
