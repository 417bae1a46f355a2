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

//! Application configuration management.
//!
//! Settings live in a per-user TOML file managed by confy. Missing fields
//! fall back to their defaults, so older files keep loading as options are
//! added.

use std::time::Duration;

use netstat_core::{ProbeConfig, DEFAULT_FEED_BUFFER, DEFAULT_PROBE_HOST, DEFAULT_STREAM_CAPACITY};
use serde::{Deserialize, Serialize};

const APP_NAME: &str = "netstat";
const CONFIG_NAME: &str = "config";

/// Application configuration stored in TOML format
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Configuration schema version for migrations
    #[serde(default = "default_config_version")]
    pub config_version: u32,

    /// Program used for reachability probes
    #[serde(default = "default_probe_program")]
    pub probe_program: String,

    /// Arguments passed before the probe host
    #[serde(default = "default_probe_args")]
    pub probe_args: Vec<String>,

    /// Host the probe tries to reach
    #[serde(default = "default_probe_host")]
    pub probe_host: String,

    /// Seconds before a running probe is killed and counted as offline
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// Records buffered per stream subscriber before the oldest are dropped
    #[serde(default = "default_stream_capacity")]
    pub stream_capacity: usize,

    /// Capability events buffered between the input and the store
    #[serde(default = "default_feed_buffer")]
    pub feed_buffer: usize,

    /// Probe periodically while watching (seconds, disabled when unset)
    #[serde(default)]
    pub probe_interval_secs: Option<u64>,
}

// Default value functions for serde
fn default_config_version() -> u32 {
    1
}

fn default_probe_program() -> String {
    "ping".to_string()
}

fn default_probe_args() -> Vec<String> {
    ["-c", "1", "-W", "5"].iter().map(ToString::to_string).collect()
}

fn default_probe_host() -> String {
    DEFAULT_PROBE_HOST.to_string()
}

fn default_probe_timeout_secs() -> u64 {
    10
}

fn default_stream_capacity() -> usize {
    DEFAULT_STREAM_CAPACITY
}

fn default_feed_buffer() -> usize {
    DEFAULT_FEED_BUFFER
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            probe_program: default_probe_program(),
            probe_args: default_probe_args(),
            probe_host: default_probe_host(),
            probe_timeout_secs: default_probe_timeout_secs(),
            stream_capacity: default_stream_capacity(),
            feed_buffer: default_feed_buffer(),
            probe_interval_secs: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from disk, creating it with defaults on first run
    pub fn load() -> Result<Self, confy::ConfyError> {
        confy::load(APP_NAME, CONFIG_NAME)
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<(), confy::ConfyError> {
        confy::store(APP_NAME, CONFIG_NAME, self)
    }

    /// Get the config file path for display to user
    pub fn get_config_path() -> Result<std::path::PathBuf, confy::ConfyError> {
        confy::get_configuration_file_path(APP_NAME, CONFIG_NAME)
    }

    /// Probe settings for the core library
    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            program: self.probe_program.clone(),
            args: self.probe_args.clone(),
            host: self.probe_host.clone(),
            timeout: Duration::from_secs(self.probe_timeout_secs),
            ..ProbeConfig::default()
        }
    }

    /// Interval for periodic probing, if enabled
    pub fn probe_interval(&self) -> Option<Duration> {
        self.probe_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}
