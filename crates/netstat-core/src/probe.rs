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

//! On-demand reachability probe.
//!
//! A probe runs one external check (by default a single ICMP echo via the
//! system `ping` binary) on a blocking worker, then feeds the outcome back
//! into the [`StatusStore`]. Callers always get a boolean answer: every
//! failure mode is logged and reported as offline.

use std::io;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use thiserror::Error;

use crate::store::StatusStore;

/// Default host to ping.
pub const DEFAULT_PROBE_HOST: &str = "8.8.8.8";

/// Errors a probe can run into. None of them reach the caller.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to launch probe command: {0}")]
    Launch(#[source] io::Error),

    #[error("probe exited with status {0:?}")]
    Exit(Option<i32>),

    #[error("probe did not finish within {0:?}")]
    Timeout(Duration),

    #[error("probe interrupted: {0}")]
    Interrupted(String),
}

/// A blocking reachability check.
///
/// Implement this to swap the external command for something else.
pub trait Pinger: Send + Sync {
    /// Run one check. `Ok(())` means the target answered.
    fn ping(&self) -> Result<(), ProbeError>;
}

/// Configuration for [`CommandPinger`].
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Program to run.
    pub program: String,
    /// Arguments placed before the host.
    pub args: Vec<String>,
    /// Host appended as the final argument.
    pub host: String,
    /// Hard deadline after which the child is killed.
    pub timeout: Duration,
    /// How often the child is polled for exit.
    pub poll_interval: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            program: "ping".to_string(),
            args: vec!["-c".into(), "1".into(), "-W".into(), "5".into()],
            host: DEFAULT_PROBE_HOST.to_string(),
            timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// Runs an external command and treats exit status 0 as reachable.
#[derive(Debug, Clone, Default)]
pub struct CommandPinger {
    config: ProbeConfig,
}

impl CommandPinger {
    #[must_use]
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }
}

impl Pinger for CommandPinger {
    fn ping(&self) -> Result<(), ProbeError> {
        let config = &self.config;
        let mut child = Command::new(&config.program)
            .args(&config.args)
            .arg(&config.host)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(ProbeError::Launch)?;

        let deadline = Instant::now() + config.timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) if status.success() => return Ok(()),
                Ok(Some(status)) => return Err(ProbeError::Exit(status.code())),
                Ok(None) if Instant::now() >= deadline => {
                    stop(&mut child);
                    return Err(ProbeError::Timeout(config.timeout));
                }
                Ok(None) => std::thread::sleep(config.poll_interval),
                Err(e) => {
                    stop(&mut child);
                    return Err(ProbeError::Interrupted(e.to_string()));
                }
            }
        }
    }
}

/// Kill `child` and reap it so no zombie is left behind.
fn stop(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!("Probe child already gone: {}", e);
    }
    if let Err(e) = child.wait() {
        warn!("Failed to reap probe child: {}", e);
    }
}

/// Outcome of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    pub online: bool,
    pub at: DateTime<Utc>,
}

/// Runs reachability checks and records their outcome in a store.
#[derive(Clone)]
pub struct ReachabilityProbe {
    store: StatusStore,
    pinger: Arc<dyn Pinger>,
}

impl std::fmt::Debug for ReachabilityProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReachabilityProbe")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl ReachabilityProbe {
    /// Probe with a custom pinger.
    #[must_use]
    pub fn new<P>(store: StatusStore, pinger: P) -> Self
    where
        P: Pinger + 'static,
    {
        Self {
            store,
            pinger: Arc::new(pinger),
        }
    }

    /// Probe by running the configured external command.
    #[must_use]
    pub fn with_command(store: StatusStore, config: ProbeConfig) -> Self {
        Self::new(store, CommandPinger::new(config))
    }

    /// Run a probe on the blocking worker pool and record the result.
    ///
    /// Overlapping calls are fine; each records its own result.
    pub async fn probe(&self) -> ProbeResult {
        let pinger = Arc::clone(&self.pinger);
        let outcome = match tokio::task::spawn_blocking(move || pinger.ping()).await {
            Ok(outcome) => outcome,
            Err(e) => Err(ProbeError::Interrupted(e.to_string())),
        };
        self.record(outcome)
    }

    /// Run a probe on the current thread. Never call this from an async
    /// task or a UI thread.
    pub fn probe_blocking(&self) -> ProbeResult {
        let outcome = self.pinger.ping();
        self.record(outcome)
    }

    fn record(&self, outcome: Result<(), ProbeError>) -> ProbeResult {
        let online = match outcome {
            Ok(()) => {
                info!("Reachability probe succeeded");
                true
            }
            Err(e) => {
                warn!("Reachability probe failed: {}", e);
                false
            }
        };
        let at = Utc::now();
        self.store.apply_probe_result(online, at);
        ProbeResult { online, at }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakePinger(fn() -> Result<(), ProbeError>);

    impl Pinger for FakePinger {
        fn ping(&self) -> Result<(), ProbeError> {
            (self.0)()
        }
    }

    fn command(program: &str, host: &str, timeout: Duration) -> ProbeConfig {
        ProbeConfig {
            program: program.to_string(),
            args: Vec::new(),
            host: host.to_string(),
            timeout,
            poll_interval: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_fake_success_updates_store() {
        let store = StatusStore::new();
        let probe = ReachabilityProbe::new(store.clone(), FakePinger(|| Ok(())));

        let before = Utc::now();
        let result = probe.probe_blocking();

        assert!(result.online);
        assert!(result.at >= before);
        assert!(store.current().last_probe_online);
        assert_eq!(store.current().last_probe_at, Some(result.at));
    }

    #[test]
    fn test_fake_failure_is_swallowed() {
        let store = StatusStore::new();
        store.apply_probe_result(true, Utc::now());
        let probe = ReachabilityProbe::new(
            store.clone(),
            FakePinger(|| Err(ProbeError::Interrupted("test".to_string()))),
        );

        let result = probe.probe_blocking();
        assert!(!result.online);
        assert!(!store.current().last_probe_online);
        assert_eq!(store.current().last_probe_at, Some(result.at));
    }

    #[test]
    fn test_probe_leaves_capabilities_alone() {
        let store = StatusStore::new();
        store.apply_available(true);
        let before = store.current();

        ReachabilityProbe::new(store.clone(), FakePinger(|| Ok(()))).probe_blocking();
        assert!(store.current().same_capabilities(&before));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_exit_zero_is_online() {
        let store = StatusStore::new();
        let probe = ReachabilityProbe::with_command(
            store.clone(),
            command("true", "ignored", Duration::from_secs(5)),
        );

        let result = probe.probe().await;
        assert!(result.online);
        assert!(store.current().last_probe_online);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_exit_one_is_offline() {
        let store = StatusStore::new();
        store.apply_probe_result(true, Utc::now());
        let probe = ReachabilityProbe::with_command(
            store.clone(),
            command("false", "ignored", Duration::from_secs(5)),
        );

        let result = probe.probe().await;
        assert!(!result.online);
        assert!(!store.current().last_probe_online);
        assert_eq!(store.current().last_probe_at, Some(result.at));
    }

    #[tokio::test]
    async fn test_launch_failure_is_offline() {
        let store = StatusStore::new();
        store.apply_probe_result(true, Utc::now());
        let probe = ReachabilityProbe::with_command(
            store.clone(),
            command("/nonexistent/netstat-ping", "8.8.8.8", Duration::from_secs(5)),
        );

        let result = probe.probe().await;
        assert!(!result.online);
        assert!(!store.current().last_probe_online);
        assert_eq!(store.current().last_probe_at, Some(result.at));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_timeout_kills_child() {
        let pinger = CommandPinger::new(command("sleep", "5", Duration::from_millis(100)));
        let started = Instant::now();

        let outcome = pinger.ping();
        assert!(matches!(outcome, Err(ProbeError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn test_stopped_child_is_reaped() {
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();
        stop(&mut child);
        assert!(matches!(child.try_wait(), Ok(Some(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_exit_code_reported() {
        let pinger = CommandPinger::new(command("false", "x", Duration::from_secs(5)));
        assert!(matches!(pinger.ping(), Err(ProbeError::Exit(Some(1)))));
    }

    #[tokio::test]
    async fn test_overlapping_probes_each_notify() {
        let store = StatusStore::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let probe = ReachabilityProbe::new(store.clone(), FakePinger(|| Ok(())));

        let (first, second) = tokio::join!(probe.probe(), probe.probe());
        assert!(first.online && second.online);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
