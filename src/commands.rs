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

//! Subcommand implementations.
//!
//! Each command builds its own [`StatusStore`], feeds it capability events
//! read from stdin and reports through one of the store's observer kinds.

use std::future::Future;
use std::io;
use std::process::ExitCode;
use std::time::Duration;

use chrono::Utc;
use log::{info, warn};
use netstat_core::{parse_line, CapabilityFeed, ReachabilityProbe, StatusRecord, StatusStore};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::WaitArgs;

fn build(config: &AppConfig) -> (StatusStore, CapabilityFeed) {
    let store = StatusStore::with_stream_capacity(config.stream_capacity);
    let feed = CapabilityFeed::spawn(store.clone(), config.feed_buffer);
    (store, feed)
}

/// Forward every parseable line of `input` to the feed. Returns the number
/// of events sent.
async fn pump_events<R>(input: R, feed: &CapabilityFeed) -> usize
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut sent = 0;
    let mut line_no = 0;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read event input: {}", e);
                break;
            }
        };
        line_no += 1;

        match parse_line(&line) {
            Ok(Some(event)) => {
                if feed.send(event).await.is_err() {
                    warn!("Capability feed closed, ignoring remaining input");
                    break;
                }
                sent += 1;
            }
            Ok(None) => {}
            Err(e) => warn!("Skipping line {}: {}", line_no, e),
        }
    }

    sent
}

fn stdin_reader() -> BufReader<tokio::io::Stdin> {
    BufReader::new(tokio::io::stdin())
}

/// `netstat probe`
pub async fn probe(config: &AppConfig) -> ExitCode {
    let store = StatusStore::with_stream_capacity(config.stream_capacity);
    let probe = ReachabilityProbe::with_command(store.clone(), config.probe_config());

    info!("Probing {}", config.probe_host);
    let result = probe.probe().await;

    println!(
        "{} is {} ({})",
        config.probe_host,
        if result.online { "reachable" } else { "unreachable" },
        result.at.to_rfc3339()
    );
    println!("{}", store.current());

    if result.online {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Wait for `signal` (normally Ctrl-C). Returns `false` if the handler could
/// not be installed.
async fn interrupted<F>(signal: F) -> bool
where
    F: Future<Output = io::Result<()>>,
{
    match signal.await {
        Ok(()) => true,
        Err(e) => {
            warn!("Cannot listen for Ctrl-C: {}", e);
            false
        }
    }
}

/// `netstat watch`
pub async fn watch(config: &AppConfig) -> ExitCode {
    let (store, feed) = build(config);
    let cancel_token = CancellationToken::new();

    // Ends once the feed, the prober and this function have all dropped
    // their store handles.
    let mut stream = store.subscribe_stream();
    let printer = tokio::spawn(async move {
        while let Some(record) = stream.next().await {
            println!("{} {}", Utc::now().format("%H:%M:%S%.3f"), record);
        }
    });

    let prober = config.probe_interval().map(|interval| {
        let probe = ReachabilityProbe::with_command(store.clone(), config.probe_config());
        let probe_cancel = cancel_token.clone();
        info!("Probing {} every {}s", config.probe_host, interval.as_secs());
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        probe.probe().await;
                    }
                    () = probe_cancel.cancelled() => return,
                }
            }
        })
    });

    tokio::select! {
        sent = pump_events(stdin_reader(), &feed) => {
            info!("Event input ended after {} event(s)", sent);
            if prober.is_some() {
                info!("Still probing, press Ctrl-C to stop");
                if !interrupted(tokio::signal::ctrl_c()).await {
                    warn!("Stopping periodic probes");
                }
            }
        }
        // A failed handler disables this branch and input keeps flowing.
        true = interrupted(tokio::signal::ctrl_c()) => {
            info!("Interrupted");
        }
    }

    feed.finish().await;
    cancel_token.cancel();
    if let Some(prober) = prober {
        let _ = prober.await;
    }
    drop(store);
    let _ = printer.await;

    ExitCode::SUCCESS
}

/// Drive `store` from `input` until `args` is satisfied, input runs out or
/// the timeout expires.
async fn wait_on<R>(store: &StatusStore, feed: CapabilityFeed, input: R, args: WaitArgs) -> bool
where
    R: AsyncBufRead + Unpin,
{
    let waiting = async {
        if args.online {
            store.wait_until(StatusRecord::is_online).await
        } else {
            store.wait_for(args.target()).await
        }
    };
    let draining = async {
        pump_events(input, &feed).await;
        feed.finish().await;
    };
    let deadline = async {
        match args.timeout {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };

    // Polling the waiter first means a match made by the final queued event
    // wins over the input running dry.
    tokio::select! {
        biased;

        record = waiting => {
            info!("Target reached: {}", record);
            true
        }
        () = draining => {
            let reached = args.reached(&store.current());
            if !reached {
                warn!("Event input ended before the target was reached");
            }
            reached
        }
        () = deadline => {
            warn!("Timed out waiting for target");
            false
        }
    }
}

/// `netstat wait`
pub async fn wait(config: &AppConfig, args: WaitArgs) -> ExitCode {
    let (store, feed) = build(config);
    let progress = store.subscribe(|record| info!("Status now {}", record));

    let reached = wait_on(&store, feed, stdin_reader(), args).await;
    store.unsubscribe(progress);

    println!("{}", store.current());
    if reached {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// `netstat config`
pub fn show_config(reset: bool) -> Result<ExitCode, confy::ConfyError> {
    if reset {
        AppConfig::default().save()?;
        println!("Configuration reset to defaults");
    }
    println!("{}", AppConfig::get_config_path()?.display());
    Ok(ExitCode::SUCCESS)
}
