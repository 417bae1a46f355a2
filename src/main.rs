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

mod commands;
mod config;

use std::error::Error;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use log::info;
use netstat_core::StatusRecord;

use config::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "netstat", version, about = "Track network connectivity and probe reachability")]
struct Cli {
    /// Probe this host instead of the configured one
    #[arg(long, global = true, value_name = "HOST")]
    host: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one reachability probe
    Probe,
    /// Apply capability events from stdin and print every status update
    Watch {
        /// Also probe every SECS seconds (overrides the config file)
        #[arg(long, value_name = "SECS")]
        probe_every: Option<u64>,
    },
    /// Apply capability events from stdin until a target state is reached
    Wait(WaitArgs),
    /// Show the config file location
    Config {
        /// Overwrite the config file with defaults
        #[arg(long)]
        reset: bool,
    },
}

/// Target state for `wait`. Unset flags mean "false".
#[allow(clippy::struct_excessive_bools, reason = "one switch per capability flag")]
#[derive(Args, Debug, Clone, Copy)]
struct WaitArgs {
    /// A default route exists
    #[arg(long)]
    available: bool,
    /// The network is metered
    #[arg(long)]
    metered: bool,
    /// The network declares internet capability
    #[arg(long)]
    internet: bool,
    /// The platform validated the network
    #[arg(long)]
    validated: bool,
    /// Ignore the flags above and wait until available, internet and validated all hold
    #[arg(long, conflicts_with_all = ["available", "metered", "internet", "validated"])]
    online: bool,
    /// Give up after SECS seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
}

impl WaitArgs {
    fn target(&self) -> StatusRecord {
        StatusRecord::with_capabilities(self.available, self.metered, self.internet, self.validated)
    }

    fn reached(&self, record: &StatusRecord) -> bool {
        if self.online {
            record.is_online()
        } else {
            record.same_capabilities(&self.target())
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = AppConfig::load()?;
    if let Some(host) = cli.host {
        config.probe_host = host;
    }

    info!("Starting netstat {}", env!("CARGO_PKG_VERSION"));

    let code = match cli.command {
        Command::Probe => commands::probe(&config).await,
        Command::Watch { probe_every } => {
            if probe_every.is_some() {
                config.probe_interval_secs = probe_every;
            }
            commands::watch(&config).await
        }
        Command::Wait(args) => commands::wait(&config, args).await,
        Command::Config { reset } => commands::show_config(reset)?,
    };

    Ok(code)
}
