// Copyright 2026 The Relay Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Entry point for the unattended replication service.

mod cli_args;
mod config;
mod error;
mod logging;
mod reporter;
mod scheduler;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use relay_lib::repo_client::RepoClient as _;
use relay_lib::repo_client::SubprocessRepoClient;

use crate::cli_args::Args;
use crate::error::CommandError;
use crate::reporter::TracingReporter;
use crate::scheduler::Scheduler;
use crate::scheduler::SchedulerOptions;

fn main() -> ExitCode {
    let args = Args::parse();

    if args.sample_config {
        print!("{}", config::SAMPLE_CONFIG);
        return ExitCode::SUCCESS;
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "relay-xfer exiting");
            ExitCode::from(error.exit_code() as u8)
        }
    }
}

fn run(args: &Args) -> Result<(), CommandError> {
    let config = config::load(args)?;

    let log_path = config.workspace_root.join("relay-xfer.log");
    logging::init(&log_path)?;
    logging::rotate_if_oversized(&log_path, config.max_logfile_size as u64)?;

    let mut source_client = SubprocessRepoClient::new("p4", &config.source.client);
    let mut target_client = SubprocessRepoClient::new("p4", &config.target.client);
    source_client.connect()?;
    target_client.connect()?;

    let stop_file = args
        .config
        .as_deref()
        .map(scheduler::is_stop_file_present)
        .unwrap_or_else(|| PathBuf::from("__stopfile"));

    let end_datetime = args
        .end_datetime
        .as_deref()
        .and_then(scheduler::parse_end_datetime);

    let options = SchedulerOptions {
        maximum: args.maximum,
        repeat: args.repeat,
        stop_on_error: args.stoponerror,
        ignore_errors: args.ignore_errors,
        ignore_integrations: args.ignore_integrations,
        notransfer: args.notransfer,
        end_datetime,
        stop_file,
        reset_connection: args.reset_connection,
    };

    let mut reporter = TracingReporter;
    let mut sched = Scheduler::new(
        &config,
        options,
        &mut source_client,
        &mut target_client,
        &mut reporter,
    )
    .map_err(|e| {
        CommandError::Config(relay_lib::config::ConfigLoadError::Invalid(format!(
            "invalid ignore_files pattern: {e}"
        )))
    })?;

    sched.run()?;

    source_client.disconnect();
    target_client.disconnect();
    Ok(())
}
