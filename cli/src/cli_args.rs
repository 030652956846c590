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

//! Command-line surface.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "relay-xfer", about = "Replicate submitted changes from a source repository to a target repository")]
pub struct Args {
    /// Path to the YAML configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Stop after replicating this many source changes in total.
    #[arg(long)]
    pub maximum: Option<u64>,

    /// Keep polling after the current batch instead of exiting once caught up.
    #[arg(long)]
    pub repeat: bool,

    /// Treat every transient error as fatal instead of backing off and retrying.
    #[arg(long)]
    pub stoponerror: bool,

    /// Demote logic errors (equivalence mismatches, unknown actions) to a logged
    /// error instead of aborting the run.
    #[arg(long)]
    pub ignore_errors: bool,

    /// Disable keyword-aware digest masking; compare ktext files by raw digest.
    #[arg(long)]
    pub nokeywords: bool,

    /// Validate configuration and report pending changes without replaying them.
    #[arg(long)]
    pub notransfer: bool,

    /// Print a configuration file populated with default values and exit.
    #[arg(long)]
    pub sample_config: bool,

    /// Treat every integration edge as a plain add/edit, skipping integration replay.
    #[arg(long)]
    pub ignore_integrations: bool,

    /// Stop processing once the wall clock passes this time ("YYYY/MM/DD HH:mm").
    #[arg(long, value_name = "YYYY/MM/DD HH:mm")]
    pub end_datetime: Option<String>,

    /// Reconnect to the source/target after this many files within one change.
    #[arg(long)]
    pub reset_connection: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_invocation() {
        let args = Args::parse_from(["relay-xfer", "--config", "relay.yaml"]);
        assert_eq!(args.config, Some(PathBuf::from("relay.yaml")));
        assert!(!args.repeat);
    }

    #[test]
    fn parses_full_flag_set() {
        let args = Args::parse_from([
            "relay-xfer",
            "--config",
            "relay.yaml",
            "--maximum",
            "10",
            "--repeat",
            "--stoponerror",
            "--ignore-errors",
            "--nokeywords",
            "--ignore-integrations",
            "--end-datetime",
            "2026/08/01 12:00",
            "--reset-connection",
            "500",
        ]);
        assert_eq!(args.maximum, Some(10));
        assert!(args.repeat);
        assert!(args.stoponerror);
        assert!(args.ignore_errors);
        assert!(args.nokeywords);
        assert!(args.ignore_integrations);
        assert_eq!(args.end_datetime.as_deref(), Some("2026/08/01 12:00"));
        assert_eq!(args.reset_connection, Some(500));
    }
}
