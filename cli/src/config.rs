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

//! CLI-side configuration handling: loading `lib::config::Config` from the
//! path given with `--config`, and emitting a commented sample for
//! `--sample-config`. The typed struct and its validating loader live in
//! `relay-lib`; this module only adds the two CLI-facing behaviors.

use std::path::Path;

use relay_lib::config::Config;
use relay_lib::config::ConfigLoadError;

use crate::cli_args::Args;

/// The document printed by `--sample-config`, with every recognized
/// configuration key present and commented.
pub const SAMPLE_CONFIG: &str = r#"# relay-xfer sample configuration
counter_name: relay_main
case_sensitive: false
# historical_start_change: 100
poll_interval: 30
sleep_on_error_interval: 5
report_interval: "60 * 60"
error_report_interval: 3600
summary_report_interval: 86400
max_logfile_size: 10000000
change_batch_size: 1000
sync_progress_size_interval: 1000000
change_description_format: "$sourceDescription\n\n(cherry picked from $sourcePort@$sourceChange by $sourceUser)"
change_map_file: changes/map.csv
superuser: false
ignore_files:
  - "\\.tmp$"
views:
  - src: "//depot/main/..."
    targ: "main"
workspace_root: /var/lib/relay-xfer/workspace
source:
  port: ssl:perforce-source:1666
  user: relay
  client: relay_source
target:
  port: ssl:perforce-target:1666
  user: relay
  client: relay_target
"#;

/// Loads configuration from the path given on the command line, falling
/// back to a configuration error if `--config` was omitted (not an
/// `unwrap`-worthy bug: an operator running without `--sample-config` or
/// `--config` made a usage mistake, not the program).
pub fn load(args: &Args) -> Result<Config, ConfigLoadError> {
    let path = args
        .config
        .as_deref()
        .unwrap_or_else(|| Path::new("relay.yaml"));
    Config::load(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_config_is_itself_valid() {
        Config::parse(SAMPLE_CONFIG).unwrap();
    }
}
