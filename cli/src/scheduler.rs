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

//! The outer control loop: poll, batch, replay, persist progress, report,
//! sleep.

use std::path::Path;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use regex::Regex;

use relay_lib::change_map::ChangeMap;
use relay_lib::change_map::ChangeMapRow;
use relay_lib::config::Config;
use relay_lib::content_comparator::ContentComparator;
use relay_lib::content_comparator::HostOs;
use relay_lib::counter::Counter;
use relay_lib::depot_path::View;
use relay_lib::equivalence::EquivalenceChecker;
use relay_lib::error::LogicError;
use relay_lib::error::TransientError;
use relay_lib::repo_client::RepoClient;
use relay_lib::source_reader::SourceReader;
use relay_lib::target_replayer::TargetReplayer;

use crate::error::CommandError;
use crate::logging;
use crate::reporter::Reporter;

/// The phase the scheduler's main loop is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Fetching,
    Replaying,
    Reporting,
    Sleeping,
}

pub struct SchedulerOptions {
    pub maximum: Option<u64>,
    pub repeat: bool,
    pub stop_on_error: bool,
    pub ignore_errors: bool,
    pub ignore_integrations: bool,
    pub notransfer: bool,
    pub end_datetime: Option<DateTime<Utc>>,
    pub stop_file: PathBuf,
    pub reset_connection: Option<u32>,
}

pub struct Scheduler<'a> {
    config: &'a Config,
    options: SchedulerOptions,
    source_client: &'a mut dyn RepoClient,
    target_client: &'a mut dyn RepoClient,
    source_view: View,
    target_view: View,
    ignore_patterns: Vec<Regex>,
    reporter: &'a mut dyn Reporter,
    state: State,
    last_error_at: Option<DateTime<Utc>>,
    first_error_at: Option<DateTime<Utc>>,
    consecutive_errors: u32,
    replicated_since_summary: u64,
    last_summary_at: DateTime<Utc>,
}

/// Starting point for the exponential error backoff, doubled per
/// consecutive transient error and capped at `sleep_on_error_interval`.
const BASE_ERROR_BACKOFF_SECS: u64 = 5;

impl<'a> Scheduler<'a> {
    pub fn new(
        config: &'a Config,
        options: SchedulerOptions,
        source_client: &'a mut dyn RepoClient,
        target_client: &'a mut dyn RepoClient,
        reporter: &'a mut dyn Reporter,
    ) -> Result<Self, regex::Error> {
        let ignore_patterns = config
            .ignore_files
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        let source_view = View::new(config.views.clone(), config.case_sensitive);
        let target_view = View::new(config.views.clone(), config.case_sensitive);
        Ok(Self {
            config,
            options,
            source_client,
            target_client,
            source_view,
            target_view,
            ignore_patterns,
            reporter,
            state: State::Idle,
            last_error_at: None,
            first_error_at: None,
            consecutive_errors: 0,
            replicated_since_summary: 0,
            last_summary_at: Utc::now(),
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Runs until a terminal condition is reached: batch exhausted and
    /// `--repeat` not set, `maximum` reached, end-time passed, or the
    /// stop-file appears.
    pub fn run(&mut self) -> Result<(), CommandError> {
        self.revert_stale_opened_files()?;

        loop {
            self.state = State::Idle;
            if self.end_time_passed() || self.stop_file_present() {
                return Ok(());
            }

            self.state = State::Fetching;
            let counter_value = Counter::new(self.target_client, &self.config.counter_name).get()?;
            let pending = self.fetch_pending(counter_value)?;
            if pending.is_empty() {
                if !self.options.repeat {
                    return Ok(());
                }
                self.sleep_for(self.config.poll_interval as u64);
                continue;
            }

            self.state = State::Replaying;
            match self.replay_batch(&pending) {
                Ok(()) => {
                    if self.last_error_at.take().is_some() {
                        self.reporter.recovered(*pending.last().unwrap());
                    }
                    self.first_error_at = None;
                    self.consecutive_errors = 0;
                }
                Err(error) if self.is_transient(&error) && !self.options.stop_on_error => {
                    let now = Utc::now();
                    self.last_error_at = Some(now);

                    let within_report_window = self
                        .first_error_at
                        .is_some_and(|first| (now - first).num_seconds() <= self.config.error_report_interval);

                    if within_report_window {
                        self.consecutive_errors += 1;
                        // A second error within the report window is worth
                        // escalating; the first in a streak is only logged.
                        self.reporter
                            .error_detected(*pending.first().unwrap_or(&0), &error.to_string());
                    } else {
                        self.first_error_at = Some(now);
                        self.consecutive_errors = 1;
                        tracing::warn!(error = %error, "transient error, backing off");
                    }

                    self.state = State::Sleeping;
                    self.sleep_for(self.backoff_seconds());
                    continue;
                }
                Err(error) => return Err(error),
            }

            let log_path = self.config.workspace_root.join("relay-xfer.log");
            if logging::rotate_if_oversized(&log_path, self.config.max_logfile_size as u64)? {
                self.source_client.reset_command_log();
                self.target_client.reset_command_log();
            }

            self.state = State::Reporting;
            self.replicated_since_summary += pending.len() as u64;
            let elapsed = (Utc::now() - self.last_summary_at).num_seconds();
            if elapsed >= self.config.summary_report_interval {
                self.reporter
                    .summary(self.replicated_since_summary, *pending.last().unwrap());
                self.replicated_since_summary = 0;
                self.last_summary_at = Utc::now();
            }

            if let Some(maximum) = self.options.maximum {
                if counter_value >= maximum {
                    return Ok(());
                }
            }

            self.state = State::Sleeping;
            if self.stop_file_present() {
                return Ok(());
            }
            self.sleep_for(self.config.poll_interval as u64);
        }
    }

    fn fetch_pending(&mut self, counter_value: u64) -> Result<Vec<u64>, CommandError> {
        let mut reader = SourceReader::new(
            self.source_client,
            &self.source_view,
            &self.ignore_patterns,
            self.config.case_sensitive,
            self.config.historical_start_change.map(|v| v as u64),
        );
        Ok(reader.missing_changes(
            counter_value,
            self.config.change_batch_size as u64,
            self.options.maximum,
        )?)
    }

    fn replay_batch(&mut self, pending: &[u64]) -> Result<(), CommandError> {
        let mut change_map = self
            .config
            .change_map_file
            .as_ref()
            .map(|path| ChangeMap::new(path.clone()));

        for &id in pending {
            if self.end_time_passed() {
                break;
            }

            let source_change = if self.config.historical_start_change == Some(id as i64) {
                let mut reader = SourceReader::new(
                    self.source_client,
                    &self.source_view,
                    &self.ignore_patterns,
                    self.config.case_sensitive,
                    self.config.historical_start_change.map(|v| v as u64),
                );
                reader.reconcile_change(id)?
            } else {
                let mut reader = SourceReader::new(
                    self.source_client,
                    &self.source_view,
                    &self.ignore_patterns,
                    self.config.case_sensitive,
                    self.config.historical_start_change.map(|v| v as u64),
                );
                reader.get_change(id)?
            };

            if self.options.notransfer {
                tracing::info!(source_change = id, "would replicate (--notransfer)");
                continue;
            }

            let ignored_paths = source_change.ignored_paths.clone();
            let special_moves = source_change.special_moves.clone();
            let change = source_change.into_change();

            let target_change = {
                let mut replayer = TargetReplayer::new(
                    self.target_client,
                    &self.target_view,
                    self.config,
                    self.options.ignore_integrations,
                    self.options.reset_connection,
                );
                let outcome = replayer.replay(&change, &special_moves)?;
                outcome.target_change.ok_or_else(|| {
                    CommandError::Logic(LogicError::Internal(format!(
                        "no target change produced for source change {id}"
                    )))
                })?
            };

            let check_result = {
                let comparator = ContentComparator::new(HostOs::Unix, HostOs::Unix);
                let mut checker = EquivalenceChecker::new(self.target_client, comparator, self.config.case_sensitive);
                checker.check(&change, target_change, &ignored_paths)
            };

            if let Err(error) = check_result {
                if self.options.ignore_errors {
                    tracing::error!(source_change = id, error = %error, "equivalence mismatch, continuing (ignore_errors)");
                } else {
                    return Err(CommandError::Logic(error));
                }
            }

            if let Some(change_map) = &mut change_map {
                change_map.push(ChangeMapRow {
                    source_port: self.config.source.port.clone(),
                    source_change: id,
                    target_change,
                });
            }

            Counter::new(self.target_client, &self.config.counter_name).advance_to(id)?;
        }

        if let Some(mut change_map) = change_map {
            change_map.flush(self.target_client, "update change map")?;
        }

        Ok(())
    }

    /// Exponential backoff keyed on the current error streak, never
    /// exceeding `sleep_on_error_interval`.
    fn backoff_seconds(&self) -> u64 {
        exponential_backoff(self.consecutive_errors, self.config.sleep_on_error_interval as u64)
    }

    fn is_transient(&self, error: &CommandError) -> bool {
        matches!(
            error,
            CommandError::Transient(_) | CommandError::Client(_) | CommandError::SourceReader(_)
        )
    }

    fn end_time_passed(&self) -> bool {
        match self.options.end_datetime {
            Some(end) => Utc::now() >= end,
            None => false,
        }
    }

    /// Checked during sleep at 30-second granularity; here collapsed to a
    /// single check since `sleep_for` already subdivides the wait.
    fn stop_file_present(&self) -> bool {
        self.options.stop_file.exists()
    }

    fn sleep_for(&self, total_seconds: u64) {
        let mut remaining = total_seconds;
        while remaining > 0 {
            let slice = remaining.min(30);
            thread::sleep(Duration::from_secs(slice));
            remaining -= slice;
            if self.stop_file_present() {
                return;
            }
        }
    }

    /// At startup, reverts opened-but-unsubmitted files left by a prior
    /// aborted run, except the change-map file's pending change.
    fn revert_stale_opened_files(&mut self) -> Result<(), TransientError> {
        let opened = self
            .target_client
            .run("opened", &[])
            .map_err(|source| TransientError::CommandFailed {
                command: "opened".to_string(),
                message: source.to_string(),
            })?;
        for record in &opened.records {
            if let Some(path) = record.get("depotFile") {
                if Some(path) == self.config.change_map_file.as_deref() {
                    continue;
                }
                let _ = self.target_client.run("revert", &[path]);
            }
        }
        Ok(())
    }
}

/// Doubles `BASE_ERROR_BACKOFF_SECS` per consecutive error, capped at `cap`.
fn exponential_backoff(consecutive_errors: u32, cap: u64) -> u64 {
    let exponent = consecutive_errors.saturating_sub(1).min(16);
    let backoff = BASE_ERROR_BACKOFF_SECS.saturating_mul(1u64 << exponent);
    backoff.min(cap)
}

pub fn parse_end_datetime(s: &str) -> Option<DateTime<Utc>> {
    chrono::NaiveDateTime::parse_from_str(s, "%Y/%m/%d %H:%M")
        .ok()
        .map(|naive| naive.and_utc())
}

pub fn is_stop_file_present(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("__stopfile")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_end_datetime() {
        let parsed = parse_end_datetime("2026/08/01 12:00").unwrap();
        assert_eq!(parsed.format("%Y-%m-%d").to_string(), "2026-08-01");
    }

    #[test]
    fn rejects_malformed_end_datetime() {
        assert!(parse_end_datetime("not a date").is_none());
    }

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(exponential_backoff(1, 300), 5);
        assert_eq!(exponential_backoff(2, 300), 10);
        assert_eq!(exponential_backoff(3, 300), 20);
        assert_eq!(exponential_backoff(10, 300), 300);
    }

    #[test]
    fn stop_file_path_is_next_to_config() {
        let path = is_stop_file_present(Path::new("/etc/relay/relay.yaml"));
        assert_eq!(path, PathBuf::from("/etc/relay/__stopfile"));
    }
}
