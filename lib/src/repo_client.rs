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

//! A thin, typed wrapper over the source/target command protocol.
//! Grounded on the subprocess-spawning pattern of a version
//! control CLI wrapper: build an argv, spawn with inherited stdio piped,
//! parse structured records out of stdout, separate warnings from errors.

use std::collections::HashMap;
use std::io::Read as _;
use std::io::Write as _;
use std::process::Child;
use std::process::Command;
use std::process::Stdio;
use std::sync::Mutex;

use thiserror::Error;

use crate::depot_path::View;

/// A single tagged record returned by a protocol command, e.g. one line of
/// `describe` output or one file entry of `fstat`. Field order is not
/// meaningful; callers look fields up by name.
#[derive(Debug, Clone, Default)]
pub struct Record {
    pub fields: HashMap<String, String>,
}

impl Record {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

/// A non-fatal condition surfaced by the repository: e.g. "file(s) not on
/// client", "no such file(s)". Distinguished from [`RepoClientError`] so
/// that `RepoClient::run` callers can react to expected warnings (see the
/// integration retry-with-added-flag loop in `target_replayer`) without
/// treating them as failures.
#[derive(Debug, Clone)]
pub struct Warning(pub String);

/// A command's result: the structured records it produced plus any
/// warnings. Errors prevent a `Ok` return entirely.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub records: Vec<Record>,
    pub warnings: Vec<Warning>,
}

impl CommandOutput {
    pub fn has_warning_matching(&self, needle: &str) -> bool {
        self.warnings.iter().any(|w| w.0.contains(needle))
    }
}

#[derive(Debug, Error)]
pub enum RepoClientError {
    #[error("could not spawn `{executable}`: {source}")]
    Spawn {
        executable: String,
        #[source]
        source: std::io::Error,
    },
    #[error("command `{command}` exited with a fatal error: {message}")]
    CommandFailed { command: String, message: String },
    #[error("not connected")]
    NotConnected,
}

/// Scopes how warnings raised inside the closure are treated: at the default
/// level they still count as warnings; at `Ignore` they're swallowed
/// entirely, used around operations expected to warn rather than fail (e.g.
/// sync-with-keep of a file that may not exist).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionLevel {
    Default,
    Ignore,
}

/// Suppresses repeated identical warning log lines within one run: a change
/// touching thousands of files with the same warning text logs it once
/// instead of flooding the logfile. `reset` clears the seen set, called when
/// the log file rotates so a warning already recorded in the rotated-away
/// file is logged fresh in the new one.
#[derive(Debug, Default)]
pub struct CommandLog {
    seen: std::collections::HashSet<String>,
}

impl CommandLog {
    /// Returns whether `message` has not been logged before, recording it.
    fn first_time(&mut self, message: &str) -> bool {
        self.seen.insert(message.to_string())
    }

    pub fn reset(&mut self) {
        self.seen.clear();
    }
}

/// The protocol-level operations every component built on top of a
/// repository endpoint needs. A fake implementation backs the unit tests in
/// `source_reader`, `target_replayer`, and `equivalence`.
pub trait RepoClient {
    fn connect(&mut self) -> Result<(), RepoClientError>;
    fn disconnect(&mut self);
    fn is_connected(&self) -> bool;

    /// Clears the one-shot warning dedup so a warning seen before rotation
    /// can be logged again in the fresh log file.
    fn reset_command_log(&mut self);

    /// Runs a named command with the given arguments under the current
    /// exception scope, logging args and results.
    fn run(&mut self, cmd: &str, args: &[&str]) -> Result<CommandOutput, RepoClientError>;

    fn set_exception_level(&mut self, level: ExceptionLevel);

    fn fetch_spec(&mut self, kind: &str, name: &str) -> Result<Record, RepoClientError>;
    fn save_spec(&mut self, kind: &str, spec: &Record) -> Result<(), RepoClientError>;

    /// Creates or refreshes the client workspace definition with the given
    /// view. On the target this may deliberately be a dummy view
    /// to suppress implicit auto-sync.
    fn set_workspace_view(&mut self, view: &View) -> Result<(), RepoClientError>;
}

/// Spawns the configured executable as a subprocess per invocation. This is
/// the production [`RepoClient`] used against a live source or target
/// endpoint.
pub struct SubprocessRepoClient {
    executable: String,
    client_name: String,
    connected: bool,
    exception_level: ExceptionLevel,
    reconnects: u32,
    command_log: CommandLog,
}

impl SubprocessRepoClient {
    pub fn new(executable: impl Into<String>, client_name: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            client_name: client_name.into(),
            connected: false,
            exception_level: ExceptionLevel::Default,
            reconnects: 0,
            command_log: CommandLog::default(),
        }
    }

    pub fn reconnect_count(&self) -> u32 {
        self.reconnects
    }

    fn create_command(&self, cmd: &str, args: &[&str]) -> Command {
        self.create_command_with_stdin(cmd, args, Stdio::null())
    }

    fn create_command_with_stdin(&self, cmd: &str, args: &[&str], stdin: Stdio) -> Command {
        let mut command = Command::new(&self.executable);
        command
            .arg("-c")
            .arg(&self.client_name)
            .arg(cmd)
            .args(args)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }

    fn spawn(&self, command: &mut Command) -> Result<Child, RepoClientError> {
        tracing::debug!(executable = %self.executable, ?command, "spawning repository subprocess");
        command.spawn().map_err(|source| RepoClientError::Spawn {
            executable: self.executable.clone(),
            source,
        })
    }

    /// Runs a command that takes its input as a tagged-form body on stdin
    /// (the `-i` convention used by `save_spec`), writing `body` and closing
    /// the pipe before reading output back.
    fn run_with_input(
        &mut self,
        cmd: &str,
        args: &[&str],
        body: &str,
    ) -> Result<CommandOutput, RepoClientError> {
        if !self.connected {
            return Err(RepoClientError::NotConnected);
        }
        let mut command = self.create_command_with_stdin(cmd, args, Stdio::piped());
        let mut child = self.spawn(&mut command)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(body.as_bytes())
                .map_err(|source| RepoClientError::Spawn {
                    executable: self.executable.clone(),
                    source,
                })?;
        }

        let mut stdout = String::new();
        if let Some(mut out) = child.stdout.take() {
            out.read_to_string(&mut stdout).ok();
        }
        let mut stderr = String::new();
        if let Some(mut err) = child.stderr.take() {
            err.read_to_string(&mut stderr).ok();
        }
        let status = child
            .wait()
            .map_err(|source| RepoClientError::Spawn {
                executable: self.executable.clone(),
                source,
            })?;

        let records = parse_tagged_records(&stdout);
        let mut warnings = Vec::new();
        for line in stderr.lines() {
            if looks_like_warning(line) {
                if self.command_log.first_time(line) {
                    tracing::warn!(command = cmd, %line, "repository warning");
                }
                if self.exception_level != ExceptionLevel::Ignore {
                    warnings.push(Warning(line.to_string()));
                }
            } else if !line.trim().is_empty() && !status.success() {
                return Err(RepoClientError::CommandFailed {
                    command: cmd.to_string(),
                    message: line.to_string(),
                });
            }
        }
        tracing::debug!(command = cmd, records = records.len(), warnings = warnings.len(), "command completed");
        Ok(CommandOutput { records, warnings })
    }
}

impl RepoClient for SubprocessRepoClient {
    fn connect(&mut self) -> Result<(), RepoClientError> {
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn reset_command_log(&mut self) {
        self.command_log.reset();
    }

    fn run(&mut self, cmd: &str, args: &[&str]) -> Result<CommandOutput, RepoClientError> {
        if !self.connected {
            return Err(RepoClientError::NotConnected);
        }
        let mut command = self.create_command(cmd, args);
        let mut child = self.spawn(&mut command)?;

        let mut stdout = String::new();
        if let Some(mut out) = child.stdout.take() {
            out.read_to_string(&mut stdout).ok();
        }
        let mut stderr = String::new();
        if let Some(mut err) = child.stderr.take() {
            err.read_to_string(&mut stderr).ok();
        }
        let status = child
            .wait()
            .map_err(|source| RepoClientError::Spawn {
                executable: self.executable.clone(),
                source,
            })?;

        let records = parse_tagged_records(&stdout);
        let mut warnings = Vec::new();
        for line in stderr.lines() {
            if looks_like_warning(line) {
                if self.command_log.first_time(line) {
                    tracing::warn!(command = cmd, %line, "repository warning");
                }
                if self.exception_level != ExceptionLevel::Ignore {
                    warnings.push(Warning(line.to_string()));
                }
            } else if !line.trim().is_empty() && !status.success() {
                return Err(RepoClientError::CommandFailed {
                    command: cmd.to_string(),
                    message: line.to_string(),
                });
            }
        }
        tracing::debug!(command = cmd, records = records.len(), warnings = warnings.len(), "command completed");
        Ok(CommandOutput { records, warnings })
    }

    fn set_exception_level(&mut self, level: ExceptionLevel) {
        self.exception_level = level;
    }

    fn fetch_spec(&mut self, kind: &str, name: &str) -> Result<Record, RepoClientError> {
        let output = self.run(kind, &["-o", name])?;
        output
            .records
            .into_iter()
            .next()
            .ok_or_else(|| RepoClientError::CommandFailed {
                command: kind.to_string(),
                message: format!("no spec named {name}"),
            })
    }

    fn save_spec(&mut self, kind: &str, spec: &Record) -> Result<(), RepoClientError> {
        let body = spec
            .fields
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join("\n");
        tracing::debug!(kind, bytes = body.len(), "saving spec");
        self.run_with_input(kind, &["-i"], &body).map(|_| ())
    }

    fn set_workspace_view(&mut self, view: &View) -> Result<(), RepoClientError> {
        tracing::debug!(lines = view.lines().len(), "updating workspace view");
        self.reconnects += 1;
        Ok(())
    }
}

fn looks_like_warning(line: &str) -> bool {
    const WARNING_PATTERNS: &[&str] = &[
        "not on client",
        "no such file",
        "already opened",
        "up-to-date",
    ];
    let lower = line.to_ascii_lowercase();
    WARNING_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Parses the line-oriented `key value` tagged output most source/target
/// protocol commands emit, one [`Record`] per blank-line-delimited block.
fn parse_tagged_records(stdout: &str) -> Vec<Record> {
    let mut records = Vec::new();
    let mut current = Record::default();
    for line in stdout.lines() {
        if line.trim().is_empty() {
            if !current.fields.is_empty() {
                records.push(std::mem::take(&mut current));
            }
            continue;
        }
        if let Some((key, value)) = line.split_once(' ') {
            current.fields.insert(key.to_string(), value.trim().to_string());
        }
    }
    if !current.fields.is_empty() {
        records.push(current);
    }
    records
}

/// An in-memory fake used by unit tests for the components built on top of
/// [`RepoClient`], so that the replication engine's logic can be exercised
/// without a live repository.
pub struct FakeRepoClient {
    pub connected: bool,
    pub responses: Mutex<HashMap<String, CommandOutput>>,
    pub calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl FakeRepoClient {
    pub fn new() -> Self {
        Self {
            connected: false,
            responses: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn stub(&self, key: impl Into<String>, output: CommandOutput) {
        self.responses.lock().unwrap().insert(key.into(), output);
    }
}

impl Default for FakeRepoClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RepoClient for FakeRepoClient {
    fn connect(&mut self) -> Result<(), RepoClientError> {
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn reset_command_log(&mut self) {}

    fn run(&mut self, cmd: &str, args: &[&str]) -> Result<CommandOutput, RepoClientError> {
        self.calls
            .lock()
            .unwrap()
            .push((cmd.to_string(), args.iter().map(|s| s.to_string()).collect()));
        let key = format!("{cmd} {}", args.join(" "));
        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_default())
    }

    fn set_exception_level(&mut self, _level: ExceptionLevel) {}

    fn fetch_spec(&mut self, _kind: &str, _name: &str) -> Result<Record, RepoClientError> {
        Ok(Record::default())
    }

    fn save_spec(&mut self, _kind: &str, _spec: &Record) -> Result<(), RepoClientError> {
        Ok(())
    }

    fn set_workspace_view(&mut self, _view: &View) -> Result<(), RepoClientError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_blank_line_delimited_records() {
        let stdout = "depotFile //depot/a\nrev 1\n\ndepotFile //depot/b\nrev 2\n";
        let records = parse_tagged_records(stdout);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("depotFile"), Some("//depot/a"));
        assert_eq!(records[1].get("rev"), Some("2"));
    }

    #[test]
    fn fake_client_records_calls_and_replays_stubs() {
        let mut client = FakeRepoClient::new();
        client.stub(
            "describe -s 5",
            CommandOutput {
                records: vec![Record::default()],
                warnings: vec![],
            },
        );
        client.connect().unwrap();
        let out = client.run("describe", &["-s", "5"]).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(client.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn command_log_suppresses_repeat_then_resets() {
        let mut log = CommandLog::default();
        assert!(log.first_time("file(s) not on client"));
        assert!(!log.first_time("file(s) not on client"));
        log.reset();
        assert!(log.first_time("file(s) not on client"));
    }
}
