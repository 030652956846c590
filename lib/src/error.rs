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

//! The three error classes from which every failure in this crate is built:
//! configuration, logic, and transient.
//!
//! Commands issued against a repository (`RepoClient::run`) raise
//! [`TransientError`] for anything that the Scheduler should retry after a
//! backoff, and [`LogicError`] for anything that indicates a contradiction
//! in the replicated data that a retry cannot fix.

use std::fmt;

use thiserror::Error;

/// A contradiction in the data being replicated, or a post-submit
/// equivalence mismatch. By default fatal; demoted to a logged error when
/// `ignore_errors` is configured.
#[derive(Debug, Error)]
pub enum LogicError {
    #[error("revision {depot_path} has no filelog record but one was required")]
    MissingFilelogRecord { depot_path: String },

    #[error("unknown revision action {action:?} for {depot_path}#{rev}")]
    UnknownAction {
        depot_path: String,
        rev: u32,
        action: String,
    },

    #[error(
        "equivalence check failed for source change {source_change}: target change \
         {target_change} does not match ({detail})"
    )]
    EquivalenceMismatch {
        source_change: u64,
        target_change: u64,
        detail: String,
    },

    #[error("internal contradiction: {0}")]
    Internal(String),
}

/// A failure expected to clear itself: a dropped connection, a rate limit,
/// or a command returning an unexpected warning. The Scheduler sleeps and
/// retries the same change from scratch.
#[derive(Debug, Error)]
pub enum TransientError {
    #[error("lost connection to {endpoint}")]
    ConnectionLost {
        endpoint: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("command {command} returned an unrecognized warning: {warning}")]
    UnrecognizedWarning { command: String, warning: String },

    #[error("command {command} failed: {message}")]
    CommandFailed { command: String, message: String },
}

/// Every user-visible failure carries the source change under consideration,
/// the last command attempted, and that command's arguments. This wraps an
/// underlying error with that context.
#[derive(Debug, Error)]
#[error("change {source_change}: command `{command}` failed: {source}")]
pub struct ReplicationError<E: std::error::Error + 'static> {
    pub source_change: u64,
    pub command: String,
    #[source]
    pub source: E,
}

impl<E: std::error::Error + 'static> ReplicationError<E> {
    pub fn new(source_change: u64, command: impl fmt::Display, source: E) -> Self {
        Self {
            source_change,
            command: command.to_string(),
            source,
        }
    }
}
