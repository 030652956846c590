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

//! An append-only mapping of (source port, source change, target change)
//! submitted as a tracked file on the target at the end of each batch.

use std::path::Path;

use thiserror::Error;

use crate::file_util::PathError;
use crate::file_util::write_atomic;
use crate::repo_client::RepoClient;
use crate::repo_client::RepoClientError;

#[derive(Debug, Error)]
pub enum ChangeMapError {
    #[error(transparent)]
    Client(#[from] RepoClientError),
    #[error(transparent)]
    Write(#[from] PathError),
}

pub const HEADER: &str = "sourcePort,sourceChangeNo,targetChangeNo";

/// A row pending submission, accumulated across a batch and flushed in one
/// change at batch end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeMapRow {
    pub source_port: String,
    pub source_change: u64,
    pub target_change: u64,
}

impl ChangeMapRow {
    fn to_csv_line(&self) -> String {
        format!(
            "{},{},{}",
            self.source_port, self.source_change, self.target_change
        )
    }
}

/// Caps the number of revisions this file's type retains on the target.
/// Avoids the
/// mapping file's own history growing unboundedly over a long-running
/// service.
pub const MAX_RETAINED_REVISIONS: u32 = 32;

/// Accumulates rows for the current batch and flushes them as a single
/// change at batch end.
pub struct ChangeMap {
    path: String,
    pending: Vec<ChangeMapRow>,
    ensured: bool,
}

impl ChangeMap {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            pending: Vec::new(),
            ensured: false,
        }
    }

    pub fn push(&mut self, row: ChangeMapRow) {
        self.pending.push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Ensures the tracked file exists on the target, creating it with the
    /// header row and a type capping retained revisions if absent. Safe to
    /// call more than once per batch; only the first call does any work.
    pub fn ensure_exists(&mut self, client: &mut dyn RepoClient) -> Result<(), RepoClientError> {
        if self.ensured {
            return Ok(());
        }
        let existing = client.run("fstat", &[&self.path])?;
        if existing.records.is_empty() {
            client.run("add", &["-t", &format!("text+S{MAX_RETAINED_REVISIONS}"), &self.path])?;
        }
        self.ensured = true;
        Ok(())
    }

    /// Submits all pending rows in a single change and clears them. Returns
    /// the target change id that carried the mapping update, if there was
    /// anything to submit.
    pub fn flush(
        &mut self,
        client: &mut dyn RepoClient,
        description: &str,
    ) -> Result<Option<u64>, ChangeMapError> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        self.ensure_exists(client)?;
        client.run("edit", &[&self.path])?;

        let mut body = String::new();
        body.push_str(HEADER);
        body.push('\n');
        for row in &self.pending {
            body.push_str(&row.to_csv_line());
            body.push('\n');
        }
        tracing::debug!(rows = self.pending.len(), path = %self.path, "appending change-map rows");
        write_atomic(Path::new(&self.path), body.as_bytes())?;

        let output = client.run("submit", &["-d", description])?;
        self.pending.clear();
        Ok(output
            .records
            .first()
            .and_then(|r| r.get("change"))
            .and_then(|v| v.parse().ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo_client::FakeRepoClient;

    #[test]
    fn flush_is_noop_when_empty() {
        let mut client = FakeRepoClient::new();
        client.connect().unwrap();
        let mut map = ChangeMap::new("changes/map.csv");
        assert_eq!(map.flush(&mut client, "update map").unwrap(), None);
    }

    #[test]
    fn csv_line_has_three_plain_fields() {
        let row = ChangeMapRow {
            source_port: "ssl:perforce:1666".to_string(),
            source_change: 42,
            target_change: 7,
        };
        assert_eq!(row.to_csv_line(), "ssl:perforce:1666,42,7");
    }

    #[test]
    fn push_accumulates_until_flush() {
        let mut client = FakeRepoClient::new();
        client.connect().unwrap();
        let mut map = ChangeMap::new("changes/map.csv");
        map.push(ChangeMapRow {
            source_port: "p".to_string(),
            source_change: 1,
            target_change: 1,
        });
        assert!(!map.is_empty());
        map.flush(&mut client, "batch").unwrap();
        assert!(map.is_empty());
    }
}
