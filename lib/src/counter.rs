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

//! The named persistent counter on the target holding the id of the last
//! fully replicated source change.

use crate::repo_client::RepoClient;
use crate::repo_client::RepoClientError;

/// A handle to one named counter on the target repository. The counter
/// itself lives server-side (it's a first-class object on the protocol, not
/// a local file), so reads and writes are just `RepoClient::run` calls
/// against the `counter` command.
pub struct Counter<'a> {
    client: &'a mut dyn RepoClient,
    name: String,
}

impl<'a> Counter<'a> {
    pub fn new(client: &'a mut dyn RepoClient, name: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
        }
    }

    /// Returns the counter's value, or 0 if it has never been set (a fresh
    /// counter name starting a replication from scratch).
    pub fn get(&mut self) -> Result<u64, RepoClientError> {
        let output = self.client.run("counter", &[&self.name])?;
        Ok(output
            .records
            .first()
            .and_then(|r| r.get("value"))
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    /// Sets the counter, enforcing the monotonic invariant: the counter
    /// never regresses within a single process's lifetime.
    pub fn advance_to(&mut self, value: u64) -> Result<(), RepoClientError> {
        let current = self.get()?;
        assert!(
            value >= current,
            "counter {} must not regress: {current} -> {value}",
            self.name
        );
        self.client
            .run("counter", &[&self.name, &value.to_string()])
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo_client::CommandOutput;
    use crate::repo_client::FakeRepoClient;
    use crate::repo_client::Record;

    #[test]
    fn reads_zero_for_unset_counter() {
        let mut client = FakeRepoClient::new();
        client.connect().unwrap();
        let mut counter = Counter::new(&mut client, "relay_main");
        assert_eq!(counter.get().unwrap(), 0);
    }

    #[test]
    fn advance_to_monotonic() {
        let mut client = FakeRepoClient::new();
        client.stub(
            "counter relay_main",
            CommandOutput {
                records: vec![Record {
                    fields: [("value".to_string(), "10".to_string())].into(),
                }],
                warnings: vec![],
            },
        );
        client.connect().unwrap();
        let mut counter = Counter::new(&mut client, "relay_main");
        counter.advance_to(12).unwrap();
    }

    #[test]
    #[should_panic(expected = "must not regress")]
    fn advance_to_rejects_regression() {
        let mut client = FakeRepoClient::new();
        client.stub(
            "counter relay_main",
            CommandOutput {
                records: vec![Record {
                    fields: [("value".to_string(), "10".to_string())].into(),
                }],
                warnings: vec![],
            },
        );
        client.connect().unwrap();
        let mut counter = Counter::new(&mut client, "relay_main");
        let _ = counter.advance_to(5);
    }
}
