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

//! Re-reads a just-submitted target change and compares it against the
//! source revision set.

use std::collections::HashMap;

use crate::change::Change;
use crate::content_comparator::ComparableRevision;
use crate::content_comparator::ContentComparator;
use crate::error::LogicError;
use crate::filetype::FileType;
use crate::repo_client::RepoClient;
use crate::repo_client::RepoClientError;

/// One target-side revision, indexed by the local path it maps to, in
/// exactly the shape `ContentComparator` needs.
struct TargetRevision {
    file_type: FileType,
    size: Option<u64>,
    digest: Option<String>,
}

pub struct EquivalenceChecker<'a> {
    client: &'a mut dyn RepoClient,
    comparator: ContentComparator,
    case_sensitive: bool,
}

impl<'a> EquivalenceChecker<'a> {
    pub fn new(client: &'a mut dyn RepoClient, comparator: ContentComparator, case_sensitive: bool) -> Self {
        Self {
            client,
            comparator,
            case_sensitive,
        }
    }

    /// Compares `source_change`'s revisions (less `ignored_paths`) against
    /// the just-submitted `target_change_id`. Returns `Ok(())` when every
    /// non-ignored revision compares equal.
    pub fn check(
        &mut self,
        source_change: &Change,
        target_change_id: u64,
        ignored_paths: &[String],
    ) -> Result<(), LogicError> {
        let target_revisions = self
            .fetch_target_revisions(target_change_id)
            .map_err(|e| LogicError::Internal(e.to_string()))?;

        let mut mismatches = Vec::new();
        for revision in &source_change.revisions {
            let Some(local_path) = &revision.local_path else {
                continue;
            };
            if ignored_paths.iter().any(|p| p == local_path) {
                continue;
            }
            let key = self.lookup_key(local_path);
            let Some(target) = target_revisions.get(&key) else {
                mismatches.push(format!("{local_path}: missing on target"));
                continue;
            };

            let source_comparable = ComparableRevision {
                file_type: revision.file_type,
                size: revision.size,
                digest: revision.digest.as_deref(),
                content: None,
            };
            let target_comparable = ComparableRevision {
                file_type: target.file_type,
                size: target.size,
                digest: target.digest.as_deref(),
                content: None,
            };
            let verdict = self.comparator.compare(&source_comparable, &target_comparable);
            if let crate::content_comparator::Verdict::Different { reason } = verdict {
                mismatches.push(format!("{local_path}: {reason}"));
            }
        }

        if mismatches.is_empty() {
            Ok(())
        } else {
            Err(LogicError::EquivalenceMismatch {
                source_change: source_change.source_id,
                target_change: target_change_id,
                detail: mismatches.join("; "),
            })
        }
    }

    fn lookup_key(&self, local_path: &str) -> String {
        if self.case_sensitive {
            local_path.to_string()
        } else {
            local_path.to_ascii_lowercase()
        }
    }

    fn fetch_target_revisions(
        &mut self,
        target_change_id: u64,
    ) -> Result<HashMap<String, TargetRevision>, RepoClientError> {
        let describe = self
            .client
            .run("describe", &["-s", &target_change_id.to_string()])?;
        let mut map = HashMap::new();
        for record in describe.records.iter().skip(1) {
            let Some(local_path) = record.get("localFile") else {
                continue;
            };
            let file_type = record
                .get("type")
                .and_then(FileType::parse)
                .unwrap_or_else(FileType::plain_text);
            let size = record.get("fileSize").and_then(|v| v.parse().ok());
            let digest = record.get("digest").map(str::to_string);
            let key = if self.case_sensitive {
                local_path.to_string()
            } else {
                local_path.to_ascii_lowercase()
            };
            map.insert(key, TargetRevision { file_type, size, digest });
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::Action;
    use crate::content_comparator::HostOs;
    use crate::depot_path::DepotPath;
    use crate::repo_client::CommandOutput;
    use crate::repo_client::FakeRepoClient;
    use crate::repo_client::Record;
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use chrono::Utc;

    fn revision(local_path: &str, size: u64, digest: &str) -> crate::change::Revision {
        crate::change::Revision {
            depot_path: DepotPath::new(format!("//depot/main/{local_path}")),
            local_path: Some(local_path.to_string()),
            rev: 1,
            action: Action::Add,
            file_type: FileType::binary(),
            size: Some(size),
            digest: Some(digest.to_string()),
            integrations: Vec::new(),
        }
    }

    fn record(fields: &[(&str, &str)]) -> Record {
        Record {
            fields: fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    #[test]
    fn matching_revisions_pass() {
        let mut client = FakeRepoClient::new();
        client.stub(
            "describe -s 10",
            CommandOutput {
                records: vec![
                    record(&[("change", "10")]),
                    record(&[
                        ("localFile", "main/a"),
                        ("type", "binary"),
                        ("fileSize", "12"),
                        ("digest", "abc"),
                    ]),
                ],
                warnings: vec![],
            },
        );
        client.connect().unwrap();
        let comparator = ContentComparator::new(HostOs::Unix, HostOs::Unix);
        let mut checker = EquivalenceChecker::new(&mut client, comparator, true);
        let change = Change {
            source_id: 5,
            user: "alice".to_string(),
            timestamp: Utc.timestamp_opt(0, 0).single().unwrap(),
            description: "x".to_string(),
            revisions: vec![revision("a", 12, "abc")],
        };
        checker.check(&change, 10, &[]).unwrap();
    }

    #[test]
    fn missing_target_revision_is_reported() {
        let mut client = FakeRepoClient::new();
        client.stub(
            "describe -s 10",
            CommandOutput {
                records: vec![record(&[("change", "10")])],
                warnings: vec![],
            },
        );
        client.connect().unwrap();
        let comparator = ContentComparator::new(HostOs::Unix, HostOs::Unix);
        let mut checker = EquivalenceChecker::new(&mut client, comparator, true);
        let change = Change {
            source_id: 5,
            user: "alice".to_string(),
            timestamp: Utc.timestamp_opt(0, 0).single().unwrap(),
            description: "x".to_string(),
            revisions: vec![revision("a", 12, "abc")],
        };
        let err = checker.check(&change, 10, &[]).unwrap_err();
        assert_matches!(err, LogicError::EquivalenceMismatch { .. });
    }

    #[test]
    fn ignored_path_is_skipped() {
        let mut client = FakeRepoClient::new();
        client.stub(
            "describe -s 10",
            CommandOutput {
                records: vec![record(&[("change", "10")])],
                warnings: vec![],
            },
        );
        client.connect().unwrap();
        let comparator = ContentComparator::new(HostOs::Unix, HostOs::Unix);
        let mut checker = EquivalenceChecker::new(&mut client, comparator, true);
        let change = Change {
            source_id: 5,
            user: "alice".to_string(),
            timestamp: Utc.timestamp_opt(0, 0).single().unwrap(),
            description: "x".to_string(),
            revisions: vec![revision("a", 12, "abc")],
        };
        checker.check(&change, 10, &["a".to_string()]).unwrap();
    }
}
