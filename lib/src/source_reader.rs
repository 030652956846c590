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

//! Produces the ordered list of pending source changes and, per change, the
//! fully resolved revision set with integration metadata.

use std::collections::HashMap;

use chrono::DateTime;
use chrono::TimeZone;
use chrono::Utc;
use itertools::Itertools;
use regex::Regex;
use thiserror::Error;

use crate::change::Action;
use crate::change::Change;
use crate::change::How;
use crate::change::Integration;
use crate::change::Revision;
use crate::depot_path::DepotPath;
use crate::depot_path::View;
use crate::filetype::FileType;
use crate::move_tracker::MoveTracker;
use crate::move_tracker::SpecialMove;
use crate::repo_client::RepoClient;
use crate::repo_client::RepoClientError;

#[derive(Debug, Error)]
pub enum SourceReaderError {
    #[error(transparent)]
    Client(#[from] RepoClientError),

    #[error("describe record for change {0} has no user/timestamp fields")]
    MalformedDescribe(u64),

    #[error("source reports a utf16 file at {depot_path} that cannot be decoded: {detail}")]
    UndecodableUtf16 { depot_path: String, detail: String },
}

/// The fully resolved result of reading one source change, corresponding to
/// the resolved revisions, special moves, and filelog records, plus the
/// change's own header fields and the per-change ignore set
/// computed from `ignore_files`.
#[derive(Debug, Clone)]
pub struct SourceChange {
    pub id: u64,
    pub user: String,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub revisions: Vec<Revision>,
    pub special_moves: Vec<SpecialMove>,
    /// Raw per-path history records collected during bulk lookup, kept
    /// alongside the resolved revisions for components that need the
    /// unparsed form (e.g. to report an unrecognized `how` verb verbatim).
    pub filelogs: Vec<crate::repo_client::Record>,
    /// Local paths skipped because they matched a configured ignore
    /// pattern; recorded so EquivalenceChecker excludes them too.
    pub ignored_paths: Vec<String>,
}

impl SourceChange {
    pub fn into_change(self) -> Change {
        Change {
            source_id: self.id,
            user: self.user,
            timestamp: self.timestamp,
            description: self.description,
            revisions: self.revisions,
        }
    }
}

pub struct SourceReader<'a> {
    client: &'a mut dyn RepoClient,
    view: &'a View,
    ignore_files: &'a [Regex],
    case_sensitive: bool,
    historical_start: Option<u64>,
}

impl<'a> SourceReader<'a> {
    pub fn new(
        client: &'a mut dyn RepoClient,
        view: &'a View,
        ignore_files: &'a [Regex],
        case_sensitive: bool,
        historical_start: Option<u64>,
    ) -> Self {
        Self {
            client,
            view,
            ignore_files,
            case_sensitive,
            historical_start,
        }
    }

    /// Returns pending source change ids greater than `counter`, oldest
    /// first, capped at `batch_size` and optionally at `maximum`.
    pub fn missing_changes(
        &mut self,
        counter: u64,
        batch_size: u64,
        maximum: Option<u64>,
    ) -> Result<Vec<u64>, SourceReaderError> {
        let range = format!("@>{counter}");
        let output = self.client.run("changes", &["-s", "submitted", &range])?;
        let mut ids: Vec<u64> = output
            .records
            .iter()
            .filter_map(|r| r.get("change").and_then(|v| v.parse().ok()))
            .unique()
            .sorted()
            .collect();
        ids.truncate(batch_size as usize);
        if let Some(maximum) = maximum {
            ids.retain(|id| *id <= maximum);
        }
        Ok(ids)
    }

    /// Runs the full per-change resolution pipeline: fetch, partition,
    /// history lookup, move pairing, and content checks.
    pub fn get_change(&mut self, id: u64) -> Result<SourceChange, SourceReaderError> {
        let describe = self.client.run("describe", &["-s", &id.to_string()])?;
        let header = describe
            .records
            .first()
            .ok_or(SourceReaderError::MalformedDescribe(id))?;
        let user = header
            .get("user")
            .ok_or(SourceReaderError::MalformedDescribe(id))?
            .to_string();
        let timestamp = header
            .get("time")
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().unwrap());
        let description = header.get("desc").unwrap_or_default().to_string();

        let mut revisions = Vec::new();
        for record in &describe.records[1..] {
            if let Some(rev) = self.revision_from_record(record) {
                revisions.push(rev);
            }
        }

        let (pending_lookup, not_needing_lookup): (Vec<Revision>, Vec<Revision>) = revisions
            .into_iter()
            .partition(|r| r.action.needs_history_lookup());

        let mut tracker = MoveTracker::new(self.case_sensitive);
        let mut rest = Vec::new();
        for rev in not_needing_lookup {
            if rev.action == Action::MoveDelete {
                tracker.track_delete(rev);
            } else {
                rest.push(rev);
            }
        }

        let paths: Vec<&str> = pending_lookup.iter().map(|r| r.depot_path.as_str()).collect();
        let filelogs = if paths.is_empty() {
            Vec::new()
        } else {
            self.client.run("filelog", &paths)?.records
        };
        let by_path: HashMap<&str, &crate::repo_client::Record> = filelogs
            .iter()
            .filter_map(|r| r.get("depotFile").map(|p| (p, r)))
            .collect();

        let first_kept_rev = self.historical_start.map(|_| 1u32);

        for mut rev in pending_lookup {
            if let Some(record) = by_path.get(rev.depot_path.as_str()) {
                rev.integrations = parse_integrations(record);
            }
            if let Some(first_kept_rev) = first_kept_rev {
                rev.rebase_integrations(first_kept_rev);
            }
            if rev.action == Action::MoveAdd {
                if let Some(moved_from) = rev
                    .integrations
                    .iter()
                    .find(|edge| edge.how == How::MovedFrom)
                {
                    let partner = moved_from.from_path.clone();
                    tracker.track_add(rev, &partner);
                    continue;
                }
            }
            rest.push(rev);
        }

        let resolved = tracker.resolve();
        for (add, delete) in resolved.pairs {
            rest.push(add);
            rest.push(delete);
        }
        rest.extend(resolved.downgraded);

        self.client.run(
            "sync",
            &[&format!("//...{at}", at = format_at(id))],
        )?;

        let mut ignored_paths = Vec::new();
        rest.retain(|rev| {
            let Some(local_path) = &rev.local_path else {
                return true;
            };
            let ignored = self.ignore_files.iter().any(|re| re.is_match(local_path));
            if ignored {
                ignored_paths.push(local_path.clone());
            }
            !ignored
        });

        if !self.case_sensitive {
            for rev in &mut rest {
                if let Some(local_path) = &rev.local_path {
                    if let Some(adjusted) = resolve_existing_case(local_path) {
                        rev.local_path = Some(adjusted);
                    }
                }
            }
        }

        for rev in &mut rest {
            if rev.file_type.is_keyword_expanded() && rev.local_path.is_some() {
                if let Some(local_path) = &rev.local_path {
                    if let Ok(content) = std::fs::read(local_path) {
                        rev.digest = Some(crate::content_comparator::keyword_masked_digest(&content));
                    }
                }
            }
            if rev.file_type.is_utf16() {
                if let Some(local_path) = &rev.local_path {
                    if let Ok(content) = std::fs::read(local_path) {
                        if content.len() % 2 != 0 {
                            return Err(SourceReaderError::UndecodableUtf16 {
                                depot_path: rev.depot_path.as_str().to_string(),
                                detail: "odd byte length for a utf16 file".to_string(),
                            });
                        }
                    }
                }
            }
        }

        Ok(SourceChange {
            id,
            user,
            timestamp,
            description,
            revisions: rest,
            special_moves: resolved.special,
            filelogs,
            ignored_paths,
        })
    }

    fn revision_from_record(&self, record: &crate::repo_client::Record) -> Option<Revision> {
        let depot_path = DepotPath::new(record.get("depotFile")?);
        let action = Action::parse(record.get("action")?)?;
        let rev = record.get("rev").and_then(|v| v.parse().ok()).unwrap_or(0);
        let file_type = record
            .get("type")
            .and_then(FileType::parse)
            .unwrap_or_else(FileType::plain_text);
        let size = record.get("fileSize").and_then(|v| v.parse().ok());
        let digest = record.get("digest").map(str::to_string);
        let local_path = self
            .view
            .map_to_local(&depot_path)
            .map(|p| p.as_str().to_string());
        Some(Revision {
            depot_path,
            local_path,
            rev,
            action,
            file_type,
            size,
            digest,
            integrations: Vec::new(),
        })
    }

    /// Synthesizes the initial "reconcile" change for a pinned historical
    /// start: a single add for every file present at that change.
    pub fn reconcile_change(&mut self, at: u64) -> Result<SourceChange, SourceReaderError> {
        let output = self.client.run("files", &[&format!("//...@={at}")])?;
        let revisions = output
            .records
            .iter()
            .filter_map(|r| self.revision_from_record(r))
            .map(|mut rev| {
                rev.action = Action::Add;
                rev
            })
            .collect();
        Ok(SourceChange {
            id: at,
            user: "relay".to_string(),
            timestamp: Utc::now(),
            description: format!("reconcile: historical start at change {at}"),
            revisions,
            special_moves: Vec::new(),
            filelogs: Vec::new(),
            ignored_paths: Vec::new(),
        })
    }
}

fn format_at(id: u64) -> String {
    format!("@={id}")
}

/// Looks up the on-disk casing of `local_path`'s final component, for a
/// case-insensitive source replayed onto a case-sensitive filesystem where
/// the view-mapped path and the file actually synced down can disagree only
/// in case. Returns `None` when the directory can't be read or no
/// case-differing match is found, leaving the original path untouched.
fn resolve_existing_case(local_path: &str) -> Option<String> {
    let path = std::path::Path::new(local_path);
    let file_name = path.file_name()?.to_str()?;
    let parent = path.parent().unwrap_or_else(|| std::path::Path::new("."));
    let entries = std::fs::read_dir(parent).ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name != file_name && name.eq_ignore_ascii_case(file_name) {
            return Some(parent.join(name).to_string_lossy().into_owned());
        }
    }
    None
}

/// Parses the numbered `how{n}`/`file{n}`/`srev{n}`/`erev{n}` integration
/// fields out of a filelog record, keeping only edges retained for
/// integration.
fn parse_integrations(record: &crate::repo_client::Record) -> Vec<Integration> {
    let mut edges = Vec::new();
    let mut n = 0;
    loop {
        let how_key = format!("how{n}");
        let Some(how_str) = record.get(&how_key) else {
            break;
        };
        let Some(how) = How::parse(how_str) else {
            n += 1;
            continue;
        };
        if how.is_retained_for_integration() {
            let from_path = DepotPath::new(record.get(&format!("file{n}")).unwrap_or_default());
            let start_rev = record
                .get(&format!("srev{n}"))
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let end_rev = record
                .get(&format!("erev{n}"))
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            edges.push(Integration {
                how,
                from_path,
                start_rev,
                end_rev,
                local_from_path: None,
            });
        }
        n += 1;
    }
    edges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depot_path::ViewLine;
    use crate::repo_client::CommandOutput;
    use crate::repo_client::FakeRepoClient;
    use crate::repo_client::Record;

    fn view() -> View {
        View::new(
            vec![ViewLine {
                src: "//depot/main/...".to_string(),
                targ: "main".to_string(),
                exclude: false,
            }],
            true,
        )
    }

    fn record(fields: &[(&str, &str)]) -> Record {
        Record {
            fields: fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    #[test]
    fn missing_changes_parses_and_bounds_results() {
        let mut client = FakeRepoClient::new();
        client.stub(
            "changes -s submitted @>5",
            CommandOutput {
                records: vec![record(&[("change", "6")]), record(&[("change", "7")])],
                warnings: vec![],
            },
        );
        client.connect().unwrap();
        let view = view();
        let patterns: Vec<Regex> = Vec::new();
        let mut reader = SourceReader::new(&mut client, &view, &patterns, true, None);
        let ids = reader.missing_changes(5, 10, None).unwrap();
        assert_eq!(ids, vec![6, 7]);
    }

    #[test]
    fn get_change_assembles_add_revision() {
        let mut client = FakeRepoClient::new();
        client.stub(
            "describe -s 7",
            CommandOutput {
                records: vec![
                    record(&[("user", "alice"), ("time", "0"), ("desc", "add a file")]),
                    record(&[
                        ("depotFile", "//depot/main/a"),
                        ("action", "add"),
                        ("rev", "1"),
                        ("type", "text"),
                        ("fileSize", "12"),
                        ("digest", "abc"),
                    ]),
                ],
                warnings: vec![],
            },
        );
        client.stub(
            "filelog //depot/main/a",
            CommandOutput {
                records: vec![record(&[("depotFile", "//depot/main/a")])],
                warnings: vec![],
            },
        );
        client.connect().unwrap();
        let view = view();
        let patterns: Vec<Regex> = Vec::new();
        let mut reader = SourceReader::new(&mut client, &view, &patterns, true, None);
        let change = reader.get_change(7).unwrap();
        assert_eq!(change.user, "alice");
        assert_eq!(change.revisions.len(), 1);
        assert_eq!(change.revisions[0].local_path.as_deref(), Some("main/a"));
    }

    #[test]
    fn ignore_files_pattern_removes_matching_revision() {
        let mut client = FakeRepoClient::new();
        client.stub(
            "describe -s 7",
            CommandOutput {
                records: vec![
                    record(&[("user", "alice"), ("time", "0"), ("desc", "x")]),
                    record(&[
                        ("depotFile", "//depot/main/secret.key"),
                        ("action", "edit"),
                        ("rev", "2"),
                        ("type", "text"),
                    ]),
                ],
                warnings: vec![],
            },
        );
        client.connect().unwrap();
        let view = view();
        let patterns = vec![Regex::new(r"\.key$").unwrap()];
        let mut reader = SourceReader::new(&mut client, &view, &patterns, true, None);
        let change = reader.get_change(7).unwrap();
        assert!(change.revisions.is_empty());
        assert_eq!(change.ignored_paths, vec!["main/secret.key".to_string()]);
    }

    #[test]
    fn move_add_and_delete_pair_up_across_the_describe_record() {
        let mut client = FakeRepoClient::new();
        client.stub(
            "describe -s 9",
            CommandOutput {
                records: vec![
                    record(&[("user", "bob"), ("time", "0"), ("desc", "rename")]),
                    record(&[
                        ("depotFile", "//depot/main/b"),
                        ("action", "move/add"),
                        ("rev", "1"),
                        ("type", "text"),
                    ]),
                    record(&[
                        ("depotFile", "//depot/main/a"),
                        ("action", "move/delete"),
                        ("rev", "2"),
                        ("type", "text"),
                    ]),
                ],
                warnings: vec![],
            },
        );
        client.stub(
            "filelog //depot/main/b",
            CommandOutput {
                records: vec![record(&[
                    ("depotFile", "//depot/main/b"),
                    ("how0", "moved from"),
                    ("file0", "//depot/main/a"),
                    ("srev0", "1"),
                    ("erev0", "2"),
                ])],
                warnings: vec![],
            },
        );
        client.connect().unwrap();
        let view = view();
        let patterns: Vec<Regex> = Vec::new();
        let mut reader = SourceReader::new(&mut client, &view, &patterns, true, None);
        let change = reader.get_change(9).unwrap();
        assert_eq!(change.revisions.len(), 2);
        assert!(change
            .revisions
            .iter()
            .any(|r| r.action == Action::MoveAdd));
        assert!(change
            .revisions
            .iter()
            .any(|r| r.action == Action::MoveDelete));
    }

    #[test]
    fn resolve_existing_case_finds_differently_cased_sibling() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.txt"), b"hi").unwrap();
        let wanted = dir.path().join("readme.txt");
        let found = resolve_existing_case(wanted.to_str().unwrap()).unwrap();
        assert_eq!(found, dir.path().join("README.txt").to_string_lossy());
    }

    #[test]
    fn resolve_existing_case_returns_none_when_no_match() {
        let dir = tempfile::tempdir().unwrap();
        let wanted = dir.path().join("missing.txt");
        assert!(resolve_existing_case(wanted.to_str().unwrap()).is_none());
    }
}
