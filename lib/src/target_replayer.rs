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

//! Replays one resolved source change against the target workspace and
//! submits it. The heart of the engine.

use thiserror::Error;

use crate::change::Action;
use crate::change::Change;
use crate::change::How;
use crate::change::Integration;
use crate::change::Revision;
use crate::config::Config;
use crate::depot_path::View;
use crate::move_tracker::SpecialMove;
use crate::repo_client::CommandOutput;
use crate::repo_client::ExceptionLevel;
use crate::repo_client::RepoClient;
use crate::repo_client::RepoClientError;

#[derive(Debug, Error)]
pub enum TargetReplayerError {
    #[error(transparent)]
    Client(#[from] RepoClientError),

    #[error("no recognized remedy for integration failure on {depot_path}: {detail}")]
    UnrecognizedIntegrationFailure { depot_path: String, detail: String },

    #[error("submit for source change {source_change} failed: {detail}")]
    SubmitFailed { source_change: u64, detail: String },
}

/// Outcome of one `integrate` attempt, the pattern-matching result type
/// called out in the design notes in place of exception-driven control flow.
#[derive(Debug)]
enum IntegrateOutcome {
    Success(CommandOutput),
    RecognizedWarning(Remedy),
    Unrecognized(String),
}

/// A remedy applied to the next `integrate` attempt: either an added flag or
/// a shrink of the revision range (for the "no revision above that one"
/// warning).
#[derive(Debug)]
enum Remedy {
    AddFlag(&'static str),
    ShrinkRange,
}

/// How a recognized integration outcome gets resolved against the target
/// workspace. Pulled out as a trait rather than an inline match arm so the
/// "edit from" case below can carry its own payload and retry logic instead
/// of sharing the generic auto-merge path.
trait ResolveStrategy {
    fn apply(&self, client: &mut dyn RepoClient, local_path: &str) -> Result<(), TargetReplayerError>;
}

struct AutoMergeResolve;

impl ResolveStrategy for AutoMergeResolve {
    fn apply(&self, client: &mut dyn RepoClient, local_path: &str) -> Result<(), TargetReplayerError> {
        let resolved = client.run("resolve", &["-am", local_path])?;
        if resolved.has_warning_matching("skipped") || resolved.has_warning_matching("tampered") {
            client.run("resolve", &["-at", local_path])?;
        }
        Ok(())
    }
}

/// An "edit from" integration already carries the known desired result: the
/// source produced the final bytes, so there is nothing to merge, only a
/// theirs-wins acceptance. Falls back to a plain `edit` if the content still
/// differs afterward, the same recovery `CopyFrom` uses.
struct EditPayloadResolve;

impl ResolveStrategy for EditPayloadResolve {
    fn apply(&self, client: &mut dyn RepoClient, local_path: &str) -> Result<(), TargetReplayerError> {
        let resolved = client.run("resolve", &["-at", local_path])?;
        if resolved.has_warning_matching("still differ") {
            client.run("edit", &[local_path])?;
        }
        Ok(())
    }
}

/// Matches the recognized warning text patterns from the integration retry
/// table to their remedy.
fn classify_integration_warning(message: &str) -> Option<Remedy> {
    let lower = message.to_ascii_lowercase();
    if lower.contains("without -i") {
        Some(Remedy::AddFlag("-i"))
    } else if lower.contains("without -d") {
        Some(Remedy::AddFlag("-d"))
    } else if lower.contains("already integrated") {
        Some(Remedy::AddFlag("-f"))
    } else if lower.contains("without -di") {
        Some(Remedy::AddFlag("-Di"))
    } else if lower.contains("without -dt") {
        Some(Remedy::AddFlag("-Dt"))
    } else if lower.contains("remapped") {
        Some(Remedy::AddFlag("-2"))
    } else if lower.contains("no revision above that one") {
        Some(Remedy::ShrinkRange)
    } else {
        None
    }
}

/// Maximum number of retry-with-added-flag iterations before giving up and
/// surfacing the last warning as unrecognized. Bounds the loop even if a
/// warning keeps re-matching after its flag was already added.
const MAX_INTEGRATE_RETRIES: u32 = 8;

pub struct TargetReplayer<'a> {
    client: &'a mut dyn RepoClient,
    view: &'a View,
    config: &'a Config,
    ignore_integrations: bool,
    reset_connection: Option<u32>,
}

/// What happened to one revision during replay; accumulated so the Scheduler
/// and EquivalenceChecker know which paths to exclude from comparison.
#[derive(Debug, Clone, Default)]
pub struct ReplayOutcome {
    pub target_change: Option<u64>,
    pub ignored_paths: Vec<String>,
}

impl<'a> TargetReplayer<'a> {
    pub fn new(
        client: &'a mut dyn RepoClient,
        view: &'a View,
        config: &'a Config,
        ignore_integrations: bool,
        reset_connection: Option<u32>,
    ) -> Self {
        Self {
            client,
            view,
            config,
            ignore_integrations,
            reset_connection,
        }
    }

    /// Replays every revision in `change`, then submits.
    pub fn replay(
        &mut self,
        change: &Change,
        special_moves: &[SpecialMove],
    ) -> Result<ReplayOutcome, TargetReplayerError> {
        let mut outcome = ReplayOutcome::default();
        let mut used_rename_of_deleted_or_resolve_delete = false;
        let mut files_since_reset: u32 = 0;

        for revision in &change.revisions {
            let local_path = match &revision.local_path {
                Some(p) => p.clone(),
                None => continue,
            };
            match revision.action {
                Action::Edit => self.replay_edit(&local_path, revision)?,
                Action::Add | Action::Import => self.replay_add(&local_path, revision)?,
                Action::Delete => {
                    if self.replay_delete(&local_path, revision)? {
                        used_rename_of_deleted_or_resolve_delete = true;
                    }
                }
                Action::Purge => self.replay_purge(&local_path)?,
                Action::Branch => self.replay_integration(&local_path, revision, false)?,
                Action::Integrate => self.replay_integration(&local_path, revision, true)?,
                Action::MoveAdd => self.replay_move_add(&local_path, revision)?,
                Action::MoveDelete => {
                    // handled as the delete half of the rename by replay_move_add
                }
                Action::Archive => {
                    outcome.ignored_paths.push(local_path);
                }
            }

            files_since_reset += 1;
            if let Some(threshold) = self.reset_connection {
                if threshold > 0 && files_since_reset >= threshold {
                    self.client.disconnect();
                    self.client.connect()?;
                    files_since_reset = 0;
                }
            }
        }

        for special in special_moves {
            self.replay_special_move(special)?;
        }

        self.reconcile_filetypes(change)?;

        let description = self.config.render_description(
            &change.description,
            change.source_id,
            &self.config.source.port,
            &change.user,
        );
        let target_change = self.submit_with_recovery(
            change.source_id,
            &description,
            used_rename_of_deleted_or_resolve_delete,
        )?;

        if self.config.superuser {
            self.backdate(target_change, change)?;
        }

        outcome.target_change = Some(target_change);
        Ok(outcome)
    }

    fn replay_edit(&mut self, local_path: &str, revision: &Revision) -> Result<(), TargetReplayerError> {
        self.client.set_exception_level(ExceptionLevel::Ignore);
        let sync = self.client.run("sync", &["-k", local_path])?;
        self.client.set_exception_level(ExceptionLevel::Default);

        if sync.has_warning_matching("no such file") {
            return self.replay_add(local_path, revision);
        }

        let file_type_arg = revision.file_type.to_string();
        self.client.run("edit", &["-t", &file_type_arg, local_path])?;
        Ok(())
    }

    fn replay_add(&mut self, local_path: &str, revision: &Revision) -> Result<(), TargetReplayerError> {
        if revision
            .integrations
            .iter()
            .all(|edge| edge.how == How::MovedFrom)
            && !revision.integrations.is_empty()
        {
            return self.replay_move_add(local_path, revision);
        }
        if !revision.integrations.is_empty() && !self.ignore_integrations {
            return self.replay_integration(local_path, revision, false);
        }

        let file_type_arg = revision.file_type.to_string();
        let result = self.client.run("add", &["-t", &file_type_arg, local_path])?;
        if result.has_warning_matching("can't add existing file") {
            self.client.set_exception_level(ExceptionLevel::Ignore);
            self.client.run("sync", &["-k", local_path])?;
            self.client.set_exception_level(ExceptionLevel::Default);
            self.client.run("edit", &["-t", &file_type_arg, local_path])?;
        }
        Ok(())
    }

    /// Returns whether the delete required the "rename of deleted" recovery
    /// path, which the caller remembers for `submit_with_recovery`.
    fn replay_delete(&mut self, local_path: &str, revision: &Revision) -> Result<bool, TargetReplayerError> {
        let has_non_move_integration = revision
            .integrations
            .iter()
            .any(|edge| edge.how != How::MovedFrom);
        if has_non_move_integration {
            self.replay_integration(local_path, revision, false)?;
            return Ok(false);
        }
        let result = self.client.run("delete", &[local_path])?;
        if result.has_warning_matching("not on client") {
            self.client.set_exception_level(ExceptionLevel::Ignore);
            self.client.run("sync", &[&format!("{local_path}#1")])?;
            self.client.set_exception_level(ExceptionLevel::Default);
            let retry = self.client.run("delete", &[local_path])?;
            if retry.has_warning_matching("not on client") {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn replay_purge(&mut self, local_path: &str) -> Result<(), TargetReplayerError> {
        crate::file_util::write_atomic(std::path::Path::new(local_path), b"")
            .map_err(|e| TargetReplayerError::SubmitFailed {
                source_change: 0,
                detail: e.to_string(),
            })?;
        self.client.set_exception_level(ExceptionLevel::Ignore);
        self.client.run("sync", &["-k", local_path])?;
        self.client.set_exception_level(ExceptionLevel::Default);
        let result = self.client.run("edit", &[local_path])?;
        if result.records.is_empty() {
            self.client.run("add", &[local_path])?;
        }
        Ok(())
    }

    fn replay_move_add(&mut self, local_path: &str, revision: &Revision) -> Result<(), TargetReplayerError> {
        let Some(edge) = revision
            .integrations
            .iter()
            .find(|edge| edge.how == How::MovedFrom)
        else {
            return self.replay_add(local_path, revision);
        };
        let Some(from_local) = edge
            .local_from_path
            .clone()
            .or_else(|| self.view.map_to_local(&edge.from_path).map(|p| p.as_str().to_string()))
        else {
            return self.replay_add(local_path, revision);
        };

        self.client
            .run("sync", &[&format!("{from_local}#{}", edge.start_rev)])?;
        let edit = self.client.run("edit", &[&from_local])?;
        if edit.has_warning_matching("not on client") || edit.has_warning_matching("deleted") {
            self.client.set_exception_level(ExceptionLevel::Ignore);
            self.client.run("sync", &[&from_local])?;
            self.client.set_exception_level(ExceptionLevel::Default);
            self.client.run("resolve", &["-ay", &from_local])?;
            return Ok(());
        }
        self.client.run("move", &[&from_local, local_path])?;
        Ok(())
    }

    fn replay_special_move(&mut self, special: &SpecialMove) -> Result<(), TargetReplayerError> {
        let Some(add_local) = &special.add.local_path else {
            return Ok(());
        };
        let Some(delete_local) = &special.delete.local_path else {
            return Ok(());
        };
        self.client.run("integrate", &["-v", delete_local, add_local])?;
        self.client.run("resolve", &["-at", add_local])?;
        Ok(())
    }

    /// The integration-replay algorithm: processes edges in reverse source
    /// order so the terminal edge sets observable disk content.
    fn replay_integration(
        &mut self,
        local_path: &str,
        revision: &Revision,
        _dirty: bool,
    ) -> Result<(), TargetReplayerError> {
        if self.ignore_integrations {
            return self.replay_add(local_path, revision);
        }
        let mut after_add = false;
        for edge in revision.integrations.iter().rev() {
            self.replay_integration_edge(local_path, edge, &mut after_add)?;
        }
        Ok(())
    }

    fn replay_integration_edge(
        &mut self,
        local_path: &str,
        edge: &Integration,
        after_add: &mut bool,
    ) -> Result<(), TargetReplayerError> {
        let Some(from_local) = edge
            .local_from_path
            .clone()
            .or_else(|| self.view.map_to_local(&edge.from_path).map(|p| p.as_str().to_string()))
        else {
            // content-only integration outside the view: nothing to branch from
            return Ok(());
        };

        let mut flags: Vec<String> = match edge.how {
            How::DeleteFrom => vec!["-d".to_string()],
            _ => Vec::new(),
        };
        // An edge processed after an `afterAdd` has already put the target
        // path on disk ahead of its own submit; treat the next edge as a
        // follow-on integration onto that added file rather than waiting for
        // the "without -i" warning to teach us the same thing.
        if *after_add && !flags.iter().any(|f| f == "-i") {
            flags.push("-i".to_string());
        }
        let mut start_rev = edge.start_rev;
        let mut end_rev = edge.end_rev;

        for _ in 0..MAX_INTEGRATE_RETRIES {
            let from_arg = format!("{from_local}#{start_rev},#{end_rev}");
            let mut args: Vec<&str> = flags.iter().map(String::as_str).collect();
            args.push(&from_arg);
            args.push(local_path);
            let output = self.client.run("integrate", &args)?;

            match classify_outcome(&output) {
                IntegrateOutcome::Success(_) => {
                    return self.resolve_for_how(local_path, edge, &from_local, after_add);
                }
                IntegrateOutcome::RecognizedWarning(Remedy::AddFlag(flag)) => {
                    if !flags.iter().any(|f| f == flag) {
                        flags.push(flag.to_string());
                    }
                }
                IntegrateOutcome::RecognizedWarning(Remedy::ShrinkRange) => {
                    if end_rev > start_rev {
                        end_rev -= 1;
                    } else {
                        break;
                    }
                }
                IntegrateOutcome::Unrecognized(detail) => {
                    return Err(TargetReplayerError::UnrecognizedIntegrationFailure {
                        depot_path: edge.from_path.as_str().to_string(),
                        detail,
                    });
                }
            }
        }
        self.resolve_for_how(local_path, edge, &from_local, after_add)
    }

    fn resolve_for_how(
        &mut self,
        local_path: &str,
        edge: &Integration,
        from_local: &str,
        after_add: &mut bool,
    ) -> Result<(), TargetReplayerError> {
        match edge.how {
            How::AddFrom => {
                if from_local == local_path {
                    self.client.run("add", &[local_path])?;
                } else {
                    // The edge names a different source path than the
                    // target it lands on: a plain `add` would lose the
                    // branch lineage, so recreate it explicitly.
                    self.client.set_exception_level(ExceptionLevel::Ignore);
                    self.client.run("sync", &["-k", local_path])?;
                    self.client.set_exception_level(ExceptionLevel::Default);
                    self.client.run("add", &[local_path])?;
                    self.client.run("move", &[from_local, local_path])?;
                }
                *after_add = true;
            }
            How::EditFrom => {
                EditPayloadResolve.apply(self.client, local_path)?;
            }
            How::CopyFrom => {
                let resolved = self.client.run("resolve", &["-at", local_path])?;
                if resolved.has_warning_matching("still differ") {
                    self.client.run("edit", &[local_path])?;
                }
            }
            How::MergeFrom => {
                AutoMergeResolve.apply(self.client, local_path)?;
            }
            How::Ignored => {
                let resolved = self.client.run("resolve", &["-ay", local_path])?;
                if resolved.has_warning_matching("delete") {
                    self.client.run("revert", &[local_path])?;
                    self.client.run("integrate", &["-Rb", local_path])?;
                }
            }
            How::DeleteFrom => {
                self.client.run("resolve", &["-ay", local_path])?;
            }
            How::BranchFrom => {
                self.client.run("resolve", &["-at", "-f", local_path])?;
            }
            How::BranchInto | How::MovedInto | How::MovedFrom => {}
        }
        Ok(())
    }

    /// Enumerates opened files and reopens any whose type differs from the
    /// expected source type.
    fn reconcile_filetypes(&mut self, change: &Change) -> Result<(), TargetReplayerError> {
        let opened = self.client.run("opened", &[])?;
        for record in &opened.records {
            let Some(opened_path) = record.get("depotFile") else {
                continue;
            };
            let Some(revision) = change
                .revisions
                .iter()
                .find(|r| r.local_path.as_deref() == Some(opened_path))
            else {
                continue;
            };
            let expected = revision.file_type.to_string();
            if record.get("type") == Some(expected.as_str()) {
                continue;
            }
            if revision.file_type.modifiers.exclusive_lock {
                self.client.run("revert", &["-k", opened_path])?;
                self.client.run("add", &["-t", &expected, opened_path])?;
            } else {
                self.client.run("reopen", &["-t", &expected, opened_path])?;
            }
        }
        Ok(())
    }

    fn submit_with_recovery(
        &mut self,
        source_change: u64,
        description: &str,
        used_rename_of_deleted_or_resolve_delete: bool,
    ) -> Result<u64, TargetReplayerError> {
        let output = self.client.run("submit", &["-d", description])?;
        if let Some(change) = submitted_change_id(&output) {
            return Ok(change);
        }

        if used_rename_of_deleted_or_resolve_delete && output.has_warning_matching("out of date") {
            let opened = self.client.run("opened", &[])?;
            for record in &opened.records {
                if let Some(path) = record.get("depotFile") {
                    self.client.set_exception_level(ExceptionLevel::Ignore);
                    self.client.run("sync", &[path])?;
                    self.client.set_exception_level(ExceptionLevel::Default);
                }
            }
            let retry = self.client.run("submit", &["-d", description])?;
            if let Some(change) = submitted_change_id(&retry) {
                return Ok(change);
            }
        }

        if output.has_warning_matching("content translation") {
            let opened = self.client.run("opened", &[])?;
            for record in &opened.records {
                if let Some(path) = record.get("depotFile") {
                    self.client.run("reopen", &["-t", "binary", path])?;
                }
            }
            let retry = self.client.run("submit", &["-d", description])?;
            if let Some(change) = submitted_change_id(&retry) {
                return Ok(change);
            }
        }

        Err(TargetReplayerError::SubmitFailed {
            source_change,
            detail: output
                .warnings
                .first()
                .map(|w| w.0.clone())
                .unwrap_or_else(|| "submit produced no change record".to_string()),
        })
    }

    /// Overwrites `_user`/`_date` on the submitted change to match the
    /// source timestamp, if the configured target user has admin rights.
    fn backdate(&mut self, target_change: u64, change: &Change) -> Result<(), TargetReplayerError> {
        let mut spec = self.client.fetch_spec("change", &target_change.to_string())?;
        spec.fields.insert("User".to_string(), change.user.clone());
        spec.fields.insert(
            "Date".to_string(),
            change.timestamp.format("%Y/%m/%d %H:%M:%S").to_string(),
        );
        self.client.save_spec("change", &spec)?;
        Ok(())
    }
}

fn classify_outcome(output: &CommandOutput) -> IntegrateOutcome {
    for warning in &output.warnings {
        if let Some(remedy) = classify_integration_warning(&warning.0) {
            return IntegrateOutcome::RecognizedWarning(remedy);
        }
    }
    if output.warnings.is_empty() {
        IntegrateOutcome::Success(output.clone())
    } else {
        IntegrateOutcome::Unrecognized(output.warnings[0].0.clone())
    }
}

fn submitted_change_id(output: &CommandOutput) -> Option<u64> {
    output
        .records
        .first()
        .and_then(|r| r.get("change"))
        .and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointConfig;
    use crate::depot_path::ViewLine;
    use crate::filetype::FileType;
    use crate::repo_client::FakeRepoClient;
    use crate::repo_client::Record;
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use chrono::Utc;

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

    fn config() -> Config {
        Config {
            counter_name: "relay".to_string(),
            case_sensitive: true,
            historical_start_change: None,
            poll_interval: 30,
            sleep_on_error_interval: 5,
            report_interval: 3600,
            error_report_interval: 3600,
            summary_report_interval: 86400,
            max_logfile_size: 10_000_000,
            change_batch_size: 1000,
            sync_progress_size_interval: 1_000_000,
            change_description_format: "$sourceDescription".to_string(),
            change_map_file: None,
            superuser: false,
            ignore_files: Vec::new(),
            views: Vec::new(),
            workspace_root: std::path::PathBuf::from("/tmp/relay"),
            source: EndpointConfig {
                port: "source:1666".to_string(),
                user: "relay".to_string(),
                client: "relay_source".to_string(),
                password: None,
                charset: "none".to_string(),
            },
            target: EndpointConfig {
                port: "target:1667".to_string(),
                user: "relay".to_string(),
                client: "relay_target".to_string(),
                password: None,
                charset: "none".to_string(),
            },
        }
    }

    fn revision(local_path: &str, action: Action) -> Revision {
        Revision {
            depot_path: crate::depot_path::DepotPath::new(format!("//depot/main/{local_path}")),
            local_path: Some(local_path.to_string()),
            rev: 1,
            action,
            file_type: FileType::plain_text(),
            size: None,
            digest: None,
            integrations: Vec::new(),
        }
    }

    fn change(revisions: Vec<Revision>) -> Change {
        Change {
            source_id: 42,
            user: "alice".to_string(),
            timestamp: Utc.timestamp_opt(0, 0).single().unwrap(),
            description: "a change".to_string(),
            revisions,
        }
    }

    #[test]
    fn plain_add_then_submit_returns_target_change() {
        let mut client = FakeRepoClient::new();
        client.stub(
            "submit -d a change",
            crate::repo_client::CommandOutput {
                records: vec![Record {
                    fields: [("change".to_string(), "100".to_string())].into(),
                }],
                warnings: vec![],
            },
        );
        client.connect().unwrap();
        let view = view();
        let config = config();
        let mut replayer = TargetReplayer::new(&mut client, &view, &config, false, None);
        let change = change(vec![revision("a", Action::Add)]);
        let outcome = replayer.replay(&change, &[]).unwrap();
        assert_eq!(outcome.target_change, Some(100));
    }

    #[test]
    fn integration_warning_adds_flag_and_retries() {
        let output_without_flag = classify_outcome(&CommandOutput {
            records: vec![],
            warnings: vec![crate::repo_client::Warning(
                "can't integrate without -i flag set".to_string(),
            )],
        });
        assert_matches!(
            output_without_flag,
            IntegrateOutcome::RecognizedWarning(Remedy::AddFlag("-i"))
        );
    }

    #[test]
    fn unrecognized_warning_is_reported_verbatim() {
        let outcome = classify_outcome(&CommandOutput {
            records: vec![],
            warnings: vec![crate::repo_client::Warning("completely novel failure".to_string())],
        });
        assert_matches!(outcome, IntegrateOutcome::Unrecognized(_));
    }

    #[test]
    fn archive_revision_is_recorded_as_ignored() {
        let mut client = FakeRepoClient::new();
        client.stub(
            "submit -d a change",
            crate::repo_client::CommandOutput {
                records: vec![Record {
                    fields: [("change".to_string(), "5".to_string())].into(),
                }],
                warnings: vec![],
            },
        );
        client.connect().unwrap();
        let view = view();
        let config = config();
        let mut replayer = TargetReplayer::new(&mut client, &view, &config, false, None);
        let change = change(vec![revision("archived", Action::Archive)]);
        let outcome = replayer.replay(&change, &[]).unwrap();
        assert_eq!(outcome.ignored_paths, vec!["archived".to_string()]);
    }
}
