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

//! In-memory representation of a change and its revisions. Pure data, no
//! I/O — produced by
//! [`crate::source_reader::SourceReader`] and reconstructed by
//! [`crate::equivalence::EquivalenceChecker`] from a target describe record.

use std::fmt;

use crate::depot_path::DepotPath;
use crate::filetype::FileType;

/// The verb attached to one file revision within a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Add,
    Edit,
    Delete,
    Branch,
    Integrate,
    MoveAdd,
    MoveDelete,
    Purge,
    Archive,
    Import,
}

impl Action {
    /// Revisions whose integration lineage must be resolved by a follow-up
    /// history lookup.
    pub fn needs_history_lookup(self) -> bool {
        matches!(
            self,
            Self::Add | Self::Branch | Self::Integrate | Self::Delete | Self::MoveAdd
        )
    }

    pub fn is_move(self) -> bool {
        matches!(self, Self::MoveAdd | Self::MoveDelete)
    }

    /// Parses the action verb as printed in a describe record.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "add" => Self::Add,
            "edit" => Self::Edit,
            "delete" => Self::Delete,
            "branch" => Self::Branch,
            "integrate" => Self::Integrate,
            "move/add" => Self::MoveAdd,
            "move/delete" => Self::MoveDelete,
            "purge" => Self::Purge,
            "archive" => Self::Archive,
            "import" => Self::Import,
            _ => return None,
        })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "add",
            Self::Edit => "edit",
            Self::Delete => "delete",
            Self::Branch => "branch",
            Self::Integrate => "integrate",
            Self::MoveAdd => "move/add",
            Self::MoveDelete => "move/delete",
            Self::Purge => "purge",
            Self::Archive => "archive",
            Self::Import => "import",
        })
    }
}

/// The lineage verb on an [`Integration`] edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum How {
    BranchFrom,
    BranchInto,
    AddFrom,
    EditFrom,
    CopyFrom,
    MergeFrom,
    Ignored,
    DeleteFrom,
    MovedFrom,
    MovedInto,
}

impl How {
    /// Integration edges are retained only when `how` is "from" or
    /// "ignored" — edges pointing the other direction (`*Into`) describe
    /// lineage recorded on the *other* file.
    pub fn is_retained_for_integration(self) -> bool {
        !matches!(self, Self::BranchInto | Self::MovedInto)
    }

    /// Parses the verb as printed in a filelog/history record.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "branch from" => Self::BranchFrom,
            "branch into" => Self::BranchInto,
            "add from" => Self::AddFrom,
            "edit from" => Self::EditFrom,
            "copy from" => Self::CopyFrom,
            "merge from" => Self::MergeFrom,
            "ignored" => Self::Ignored,
            "delete from" => Self::DeleteFrom,
            "moved from" => Self::MovedFrom,
            "moved into" => Self::MovedInto,
            _ => return None,
        })
    }
}

impl fmt::Display for How {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BranchFrom => "branch from",
            Self::BranchInto => "branch into",
            Self::AddFrom => "add from",
            Self::EditFrom => "edit from",
            Self::CopyFrom => "copy from",
            Self::MergeFrom => "merge from",
            Self::Ignored => "ignored",
            Self::DeleteFrom => "delete from",
            Self::MovedFrom => "moved from",
            Self::MovedInto => "moved into",
        })
    }
}

/// A directed lineage record connecting a revision to a range of revisions
/// on another file.
#[derive(Debug, Clone)]
pub struct Integration {
    pub how: How,
    pub from_path: DepotPath,
    pub start_rev: u32,
    pub end_rev: u32,
    /// `None` when `from_path` falls outside the configured view — such an
    /// integration is treated as content-only.
    pub local_from_path: Option<String>,
}

impl Integration {
    /// Applies the historical-start rebasing rule: shifts `end_rev` down by
    /// `first_kept_rev - 1` and reports whether the edge survives
    /// (`end_rev > 0`).
    pub fn rebase_for_historical_start(&mut self, first_kept_rev: u32) -> bool {
        if first_kept_rev <= 1 {
            return true;
        }
        let shift = first_kept_rev - 1;
        if self.end_rev <= shift {
            return false;
        }
        self.end_rev -= shift;
        self.start_rev = self.start_rev.saturating_sub(shift).max(1);
        true
    }
}

/// One file's state at one change.
#[derive(Debug, Clone)]
pub struct Revision {
    pub depot_path: DepotPath,
    pub local_path: Option<String>,
    pub rev: u32,
    pub action: Action,
    pub file_type: FileType,
    pub size: Option<u64>,
    pub digest: Option<String>,
    pub integrations: Vec<Integration>,
}

impl Revision {
    /// Downgrades a move to its plain counterpart when its partner falls
    /// outside the view.
    pub fn downgrade_move(&mut self) {
        self.action = match self.action {
            Action::MoveAdd => Action::Add,
            Action::MoveDelete => Action::Delete,
            other => other,
        };
    }

    /// Prunes integration edges whose revision range was rebased to empty.
    pub fn rebase_integrations(&mut self, first_kept_rev: u32) {
        self.integrations
            .retain_mut(|edge| edge.rebase_for_historical_start(first_kept_rev));
    }
}

/// An atomic, ordered set of file revisions submitted together at the
/// source; the unit of replication.
#[derive(Debug, Clone)]
pub struct Change {
    pub source_id: u64,
    pub user: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub description: String,
    pub revisions: Vec<Revision>,
}

impl Change {
    pub fn revision(&self, depot_path: &DepotPath) -> Option<&Revision> {
        self.revisions
            .iter()
            .find(|r| &r.depot_path == depot_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(how: How, end_rev: u32) -> Integration {
        Integration {
            how,
            from_path: DepotPath::new("//depot/main/a"),
            start_rev: 1,
            end_rev,
            local_from_path: Some("main/a".to_string()),
        }
    }

    #[test]
    fn historical_start_rebases_range() {
        let mut e = edge(How::EditFrom, 5);
        assert!(e.rebase_for_historical_start(3));
        assert_eq!(e.end_rev, 3);
    }

    #[test]
    fn historical_start_drops_fully_shadowed_edge() {
        let mut e = edge(How::EditFrom, 2);
        assert!(!e.rebase_for_historical_start(3));
    }

    #[test]
    fn branch_into_is_not_retained() {
        assert!(!How::BranchInto.is_retained_for_integration());
        assert!(How::BranchFrom.is_retained_for_integration());
        assert!(How::Ignored.is_retained_for_integration());
    }

    #[test]
    fn action_and_how_round_trip_through_protocol_strings() {
        for action in [Action::Add, Action::MoveAdd, Action::MoveDelete, Action::Import] {
            assert_eq!(Action::parse(&action.to_string()), Some(action));
        }
        for how in [How::BranchFrom, How::MovedInto, How::Ignored, How::MergeFrom] {
            assert_eq!(How::parse(&how.to_string()), Some(how));
        }
    }
}
