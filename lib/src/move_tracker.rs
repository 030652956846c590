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

//! Pairs move-add and move-delete events discovered out of order within a
//! single change, modeled as a tagged-union collection
//! (`Entry::{AddOnly,DeleteOnly,Paired}`) folded by
//! `resolve()`.

use std::collections::HashMap;

use crate::change::Action;
use crate::change::How;
use crate::change::Integration;
use crate::change::Revision;
use crate::depot_path::DepotPath;

/// One side of a move pairing, keyed by the depot path its partner names.
#[derive(Debug, Clone)]
enum Entry {
    AddOnly(Revision),
    DeleteOnly(Revision),
    Paired { add: Revision, delete: Revision },
}

/// A move pair held back for the special two-simultaneous-rename replay
/// path ("special-move").
#[derive(Debug, Clone)]
pub struct SpecialMove {
    pub add: Revision,
    pub delete: Revision,
}

/// The resolved result of a change's move bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct ResolvedMoves {
    /// Ordinary renames, matched add/delete pairs.
    pub pairs: Vec<(Revision, Revision)>,
    /// Revisions downgraded because their partner fell outside the view.
    pub downgraded: Vec<Revision>,
    /// Pairs reserved for the branch-with-view side channel.
    pub special: Vec<SpecialMove>,
}

/// Per-change move tracking state machine.
#[derive(Debug, Default)]
pub struct MoveTracker {
    entries: HashMap<String, Entry>,
    case_sensitive: bool,
}

impl MoveTracker {
    pub fn new(case_sensitive: bool) -> Self {
        Self {
            entries: HashMap::new(),
            case_sensitive,
        }
    }

    fn key(&self, path: &DepotPath) -> String {
        path.case_key(self.case_sensitive)
    }

    /// Registers a `move/add` revision, keyed by the depot path its paired
    /// `move/delete` is expected to name (the "moved from" integration
    /// target).
    pub fn track_add(&mut self, rev: Revision, partner_depot_path: &DepotPath) {
        let key = self.key(partner_depot_path);
        let entry = self.entries.remove(&key);
        let merged = match entry {
            None => Entry::AddOnly(rev),
            Some(Entry::DeleteOnly(delete)) => Entry::Paired { add: rev, delete },
            Some(Entry::AddOnly(_)) | Some(Entry::Paired { .. }) => Entry::AddOnly(rev),
        };
        self.entries.insert(key, merged);
    }

    /// Registers a `move/delete` revision, keyed by its own depot path
    /// (which is what the paired `move/add`'s "moved from" edge names).
    pub fn track_delete(&mut self, rev: Revision) {
        let key = self.key(&rev.depot_path);
        let entry = self.entries.remove(&key);
        let merged = match entry {
            None => Entry::DeleteOnly(rev),
            Some(Entry::AddOnly(add)) => Entry::Paired { add, delete: rev },
            Some(Entry::DeleteOnly(_)) | Some(Entry::Paired { .. }) => Entry::DeleteOnly(rev),
        };
        self.entries.insert(key, merged);
    }

    /// Folds the tracked entries into paired renames, downgraded singles,
    /// and special-move reservations.
    pub fn resolve(self) -> ResolvedMoves {
        let mut result = ResolvedMoves::default();
        for entry in self.entries.into_values() {
            match entry {
                Entry::Paired { add, delete } => {
                    if let Some(special) = as_special_move(&add, &delete) {
                        result.special.push(special);
                    } else {
                        result.pairs.push((add, delete));
                    }
                }
                Entry::AddOnly(mut add) => {
                    add.downgrade_move();
                    result.downgraded.push(add);
                }
                Entry::DeleteOnly(mut delete) => {
                    delete.downgrade_move();
                    result.downgraded.push(delete);
                }
            }
        }
        result
    }
}

/// Detects the special-move case: the move/add carries
/// exactly two integration edges (one "moved from", one "copy from") and its
/// partner move/delete has a matching "branch from" edge to a second file.
fn as_special_move(add: &Revision, delete: &Revision) -> Option<SpecialMove> {
    if add.action != Action::MoveAdd || delete.action != Action::MoveDelete {
        return None;
    }
    let [first, second]: [&Integration; 2] = add.integrations.iter().collect::<Vec<_>>().try_into().ok()?;
    let has_moved_from = matches!(first.how, How::MovedFrom) || matches!(second.how, How::MovedFrom);
    let has_copy_from = matches!(first.how, How::CopyFrom) || matches!(second.how, How::CopyFrom);
    if !(has_moved_from && has_copy_from) {
        return None;
    }
    let delete_has_branch_from = delete
        .integrations
        .iter()
        .any(|edge| matches!(edge.how, How::BranchFrom));
    if !delete_has_branch_from {
        return None;
    }
    Some(SpecialMove {
        add: add.clone(),
        delete: delete.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filetype::FileType;

    fn rev(depot_path: &str, action: Action) -> Revision {
        Revision {
            depot_path: DepotPath::new(depot_path),
            local_path: None,
            rev: 1,
            action,
            file_type: FileType::plain_text(),
            size: None,
            digest: None,
            integrations: vec![],
        }
    }

    #[test]
    fn pairs_add_and_delete_regardless_of_arrival_order() {
        let mut tracker = MoveTracker::new(true);
        tracker.track_delete(rev("//depot/main/a", Action::MoveDelete));
        tracker.track_add(
            rev("//depot/main/b", Action::MoveAdd),
            &DepotPath::new("//depot/main/a"),
        );
        let resolved = tracker.resolve();
        assert_eq!(resolved.pairs.len(), 1);
        assert!(resolved.downgraded.is_empty());
    }

    #[test]
    fn unpaired_add_is_downgraded_to_plain_add() {
        let mut tracker = MoveTracker::new(true);
        tracker.track_add(
            rev("//depot/main/b", Action::MoveAdd),
            &DepotPath::new("//depot/main/a"),
        );
        let resolved = tracker.resolve();
        assert!(resolved.pairs.is_empty());
        assert_eq!(resolved.downgraded.len(), 1);
        assert_eq!(resolved.downgraded[0].action, Action::Add);
    }

    #[test]
    fn unpaired_delete_is_downgraded_to_plain_delete() {
        let mut tracker = MoveTracker::new(true);
        tracker.track_delete(rev("//depot/main/a", Action::MoveDelete));
        let resolved = tracker.resolve();
        assert_eq!(resolved.downgraded[0].action, Action::Delete);
    }

    #[test]
    fn case_insensitive_pairing() {
        let mut tracker = MoveTracker::new(false);
        tracker.track_delete(rev("//depot/Main/A", Action::MoveDelete));
        tracker.track_add(
            rev("//depot/main/b", Action::MoveAdd),
            &DepotPath::new("//depot/main/a"),
        );
        let resolved = tracker.resolve();
        assert_eq!(resolved.pairs.len(), 1);
    }

    #[test]
    fn special_move_detected_and_withheld_from_ordinary_pairs() {
        let mut add = rev("//depot/main/b", Action::MoveAdd);
        add.integrations = vec![
            Integration {
                how: How::MovedFrom,
                from_path: DepotPath::new("//depot/main/a"),
                start_rev: 1,
                end_rev: 1,
                local_from_path: Some("main/a".to_string()),
            },
            Integration {
                how: How::CopyFrom,
                from_path: DepotPath::new("//depot/main/c"),
                start_rev: 1,
                end_rev: 1,
                local_from_path: Some("main/c".to_string()),
            },
        ];
        let mut delete = rev("//depot/main/a", Action::MoveDelete);
        delete.integrations = vec![Integration {
            how: How::BranchFrom,
            from_path: DepotPath::new("//depot/main/c"),
            start_rev: 1,
            end_rev: 1,
            local_from_path: Some("main/c".to_string()),
        }];

        let mut tracker = MoveTracker::new(true);
        tracker.track_delete(delete);
        tracker.track_add(add, &DepotPath::new("//depot/main/a"));
        let resolved = tracker.resolve();
        assert!(resolved.pairs.is_empty());
        assert_eq!(resolved.special.len(), 1);
    }
}
