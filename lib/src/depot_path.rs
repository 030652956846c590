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

//! `View`: an ordered, possibly exclusionary map between depot paths and
//! workspace-local paths. Case-sensitivity is a cross-cutting concern,
//! centralized here rather than re-checked at every path comparison site.

use std::fmt;

use serde::Deserialize;

/// A path as known to the repository, always forward-slash separated and
/// rooted at `//`, e.g. `//depot/main/src/lib.rs`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DepotPath(String);

impl DepotPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compares two depot paths under the given case policy.
    pub fn eq_under(&self, other: &Self, case_sensitive: bool) -> bool {
        if case_sensitive {
            self.0 == other.0
        } else {
            self.0.eq_ignore_ascii_case(&other.0)
        }
    }

    /// A copy of this path lowercased, for use as a case-insensitive map key.
    pub fn case_key(&self, case_sensitive: bool) -> String {
        if case_sensitive {
            self.0.clone()
        } else {
            self.0.to_ascii_lowercase()
        }
    }
}

impl fmt::Display for DepotPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A path relative to the workspace root on a repository endpoint, separated
/// the way the host OS expects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalPath(String);

impl LocalPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One line of a view: a depot path prefix, optionally excluded, mapped to a
/// client-relative prefix. Lines are matched in order, last match wins,
/// mirroring how the source repository's own view resolution works.
#[derive(Debug, Clone, Deserialize)]
pub struct ViewLine {
    pub src: String,
    pub targ: String,
    /// An excluded line (conventionally written with a `-` prefix in
    /// configuration) removes matching paths from the mapping rather than
    /// mapping them.
    #[serde(default)]
    pub exclude: bool,
}

/// The ordered view mapping for one repository endpoint, plus the case
/// policy used to interpret it. Constructed once per run from
/// `Config::views`.
#[derive(Debug, Clone)]
pub struct View {
    lines: Vec<ViewLine>,
    case_sensitive: bool,
}

impl View {
    pub fn new(lines: Vec<ViewLine>, case_sensitive: bool) -> Self {
        Self {
            lines,
            case_sensitive,
        }
    }

    /// A view containing a single dummy mapping line that matches nothing
    /// real, used on the target to suppress implicit auto-sync during fetch
    /// operations that would otherwise pull unwanted data.
    pub fn dummy(client_root: impl Into<String>) -> Self {
        Self {
            lines: vec![ViewLine {
                src: "//__relay_dummy__/...".to_string(),
                targ: format!("{}/__relay_dummy__/...", client_root.into()),
                exclude: false,
            }],
            case_sensitive: true,
        }
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Maps a depot path to a client-relative local path, or `None` if no
    /// view line includes it (or the last matching line excludes it).
    pub fn map_to_local(&self, depot_path: &DepotPath) -> Option<LocalPath> {
        let mut result = None;
        for line in &self.lines {
            if let Some(suffix) = strip_view_prefix(depot_path.as_str(), &line.src, self.case_sensitive) {
                if line.exclude {
                    result = None;
                } else {
                    let targ = line.targ.trim_end_matches("...").trim_end_matches('/');
                    result = Some(LocalPath::new(format!("{targ}/{suffix}")));
                }
            }
        }
        result
    }

    pub fn lines(&self) -> &[ViewLine] {
        &self.lines
    }
}

fn strip_view_prefix(depot_path: &str, view_src: &str, case_sensitive: bool) -> Option<String> {
    let prefix = view_src.trim_end_matches("...").trim_end_matches('/');
    let matches = if case_sensitive {
        depot_path.starts_with(prefix)
    } else {
        depot_path.len() >= prefix.len()
            && depot_path[..prefix.len()].eq_ignore_ascii_case(prefix)
    };
    if !matches {
        return None;
    }
    Some(depot_path[prefix.len()..].trim_start_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(src: &str, targ: &str, exclude: bool) -> ViewLine {
        ViewLine {
            src: src.to_string(),
            targ: targ.to_string(),
            exclude,
        }
    }

    #[test]
    fn maps_simple_prefix() {
        let view = View::new(vec![line("//depot/main/...", "main", false)], true);
        let mapped = view
            .map_to_local(&DepotPath::new("//depot/main/src/lib.rs"))
            .unwrap();
        assert_eq!(mapped.as_str(), "main/src/lib.rs");
    }

    #[test]
    fn last_matching_line_wins_and_exclusion_removes() {
        let view = View::new(
            vec![
                line("//depot/main/...", "main", false),
                line("//depot/main/secrets/...", "main/secrets", true),
            ],
            true,
        );
        assert!(
            view.map_to_local(&DepotPath::new("//depot/main/secrets/key"))
                .is_none()
        );
        assert!(
            view.map_to_local(&DepotPath::new("//depot/main/src/lib.rs"))
                .is_some()
        );
    }

    #[test]
    fn case_insensitive_matching() {
        let view = View::new(vec![line("//Depot/Main/...", "main", false)], false);
        assert!(
            view.map_to_local(&DepotPath::new("//depot/main/SRC/lib.rs"))
                .is_some()
        );
    }
}
