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

//! Canonical filetype as tracked on a revision. Each attribute implies its
//! own comparison strategy, and the invariant that the
//! filetype stored on the target must equal the source's at submit time.

use std::fmt;

/// Base storage kind, orthogonal to the keyword/EOL modifiers below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseType {
    Text,
    Binary,
    Unicode,
    Utf16,
    Symlink,
}

/// Modifiers layered onto a [`BaseType`], mirroring the `+x` style suffix
/// modifiers a source repository attaches to a filetype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TypeModifiers {
    /// Keyword expansion is enabled (`ktext`/`kxtext`): `$Id$`-style tokens
    /// are substituted on write and must be digest-masked when compared.
    pub keyword_expand: bool,
    /// Content is stored outside the revision history proper ("archive").
    pub archived: bool,
    /// Exclusive-checkout lock (`+l`). Reopening across this attribute
    /// requires a revert-keep + re-add/edit sequence rather than a plain
    /// reopen during filetype reconciliation.
    pub exclusive_lock: bool,
    pub executable: bool,
}

/// A fully-resolved filetype: base kind plus modifiers. `Eq` on this type is
/// exactly the "canonical form" equality required when comparing filetypes
/// across source and target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileType {
    pub base: BaseType,
    pub modifiers: TypeModifiers,
}

impl FileType {
    pub fn new(base: BaseType, modifiers: TypeModifiers) -> Self {
        Self { base, modifiers }
    }

    pub fn plain_text() -> Self {
        Self::new(BaseType::Text, TypeModifiers::default())
    }

    pub fn binary() -> Self {
        Self::new(BaseType::Binary, TypeModifiers::default())
    }

    pub fn is_text_like(&self) -> bool {
        matches!(self.base, BaseType::Text | BaseType::Unicode)
    }

    pub fn is_utf16(&self) -> bool {
        self.base == BaseType::Utf16
    }

    pub fn is_keyword_expanded(&self) -> bool {
        self.modifiers.keyword_expand
    }

    /// Parses the compact string form a repository's own tooling prints,
    /// e.g. `text`, `ktext`, `binary+x`, `utf16`, `symlink`.
    pub fn parse(s: &str) -> Option<Self> {
        let (base_str, modifiers_str) = s.split_once('+').unwrap_or((s, ""));
        let (base, keyword_expand) = match base_str {
            "text" => (BaseType::Text, false),
            "ktext" | "kxtext" => (BaseType::Text, true),
            "binary" => (BaseType::Binary, false),
            "unicode" => (BaseType::Unicode, false),
            "utf16" => (BaseType::Utf16, false),
            "symlink" => (BaseType::Symlink, false),
            _ => return None,
        };
        let mut modifiers = TypeModifiers {
            keyword_expand,
            ..Default::default()
        };
        for flag in modifiers_str.chars() {
            match flag {
                'l' => modifiers.exclusive_lock = true,
                'x' => modifiers.executable = true,
                'A' | 'S' => modifiers.archived = true,
                _ => {}
            }
        }
        Some(Self { base, modifiers })
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = match self.base {
            BaseType::Text if self.modifiers.keyword_expand => "ktext",
            BaseType::Text => "text",
            BaseType::Binary => "binary",
            BaseType::Unicode => "unicode",
            BaseType::Utf16 => "utf16",
            BaseType::Symlink => "symlink",
        };
        write!(f, "{base}")?;
        if self.modifiers.exclusive_lock {
            write!(f, "+l")?;
        }
        if self.modifiers.executable {
            write!(f, "+x")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays_round_trip() {
        for s in ["text", "ktext", "binary+x", "utf16", "symlink", "text+l"] {
            let parsed = FileType::parse(s).unwrap();
            assert_eq!(parsed.to_string(), s);
        }
    }

    #[test]
    fn ktext_is_keyword_expanded_text() {
        let ft = FileType::parse("ktext").unwrap();
        assert!(ft.is_text_like());
        assert!(ft.is_keyword_expanded());
    }

    #[test]
    fn unknown_base_is_rejected() {
        assert!(FileType::parse("bogus").is_none());
    }
}
