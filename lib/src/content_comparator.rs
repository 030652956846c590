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

//! Decides whether two file revisions on source and target can be declared
//! equivalent, using the more permissive rule that a "purged" marker on
//! either side is treated as a match rather than a mismatch.

use std::sync::LazyLock;

use regex::Regex;

use crate::filetype::FileType;

/// The well-known placeholder content a source repository writes in place
/// of a file whose original content was intentionally discarded. Always of
/// size 11 with this fixed digest.
pub const PURGED_MARKER_SIZE: u64 = 11;
pub const PURGED_MARKER_DIGEST: &str = "00000000000000000000000000000000";

/// One side of a comparison: the minimum a `ContentComparator` needs, which
/// is exactly what `ChangeModel::Revision` already carries.
#[derive(Debug, Clone)]
pub struct ComparableRevision<'a> {
    pub file_type: FileType,
    pub size: Option<u64>,
    pub digest: Option<&'a str>,
    /// Populated only when a keyword-aware digest must be recomputed locally
    /// (ktext revisions): the file's on-disk bytes.
    pub content: Option<&'a [u8]>,
}

/// Host operating system family, relevant only to the "OS mismatch" row of
/// the decision table (line-ending translation cannot be verified without
/// decoding, so it is treated as equal rather than flagged incorrect).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOs {
    Unix,
    Windows,
}

static KEYWORD_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(Id|Header|Date|Change|File|Revision|Author|DateTime)\b").unwrap()
});

/// Computes a digest over `content` ignoring any line that contains one of
/// the keyword-expansion tokens.
pub fn keyword_masked_digest(content: &[u8]) -> String {
    use std::fmt::Write as _;

    let text = String::from_utf8_lossy(content);
    let mut hasher = SimpleHasher::new();
    for line in text.lines() {
        if KEYWORD_LINE.is_match(line) {
            continue;
        }
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    let mut out = String::with_capacity(16);
    for byte in hasher.finish() {
        write!(out, "{byte:02x}").unwrap();
    }
    out
}

/// A small non-cryptographic rolling hash. The real digest algorithm is the
/// source repository's own (MD5-compatible); this crate only needs a stable
/// function to compare *locally recomputed* keyword-masked content against
/// itself, since cross-repository digests are never compared byte-for-byte
/// once keyword expansion is in play.
struct SimpleHasher {
    state: [u64; 2],
}

impl SimpleHasher {
    fn new() -> Self {
        Self {
            state: [0xcbf29ce484222325, 0x100000001b3],
        }
    }

    fn update(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.state[0] ^= b as u64;
            self.state[0] = self.state[0].wrapping_mul(self.state[1]);
        }
    }

    fn finish(self) -> [u8; 8] {
        self.state[0].to_be_bytes()
    }
}

/// Result of a comparison, with enough detail for
/// [`crate::equivalence::EquivalenceChecker`] to report a useful mismatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Equal,
    Different { reason: String },
}

impl Verdict {
    pub fn is_equal(&self) -> bool {
        matches!(self, Self::Equal)
    }
}

/// Implements the file-type-aware equivalence decision table.
pub struct ContentComparator {
    pub source_os: HostOs,
    pub target_os: HostOs,
}

impl ContentComparator {
    pub fn new(source_os: HostOs, target_os: HostOs) -> Self {
        Self {
            source_os,
            target_os,
        }
    }

    pub fn compare(&self, a: &ComparableRevision<'_>, b: &ComparableRevision<'_>) -> Verdict {
        if is_purged(a) || is_purged(b) {
            return Verdict::Equal;
        }

        if a.file_type.is_utf16() || b.file_type.is_utf16() {
            if let (Some(sa), Some(sb)) = (a.size, b.size) {
                let delta = sa.abs_diff(sb);
                if delta < 5 {
                    return Verdict::Equal;
                }
                return Verdict::Different {
                    reason: format!("utf16 sizes differ by {delta} bytes (>= 5)"),
                };
            }
            return Verdict::Different {
                reason: "utf16 revision missing size".to_string(),
            };
        }

        if a.file_type.is_text_like() && a.file_type.is_keyword_expanded() {
            return self.compare_keyword_text(a, b);
        }

        if a.file_type.is_text_like() && self.source_os != self.target_os {
            return Verdict::Equal;
        }

        self.compare_size_and_digest(a, b)
    }

    fn compare_keyword_text(
        &self,
        a: &ComparableRevision<'_>,
        b: &ComparableRevision<'_>,
    ) -> Verdict {
        match (a.content, b.content) {
            (Some(ca), Some(cb)) => {
                let da = keyword_masked_digest(ca);
                let db = keyword_masked_digest(cb);
                if da == db {
                    Verdict::Equal
                } else {
                    Verdict::Different {
                        reason: "keyword-masked digests differ".to_string(),
                    }
                }
            }
            _ => Verdict::Different {
                reason: "keyword-expanded revision missing content to mask".to_string(),
            },
        }
    }

    fn compare_size_and_digest(
        &self,
        a: &ComparableRevision<'_>,
        b: &ComparableRevision<'_>,
    ) -> Verdict {
        match (a.size, a.digest, b.size, b.digest) {
            (Some(sa), Some(da), Some(sb), Some(db)) if sa == sb && da == db => Verdict::Equal,
            (Some(sa), _, Some(sb), _) if sa != sb => Verdict::Different {
                reason: format!("size mismatch: {sa} vs {sb}"),
            },
            (_, Some(da), _, Some(db)) if da != db => Verdict::Different {
                reason: "digest mismatch".to_string(),
            },
            _ => Verdict::Different {
                reason: "missing size or digest".to_string(),
            },
        }
    }
}

fn is_purged(r: &ComparableRevision<'_>) -> bool {
    r.size == Some(PURGED_MARKER_SIZE) && r.digest == Some(PURGED_MARKER_DIGEST)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filetype::BaseType;
    use crate::filetype::TypeModifiers;

    fn binary_rev<'a>(size: u64, digest: &'a str) -> ComparableRevision<'a> {
        ComparableRevision {
            file_type: FileType::binary(),
            size: Some(size),
            digest: Some(digest),
            content: None,
        }
    }

    #[test]
    fn binary_equal_iff_size_and_digest_match() {
        let cmp = ContentComparator::new(HostOs::Unix, HostOs::Unix);
        assert!(cmp.compare(&binary_rev(10, "abc"), &binary_rev(10, "abc")).is_equal());
        assert!(!cmp.compare(&binary_rev(10, "abc"), &binary_rev(11, "abc")).is_equal());
        assert!(!cmp.compare(&binary_rev(10, "abc"), &binary_rev(10, "def")).is_equal());
    }

    #[test]
    fn purged_marker_is_always_equal() {
        let cmp = ContentComparator::new(HostOs::Unix, HostOs::Unix);
        let purged = binary_rev(PURGED_MARKER_SIZE, PURGED_MARKER_DIGEST);
        assert!(cmp.compare(&purged, &binary_rev(9999, "whatever")).is_equal());
    }

    #[test]
    fn utf16_small_size_delta_is_equal() {
        let cmp = ContentComparator::new(HostOs::Unix, HostOs::Unix);
        let utf16 = FileType::new(BaseType::Utf16, TypeModifiers::default());
        let a = ComparableRevision {
            file_type: utf16,
            size: Some(100),
            digest: Some("x"),
            content: None,
        };
        let b = ComparableRevision {
            file_type: utf16,
            size: Some(102),
            digest: Some("y"),
            content: None,
        };
        assert!(cmp.compare(&a, &b).is_equal());
        let c = ComparableRevision {
            size: Some(106),
            ..b
        };
        assert!(!cmp.compare(&a, &c).is_equal());
    }

    #[test]
    fn text_os_mismatch_without_keywords_is_treated_equal() {
        let cmp = ContentComparator::new(HostOs::Unix, HostOs::Windows);
        let a = ComparableRevision {
            file_type: FileType::plain_text(),
            size: Some(5),
            digest: Some("aaa"),
            content: None,
        };
        let b = ComparableRevision {
            size: Some(6),
            digest: Some("bbb"),
            ..a
        };
        assert!(cmp.compare(&a, &b).is_equal());
    }

    #[test]
    fn keyword_digest_ignores_marked_lines() {
        let a = b"plain\n$Id: 1 $\nmore\n";
        let b = b"plain\n$Id: 2 $\nmore\n";
        assert_eq!(keyword_masked_digest(a), keyword_masked_digest(b));
    }

    #[test]
    fn keyword_text_compares_via_masked_digest() {
        let cmp = ContentComparator::new(HostOs::Unix, HostOs::Unix);
        let ktext = FileType::new(
            BaseType::Text,
            TypeModifiers {
                keyword_expand: true,
                ..Default::default()
            },
        );
        let a = ComparableRevision {
            file_type: ktext,
            size: Some(20),
            digest: Some("aaa"),
            content: Some(b"line\n$Id: 1 $\n"),
        };
        let b = ComparableRevision {
            size: Some(21),
            digest: Some("bbb"),
            content: Some(b"line\n$Id: 2 $\n"),
            ..a
        };
        assert!(cmp.compare(&a, &b).is_equal());
    }
}
