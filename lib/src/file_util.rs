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

//! Filesystem helpers shared by the counter, change-map, and config loader.

use std::fs;
use std::io;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use tempfile::NamedTempFile;
use tempfile::PersistError;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("cannot access {path}")]
pub struct PathError {
    pub path: PathBuf,
    pub source: io::Error,
}

pub trait IoResultExt<T> {
    fn context(self, path: impl AsRef<Path>) -> Result<T, PathError>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn context(self, path: impl AsRef<Path>) -> Result<T, PathError> {
        self.map_err(|error| PathError {
            path: path.as_ref().to_path_buf(),
            source: error,
        })
    }
}

/// Creates the parent directory of `path` if it doesn't already exist.
pub fn ensure_parent_dir(path: &Path) -> Result<(), PathError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).context(parent)?;
    }
    Ok(())
}

/// Writes `contents` to `path` by way of a temp file in the same directory,
/// then an atomic rename. Used for the counter file and the stop-file probe,
/// where a half-written file would be read as corrupt state on the next
/// poll.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), PathError> {
    ensure_parent_dir(path)?;
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let mut temp_file = match dir {
        Some(dir) => NamedTempFile::new_in(dir),
        None => NamedTempFile::new(),
    }
    .context(path)?;
    use std::io::Write as _;
    temp_file.write_all(contents).context(path)?;
    temp_file.as_file().sync_data().context(path)?;
    temp_file
        .persist(path)
        .map(|_file| ())
        .map_err(|PersistError { error, file: _ }| error)
        .context(path)
}

/// Consumes as much `..` and `.` as possible without considering symlinks.
/// Used to normalize depot-to-local path joins before they are compared or
/// passed to a repository command.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for c in path.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir
                if matches!(result.components().next_back(), Some(Component::Normal(_))) =>
            {
                let popped = result.pop();
                assert!(popped);
            }
            _ => {
                result.push(c);
            }
        }
    }
    if result.as_os_str().is_empty() {
        ".".into()
    } else {
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_too_many_dot_dot() {
        assert_eq!(normalize_path(Path::new("foo/..")), Path::new("."));
        assert_eq!(normalize_path(Path::new("foo/../..")), Path::new(".."));
        assert_eq!(
            normalize_path(Path::new("foo/../../../bar/baz/..")),
            Path::new("../../bar")
        );
    }

    #[test]
    fn write_atomic_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counter");
        write_atomic(&path, b"42").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "42");
        write_atomic(&path, b"43").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "43");
    }

    #[test]
    fn write_atomic_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("counter");
        write_atomic(&path, b"1").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "1");
    }
}
