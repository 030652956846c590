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

//! Tracing setup and the size-based log rotation the Scheduler triggers
//! after every batch. Grounded on the rotation/one-shot-dedup behavior of
//! the original service's logging helper, kept here without the SMTP
//! transport (an explicit non-goal).

use std::fs;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("could not open log file {path}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not rotate log file {path}")]
    Rotate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Installs a `tracing-subscriber` `fmt` layer writing to `log_path`,
/// honoring `RUST_LOG` and falling back to `info`.
pub fn init(log_path: &Path) -> Result<(), LoggingError> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|source| LoggingError::Open {
            path: log_path.to_path_buf(),
            source,
        })?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(move || file.try_clone().expect("log file handle"))
        .with_ansi(false)
        .init();
    Ok(())
}

/// Renames the log file aside (`<name>.1`) and lets the next write reopen a
/// fresh one, if it currently exceeds `max_size` bytes. Called after every
/// batch so the logfile never grows unbounded.
pub fn rotate_if_oversized(log_path: &Path, max_size: u64) -> Result<bool, LoggingError> {
    let metadata = match fs::metadata(log_path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(source) => {
            return Err(LoggingError::Rotate {
                path: log_path.to_path_buf(),
                source,
            })
        }
    };
    if metadata.len() < max_size {
        return Ok(false);
    }
    let rotated = log_path.with_extension("1");
    fs::rename(log_path, &rotated).map_err(|source| LoggingError::Rotate {
        path: log_path.to_path_buf(),
        source,
    })?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotate_is_noop_below_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.log");
        fs::write(&path, b"short").unwrap();
        assert!(!rotate_if_oversized(&path, 1_000_000).unwrap());
    }

    #[test]
    fn rotate_moves_oversized_file_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.log");
        fs::write(&path, vec![0u8; 2048]).unwrap();
        assert!(rotate_if_oversized(&path, 1024).unwrap());
        assert!(!path.exists());
        assert!(path.with_extension("1").exists());
    }

    #[test]
    fn rotate_is_noop_when_file_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.log");
        assert!(!rotate_if_oversized(&path, 10).unwrap());
    }
}
