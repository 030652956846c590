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

//! Aggregates every module's error type behind one `CommandError` with
//! config, logic, and transient classes, used to pick the process exit code.

use thiserror::Error;

use relay_lib::error::LogicError;
use relay_lib::error::TransientError;

/// Which of the three classes a [`CommandError`] belongs to, used by `main`
/// to choose the exit code and by the Scheduler to choose whether to back
/// off and retry or abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Logic,
    Transient,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Config(#[from] relay_lib::config::ConfigLoadError),

    #[error(transparent)]
    Logging(#[from] crate::logging::LoggingError),

    #[error(transparent)]
    Logic(#[from] LogicError),

    #[error(transparent)]
    Transient(#[from] TransientError),

    #[error(transparent)]
    Client(#[from] relay_lib::repo_client::RepoClientError),

    #[error(transparent)]
    ChangeMap(#[from] relay_lib::change_map::ChangeMapError),

    #[error(transparent)]
    SourceReader(#[from] relay_lib::source_reader::SourceReaderError),

    #[error(transparent)]
    TargetReplayer(#[from] relay_lib::target_replayer::TargetReplayerError),
}

impl CommandError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::Logging(_) => ErrorKind::Config,
            Self::Logic(_) => ErrorKind::Logic,
            Self::Transient(_) | Self::Client(_) => ErrorKind::Transient,
            Self::ChangeMap(_) => ErrorKind::Transient,
            Self::SourceReader(_) => ErrorKind::Transient,
            Self::TargetReplayer(_) => ErrorKind::Logic,
        }
    }

    /// 0 on success, 1 on a config or logic error. Transient errors never
    /// reach `main` unhandled; the Scheduler absorbs
    /// them into backoff unless `stoponerror` escalates them.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Config | ErrorKind::Logic => 1,
            ErrorKind::Transient => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logic_error_maps_to_logic_kind() {
        let error = CommandError::Logic(LogicError::Internal("boom".to_string()));
        assert_eq!(error.kind(), ErrorKind::Logic);
        assert_eq!(error.exit_code(), 1);
    }
}
