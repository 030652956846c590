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

//! Core engine for one-way replication of submitted changes from a source
//! version-control repository to an independent target repository.
//!
//! This crate contains no scheduling loop and no process entry point; see
//! the `relay-cli` crate for the unattended service that drives it.

pub mod change;
pub mod change_map;
pub mod config;
pub mod content_comparator;
pub mod counter;
pub mod depot_path;
pub mod equivalence;
pub mod error;
pub mod file_util;
pub mod filetype;
pub mod move_tracker;
pub mod repo_client;
pub mod source_reader;
pub mod target_replayer;

pub use error::LogicError;
pub use error::TransientError;
