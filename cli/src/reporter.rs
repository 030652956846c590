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

//! Notification on the error-report/recovery boundaries the Scheduler
//! tracks. SMTP/HTTP transports are an explicit non-goal;
//! [`TracingReporter`] is the only implementation, and a second one would
//! plug in here without touching the Scheduler.

/// A destination for operator-facing notifications. Distinct from the
/// ordinary `tracing` event stream because these calls mark a boundary
/// (first error since recovery, or recovery itself) rather than every
/// occurrence.
pub trait Reporter {
    fn error_detected(&mut self, source_change: u64, detail: &str);
    fn recovered(&mut self, source_change: u64);
    fn summary(&mut self, changes_replicated: u64, last_change: u64);
}

/// Logs notifications at `warn`/`info` rather than sending mail. Kept
/// separate from the blanket `tracing::warn!` calls scattered through the
/// engine so that a future SMTP/HTTP `Reporter` only has to implement this
/// trait, not rewire every call site.
#[derive(Debug, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn error_detected(&mut self, source_change: u64, detail: &str) {
        tracing::warn!(source_change, detail, "error reporting threshold reached");
    }

    fn recovered(&mut self, source_change: u64) {
        tracing::info!(source_change, "recovered after prior error");
    }

    fn summary(&mut self, changes_replicated: u64, last_change: u64) {
        tracing::info!(changes_replicated, last_change, "summary report");
    }
}
