// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Progress records and the indicator callback.

use crate::id::JobId;
use crate::status::Status;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Progress value meaning "indeterminate" (spinner, not a bar).
pub const INDETERMINATE: f64 = -1.0;

/// One observation of a job's externally visible state.
///
/// Records for a given job arrive at the indicator in the order they were
/// produced; `progress` is either in `[0, 1]` or [`INDETERMINATE`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub job_id: JobId,
    pub progress: f64,
    pub description: String,
    pub status: Status,
    pub cancelable: bool,
}

/// The single consumer of progress records.
///
/// Injected at core construction and invoked from the job's event path; it
/// is the integration seam for property-update layers and must return
/// quickly. Passed around as a value — one capability, one operation.
pub type Indicator = Arc<dyn Fn(ProgressRecord) + Send + Sync>;

/// An indicator that drops every record. Useful before a real consumer is
/// attached and in tests that only care about terminal outcomes.
pub fn null_indicator() -> Indicator {
    Arc::new(|_| {})
}
