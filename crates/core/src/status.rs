// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job status state set.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a job.
///
/// A job moves `Ready → Running → {Succeeded | Failed} → End`, with a retry
/// arc from `Failed` back to `Ready` while retry credits remain. `Paused` is
/// reachable only when an external queueing layer aborts and parks a job;
/// the core itself never initiates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ready,
    Running,
    Paused,
    Succeeded,
    Failed,
    End,
}

impl Status {
    /// True once the job has a final outcome (`Succeeded`, `Failed`, or `End`).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Succeeded | Status::Failed | Status::End)
    }

    /// True only for `End`, the last status a job ever publishes.
    pub fn is_end(&self) -> bool {
        matches!(self, Status::End)
    }
}

crate::simple_display! {
    Status {
        Ready => "ready",
        Running => "running",
        Paused => "paused",
        Succeeded => "succeeded",
        Failed => "failed",
        End => "end",
    }
}

impl std::str::FromStr for Status {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ready" => Ok(Status::Ready),
            "running" => Ok(Status::Running),
            "paused" => Ok(Status::Paused),
            "succeeded" => Ok(Status::Succeeded),
            "failed" => Ok(Status::Failed),
            "end" => Ok(Status::End),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

/// A status string outside the closed set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status {0:?}")]
pub struct UnknownStatus(pub String);

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
