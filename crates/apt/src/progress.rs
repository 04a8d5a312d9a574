// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parser for the apt-get status-fd protocol.
//!
//! apt-get writes one record per line on the configured status descriptor:
//! `kind:status:progress:description`, colon-separated into exactly four
//! fields. The description may itself contain colons; only the first three
//! separators split.

use upkeepd_core::{JobId, ProgressRecord, Status, INDETERMINATE};

/// A line that could not be mapped to a [`ProgressRecord`].
///
/// Never fatal: the reader logs the line and keeps draining the pipe.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("malformed progress line {line:?}")]
    Malformed { line: String },

    #[error("bad progress value {value:?}")]
    BadProgress { value: String },

    /// `pmconffile`, `media-change`, and anything else outside the table.
    #[error("unhandled status kind {kind:?} in line {line:?}")]
    UnknownKind { kind: String, line: String },
}

/// Parse one status line into a progress record for `job_id`.
pub fn parse_line(job_id: &JobId, line: &str) -> Result<ProgressRecord, ParseError> {
    let fields: Vec<&str> = line.splitn(4, ':').collect();
    let &[kind, status_field, progress_field, description] = fields.as_slice() else {
        return Err(ParseError::Malformed { line: line.to_string() });
    };

    let raw: f64 = progress_field
        .trim()
        .parse()
        .map_err(|_| ParseError::BadProgress { value: progress_field.to_string() })?;

    let (progress, status, cancelable) = match kind {
        "dummy" => {
            let status = status_field
                .parse::<Status>()
                .map_err(|_| ParseError::Malformed { line: line.to_string() })?;
            (raw, status, true)
        }
        "dlstatus" => (raw / 100.0, Status::Running, true),
        // dpkg is committing; an interrupt here would corrupt the database
        "pmstatus" => (raw / 100.0, Status::Running, false),
        "pmerror" => (INDETERMINATE, Status::Failed, true),
        _ => {
            return Err(ParseError::UnknownKind {
                kind: kind.to_string(),
                line: line.to_string(),
            })
        }
    };

    Ok(ProgressRecord {
        job_id: job_id.clone(),
        progress,
        description: description.trim().to_string(),
        status,
        cancelable,
    })
}

#[cfg(test)]
#[path = "progress_tests.rs"]
mod tests;
