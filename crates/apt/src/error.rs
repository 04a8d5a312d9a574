// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operational errors for facade calls.
//!
//! Distinct from [`SystemError`]: that taxonomy is what gets *classified and
//! reported* through job descriptions; this enum is what an operation call
//! itself can return to its caller.

use upkeepd_core::{JobId, SystemError};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The pre-flight package-system check classified a failure.
    #[error(transparent)]
    Pkg(#[from] SystemError),

    /// No live job (or no live command) with this id.
    #[error("no running job with id {0}")]
    NotFound(JobId),

    /// A job with this id is already registered.
    #[error("job {0} already exists")]
    Exists(JobId),

    /// The latest progress record marked the job non-cancelable
    /// (dpkg is committing); the abort was refused.
    #[error("job {0} cannot be aborted right now")]
    NotCancelable(JobId),

    /// The subprocess could not be started at all.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A fix-error request for a kind the core has no repair recipe for.
    #[error("unsupported fix-error type {0:?}")]
    UnsupportedFixError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
