// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Classified package-system errors.
//!
//! Everything the subprocess layer can report is folded into this closed
//! taxonomy exactly once, at the point the failure becomes observable.
//! The variant tags are wire-stable: callers and notification layers match
//! on [`SystemError::kind_str`] values, so renaming one is a protocol break.

use serde::{Deserialize, Serialize};

/// Wire-stable error kind strings.
pub mod kind {
    pub const DPKG_INTERRUPTED: &str = "dpkgInterrupted";
    pub const DEPENDENCIES_BROKEN: &str = "dependenciesBroken";
    pub const INVALID_SOURCES_LIST: &str = "invalidSourceList";
    pub const UNKNOWN: &str = "unknown";
    pub const FETCH_FAILED: &str = "fetchFailed";
    pub const INDEX_DOWNLOAD_FAILED: &str = "indexDownloadFailed";
    pub const INSUFFICIENT_SPACE: &str = "insufficientSpace";
    pub const REMOVE_PROTECTED: &str = "removeDDE";
    pub const NOT_FOUND: &str = "notFound";
    pub const PKG_NOT_FOUND: &str = "pkgNotFound";
    pub const ABORTED: &str = "aborted";
}

/// A classified failure of the package system or of a single job.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum SystemError {
    /// dpkg died mid-transaction; `dpkg --configure -a` is required.
    #[error("dpkg was interrupted")]
    DpkgInterrupted,

    #[error("unmet dependencies: {detail}")]
    DependenciesBroken { detail: String },

    #[error("sources list unreadable: {detail}")]
    InvalidSourcesList { detail: String },

    #[error("package system error: {detail}")]
    Unknown { detail: String },

    /// A package download failed mid-job.
    #[error("fetch failed: {detail}")]
    FetchFailed { detail: String },

    /// Index refresh completed but some index files never arrived.
    #[error("index download failed: {detail}")]
    IndexDownloadFailed { detail: String },

    #[error("no space left on device: {detail}")]
    InsufficientSpace { detail: String },

    /// The simulate pass showed the solver removing a protected
    /// desktop-environment package; the mutation was vetoed before commit.
    #[error("operation would remove protected packages")]
    RemoveProtected,

    #[error("not found: {detail}")]
    NotFound { detail: String },

    #[error("no such package: {detail}")]
    PkgNotFound { detail: String },

    /// The job was force-failed by an abort request.
    #[error("job aborted")]
    Aborted,
}

impl SystemError {
    /// The wire-stable kind tag for this error.
    pub fn kind_str(&self) -> &'static str {
        match self {
            SystemError::DpkgInterrupted => kind::DPKG_INTERRUPTED,
            SystemError::DependenciesBroken { .. } => kind::DEPENDENCIES_BROKEN,
            SystemError::InvalidSourcesList { .. } => kind::INVALID_SOURCES_LIST,
            SystemError::Unknown { .. } => kind::UNKNOWN,
            SystemError::FetchFailed { .. } => kind::FETCH_FAILED,
            SystemError::IndexDownloadFailed { .. } => kind::INDEX_DOWNLOAD_FAILED,
            SystemError::InsufficientSpace { .. } => kind::INSUFFICIENT_SPACE,
            SystemError::RemoveProtected => kind::REMOVE_PROTECTED,
            SystemError::NotFound { .. } => kind::NOT_FOUND,
            SystemError::PkgNotFound { .. } => kind::PKG_NOT_FOUND,
            SystemError::Aborted => kind::ABORTED,
        }
    }

    /// The free-text detail, empty for tag-only variants.
    pub fn detail(&self) -> &str {
        match self {
            SystemError::DependenciesBroken { detail }
            | SystemError::InvalidSourcesList { detail }
            | SystemError::Unknown { detail }
            | SystemError::FetchFailed { detail }
            | SystemError::IndexDownloadFailed { detail }
            | SystemError::InsufficientSpace { detail }
            | SystemError::NotFound { detail }
            | SystemError::PkgNotFound { detail } => detail,
            SystemError::DpkgInterrupted
            | SystemError::RemoveProtected
            | SystemError::Aborted => "",
        }
    }

    /// True for transient failures the job layer may retry once.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SystemError::FetchFailed { .. } | SystemError::IndexDownloadFailed { .. }
        )
    }

    /// The JSON job description: `{"ErrType": kind, "ErrDetail": detail}`.
    pub fn description_json(&self) -> String {
        serde_json::json!({
            "ErrType": self.kind_str(),
            "ErrDetail": self.detail(),
        })
        .to_string()
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
