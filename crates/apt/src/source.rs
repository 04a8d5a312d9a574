// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scoped source-list acquisition.
//!
//! Jobs that refresh or resolve against a temporary source flavour borrow a
//! path from the layer that owns source selection, together with a release
//! callback. The core must fire that callback exactly once when the job
//! reaches `End` — including jobs that were vetoed or failed before their
//! subprocess ever started.

use std::fmt;
use std::path::{Path, PathBuf};

type ReleaseFn = Box<dyn FnOnce() + Send>;

/// A borrowed source-list path paired with its release callback.
pub struct SourceScope {
    path: PathBuf,
    release: Option<ReleaseFn>,
}

impl SourceScope {
    pub fn new(path: impl Into<PathBuf>, release: impl FnOnce() + Send + 'static) -> Self {
        Self { path: path.into(), release: Some(Box::new(release)) }
    }

    /// A scope over a path nobody needs notified about.
    pub fn unmanaged(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), release: None }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Render the apt options that point an invocation at this scope.
    ///
    /// A directory becomes `Dir::Etc::SourceParts`, a file
    /// `Dir::Etc::SourceList`; the unused half is pinned to `/dev/null` so
    /// the system-wide configuration cannot leak in.
    pub fn options(&self) -> std::io::Result<[(String, String); 2]> {
        let meta = std::fs::metadata(&self.path)?;
        let path = self.path.display().to_string();
        Ok(if meta.is_dir() {
            [
                ("Dir::Etc::SourceList".to_string(), "/dev/null".to_string()),
                ("Dir::Etc::SourceParts".to_string(), path),
            ]
        } else {
            [
                ("Dir::Etc::SourceList".to_string(), path),
                ("Dir::Etc::SourceParts".to_string(), "/dev/null".to_string()),
            ]
        })
    }

    /// Fire the release callback. Safe to call more than once; only the
    /// first call has an effect.
    pub fn release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for SourceScope {
    fn drop(&mut self) {
        if self.release.is_some() {
            tracing::warn!(path = %self.path.display(), "source scope dropped without explicit release");
            self.release();
        }
    }
}

impl fmt::Debug for SourceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceScope")
            .field("path", &self.path)
            .field("released", &self.release.is_none())
            .finish()
    }
}

#[cfg(test)]
#[path = "source_tests.rs"]
mod tests;
