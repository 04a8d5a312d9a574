// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine configuration.

use crate::output::DEFAULT_CAPTURE_LIMIT;
use std::path::PathBuf;
use std::time::Duration;

/// Paths and tunables for driving the package manager.
///
/// Production uses the defaults; tests point the binaries at stand-in
/// scripts and the lock probe at scratch files.
#[derive(Debug, Clone)]
pub struct AptConfig {
    /// The apt-get compatible front-end binary.
    pub apt_get: PathBuf,
    /// The dpkg binary, for interrupted-transaction repair and version
    /// comparison.
    pub dpkg: PathBuf,
    pub dpkg_query: PathBuf,
    /// Extra apt configuration file, rendered as `-c <path>` when set.
    pub apt_conf: Option<PathBuf>,
    /// Advisory-lock files probed before any mutating job starts.
    pub lock_paths: Vec<PathBuf>,
    /// Back-off between lock scans.
    pub lock_poll: Duration,
    /// File descriptor the child is told to write status lines to.
    pub status_fd: i32,
    /// Per-stream capture cap for stdout/stderr.
    pub capture_limit: usize,
}

impl Default for AptConfig {
    fn default() -> Self {
        Self {
            apt_get: PathBuf::from("apt-get"),
            dpkg: PathBuf::from("dpkg"),
            dpkg_query: PathBuf::from("dpkg-query"),
            apt_conf: None,
            lock_paths: vec![
                PathBuf::from("/var/lib/dpkg/lock"),
                PathBuf::from("/var/lib/dpkg/lock-frontend"),
            ],
            lock_poll: Duration::from_secs(5),
            status_fd: 3,
            capture_limit: DEFAULT_CAPTURE_LIMIT,
        }
    }
}

impl AptConfig {
    upkeepd_core::setters! {
        into {
            apt_get: PathBuf,
            dpkg: PathBuf,
            dpkg_query: PathBuf,
        }
        set {
            lock_paths: Vec<PathBuf>,
            lock_poll: Duration,
            status_fd: i32,
            capture_limit: usize,
        }
        option {
            apt_conf: PathBuf,
        }
    }
}
