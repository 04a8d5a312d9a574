// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sentinel for the dpkg advisory locks.
//!
//! Before a mutating job starts, the system must be idle: no other process
//! may hold a write lock on `/var/lib/dpkg/lock` or `lock-frontend`. The
//! sentinel probes both files with `F_GETLK` and only returns once a single
//! scan finds both free. Any conflict restarts the scan from the first file
//! after a back-off, otherwise a lock released while we were blocked on the
//! other file could be retaken unnoticed.
//!
//! Waiting is deliberately not cancellable: callers that gave up would leak
//! an about-to-start job into a contended system.

use crate::config::AptConfig;
use std::fs::File;
use std::future::Future;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

/// Block until every configured lock file is observed free in one scan.
pub async fn wait_dpkg_lock_release(cfg: &AptConfig) {
    let poll = cfg.lock_poll;
    wait_released_with(&cfg.lock_paths, probe_write_lock, || tokio::time::sleep(poll)).await;
}

/// Scan loop with injectable probe and pause, for tests.
pub(crate) async fn wait_released_with<P, S, F>(paths: &[PathBuf], mut locked: P, mut pause: S)
where
    P: FnMut(&Path) -> bool,
    S: FnMut() -> F,
    F: Future<Output = ()>,
{
    'scan: loop {
        for path in paths {
            if locked(path) {
                tracing::warn!(path = %path.display(), "dpkg lock held, waiting for release");
                pause().await;
                continue 'scan;
            }
        }
        return;
    }
}

/// Ask the kernel whether another process holds a write lock on `path`.
///
/// The file is opened read-only for the lifetime of one probe. A file that
/// cannot be opened counts as unlocked — the lock file legitimately does not
/// exist on a fresh system. A probe that cannot be *queried* counts as
/// locked, so we back off rather than race.
fn probe_write_lock(path: &Path) -> bool {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) => {
            tracing::debug!(path = %path.display(), %err, "lock file not probeable, treating as free");
            return false;
        }
    };

    let mut probe: nix::libc::flock = unsafe { std::mem::zeroed() };
    probe.l_type = nix::libc::F_WRLCK as _;
    probe.l_whence = nix::libc::SEEK_SET as _;
    probe.l_start = 0;
    probe.l_len = 0;

    match nix::fcntl::fcntl(file.as_raw_fd(), nix::fcntl::FcntlArg::F_GETLK(&mut probe)) {
        Ok(_) => probe.l_type == nix::libc::F_WRLCK as nix::libc::c_short,
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "lock query failed, assuming held");
            true
        }
    }
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
