// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for in-crate tests.

use parking_lot::Mutex;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use upkeepd_core::{Indicator, ProgressRecord};

/// Write an executable shell script into `dir` and return its path.
///
/// Stand-ins for apt-get/dpkg: the script body sees the real argv and the
/// status descriptor, so tests can emit protocol lines with `>&3`.
pub(crate) fn fake_bin(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "#!/bin/sh\n{body}").unwrap();
    let mut perms = file.metadata().unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

/// An indicator that appends every record to a shared vector.
pub(crate) fn collecting_indicator() -> (Indicator, Arc<Mutex<Vec<ProgressRecord>>>) {
    let records: Arc<Mutex<Vec<ProgressRecord>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = records.clone();
    let indicator: Indicator = Arc::new(move |record| {
        sink.lock().push(record);
    });
    (indicator, records)
}
