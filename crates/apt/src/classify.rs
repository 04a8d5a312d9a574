// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Mapping raw subprocess output to the closed error taxonomy.
//!
//! Classification happens exactly once, at the point a failure becomes
//! observable (subprocess exit, simulation exit). Nothing above this layer
//! ever sees a raw stderr string outside an error's detail field.

use crate::config::AptConfig;
use crate::error::Error;
use std::process::Stdio;
use upkeepd_core::SystemError;

const UNMET_DEPENDENCIES_MARKER: &str = "The following packages have unmet dependencies:";

/// Classify captured output. Returns `None` iff stderr is empty.
///
/// First match wins, in the order dpkg-interruption, unmet dependencies,
/// unreadable sources, unknown.
pub fn classify(stdout: &str, stderr: &str) -> Option<SystemError> {
    if stderr.is_empty() {
        return None;
    }

    if stderr.contains("dpkg was interrupted") {
        return Some(SystemError::DpkgInterrupted);
    }

    if stderr.contains("Unmet dependencies") {
        // the human-readable breakdown lives on stdout
        let detail = match stdout.find(UNMET_DEPENDENCIES_MARKER) {
            Some(idx) => stdout[idx..].to_string(),
            None => stdout.to_string(),
        };
        return Some(SystemError::DependenciesBroken { detail });
    }

    if stderr.contains("The list of sources could not be read") {
        return Some(SystemError::InvalidSourcesList { detail: stderr.to_string() });
    }

    Some(SystemError::Unknown { detail: stderr.to_string() })
}

/// True when stderr carries an apt error line even though the exit code was
/// zero. apt-get reports some failures this way.
pub(crate) fn stderr_has_error_sentinel(stderr: &str) -> bool {
    stderr.lines().any(|line| line.trim_start().starts_with("E:"))
}

/// Probe the health of the package system with `apt-get check`.
///
/// With `lock == false` the probe runs under `Debug::NoLocking=1` and can
/// only detect broken dependencies; callers tolerate spurious results at
/// their discretion. Mutating operations probe with `lock == true` after
/// the lock sentinel reports the system idle.
pub async fn check_pkg_system(cfg: &AptConfig, lock: bool) -> Result<(), Error> {
    let mut cmd = tokio::process::Command::new(&cfg.apt_get);
    if let Some(conf) = &cfg.apt_conf {
        cmd.arg("-c").arg(conf);
    }
    cmd.arg("check");
    if !lock {
        cmd.args(["-o", "Debug::NoLocking=1"]);
    }
    cmd.stdin(Stdio::null());

    let output = cmd.output().await.map_err(|source| Error::Spawn {
        program: cfg.apt_get.display().to_string(),
        source,
    })?;
    if output.status.success() {
        return Ok(());
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    tracing::debug!(code = output.status.code(), "apt-get check failed");
    match classify(&stdout, &stderr) {
        Some(err) => Err(Error::Pkg(err)),
        None => Err(Error::Pkg(SystemError::Unknown {
            detail: format!("apt-get check exited with {}", output.status),
        })),
    }
}

#[cfg(test)]
#[path = "classify_tests.rs"]
mod tests;
