// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Simulate-then-commit gate for mutating jobs.
//!
//! apt-get's solver may decide to remove a protected desktop package set to
//! satisfy a request. Before any mutating command touches the system, the
//! same argv is run with `-s`; if the plan fails to resolve or would remove
//! a protected package, the job fails without the real command ever being
//! spawned.

use crate::classify::classify;
use crate::command::{self, RunState};
use crate::config::AptConfig;
use crate::job::Job;
use upkeepd_core::SystemError;

/// Prefix of a simulate-output line announcing a protected removal.
const PROTECTED_REMOVAL_MARK: &str = "Remv dde ";

/// Outcome of the simulate pass.
#[derive(Debug, PartialEq)]
pub(crate) enum Gate {
    /// The plan is safe; start the real command.
    Clear,
    /// Do not start the real command; fail the job with this error.
    Veto(SystemError),
}

/// Run the job's argv under `-s` to completion and inspect the plan.
///
/// The simulation registers its own run state on the job, so an abort
/// during this window interrupts the simulation like any live command.
pub(crate) async fn simulate(cfg: &AptConfig, job: &mut Job) -> Gate {
    let spec = job.command_spec(cfg, true);
    let state = RunState::new();
    *job.shared().run.lock() = Some(state.clone());

    let launched = match command::launch(job.id(), &spec, state, job.sink()) {
        Ok(launched) => launched,
        Err(err) => {
            *job.shared().run.lock() = None;
            return Gate::Veto(SystemError::Unknown {
                detail: format!("simulation failed to start: {err}"),
            });
        }
    };
    let result = launched.wait().await;
    *job.shared().run.lock() = None;

    if result.exit_code != 0 {
        let err = classify(&result.stdout, &result.stderr).unwrap_or(SystemError::Unknown {
            detail: format!("simulation exited with code {}", result.exit_code),
        });
        tracing::info!(job_id = %job.id(), kind = err.kind_str(), "simulation failed, vetoing start");
        return Gate::Veto(err);
    }

    if removes_protected(&result.stdout) {
        tracing::info!(job_id = %job.id(), "plan removes protected packages, vetoing start");
        return Gate::Veto(SystemError::RemoveProtected);
    }

    Gate::Clear
}

/// True when the simulated plan removes the protected package set.
pub(crate) fn removes_protected(stdout: &str) -> bool {
    stdout.lines().any(|line| line.starts_with(PROTECTED_REMOVAL_MARK))
}

#[cfg(test)]
#[path = "safestart_tests.rs"]
mod tests;
