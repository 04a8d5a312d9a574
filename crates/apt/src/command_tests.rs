// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::testutil::{collecting_indicator, fake_bin};
use upkeepd_core::Status;

fn spec(program: impl Into<PathBuf>, args: &[&str]) -> CommandSpec {
    CommandSpec {
        program: program.into(),
        args: args.iter().map(|s| s.to_string()).collect(),
        envs: Vec::new(),
        status_fd: 3,
        capture_limit: 64 * 1024,
    }
}

fn sh(script: &str) -> CommandSpec {
    spec("/bin/sh", &["-c", script])
}

#[tokio::test]
async fn success_captures_output_and_records() {
    let (indicator, records) = collecting_indicator();
    let state = RunState::new();
    let launched = launch(
        &JobId::new("job-1"),
        &sh(r#"echo "dlstatus:1:25:fetching foo" >&3
echo "dlstatus:1:75:fetching bar" >&3
echo on-stdout
echo on-stderr >&2
exit 0"#),
        state.clone(),
        indicator,
    )
    .unwrap();

    let result = launched.wait().await;
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout.trim(), "on-stdout");
    assert_eq!(result.stderr.trim(), "on-stderr");

    let records = records.lock();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].description, "fetching foo");
    assert!((records[0].progress - 0.25).abs() < 1e-9);
    assert_eq!(records[1].description, "fetching bar");
    assert_eq!(records[1].status, Status::Running);
}

#[tokio::test]
async fn records_precede_wait_return_even_on_fast_exit() {
    // the child exits immediately after writing; the EOF-drain barrier must
    // still deliver every line before wait() returns
    let (indicator, records) = collecting_indicator();
    let state = RunState::new();
    let script = (0..50)
        .map(|i| format!("echo \"dlstatus:1:{i}:line {i}\" >&3"))
        .collect::<Vec<_>>()
        .join("\n");
    let launched = launch(&JobId::new("job-1"), &sh(&script), state, indicator).unwrap();

    let _ = launched.wait().await;
    assert_eq!(records.lock().len(), 50);
}

#[tokio::test]
async fn unparseable_lines_are_skipped_not_fatal() {
    let (indicator, records) = collecting_indicator();
    let state = RunState::new();
    let launched = launch(
        &JobId::new("job-1"),
        &sh(r#"echo "garbage" >&3
echo "pmconffile:conffile:0:/etc/x" >&3
echo "dlstatus:1:50:still going" >&3"#),
        state,
        indicator,
    )
    .unwrap();

    let _ = launched.wait().await;
    let records = records.lock();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].description, "still going");
}

#[tokio::test]
async fn pmstatus_flips_cancelable_off() {
    let (indicator, records) = collecting_indicator();
    let state = RunState::new();
    assert!(state.cancelable());

    let launched = launch(
        &JobId::new("job-1"),
        &sh(r#"echo "pmstatus:dpkg:50:Unpacking" >&3"#),
        state.clone(),
        indicator,
    )
    .unwrap();
    let _ = launched.wait().await;

    assert!(!state.cancelable());
    assert!(!records.lock()[0].cancelable);
}

#[tokio::test]
async fn environment_is_passed_to_the_child() {
    let (indicator, _) = collecting_indicator();
    let mut spec = sh("echo \"$UPKEEP_TEST_VAR\"");
    spec.envs.push(("UPKEEP_TEST_VAR".to_string(), "hello".to_string()));

    let launched = launch(&JobId::new("job-1"), &spec, RunState::new(), indicator).unwrap();
    let result = launched.wait().await;
    assert_eq!(result.stdout.trim(), "hello");
}

#[tokio::test]
async fn spawn_failure_is_synchronous() {
    let dir = tempfile::tempdir().unwrap();
    let (indicator, records) = collecting_indicator();
    let missing = dir.path().join("no-such-binary");

    let err = launch(
        &JobId::new("job-1"),
        &spec(&missing, &[]),
        RunState::new(),
        indicator,
    )
    .unwrap_err();

    assert!(matches!(err, Error::Spawn { .. }));
    assert!(records.lock().is_empty());
}

#[tokio::test]
async fn interrupt_kills_the_process_group() {
    let dir = tempfile::tempdir().unwrap();
    // the stand-in spawns a grandchild so the group kill is observable
    let slow = fake_bin(dir.path(), "slow", "sleep 30 &\nwait");
    let (indicator, _) = collecting_indicator();
    let state = RunState::new();

    let launched = launch(
        &JobId::new("job-1"),
        &spec(&slow, &[]),
        state.clone(),
        indicator,
    )
    .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    state.interrupt().unwrap();

    let result = launched.wait().await;
    assert_ne!(result.exit_code, 0, "SIGINT must terminate the child");
}

#[test]
fn interrupt_without_live_process_errors() {
    let state = RunState::new();
    let err = state.interrupt().unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
}

// --- evaluate ---

fn result(exit_code: i32, stdout: &str, stderr: &str) -> CommandResult {
    CommandResult {
        exit_code,
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
    }
}

#[test]
fn evaluate_clean_exit_succeeds() {
    assert_eq!(evaluate(&result(0, "done", ""), false, None), Verdict::Succeeded);
}

#[test]
fn evaluate_error_sentinel_on_stderr_fails_despite_exit_zero() {
    let verdict = evaluate(&result(0, "", "E: something broke"), false, None);
    assert_eq!(
        verdict,
        Verdict::Failed(SystemError::Unknown { detail: "E: something broke".into() })
    );
}

#[test]
fn evaluate_classifies_nonzero_exit() {
    let verdict = evaluate(
        &result(100, "", "E: dpkg was interrupted, run dpkg --configure -a"),
        false,
        None,
    );
    assert_eq!(verdict, Verdict::Failed(SystemError::DpkgInterrupted));
}

#[test]
fn evaluate_nonzero_exit_with_empty_stderr_is_unknown() {
    let verdict = evaluate(&result(2, "", ""), false, None);
    match verdict {
        Verdict::Failed(SystemError::Unknown { detail }) => {
            assert!(detail.contains("exited with code 2"));
        }
        other => panic!("expected Unknown, got {other:?}"),
    }
}

#[test]
fn evaluate_force_failed_overrides_everything() {
    let hook: AtExitFn = Box::new(|_| None);
    let verdict = evaluate(&result(0, "", ""), true, Some(&hook));
    assert_eq!(verdict, Verdict::Failed(SystemError::Aborted));
}

#[test]
fn evaluate_at_exit_hook_overrides_success() {
    let hook: AtExitFn = Box::new(|res| {
        res.stderr
            .contains("Some index files failed to download")
            .then(|| SystemError::IndexDownloadFailed { detail: res.stderr.clone() })
    });
    let verdict = evaluate(
        &result(0, "", "W: Some index files failed to download."),
        false,
        Some(&hook),
    );
    assert!(matches!(
        verdict,
        Verdict::Failed(SystemError::IndexDownloadFailed { .. })
    ));
}

#[test]
fn evaluate_at_exit_hook_can_decline() {
    let hook: AtExitFn = Box::new(|_| None);
    assert_eq!(evaluate(&result(0, "", ""), false, Some(&hook)), Verdict::Succeeded);
}
