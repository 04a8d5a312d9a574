// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::testutil::{collecting_indicator, fake_bin};
use std::path::Path;
use std::time::Duration;
use upkeepd_core::ProgressRecord;

/// A config pointing every binary and lock path into `dir`.
fn hermetic_cfg(dir: &Path) -> AptConfig {
    let lock = dir.join("lock");
    let lock_frontend = dir.join("lock-frontend");
    std::fs::write(&lock, b"").unwrap();
    std::fs::write(&lock_frontend, b"").unwrap();
    AptConfig::default()
        .apt_get(dir.join("apt-get"))
        .dpkg(dir.join("dpkg"))
        .lock_paths(vec![lock, lock_frontend])
        .lock_poll(Duration::from_millis(10))
}

fn system_with(dir: &Path, indicator: Indicator) -> AptSystem {
    let system = AptSystem::new(hermetic_cfg(dir));
    system.attach_indicator(indicator);
    system
}

async fn wait_for_end(records: &Arc<Mutex<Vec<ProgressRecord>>>) {
    for _ in 0..400 {
        if records.lock().iter().any(|r| r.status == Status::End) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job never reached End; records: {:?}", records.lock());
}

fn terminal_err_type(records: &Arc<Mutex<Vec<ProgressRecord>>>) -> String {
    let records = records.lock();
    let failed = records
        .iter()
        .rev()
        .find(|r| r.status == Status::Failed)
        .expect("no Failed record");
    let description: serde_json::Value = serde_json::from_str(&failed.description).unwrap();
    description["ErrType"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn install_success_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    fake_bin(
        dir.path(),
        "apt-get",
        r#"case "$1" in
  -c) shift 2 ;;
esac
case "$1" in
  check) exit 0 ;;
  -s) echo "Inst vim (2:9.0 stable)"; exit 0 ;;
  *)
    echo "dlstatus:1:50:Retrieving vim" >&3
    echo "pmstatus:dpkg:50:Unpacking vim" >&3
    exit 0
    ;;
esac"#,
    );
    let (indicator, records) = collecting_indicator();
    let system = system_with(dir.path(), indicator);

    system
        .install(JobId::new("install-1"), vec!["vim".to_string()], HashMap::new(), HashMap::new())
        .await
        .unwrap();
    wait_for_end(&records).await;

    let records = records.lock();
    let statuses: Vec<Status> = records.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        [Status::Ready, Status::Running, Status::Running, Status::Running, Status::Succeeded, Status::End]
    );
    let dl = &records[2];
    assert_eq!(dl.description, "Retrieving vim");
    assert!(dl.cancelable);
    let pm = &records[3];
    assert_eq!(pm.description, "Unpacking vim");
    assert!(!pm.cancelable, "pmstatus records are not cancelable");
}

#[tokio::test]
async fn install_vetoed_when_plan_removes_protected_packages() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("really-ran");
    fake_bin(
        dir.path(),
        "apt-get",
        &format!(
            r#"case "$1" in
  check) exit 0 ;;
  -s) echo "Remv dde core"; exit 0 ;;
  *) touch {}; exit 0 ;;
esac"#,
            marker.display()
        ),
    );
    let (indicator, records) = collecting_indicator();
    let system = system_with(dir.path(), indicator);

    system
        .install(JobId::new("install-1"), vec!["weird".to_string()], HashMap::new(), HashMap::new())
        .await
        .unwrap();
    wait_for_end(&records).await;

    assert_eq!(terminal_err_type(&records), "removeDDE");
    assert!(!marker.exists(), "real apt-get must never run after a veto");
}

#[tokio::test]
async fn install_fails_pre_check() {
    let dir = tempfile::tempdir().unwrap();
    fake_bin(
        dir.path(),
        "apt-get",
        r#"echo "E: dpkg was interrupted, you must manually run 'dpkg --configure -a'" >&2
exit 100"#,
    );
    let (indicator, records) = collecting_indicator();
    let system = system_with(dir.path(), indicator);

    let err = system
        .install(JobId::new("install-1"), vec!["vim".to_string()], HashMap::new(), HashMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Pkg(SystemError::DpkgInterrupted)));
    assert!(records.lock().is_empty(), "rejected before any status was emitted");
}

#[tokio::test]
async fn dist_upgrade_tolerates_broken_dependencies() {
    let dir = tempfile::tempdir().unwrap();
    fake_bin(
        dir.path(),
        "apt-get",
        r#"case "$1" in
  check)
    echo "The following packages have unmet dependencies:"
    echo "E: Unmet dependencies." >&2
    exit 100
    ;;
  -s) echo "Inst foo (1.0 stable)"; exit 0 ;;
  *) exit 0 ;;
esac"#,
    );
    let (indicator, records) = collecting_indicator();
    let system = system_with(dir.path(), indicator);

    system
        .dist_upgrade(JobId::new("upgrade-1"), HashMap::new(), HashMap::new())
        .await
        .unwrap();
    wait_for_end(&records).await;

    let statuses: Vec<Status> = records.lock().iter().map(|r| r.status).collect();
    assert_eq!(statuses.last(), Some(&Status::End));
    assert!(statuses.contains(&Status::Succeeded));
}

#[tokio::test]
async fn update_source_no_space_is_insufficient_space() {
    let dir = tempfile::tempdir().unwrap();
    fake_bin(
        dir.path(),
        "apt-get",
        r#"echo "W: Some index files failed to download." >&2
echo "E: write (28: No space left on device)" >&2
exit 0"#,
    );
    let (indicator, records) = collecting_indicator();
    let system = system_with(dir.path(), indicator);

    system
        .update_source(JobId::new("update-1"), HashMap::new(), HashMap::new())
        .await
        .unwrap();
    wait_for_end(&records).await;

    assert_eq!(terminal_err_type(&records), "insufficientSpace");
}

#[tokio::test]
async fn update_source_index_failure_retries_once() {
    let dir = tempfile::tempdir().unwrap();
    let attempts = dir.path().join("attempts");
    fake_bin(
        dir.path(),
        "apt-get",
        &format!(
            r#"echo x >> {}
echo "W: Some index files failed to download." >&2
exit 0"#,
            attempts.display()
        ),
    );
    let (indicator, records) = collecting_indicator();
    let system = system_with(dir.path(), indicator);

    system
        .update_source(JobId::new("update-1"), HashMap::new(), HashMap::new())
        .await
        .unwrap();
    wait_for_end(&records).await;

    assert_eq!(terminal_err_type(&records), "indexDownloadFailed");
    let runs = std::fs::read_to_string(&attempts).unwrap();
    assert_eq!(runs.lines().count(), 2, "one retry after the first index failure");

    let statuses: Vec<Status> = records.lock().iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        [Status::Ready, Status::Running, Status::Ready, Status::Running, Status::Failed, Status::End]
    );
}

#[tokio::test]
async fn abort_during_download() {
    let dir = tempfile::tempdir().unwrap();
    fake_bin(
        dir.path(),
        "apt-get",
        r#"case "$1" in
  check) exit 0 ;;
  *)
    echo "dlstatus:1:10:Retrieving big thing" >&3
    sleep 30
    exit 0
    ;;
esac"#,
    );
    let (indicator, records) = collecting_indicator();
    let system = system_with(dir.path(), indicator);

    system
        .download_packages(
            JobId::new("dl-1"),
            vec!["big-thing".to_string()],
            HashMap::new(),
            HashMap::new(),
        )
        .await
        .unwrap();

    // wait for the first progress record, then interrupt
    for _ in 0..200 {
        if records.lock().iter().any(|r| r.description.contains("big thing")) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    system.abort("dl-1").unwrap();
    wait_for_end(&records).await;

    let records_guard = records.lock();
    assert!(records_guard.iter().all(|r| r.cancelable), "download stays cancelable throughout");
    assert!(records_guard.iter().any(|r| r.status == Status::Failed));
    drop(records_guard);
    assert_eq!(terminal_err_type(&records), "unknown");
}

#[tokio::test]
async fn abort_refused_during_pmstatus_window() {
    let dir = tempfile::tempdir().unwrap();
    fake_bin(
        dir.path(),
        "apt-get",
        r#"case "$1" in
  check) exit 0 ;;
  -s) echo "Inst foo (1.0 stable)"; exit 0 ;;
  *)
    echo "pmstatus:dpkg:50:Unpacking foo" >&3
    sleep 1
    exit 0
    ;;
esac"#,
    );
    let (indicator, records) = collecting_indicator();
    let system = system_with(dir.path(), indicator);

    system
        .install(JobId::new("install-1"), vec!["foo".to_string()], HashMap::new(), HashMap::new())
        .await
        .unwrap();

    // wait for the pmstatus record, then try to abort
    for _ in 0..200 {
        if records.lock().iter().any(|r| !r.cancelable) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    let err = system.abort("install-1").unwrap_err();
    assert!(matches!(err, Error::NotCancelable(_)));

    // the command was left running and completes normally
    wait_for_end(&records).await;
    let statuses: Vec<Status> = records.lock().iter().map(|r| r.status).collect();
    assert!(statuses.contains(&Status::Succeeded));
}

#[tokio::test]
async fn abort_with_failed_forces_aborted_even_on_clean_exit() {
    let dir = tempfile::tempdir().unwrap();
    fake_bin(
        dir.path(),
        "apt-get",
        r#"trap 'exit 0' INT
echo "dlstatus:1:10:starting" >&3
sleep 30
exit 0"#,
    );
    let (indicator, records) = collecting_indicator();
    let system = system_with(dir.path(), indicator);

    system
        .download_source(JobId::new("prep-1"), HashMap::new(), HashMap::new())
        .await
        .unwrap();

    for _ in 0..200 {
        if !records.lock().is_empty() && records.lock().iter().any(|r| r.description == "starting") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    system.abort_with_failed("prep-1").unwrap();
    wait_for_end(&records).await;

    assert_eq!(terminal_err_type(&records), "aborted");
}

#[tokio::test]
async fn abort_unknown_job_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    fake_bin(dir.path(), "apt-get", "exit 0");
    let (indicator, _) = collecting_indicator();
    let system = system_with(dir.path(), indicator);

    assert!(matches!(system.abort("nope"), Err(Error::NotFound(_))));
    assert!(matches!(system.abort_with_failed("nope"), Err(Error::NotFound(_))));
}

#[tokio::test]
async fn duplicate_job_ids_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    fake_bin(dir.path(), "apt-get", "sleep 1\nexit 0");
    let (indicator, records) = collecting_indicator();
    let system = system_with(dir.path(), indicator);

    system.clean(JobId::new("clean-1")).await.unwrap();
    let err = system.clean(JobId::new("clean-1")).await.unwrap_err();
    assert!(matches!(err, Error::Exists(_)));

    wait_for_end(&records).await;
}

#[tokio::test]
async fn spawn_failure_is_returned_synchronously() {
    let dir = tempfile::tempdir().unwrap();
    // no fake apt-get is created: the binary does not exist
    let (indicator, records) = collecting_indicator();
    let system = system_with(dir.path(), indicator);

    let err = system.clean(JobId::new("clean-1")).await.unwrap_err();
    assert!(matches!(err, Error::Spawn { .. }));
    // Ready and Running were published before the spawn, but no terminal
    let statuses: Vec<Status> = records.lock().iter().map(|r| r.status).collect();
    assert_eq!(statuses, [Status::Ready, Status::Running]);
}

#[tokio::test]
async fn fix_error_dpkg_interrupted_runs_dpkg_configure() {
    let dir = tempfile::tempdir().unwrap();
    let argv_log = dir.path().join("argv");
    fake_bin(dir.path(), "dpkg", &format!("echo \"$@\" > {}\nexit 0", argv_log.display()));
    fake_bin(dir.path(), "apt-get", "exit 0");
    let (indicator, records) = collecting_indicator();
    let system = system_with(dir.path(), indicator);

    system
        .fix_error(
            JobId::new("fix-1"),
            upkeepd_core::error::kind::DPKG_INTERRUPTED,
            HashMap::new(),
            HashMap::new(),
        )
        .await
        .unwrap();
    wait_for_end(&records).await;

    let argv = std::fs::read_to_string(&argv_log).unwrap();
    assert_eq!(argv.trim(), "--force-confold --configure -a");
    let statuses: Vec<Status> = records.lock().iter().map(|r| r.status).collect();
    assert!(statuses.contains(&Status::Succeeded));
}

#[tokio::test]
async fn fix_error_unknown_kind_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    fake_bin(dir.path(), "apt-get", "exit 0");
    let (indicator, _) = collecting_indicator();
    let system = system_with(dir.path(), indicator);

    let err = system
        .fix_error(JobId::new("fix-1"), "somethingElse", HashMap::new(), HashMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedFixError(_)));
}

#[tokio::test]
async fn check_system_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    fake_bin(dir.path(), "apt-get", "exit 1");
    let (indicator, _) = collecting_indicator();
    let system = system_with(dir.path(), indicator);

    system
        .check_system(JobId::new("check-1"), "", HashMap::new(), HashMap::new())
        .await
        .unwrap();
}
