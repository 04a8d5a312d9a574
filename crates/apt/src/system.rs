// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The apt facade: public operations over jobs.
//!
//! Each operation assembles a [`Job`] from the kind's argv template plus the
//! caller's packages, environment, and `-o` options, then starts it.
//! Mutating operations first wait for the dpkg lock and pass the
//! package-system pre-check; non-mutating ones start directly. The facade
//! keeps a live-job table so abort requests can be routed by id.

use crate::classify::check_pkg_system;
use crate::command::CommandResult;
use crate::config::AptConfig;
use crate::error::Error;
use crate::job::{Job, Registry};
use crate::lock::wait_dpkg_lock_release;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use upkeepd_core::error::kind;
use upkeepd_core::{Indicator, JobId, JobKind, Status, SystemError};

pub struct AptSystem {
    cfg: AptConfig,
    indicator: RwLock<Indicator>,
    jobs: Registry,
}

impl AptSystem {
    pub fn new(cfg: AptConfig) -> Self {
        Self {
            cfg,
            indicator: RwLock::new(upkeepd_core::null_indicator()),
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Install the single progress consumer. Jobs capture the indicator at
    /// creation, so attach before submitting work.
    pub fn attach_indicator(&self, indicator: Indicator) {
        *self.indicator.write() = indicator;
    }

    pub fn config(&self) -> &AptConfig {
        &self.cfg
    }

    /// A job template for `kind`: the configured apt-get binary, the
    /// optional `-c` configuration file, and the kind's argv prefix.
    /// Callers add hooks or scopes and hand it back to [`submit`].
    ///
    /// [`submit`]: AptSystem::submit
    pub fn job(&self, job_id: JobId, kind: JobKind) -> Job {
        let mut args = Vec::new();
        if let Some(conf) = &self.cfg.apt_conf {
            args.push("-c".to_string());
            args.push(conf.display().to_string());
        }
        args.extend(kind.argv_prefix().iter().map(|s| s.to_string()));
        Job::new(job_id, kind, self.indicator.read().clone())
            .program(self.cfg.apt_get.clone())
            .base_args(args)
    }

    /// Fetch packages into the cache without installing.
    pub async fn download_packages(
        &self,
        job_id: JobId,
        packages: Vec<String>,
        environ: HashMap<String, String>,
        options: HashMap<String, String>,
    ) -> Result<(), Error> {
        check_pkg_system(&self.cfg, false).await?;
        let job = self
            .job(job_id, JobKind::Download)
            .packages(packages)
            .environ(environ)
            .options(options);
        self.start_direct(job)
    }

    /// Fetch everything a dist-upgrade would need, without committing.
    /// No pre-check: a broken dependency state does not prevent downloads.
    pub async fn download_source(
        &self,
        job_id: JobId,
        environ: HashMap<String, String>,
        options: HashMap<String, String>,
    ) -> Result<(), Error> {
        let job = self
            .job(job_id, JobKind::PrepareDistUpgrade)
            .environ(environ)
            .options(options);
        self.start_direct(job)
    }

    pub async fn install(
        &self,
        job_id: JobId,
        packages: Vec<String>,
        environ: HashMap<String, String>,
        options: HashMap<String, String>,
    ) -> Result<(), Error> {
        wait_dpkg_lock_release(&self.cfg).await;
        check_pkg_system(&self.cfg, true).await?;
        let job = self
            .job(job_id, JobKind::Install)
            .packages(packages)
            .environ(environ)
            .options(options);
        self.start_gated(job)
    }

    pub async fn remove(
        &self,
        job_id: JobId,
        packages: Vec<String>,
        environ: HashMap<String, String>,
    ) -> Result<(), Error> {
        wait_dpkg_lock_release(&self.cfg).await;
        check_pkg_system(&self.cfg, true).await?;
        let job = self
            .job(job_id, JobKind::Remove)
            .packages(packages)
            .environ(environ);
        self.start_gated(job)
    }

    pub async fn dist_upgrade(
        &self,
        job_id: JobId,
        environ: HashMap<String, String>,
        options: HashMap<String, String>,
    ) -> Result<(), Error> {
        wait_dpkg_lock_release(&self.cfg).await;
        match check_pkg_system(&self.cfg, true).await {
            Ok(()) => {}
            // the upgrade itself is the repair for broken dependencies
            Err(Error::Pkg(SystemError::DependenciesBroken { .. })) => {
                tracing::info!(job_id = %job_id, "proceeding with broken dependencies, dist-upgrade repairs them");
            }
            Err(err) => return Err(err),
        }
        let job = self
            .job(job_id, JobKind::DistUpgrade)
            .environ(environ)
            .options(options);
        self.start_gated(job)
    }

    /// Refresh the package indices. On a zero exit, stderr still decides:
    /// missing index files downgrade the result to a failure, classified as
    /// insufficient space when the disk was the cause.
    pub async fn update_source(
        &self,
        job_id: JobId,
        environ: HashMap<String, String>,
        options: HashMap<String, String>,
    ) -> Result<(), Error> {
        let job = self
            .job(job_id, JobKind::UpdateSource)
            .environ(environ)
            .options(options)
            .retry(1)
            .at_exit(Box::new(update_source_exit_check));
        self.start_direct(job)
    }

    pub async fn clean(&self, job_id: JobId) -> Result<(), Error> {
        let job = self.job(job_id, JobKind::Clean);
        self.start_direct(job)
    }

    /// Repair a classified package-system error.
    ///
    /// `dpkgInterrupted` reruns the interrupted configuration step through
    /// dpkg itself; `dependenciesBroken` fix-installs under the simulate
    /// gate, because the solver may propose protected removals while
    /// repairing. Other kinds have no recipe.
    pub async fn fix_error(
        &self,
        job_id: JobId,
        err_type: &str,
        environ: HashMap<String, String>,
        options: HashMap<String, String>,
    ) -> Result<(), Error> {
        wait_dpkg_lock_release(&self.cfg).await;
        match err_type {
            kind::DPKG_INTERRUPTED => {
                let job = Job::new(job_id, JobKind::FixError, self.indicator.read().clone())
                    .program(self.cfg.dpkg.clone())
                    .base_args(vec![
                        "--force-confold".to_string(),
                        "--configure".to_string(),
                        "-a".to_string(),
                    ])
                    .environ(environ)
                    .emit_status(false)
                    .safe_start(false);
                self.start_direct(job)
            }
            kind::DEPENDENCIES_BROKEN => {
                let job = self
                    .job(job_id, JobKind::FixError)
                    .environ(environ)
                    .options(options);
                self.start_gated(job)
            }
            other => Err(Error::UnsupportedFixError(other.to_string())),
        }
    }

    /// Send SIGINT to the job's live command. Refused while the latest
    /// progress record marks the job non-cancelable.
    pub fn abort(&self, job_id: &str) -> Result<(), Error> {
        let run = self.live_run(job_id)?;
        if !run.cancelable() {
            return Err(Error::NotCancelable(JobId::new(job_id)));
        }
        run.interrupt().map_err(Error::Io)
    }

    /// Like [`abort`], but the terminal status becomes `Failed(Aborted)`
    /// even if the child manages a clean exit.
    ///
    /// [`abort`]: AptSystem::abort
    pub fn abort_with_failed(&self, job_id: &str) -> Result<(), Error> {
        let run = self.live_run(job_id)?;
        if !run.cancelable() {
            return Err(Error::NotCancelable(JobId::new(job_id)));
        }
        run.mark_force_failed();
        run.interrupt().map_err(Error::Io)
    }

    /// Pre-flight health probe. Reserved surface: currently a no-op.
    pub async fn check_system(
        &self,
        _job_id: JobId,
        _check_type: &str,
        _environ: HashMap<String, String>,
        _options: HashMap<String, String>,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// Start a caller-assembled job (hooks, scopes, retry installed).
    /// Safe-start jobs wait for the dpkg lock first; the pre-check is the
    /// caller's responsibility.
    pub async fn submit(&self, job: Job) -> Result<(), Error> {
        if job.is_safe_start() {
            wait_dpkg_lock_release(&self.cfg).await;
            self.start_gated(job)
        } else {
            self.start_direct(job)
        }
    }

    fn live_run(&self, job_id: &str) -> Result<Arc<crate::command::RunState>, Error> {
        let shared = self
            .jobs
            .lock()
            .get(job_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(JobId::new(job_id)))?;
        let run = shared.run.lock().clone();
        run.ok_or_else(|| Error::NotFound(JobId::new(job_id)))
    }

    fn register(&self, job: &Job) -> Result<(), Error> {
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(job.id().as_str()) {
            return Err(Error::Exists(job.id().clone()));
        }
        jobs.insert(job.id().clone(), job.shared());
        Ok(())
    }

    /// Start a job whose first attempt spawns synchronously: a spawn
    /// failure is returned to the caller directly, with no status emitted.
    fn start_direct(&self, mut job: Job) -> Result<(), Error> {
        self.register(&job)?;
        job.enter(Status::Ready);
        if !job.enter(Status::Running) {
            // pre-hook veto: the job is Failed; finish it out
            self.jobs.lock().remove(job.id().as_str());
            job.enter(Status::End);
            return Ok(());
        }
        match job.launch(&self.cfg) {
            Ok(launched) => {
                tokio::spawn(job.drive(self.cfg.clone(), self.jobs.clone(), Some(launched)));
                Ok(())
            }
            Err(err) => {
                self.jobs.lock().remove(job.id().as_str());
                job.discard();
                Err(err)
            }
        }
    }

    /// Start a mutating job: the simulate gate and the real spawn both run
    /// in the background; failures surface through the indicator.
    fn start_gated(&self, mut job: Job) -> Result<(), Error> {
        self.register(&job)?;
        job.enter(Status::Ready);
        tokio::spawn(job.drive(self.cfg.clone(), self.jobs.clone(), None));
        Ok(())
    }
}

/// Exit inspection for the index refresh: apt-get update can
/// exit zero with the indices missing.
fn update_source_exit_check(result: &CommandResult) -> Option<SystemError> {
    if result.exit_code != 0 || !result.stderr.contains("Some index files failed to download") {
        return None;
    }
    if result.stderr.contains("No space left on device") {
        Some(SystemError::InsufficientSpace { detail: result.stderr.clone() })
    } else {
        Some(SystemError::IndexDownloadFailed { detail: result.stderr.clone() })
    }
}

#[cfg(test)]
#[path = "system_tests.rs"]
mod tests;
