// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job lifecycle over one or more command attempts.
//!
//! A job moves `Ready → Running → {Succeeded | Failed} → End`, publishing a
//! progress record at every externally visible change. Hooks registered per
//! status run around each transition: a pre-hook failure aborts the
//! transition and forces `Failed`; after-hook failures only log. `Failed`
//! re-enters `Ready` through the retry arc while credits remain and the
//! error kind is retryable.

use crate::command::{self, AtExitFn, CommandResult, CommandSpec, Launched, RunState, Verdict};
use crate::config::AptConfig;
use crate::error::Error;
use crate::safestart::{self, Gate};
use crate::source::SourceScope;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use upkeepd_core::{
    Indicator, JobId, JobKind, ProgressRecord, Status, SystemError, INDETERMINATE,
};

pub type HookError = Box<dyn std::error::Error + Send + Sync>;
/// Transition callback. Pre-hooks gate transitions; after-hooks observe them.
pub type Hook = Box<dyn FnMut() -> Result<(), HookError> + Send>;
/// Reconfiguration callback run between a retryable failure and re-entering
/// `Ready`, typically to swap the source scope to a fallback flavour.
pub type SubRetryHook = Box<dyn FnMut(&mut Job) + Send>;

/// State shared between the job's driving task, its hooks, and abort
/// routing.
pub(crate) struct JobShared {
    pub(crate) id: JobId,
    status: Mutex<Status>,
    progress: Mutex<f64>,
    description: Mutex<String>,
    cancelable: AtomicBool,
    /// Live command attempt, if one is running.
    pub(crate) run: Mutex<Option<Arc<RunState>>>,
}

impl JobShared {
    fn new(id: JobId) -> Arc<Self> {
        Arc::new(Self {
            id,
            status: Mutex::new(Status::Ready),
            progress: Mutex::new(0.0),
            description: Mutex::new(String::new()),
            cancelable: AtomicBool::new(true),
            run: Mutex::new(None),
        })
    }

    /// Clamp to the non-decreasing invariant and store. Returns the value
    /// actually recorded.
    fn clamp_progress(&self, value: f64) -> f64 {
        let mut current = self.progress.lock();
        if value < *current {
            *current
        } else {
            *current = value;
            value
        }
    }

    fn record(&self) -> ProgressRecord {
        ProgressRecord {
            job_id: self.id.clone(),
            progress: *self.progress.lock(),
            description: self.description.lock().clone(),
            status: *self.status.lock(),
            cancelable: self.cancelable.load(Ordering::SeqCst),
        }
    }
}

/// Read/advance handle for hooks and observers. Cloneable; progress writes
/// go through the same clamp as parser records.
#[derive(Clone)]
pub struct JobMonitor {
    shared: Arc<JobShared>,
    indicator: Indicator,
}

impl JobMonitor {
    /// Advance the job's progress and publish a record.
    pub fn set_progress(&self, value: f64) {
        self.shared.clamp_progress(value);
        (self.indicator)(self.shared.record());
    }

    pub fn progress(&self) -> f64 {
        *self.shared.progress.lock()
    }

    pub fn status(&self) -> Status {
        *self.shared.status.lock()
    }

    pub fn description(&self) -> String {
        self.shared.description.lock().clone()
    }

    pub fn cancelable(&self) -> bool {
        self.shared.cancelable.load(Ordering::SeqCst)
    }
}

/// One package-manager job: argv recipe, lifecycle state, hooks, and the
/// scoped resources released on `End`.
pub struct Job {
    kind: JobKind,
    program: PathBuf,
    base_args: Vec<String>,
    options: BTreeMap<String, String>,
    environ: Vec<(String, String)>,
    retry: u32,
    safe_start: bool,
    emit_status: bool,
    pre_hooks: HashMap<Status, Hook>,
    after_hooks: HashMap<Status, Hook>,
    sub_retry_hook: Option<SubRetryHook>,
    at_exit: Option<AtExitFn>,
    source_scope: Option<SourceScope>,
    indicator: Indicator,
    shared: Arc<JobShared>,
    ended: bool,
}

impl Job {
    /// A job for `kind` with the kind's standard apt-get argv template.
    /// The program and base arguments can be overridden for repairs that
    /// drive dpkg directly.
    pub fn new(id: JobId, kind: JobKind, indicator: Indicator) -> Self {
        let shared = JobShared::new(id);
        Self {
            kind,
            program: PathBuf::from("apt-get"),
            base_args: kind.argv_prefix().iter().map(|s| s.to_string()).collect(),
            options: BTreeMap::new(),
            environ: Vec::new(),
            retry: 0,
            safe_start: kind.is_mutating(),
            emit_status: true,
            pre_hooks: HashMap::new(),
            after_hooks: HashMap::new(),
            sub_retry_hook: None,
            at_exit: None,
            source_scope: None,
            indicator,
            shared,
            ended: false,
        }
    }

    upkeepd_core::setters! {
        into {
            program: PathBuf,
        }
        set {
            base_args: Vec<String>,
            retry: u32,
            safe_start: bool,
            emit_status: bool,
        }
    }

    /// Append package names to the argv.
    pub fn packages(mut self, packages: impl IntoIterator<Item = String>) -> Self {
        self.base_args.extend(packages);
        self
    }

    /// Set the `-o` option table. Rendered in sorted order at launch so
    /// retries that reconfigure options take effect.
    pub fn options(mut self, options: impl IntoIterator<Item = (String, String)>) -> Self {
        self.options = options.into_iter().collect();
        self
    }

    pub fn environ(mut self, environ: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut environ: Vec<(String, String)> = environ.into_iter().collect();
        environ.sort();
        self.environ = environ;
        self
    }

    /// Register a pre-hook for `status`. Its error aborts the transition
    /// and forces `Failed`.
    pub fn on_status(mut self, status: Status, hook: Hook) -> Self {
        self.pre_hooks.insert(status, hook);
        self
    }

    /// Register an after-hook for `status`. Errors are logged, never fatal.
    pub fn after_status(mut self, status: Status, hook: Hook) -> Self {
        self.after_hooks.insert(status, hook);
        self
    }

    pub fn on_sub_retry(mut self, hook: SubRetryHook) -> Self {
        self.sub_retry_hook = Some(hook);
        self
    }

    /// Install the exit-inspection hook, consulted before the default
    /// success/classify evaluation of every attempt.
    pub fn at_exit(mut self, hook: AtExitFn) -> Self {
        self.at_exit = Some(hook);
        self
    }

    /// Attach a scoped source list: its apt options join the option table
    /// and its release callback fires exactly once on `End`.
    pub fn source_scope(mut self, scope: SourceScope) -> std::io::Result<Self> {
        for (key, value) in scope.options()? {
            self.options.insert(key, value);
        }
        self.source_scope = Some(scope);
        Ok(self)
    }

    /// Swap the source scope mid-lifecycle (the retry arc's usual move).
    /// The previous scope is released immediately.
    pub fn replace_source_scope(&mut self, scope: SourceScope) -> std::io::Result<()> {
        for (key, value) in scope.options()? {
            self.options.insert(key, value);
        }
        if let Some(mut old) = self.source_scope.replace(scope) {
            old.release();
        }
        Ok(())
    }

    /// Replace one apt option; used by sub-retry hooks.
    pub fn set_option(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.options.insert(key.into(), value.into());
    }

    pub fn id(&self) -> &JobId {
        &self.shared.id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn is_safe_start(&self) -> bool {
        self.safe_start
    }

    pub fn monitor(&self) -> JobMonitor {
        JobMonitor { shared: self.shared.clone(), indicator: self.indicator.clone() }
    }

    pub(crate) fn shared(&self) -> Arc<JobShared> {
        self.shared.clone()
    }

    /// The sink command attempts deliver parsed records into: clamps
    /// progress, mirrors the cancelable flag, forwards to the indicator.
    pub(crate) fn sink(&self) -> Indicator {
        let shared = self.shared.clone();
        let indicator = self.indicator.clone();
        Arc::new(move |mut record: ProgressRecord| {
            if record.progress != INDETERMINATE {
                record.progress = shared.clamp_progress(record.progress);
            }
            shared.cancelable.store(record.cancelable, Ordering::SeqCst);
            *shared.description.lock() = record.description.clone();
            indicator(record);
        })
    }

    /// Build the argv for one attempt. Options render at launch time so a
    /// sub-retry reconfiguration changes the next attempt.
    pub(crate) fn command_spec(&self, cfg: &AptConfig, simulate: bool) -> CommandSpec {
        let mut args = Vec::with_capacity(self.base_args.len() + 2 * self.options.len() + 3);
        if simulate {
            args.push("-s".to_string());
        }
        args.extend(self.base_args.iter().cloned());
        for (key, value) in &self.options {
            args.push("-o".to_string());
            args.push(format!("{key}={value}"));
        }
        if self.emit_status && !simulate {
            args.push("-o".to_string());
            args.push(format!("APT::Status-Fd={}", cfg.status_fd));
        }
        CommandSpec {
            program: self.program.clone(),
            args,
            envs: self.environ.clone(),
            status_fd: cfg.status_fd,
            capture_limit: cfg.capture_limit,
        }
    }

    /// Transition to `next`, running hooks. Returns false when the pre-hook
    /// vetoed the transition (the job is then `Failed`).
    pub(crate) fn enter(&mut self, next: Status) -> bool {
        if self.ended {
            return false;
        }

        let pre = match self.pre_hooks.get_mut(&next) {
            Some(hook) => hook(),
            None => Ok(()),
        };
        if let Err(err) = pre {
            tracing::warn!(job_id = %self.shared.id, status = %next, %err, "pre-hook failed");
            match next {
                // cannot fail harder than Failed, and End must always land
                Status::Failed | Status::End => {}
                _ => {
                    self.set_failure(&SystemError::Unknown {
                        detail: format!("{next} pre-hook: {err}"),
                    });
                    self.enter(Status::Failed);
                    return false;
                }
            }
        }

        *self.shared.status.lock() = next;
        tracing::info!(job_id = %self.shared.id, kind = %self.kind, status = %next, "job transition");
        (self.indicator)(self.shared.record());

        let after = match self.after_hooks.get_mut(&next) {
            Some(hook) => hook(),
            None => Ok(()),
        };
        if let Err(err) = after {
            tracing::warn!(job_id = %self.shared.id, status = %next, %err, "after-hook failed");
        }

        if next == Status::End {
            self.ended = true;
            if let Some(scope) = self.source_scope.as_mut() {
                scope.release();
            }
        }
        true
    }

    /// Record a classified failure as the job description.
    pub(crate) fn set_failure(&mut self, err: &SystemError) {
        *self.shared.description.lock() = err.description_json();
    }

    /// Progress resets across retries.
    fn reset_progress(&mut self) {
        *self.shared.progress.lock() = 0.0;
    }

    fn take_retry_credit(&mut self) -> bool {
        if self.retry == 0 {
            return false;
        }
        self.retry -= 1;
        true
    }

    fn run_sub_retry_hook(&mut self) {
        if let Some(mut hook) = self.sub_retry_hook.take() {
            hook(self);
            self.sub_retry_hook = Some(hook);
        }
    }

    /// Spawn the real (non-simulated) command for the current recipe.
    /// Errors are synchronous: nothing was spawned.
    pub(crate) fn launch(&mut self, cfg: &AptConfig) -> Result<Launched, Error> {
        let state = RunState::new();
        *self.shared.run.lock() = Some(state.clone());
        let spec = self.command_spec(cfg, false);
        match command::launch(&self.shared.id, &spec, state, self.sink()) {
            Ok(launched) => Ok(launched),
            Err(err) => {
                *self.shared.run.lock() = None;
                Err(err)
            }
        }
    }

    /// Evaluate a finished attempt, consuming the live run state.
    fn conclude_attempt(&mut self, result: CommandResult) -> Verdict {
        let force = self
            .shared
            .run
            .lock()
            .take()
            .map(|state| state.force_failed())
            .unwrap_or(false);
        command::evaluate(&result, force, self.at_exit.as_ref())
    }

    async fn run_attempt(&mut self, cfg: &AptConfig) -> Verdict {
        if self.safe_start {
            match safestart::simulate(cfg, self).await {
                Gate::Clear => {}
                Gate::Veto(err) => return Verdict::Failed(err),
            }
        }
        match self.launch(cfg) {
            Ok(launched) => {
                let result = launched.wait().await;
                self.conclude_attempt(result)
            }
            Err(err) => {
                tracing::warn!(job_id = %self.shared.id, %err, "command start failed");
                Verdict::Failed(SystemError::Unknown {
                    detail: format!("failed to start command: {err}"),
                })
            }
        }
    }

    /// Drive the job to `End`.
    ///
    /// `pending` carries an attempt the facade already launched
    /// synchronously; otherwise each loop iteration enters `Running` and
    /// runs one attempt (gated by simulate for safe-start jobs).
    pub(crate) async fn drive(mut self, cfg: AptConfig, registry: Registry, pending: Option<Launched>) {
        let mut pending = pending;
        loop {
            let verdict = match pending.take() {
                Some(launched) => {
                    let result = launched.wait().await;
                    self.conclude_attempt(result)
                }
                None => {
                    if !self.enter(Status::Running) {
                        break;
                    }
                    self.run_attempt(&cfg).await
                }
            };

            match verdict {
                Verdict::Succeeded => {
                    self.enter(Status::Succeeded);
                    break;
                }
                Verdict::Failed(err) => {
                    self.set_failure(&err);
                    if err.is_retryable() && self.take_retry_credit() {
                        tracing::info!(
                            job_id = %self.shared.id,
                            kind = err.kind_str(),
                            remaining = self.retry,
                            "retrying after transient failure"
                        );
                        self.run_sub_retry_hook();
                        self.reset_progress();
                        if !self.enter(Status::Ready) {
                            break;
                        }
                        continue;
                    }
                    self.enter(Status::Failed);
                    break;
                }
            }
        }
        self.enter(Status::End);
        registry.lock().remove(self.shared.id.as_str());
    }

    /// Tear down a job that was rejected before it ever ran: release the
    /// scope without emitting any status.
    pub(crate) fn discard(mut self) {
        self.ended = true;
        if let Some(scope) = self.source_scope.as_mut() {
            scope.release();
        }
    }
}

/// Live-job table shared with the facade for abort routing.
pub(crate) type Registry = Arc<Mutex<HashMap<JobId, Arc<JobShared>>>>;

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
