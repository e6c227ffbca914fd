use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use treedrive_core::{ApiError, ApiErrorClass, EncryptionJob, EncryptionPlan, JobMode, JobState,
    StartOutcome};

use crate::backoff::Backoff;
use crate::engine::TreeCacheEngine;
use crate::error::JobError;
use crate::events::EngineEvent;
use crate::paths;
use crate::state::JobResume;

/// Client for long-running, server-executed folder jobs (bulk
/// encrypt/decrypt). The server owns progress; the client owns only the
/// resume record and the minimize toggle. Polling is a cancellable task
/// alternating a cheap status read with a bounded tick.
pub struct JobPoller {
    engine: Arc<TreeCacheEngine>,
}

/// A running poll task. Progress snapshots arrive on the watch channel
/// after every half-step.
pub struct JobHandle {
    progress: watch::Receiver<EncryptionJob>,
    cancel: CancellationToken,
    task: JoinHandle<Result<EncryptionJob, JobError>>,
}

impl JobHandle {
    pub fn progress(&self) -> watch::Receiver<EncryptionJob> {
        self.progress.clone()
    }

    /// Stops polling. The server-side job keeps running and the resume
    /// record stays, so a later `resume()` reattaches.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn join(self) -> Result<EncryptionJob, JobError> {
        match self.task.await {
            Ok(result) => result,
            Err(_) => Err(JobError::Cancelled),
        }
    }
}

impl JobPoller {
    pub fn new(engine: Arc<TreeCacheEngine>) -> Self {
        Self { engine }
    }

    /// Asks the server for a file/byte estimate. Confirmation UI is the
    /// caller's concern.
    pub async fn plan(&self, folder: &str, mode: JobMode) -> Result<EncryptionPlan, JobError> {
        paths::validate(folder)?;
        let plan = self.engine.client.encryption_plan(folder, mode).await?;
        if !plan.ok {
            return Err(JobError::Rejected(
                plan.error
                    .unwrap_or_else(|| "the job could not be planned".to_string()),
            ));
        }
        Ok(plan)
    }

    /// Starts (or reattaches to) a job for `folder` and spawns the poll
    /// loop. A 409 from the server means a job is already running there;
    /// the poller adopts its id instead of erroring.
    pub async fn start(
        &self,
        folder: &str,
        mode: JobMode,
        plan: &EncryptionPlan,
    ) -> Result<JobHandle, JobError> {
        paths::validate(folder)?;
        let outcome = self
            .engine
            .client
            .encryption_job_start(folder, mode, plan.total_files, plan.total_bytes)
            .await?;

        let initial = match outcome {
            StartOutcome::Started { job_id } => EncryptionJob {
                id: job_id,
                folder: folder.to_string(),
                mode,
                state: JobState::Running,
                total_files: plan.total_files,
                total_bytes: plan.total_bytes,
                done_files: 0,
                done_bytes: 0,
                error: None,
            },
            StartOutcome::AlreadyRunning(job) => {
                debug!(folder, job_id = %job.id, "reattaching to running job");
                job
            }
        };

        // Reattaching to the job we already track keeps its minimize toggle.
        let minimized = self
            .engine
            .state
            .resume_record()
            .is_some_and(|record| record.job_id == initial.id && record.minimized);
        self.engine.state.set_resume_record(JobResume {
            job_id: initial.id.clone(),
            folder: folder.to_string(),
            mode,
            minimized,
        })?;

        Ok(self.spawn(initial, false))
    }

    /// Picks up a job persisted by an earlier session. Exactly one status
    /// read happens before any tick; a terminal snapshot only cleans up.
    pub async fn resume(&self) -> Result<Option<JobHandle>, JobError> {
        let Some(record) = self.engine.state.resume_record() else {
            return Ok(None);
        };

        let job = match self.engine.client.encryption_job_status(&record.job_id).await {
            Ok(job) => job,
            Err(err) => {
                if is_terminal_class(&err) {
                    warn!(job_id = %record.job_id, "resumed job is gone: {err}");
                    self.engine.state.clear_resume_record()?;
                }
                return Err(err.into());
            }
        };

        if job.state.is_terminal() {
            finish(&self.engine, &job);
            return Ok(None);
        }

        Ok(Some(self.spawn(job, true)))
    }

    /// Minimize is a pure presentation toggle persisted with the resume
    /// record; it never changes polling cadence.
    pub fn set_minimized(&self, minimized: bool) -> Result<(), JobError> {
        Ok(self.engine.state.set_resume_minimized(minimized)?)
    }

    pub fn resume_record(&self) -> Option<JobResume> {
        self.engine.state.resume_record()
    }

    fn spawn(&self, initial: EncryptionJob, start_with_tick: bool) -> JobHandle {
        let (tx, rx) = watch::channel(initial.clone());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_loop(
            self.engine.clone(),
            initial,
            tx,
            cancel.clone(),
            start_with_tick,
        ));
        JobHandle {
            progress: rx,
            cancel,
            task,
        }
    }
}

async fn run_loop(
    engine: Arc<TreeCacheEngine>,
    initial: EncryptionJob,
    tx: watch::Sender<EncryptionJob>,
    cancel: CancellationToken,
    start_with_tick: bool,
) -> Result<EncryptionJob, JobError> {
    let backoff = Backoff::new(engine.config.job_retry_base, engine.config.job_retry_max);
    let max_files = engine.config.job_tick_max_files;
    let job_id = initial.id.clone();
    let folder = initial.folder.clone();
    let mode = initial.mode;
    let mut do_tick = start_with_tick;
    let mut attempt = 0u32;

    loop {
        let half_step = async {
            if do_tick {
                engine.client.encryption_job_tick(&job_id, max_files).await
            } else {
                engine.client.encryption_job_status(&job_id).await
            }
        };
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(JobError::Cancelled),
            result = half_step => result,
        };

        match result {
            Ok(job) => {
                attempt = 0;
                let _ = tx.send(job.clone());
                if job.state.is_terminal() {
                    finish(&engine, &job);
                    return Ok(job);
                }
                do_tick = !do_tick;
            }
            Err(err) => {
                if is_terminal_class(&err) {
                    warn!(job_id = %job_id, "job polling ended: {err}");
                    if let Err(state_err) = engine.state.clear_resume_record() {
                        warn!("failed to clear job resume record: {state_err}");
                    }
                    engine.invalidate_after_job(&folder);
                    engine.events.emit(EngineEvent::JobFinished {
                        folder: folder.clone(),
                        mode,
                        state: JobState::Error,
                    });
                    return Err(err.into());
                }
                let wait = backoff.delay(attempt);
                attempt = attempt.saturating_add(1);
                debug!(job_id = %job_id, attempt, "job poll failed, retrying: {err}");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(JobError::Cancelled),
                    _ = sleep(wait) => {}
                }
            }
        }
    }
}

fn finish(engine: &TreeCacheEngine, job: &EncryptionJob) {
    if let Err(err) = engine.state.clear_resume_record() {
        warn!("failed to clear job resume record: {err}");
    }
    engine.invalidate_after_job(&job.folder);
    engine.events.emit(EngineEvent::JobFinished {
        folder: job.folder.clone(),
        mode: job.mode,
        state: job.state,
    });
}

/// Auth, permission and not-found failures end polling; everything else is
/// retried.
fn is_terminal_class(err: &ApiError) -> bool {
    matches!(
        err.classification(),
        Some(ApiErrorClass::Session | ApiErrorClass::Denied | ApiErrorClass::NotFound)
    )
}
