//! Deployment scheduler.
//!
//! Immediate jobs are dispatched right away on their own task. Future jobs
//! are armed on a single [`DelayQueue`] owned by one timer task; nothing ever
//! sleeps on a worker waiting for a deadline. Per-display failures are
//! recorded in the job, never returned as `Err`.

pub mod job;
pub mod source;
pub mod store;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::time::{DelayQueue, delay_queue};

use crate::config::{MAX_TIMER_SECS, SchedulerConfig};
use crate::dispatch::CommandDispatcher;
use crate::endpoint::DisplayId;
use crate::error::WallError;
use crate::message::{Command, CommandKind};

pub use job::{DeploymentJob, DeploymentRequest, JobId, JobPhase, TargetOutcome};
pub use source::{ContentSource, DirectAsset};
pub use store::{JobStore, JsonDirJobStore, MemoryJobStore};

/// What [`DeploymentScheduler::restore`] found in the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub loaded: usize,
    /// Future jobs put back on the timer.
    pub rearmed: usize,
    /// Due or interrupted jobs dispatched again.
    pub resumed: usize,
}

enum TimerCommand {
    Arm { job: JobId, at: DateTime<Utc> },
    Disarm(JobId),
}

struct Shared {
    dispatcher: Arc<CommandDispatcher>,
    store: Arc<dyn JobStore>,
    jobs: DashMap<JobId, DeploymentJob>,
    max_past_due: chrono::Duration,
    max_future: chrono::Duration,
    /// Bumped on every job change; waiters watch it.
    version: watch::Sender<u64>,
}

impl Shared {
    fn touch(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }

    async fn persist(&self, job: &DeploymentJob) {
        if let Err(e) = self.store.save(job).await {
            tracing::warn!(job = %job.id, error = %e, "failed to persist job");
        }
    }
}

pub struct DeploymentScheduler {
    shared: Arc<Shared>,
    timers: mpsc::UnboundedSender<TimerCommand>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for DeploymentScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentScheduler")
            .field("jobs", &self.shared.jobs.len())
            .field("stopped", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl DeploymentScheduler {
    /// Spawn the timer task. Must be called inside a Tokio runtime.
    pub fn start(
        dispatcher: Arc<CommandDispatcher>,
        store: Arc<dyn JobStore>,
        config: &SchedulerConfig,
    ) -> Self {
        let (timers, commands) = mpsc::unbounded_channel();
        let (version, _) = watch::channel(0);
        let shutdown = CancellationToken::new();
        let shared = Arc::new(Shared {
            dispatcher,
            store,
            jobs: DashMap::new(),
            max_past_due: config.max_past_due(),
            max_future: config.max_future(),
            version,
        });
        let task = tokio::spawn(timer_loop(Arc::clone(&shared), commands, shutdown.clone()));
        Self {
            shared,
            timers,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    /// Validate and accept a deployment. Returns once the job is recorded,
    /// not when it finishes.
    pub async fn schedule(&self, request: DeploymentRequest) -> Result<JobId, WallError> {
        self.ensure_running()?;
        let now = Utc::now();
        request.validate(now, self.shared.max_past_due, self.shared.max_future)?;

        let mut job = DeploymentJob::from_request(request, now);
        let id = job.id;
        let arm_at = job.scheduled_for.filter(|_| job.is_future(now));
        if arm_at.is_some() {
            job.arm(now)?;
        }
        self.shared.store.save(&job).await?;
        tracing::info!(
            job = %id,
            targets = job.outcomes.len(),
            asset = %job.asset,
            scheduled_for = ?job.scheduled_for,
            "deployment accepted"
        );
        self.shared.jobs.insert(id, job);
        self.shared.touch();

        match arm_at {
            Some(at) => {
                if let Err(e) = self.timers.send(TimerCommand::Arm { job: id, at }) {
                    // Timer task is gone: the job would never fire.
                    self.shared.jobs.remove(&id);
                    if let Err(err) = self.shared.store.remove(&id).await {
                        tracing::warn!(job = %id, error = %err, "failed to drop unarmed job");
                    }
                    self.shared.touch();
                    return Err(e.into());
                }
            }
            None => self.launch(id),
        }
        Ok(id)
    }

    /// Resolve `query` through a content source, then schedule the result.
    pub async fn schedule_from_source(
        &self,
        source: &dyn ContentSource,
        query: &str,
        targets: Vec<DisplayId>,
        scheduled_for: Option<DateTime<Utc>>,
    ) -> Result<JobId, WallError> {
        let asset = source.resolve(query).await?;
        tracing::debug!(source = source.name(), query, asset = %asset, "content resolved");
        self.schedule(DeploymentRequest {
            targets,
            asset,
            scheduled_for,
        })
        .await
    }

    /// Cancel a job that has not started yet.
    pub async fn cancel(&self, id: &JobId) -> Result<DeploymentJob, WallError> {
        let cancelled = {
            let mut job = self
                .shared
                .jobs
                .get_mut(id)
                .ok_or(WallError::UnknownJob(*id))?;
            job.cancel(Utc::now())?;
            job.clone()
        };
        // The timer may already be gone; the phase check in `run_job` covers that.
        let _ = self.timers.send(TimerCommand::Disarm(*id));
        self.shared.persist(&cancelled).await;
        self.shared.touch();
        tracing::info!(job = %id, "deployment cancelled");
        Ok(cancelled)
    }

    pub fn get_job(&self, id: &JobId) -> Result<DeploymentJob, WallError> {
        self.shared
            .jobs
            .get(id)
            .map(|j| j.value().clone())
            .ok_or(WallError::UnknownJob(*id))
    }

    /// All known jobs, oldest first.
    pub fn list_jobs(&self) -> Vec<DeploymentJob> {
        let mut jobs: Vec<_> = self.shared.jobs.iter().map(|j| j.value().clone()).collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.revision.cmp(&b.revision)));
        jobs
    }

    /// Start revision n+1 of a failed or partially failed job, targeting
    /// only the displays that failed.
    pub async fn retry(&self, id: &JobId) -> Result<JobId, WallError> {
        self.ensure_running()?;
        let next = self.get_job(id)?.retry_revision(Utc::now())?;
        let next_id = next.id;
        self.shared.store.save(&next).await?;
        tracing::info!(
            job = %next_id,
            parent = %id,
            revision = next.revision,
            targets = next.outcomes.len(),
            "retry revision created"
        );
        self.shared.jobs.insert(next_id, next);
        self.shared.touch();
        self.launch(next_id);
        Ok(next_id)
    }

    /// Forget a settled job, in memory and in the store.
    pub async fn purge(&self, id: &JobId) -> Result<DeploymentJob, WallError> {
        let (_, job) = match self.shared.jobs.remove_if(id, |_, job| job.phase.is_settled()) {
            Some(entry) => entry,
            None => {
                let job = self.get_job(id)?;
                return Err(WallError::JobPhase {
                    job: *id,
                    action: "purge",
                    phase: job.phase.to_string(),
                });
            }
        };
        self.shared.store.remove(id).await?;
        self.shared.touch();
        Ok(job)
    }

    /// Load persisted jobs: re-arm future ones, resume due and interrupted
    /// ones. Targets that already settled are not re-issued.
    pub async fn restore(&self) -> Result<RestoreSummary, WallError> {
        self.ensure_running()?;
        let now = Utc::now();
        let mut summary = RestoreSummary::default();

        for job in self.shared.store.load_all().await? {
            if self.shared.jobs.contains_key(&job.id) {
                continue;
            }
            summary.loaded += 1;
            let id = job.id;
            let phase = job.phase;
            let arm_at = job.scheduled_for.filter(|_| job.is_future(now));
            self.shared.jobs.insert(id, job);

            match (phase, arm_at) {
                (JobPhase::Pending | JobPhase::Scheduled, Some(at)) => {
                    if let Some(mut job) = self.shared.jobs.get_mut(&id) {
                        // Pending with a future time: crashed between accept and arm.
                        let _ = job.arm(now);
                    }
                    if let Err(e) = self.timers.send(TimerCommand::Arm { job: id, at }) {
                        // Still in the store; the next restore picks it up.
                        self.shared.jobs.remove(&id);
                        self.shared.touch();
                        return Err(e.into());
                    }
                    summary.rearmed += 1;
                }
                (JobPhase::Pending | JobPhase::Scheduled | JobPhase::InProgress, _) => {
                    self.launch(id);
                    summary.resumed += 1;
                }
                _ => {}
            }
        }
        self.shared.touch();
        tracing::info!(
            loaded = summary.loaded,
            rearmed = summary.rearmed,
            resumed = summary.resumed,
            "scheduler state restored"
        );
        Ok(summary)
    }

    /// Wait until the job settles (finished or cancelled).
    pub async fn wait_until_settled(&self, id: &JobId) -> Result<DeploymentJob, WallError> {
        let mut changes = self.shared.version.subscribe();
        loop {
            let job = self.get_job(id)?;
            if job.phase.is_settled() {
                return Ok(job);
            }
            changes.changed().await.map_err(|_| WallError::ChannelClosed)?;
        }
    }

    /// Stop the timer task. Armed jobs stay `scheduled` in the store and
    /// come back with [`restore`](Self::restore).
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "scheduler timer task ended abnormally");
            }
        }
    }

    fn ensure_running(&self) -> Result<(), WallError> {
        if self.shutdown.is_cancelled() {
            return Err(WallError::ChannelClosed);
        }
        Ok(())
    }

    fn launch(&self, id: JobId) {
        tokio::spawn(run_job(Arc::clone(&self.shared), id));
    }
}

impl Drop for DeploymentScheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn timer_loop(
    shared: Arc<Shared>,
    mut commands: mpsc::UnboundedReceiver<TimerCommand>,
    shutdown: CancellationToken,
) {
    let mut queue: DelayQueue<JobId> = DelayQueue::new();
    let mut keys: HashMap<JobId, delay_queue::Key> = HashMap::new();
    // Jobs whose deadline lies past the longest single timer.
    let mut deferred: HashMap<JobId, DateTime<Utc>> = HashMap::new();
    let max_delay = Duration::from_secs(MAX_TIMER_SECS);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            command = commands.recv() => match command {
                Some(TimerCommand::Arm { job, at }) => {
                    arm(&mut queue, &mut keys, &mut deferred, job, at, max_delay);
                }
                Some(TimerCommand::Disarm(job)) => {
                    deferred.remove(&job);
                    if let Some(key) = keys.remove(&job) {
                        queue.remove(&key);
                    }
                }
                None => break,
            },
            Some(expired) = queue.next() => {
                let job = expired.into_inner();
                keys.remove(&job);
                match deferred.remove(&job) {
                    Some(at) => arm(&mut queue, &mut keys, &mut deferred, job, at, max_delay),
                    None => {
                        tokio::spawn(run_job(Arc::clone(&shared), job));
                    }
                }
            }
        }
    }
    tracing::debug!(armed = keys.len(), "scheduler timer stopped");
}

fn arm(
    queue: &mut DelayQueue<JobId>,
    keys: &mut HashMap<JobId, delay_queue::Key>,
    deferred: &mut HashMap<JobId, DateTime<Utc>>,
    job: JobId,
    at: DateTime<Utc>,
    max_delay: Duration,
) {
    let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    let step = if delay > max_delay {
        deferred.insert(job, at);
        max_delay
    } else {
        deferred.remove(&job);
        delay
    };
    let key = queue.insert(job, step);
    if let Some(stale) = keys.insert(job, key) {
        queue.remove(&stale);
    }
    tracing::debug!(job = %job, ?delay, "deployment armed");
}

/// Dispatch the still-pending targets of a job and settle it.
async fn run_job(shared: Arc<Shared>, id: JobId) {
    let started = {
        let Some(mut job) = shared.jobs.get_mut(&id) else {
            return;
        };
        // Cancelled (or already finished) before the timer fired.
        if job.phase.is_settled() || job.start(Utc::now()).is_err() {
            return;
        }
        job.clone()
    };
    shared.persist(&started).await;
    shared.touch();

    let targets = started.pending_targets();
    tracing::info!(
        job = %id,
        revision = started.revision,
        targets = targets.len(),
        asset = %started.asset,
        "deployment started"
    );

    let results = match targets.first() {
        Some(first) => {
            let command = Command::new(first.clone(), CommandKind::Deploy(started.asset.clone()))
                .with_correlation_id(started.delivery_id());
            shared.dispatcher.broadcast(&command, &targets).await
        }
        None => BTreeMap::new(),
    };

    let finished = {
        let Some(mut job) = shared.jobs.get_mut(&id) else {
            return;
        };
        let now = Utc::now();
        for (display, result) in &results {
            job.record(display, TargetOutcome::from_result(result, now), now);
        }
        if let Err(e) = job.settle(now) {
            tracing::warn!(job = %id, error = %e, "could not settle deployment");
        }
        job.clone()
    };
    shared.persist(&finished).await;
    shared.touch();

    match finished.phase {
        JobPhase::Completed => {
            tracing::info!(job = %id, "deployment completed");
        }
        phase => {
            tracing::warn!(
                job = %id,
                %phase,
                failed = ?finished.failed_targets(),
                "deployment finished with failures"
            );
        }
    }
}
