//! Job queue: FIFO admission, single active job, progress fan-out
//!
//! One owned state machine holds the pending list, the active job and the
//! subscriber list; there are no ambient globals. The head of the pending
//! list is admitted as `running` only when nothing else is running, and on
//! every terminal transition the next pending job starts immediately.
//! Completed/failed/cancelled jobs stay queryable until explicitly cleared.

use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::action_log::ActionLogWriter;
use crate::auth::TokenProvider;
use crate::batch::{BatchConfig, BatchRunner, CancelFlag};
use crate::error::Result;
use crate::eta;
use crate::executor::{HandlerRegistry, JobContext, ProgressSink, TargetCountSink};
use crate::models::{EndType, Job, JobId, JobPayload, JobStatus, JobType, ProgressSnapshot};
use crate::provider::MailProvider;

/// UI progress subscriber
pub type ProgressCallback = Arc<dyn Fn(&ProgressSnapshot) + Send + Sync>;

/// Listener for the reconnect-required prompt
pub type ReauthListener = Arc<dyn Fn() + Send + Sync>;

/// Single source of truth for the active job's progress
///
/// `processed` only ever grows within one job run; the queue reads it
/// synchronously whenever a component needs the latest value.
pub struct ProgressTracker {
    job_type: JobType,
    total: usize,
    started: Instant,
    state: Mutex<ProgressSnapshot>,
    emitter: Box<dyn Fn(&ProgressSnapshot) + Send + Sync>,
}

impl ProgressTracker {
    fn new(
        job: &Job,
        emitter: Box<dyn Fn(&ProgressSnapshot) + Send + Sync>,
    ) -> Self {
        let mut snapshot = ProgressSnapshot::pending(job.total_estimated, job.initial_eta);
        snapshot.status = JobStatus::Running;
        Self {
            job_type: job.job_type,
            total: job.total_estimated,
            started: Instant::now(),
            state: Mutex::new(snapshot),
            emitter,
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.state.lock().unwrap().clone()
    }

    pub fn processed(&self) -> usize {
        self.state.lock().unwrap().processed
    }

    fn record(&self, delta: usize, current_target: Option<&str>) {
        let snapshot = {
            let mut state = self.state.lock().unwrap();
            state.processed += delta;
            state.current_target = current_target.map(|s| s.to_string());
            let denominator = self.total.max(state.processed).max(1);
            state.percent_complete =
                (state.processed as f32 / denominator as f32 * 100.0).min(100.0);
            state.eta = Some(eta::remaining_estimate(
                self.job_type,
                denominator,
                state.processed,
                self.started.elapsed(),
            ));
            state.clone()
        };
        (self.emitter)(&snapshot);
    }

    fn set_terminal(&self, status: JobStatus, error: Option<String>) {
        let snapshot = {
            let mut state = self.state.lock().unwrap();
            state.status = status;
            state.error = error;
            state.current_target = None;
            if status == JobStatus::Completed {
                state.percent_complete = 100.0;
            }
            state.eta = if status == JobStatus::Completed {
                Some(Duration::ZERO)
            } else {
                None
            };
            state.clone()
        };
        (self.emitter)(&snapshot);
    }
}

impl ProgressSink for ProgressTracker {
    fn on_progress(&self, delta: usize, current_target: Option<&str>) {
        self.record(delta, current_target);
    }
}

/// Collaborators the queue wires into every job run
pub struct QueueDeps {
    pub provider: Arc<dyn MailProvider>,
    pub tokens: Arc<dyn TokenProvider>,
    pub registry: HandlerRegistry,
    pub log_writer: ActionLogWriter,
    pub counts: Arc<dyn TargetCountSink>,
    pub batch_config: BatchConfig,
}

struct ActiveJob {
    job: Job,
    cancel: CancelFlag,
    tracker: Arc<ProgressTracker>,
}

struct Inner {
    pending: VecDeque<Job>,
    active: Option<ActiveJob>,
    history: Vec<Job>,
    subscribers: HashMap<JobId, Vec<(u64, ProgressCallback)>>,
    reauth_listeners: Vec<(u64, ReauthListener)>,
    next_token: u64,
}

/// The public queue handle; cheap to clone, all clones share one state
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Mutex<Inner>>,
    deps: Arc<QueueDeps>,
}

impl JobQueue {
    pub fn new(deps: QueueDeps) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                pending: VecDeque::new(),
                active: None,
                history: Vec::new(),
                subscribers: HashMap::new(),
                reauth_listeners: Vec::new(),
                next_token: 0,
            })),
            deps: Arc::new(deps),
        }
    }

    /// Validate and admit a new job; invalid payloads are rejected here,
    /// before any job exists or any network activity happens
    pub fn enqueue(&self, payload: JobPayload) -> Result<JobId> {
        payload.validate()?;

        let initial_eta = eta::initial_estimate(payload.job_type(), payload.total_estimated());
        let job = Job::new(payload, initial_eta);
        let id = job.id;

        info!(job_id = %id, job_type = ?job.job_type, total = job.total_estimated, "job enqueued");
        {
            let mut inner = self.inner.lock().unwrap();
            inner.pending.push_back(job);
        }
        self.maybe_start();
        Ok(id)
    }

    /// Request cancellation; active jobs stop at the next cooperative check,
    /// pending jobs are removed immediately. Returns false for unknown or
    /// already-terminal jobs.
    pub fn cancel(&self, id: JobId) -> bool {
        let (cancelled_pending, callbacks) = {
            let mut inner = self.inner.lock().unwrap();

            if let Some(active) = &inner.active {
                if active.job.id == id {
                    info!(job_id = %id, "cancel requested for active job");
                    active.cancel.cancel();
                    return true;
                }
            }

            let Some(mut job) = inner
                .pending
                .iter()
                .position(|j| j.id == id)
                .and_then(|pos| inner.pending.remove(pos))
            else {
                return false;
            };
            info!(job_id = %id, "pending job cancelled before start");
            job.status = JobStatus::Cancelled;
            job.finished_at = Some(Utc::now());
            let snapshot = ProgressSnapshot {
                status: JobStatus::Cancelled,
                percent_complete: 0.0,
                total_estimated: job.total_estimated,
                processed: 0,
                current_target: None,
                error: None,
                eta: None,
            };
            inner.history.push(job);
            let callbacks: Vec<ProgressCallback> = inner
                .subscribers
                .get(&id)
                .map(|subs| subs.iter().map(|(_, cb)| cb.clone()).collect())
                .unwrap_or_default();
            (snapshot, callbacks)
        };

        for cb in callbacks {
            cb(&cancelled_pending);
        }
        true
    }

    /// Register a progress callback for one job; the current snapshot is
    /// delivered immediately if the job is already running or finished
    pub fn subscribe(&self, id: JobId, callback: ProgressCallback) -> u64 {
        let (token, current) = {
            let mut inner = self.inner.lock().unwrap();
            let token = inner.next_token;
            inner.next_token += 1;
            inner
                .subscribers
                .entry(id)
                .or_default()
                .push((token, callback.clone()));
            (token, self.snapshot_locked(&inner, id))
        };
        if let Some(snapshot) = current {
            callback(&snapshot);
        }
        token
    }

    pub fn unsubscribe(&self, id: JobId, token: u64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(subs) = inner.subscribers.get_mut(&id) {
            subs.retain(|(t, _)| *t != token);
            if subs.is_empty() {
                inner.subscribers.remove(&id);
            }
        }
    }

    /// Register a listener for the reconnect prompt; fired once per job that
    /// fails with a reauth-flavored error
    pub fn on_reauth_required(&self, listener: ReauthListener) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        let token = inner.next_token;
        inner.next_token += 1;
        inner.reauth_listeners.push((token, listener));
        token
    }

    pub fn remove_reauth_listener(&self, token: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.reauth_listeners.retain(|(t, _)| *t != token);
    }

    /// Look a job up anywhere: active, pending or history
    pub fn get_job(&self, id: JobId) -> Option<Job> {
        let inner = self.inner.lock().unwrap();
        if let Some(active) = &inner.active {
            if active.job.id == id {
                return Some(active.job.clone());
            }
        }
        inner
            .pending
            .iter()
            .chain(inner.history.iter())
            .find(|j| j.id == id)
            .cloned()
    }

    /// Latest progress snapshot for a job in any state
    pub fn progress(&self, id: JobId) -> Option<ProgressSnapshot> {
        let inner = self.inner.lock().unwrap();
        self.snapshot_locked(&inner, id)
    }

    fn snapshot_locked(&self, inner: &Inner, id: JobId) -> Option<ProgressSnapshot> {
        if let Some(active) = &inner.active {
            if active.job.id == id {
                return Some(active.tracker.snapshot());
            }
        }
        if let Some(job) = inner.pending.iter().find(|j| j.id == id) {
            return Some(ProgressSnapshot::pending(
                job.total_estimated,
                job.initial_eta,
            ));
        }
        inner.history.iter().find(|j| j.id == id).map(|job| {
            let denominator = job.total_estimated.max(job.processed).max(1);
            ProgressSnapshot {
                status: job.status,
                percent_complete: (job.processed as f32 / denominator as f32 * 100.0).min(100.0),
                total_estimated: job.total_estimated,
                processed: job.processed,
                current_target: None,
                error: job.error.clone(),
                eta: None,
            }
        })
    }

    /// Terminal jobs retained for the results/history view
    pub fn get_history(&self) -> Vec<Job> {
        self.inner.lock().unwrap().history.clone()
    }

    pub fn clear_history(&self) {
        self.inner.lock().unwrap().history.clear();
    }

    /// ID of the job currently running, if any
    pub fn active_job_id(&self) -> Option<JobId> {
        self.inner
            .lock()
            .unwrap()
            .active
            .as_ref()
            .map(|a| a.job.id)
    }

    /// Admit the head of the pending list when nothing is running
    fn maybe_start(&self) {
        let (job, cancel, tracker) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.active.is_some() {
                return;
            }
            let Some(mut job) = inner.pending.pop_front() else {
                return;
            };
            job.status = JobStatus::Running;

            let cancel = CancelFlag::new();
            let job_id = job.id;
            let fanout = Arc::clone(&self.inner);
            let tracker = Arc::new(ProgressTracker::new(
                &job,
                Box::new(move |snapshot| {
                    let callbacks: Vec<ProgressCallback> = {
                        let inner = fanout.lock().unwrap();
                        inner
                            .subscribers
                            .get(&job_id)
                            .map(|subs| subs.iter().map(|(_, cb)| cb.clone()).collect())
                            .unwrap_or_default()
                    };
                    for cb in callbacks {
                        cb(snapshot);
                    }
                }),
            ));

            inner.active = Some(ActiveJob {
                job: job.clone(),
                cancel: cancel.clone(),
                tracker: Arc::clone(&tracker),
            });
            (job, cancel, tracker)
        };

        let queue = self.clone();
        tokio::spawn(async move {
            queue.run_job(job, cancel, tracker).await;
        });
    }

    async fn run_job(&self, mut job: Job, cancel: CancelFlag, tracker: Arc<ProgressTracker>) {
        info!(job_id = %job.id, job_type = ?job.job_type, "job started");

        let log = self.deps.log_writer.begin(&job).await;
        let ctx = JobContext {
            runner: BatchRunner::new(
                Arc::clone(&self.deps.provider),
                Arc::clone(&self.deps.tokens),
                self.deps.batch_config.clone(),
            ),
            provider: Arc::clone(&self.deps.provider),
            cancel,
            progress: Arc::clone(&tracker) as Arc<dyn ProgressSink>,
            log: Arc::clone(&log),
            counts: Arc::clone(&self.deps.counts),
        };

        let result = match self.deps.registry.get(job.job_type) {
            Ok(handler) => handler.run(&job.payload, &ctx).await,
            Err(e) => Err(e),
        };

        let reauth = matches!(&result, Err(e) if e.is_reauth());
        let (status, end_type, error, analysis) = match result {
            Ok(outcome) if outcome.cancelled => {
                (JobStatus::Cancelled, EndType::Cancelled, None, outcome.analysis)
            }
            Ok(outcome) => (JobStatus::Completed, EndType::Success, None, outcome.analysis),
            Err(e) => {
                warn!(job_id = %job.id, "job failed: {}", e);
                (JobStatus::Failed, EndType::Failure, Some(e.to_string()), None)
            }
        };

        let processed = tracker.processed();
        tracker.set_terminal(status, error.clone());
        log.finalize(status, end_type, processed, error.clone()).await;

        info!(job_id = %job.id, ?status, processed, "job finished");

        job.status = status;
        job.error = error;
        job.processed = processed;
        job.analysis = analysis;
        job.finished_at = Some(Utc::now());
        {
            let mut inner = self.inner.lock().unwrap();
            inner.active = None;
            inner.history.push(job);
        }

        if reauth {
            let listeners: Vec<ReauthListener> = {
                let inner = self.inner.lock().unwrap();
                inner
                    .reauth_listeners
                    .iter()
                    .map(|(_, l)| l.clone())
                    .collect()
            };
            for listener in listeners {
                listener();
            }
        }

        self.maybe_start();
    }
}
