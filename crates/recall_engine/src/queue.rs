use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use recall_core::{DeliveryJob, DeliveryResult};
use recall_logging::{recall_debug, recall_error, recall_info, recall_warn};
use tokio::runtime::Handle;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;

use crate::deliver::{DeliveryClient, DeliveryOutcome};
use crate::offline::OfflineStore;
use crate::types::{AnalyzeRequest, EventSink, JobId, PipelineEvent};

/// Smallest interval a rate limit can push the dispatch delay to.
const RATE_LIMIT_FLOOR: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSettings {
    /// Dispatch delay before any rate limit was seen.
    pub initial_interval: Duration,
    /// Ceiling for the doubled delay.
    pub max_interval: Duration,
    /// Delivery attempts per job before it is spilled offline.
    pub max_attempts: u32,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(1000),
            max_interval: Duration::from_secs(10),
            max_attempts: 3,
        }
    }
}

struct QueuedJob {
    id: JobId,
    job: DeliveryJob,
    reply: Option<oneshot::Sender<DeliveryResult>>,
}

/// The job the worker is delivering. Its reply lives here so a shutdown
/// spill can resolve it while the delivery is still outstanding.
struct InFlight {
    id: JobId,
    job: DeliveryJob,
    reply: Option<oneshot::Sender<DeliveryResult>>,
}

struct QueueState {
    jobs: VecDeque<QueuedJob>,
    in_flight: Option<InFlight>,
    is_draining: bool,
    /// Set by `spill_pending`; the worker discards late outcomes and stops.
    shutting_down: bool,
    min_interval: Duration,
    last_dispatch_at: Option<Instant>,
    next_id: JobId,
    offline_notified: bool,
}

impl QueueState {
    fn remaining_wait(&self, now: Instant) -> Duration {
        match self.last_dispatch_at {
            Some(last) => self.min_interval.saturating_sub(now.duration_since(last)),
            None => Duration::ZERO,
        }
    }
}

struct QueueInner {
    state: Mutex<QueueState>,
    idle: Notify,
    client: Arc<dyn DeliveryClient>,
    offline: Arc<OfflineStore>,
    sink: Arc<dyn EventSink>,
    settings: QueueSettings,
    runtime: Handle,
}

/// Serialized delivery of jobs to the remote store.
///
/// One worker task drains the queue in arrival order, waiting at least the
/// adaptive interval between dispatches. Rate-limited jobs go back to the
/// front, failed ones to the back, and jobs out of attempts are spilled to the
/// offline store. Every job resolves exactly once.
#[derive(Clone)]
pub struct SubmissionQueue {
    inner: Arc<QueueInner>,
}

impl SubmissionQueue {
    pub fn new(
        client: Arc<dyn DeliveryClient>,
        offline: Arc<OfflineStore>,
        sink: Arc<dyn EventSink>,
        settings: QueueSettings,
        runtime: Handle,
    ) -> Self {
        let state = QueueState {
            jobs: VecDeque::new(),
            in_flight: None,
            is_draining: false,
            shutting_down: false,
            min_interval: settings.initial_interval,
            last_dispatch_at: None,
            next_id: 1,
            offline_notified: false,
        };
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(state),
                idle: Notify::new(),
                client,
                offline,
                sink,
                settings,
                runtime,
            }),
        }
    }

    /// Queues a job and returns a future for its result.
    ///
    /// The job is queued before this returns; awaiting the future is optional.
    pub fn enqueue(&self, job: DeliveryJob) -> impl Future<Output = DeliveryResult> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        self.schedule(job, Some(tx));
        async move {
            rx.await.unwrap_or_else(|_| DeliveryResult::Failed {
                reason: "submission queue stopped".to_string(),
            })
        }
    }

    /// Queues a job whose result is only reported through the event sink.
    pub fn submit(&self, job: DeliveryJob) -> JobId {
        self.schedule(job, None)
    }

    pub fn min_interval(&self) -> Duration {
        self.inner.state.lock().min_interval
    }

    /// Jobs waiting for dispatch, head first. Excludes the one in flight.
    pub fn pending_jobs(&self) -> Vec<DeliveryJob> {
        self.inner
            .state
            .lock()
            .jobs
            .iter()
            .map(|queued| queued.job.clone())
            .collect()
    }

    pub fn is_idle(&self) -> bool {
        let state = self.inner.state.lock();
        !state.is_draining && state.jobs.is_empty()
    }

    /// Allows the next spill to raise a fresh offline notice.
    pub fn reset_offline_notice(&self) {
        self.inner.state.lock().offline_notified = false;
    }

    /// Waits until the worker has nothing left to do, or `grace` elapsed.
    pub async fn wait_idle(&self, grace: Duration) -> bool {
        let idle = async {
            loop {
                let notified = self.inner.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.is_idle() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(grace, idle).await.is_ok()
    }

    /// Moves every undelivered job, including one still in flight, to the
    /// offline store and stops the worker. Used on shutdown.
    ///
    /// An outcome that arrives later for the in-flight job is discarded, so
    /// each spilled job is stored offline once and resolved once.
    pub fn spill_pending(&self) -> usize {
        let (in_flight, queued) = {
            let mut state = self.inner.state.lock();
            state.shutting_down = true;
            (
                state.in_flight.take(),
                state.jobs.drain(..).collect::<Vec<_>>(),
            )
        };
        let pending = in_flight
            .map(|job| QueuedJob {
                id: job.id,
                job: job.job,
                reply: job.reply,
            })
            .into_iter()
            .chain(queued);

        let mut spilled = 0;
        for queued in pending {
            let result = self.inner.park_offline(queued.id, queued.job);
            if matches!(result, DeliveryResult::QueuedOffline) {
                spilled += 1;
            }
            self.inner.resolve(queued.id, queued.reply, result);
        }
        spilled
    }

    fn schedule(&self, job: DeliveryJob, reply: Option<oneshot::Sender<DeliveryResult>>) -> JobId {
        let kind = job.kind;
        let (id, start_worker, late) = {
            let mut state = self.inner.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            if state.shutting_down {
                (id, false, Some(QueuedJob { id, job, reply }))
            } else {
                state.jobs.push_back(QueuedJob { id, job, reply });
                let start_worker = !state.is_draining;
                state.is_draining = true;
                (id, start_worker, None)
            }
        };
        self.inner.sink.emit(PipelineEvent::JobQueued { job_id: id, kind });
        if let Some(late) = late {
            self.inner.exhaust(late);
        } else if start_worker {
            let inner = self.inner.clone();
            self.inner.runtime.spawn(drain(inner));
        }
        id
    }
}

async fn drain(inner: Arc<QueueInner>) {
    recall_debug!("Submission worker started");
    loop {
        let wait = {
            let mut state = inner.state.lock();
            if state.jobs.is_empty() || state.shutting_down {
                state.is_draining = false;
                drop(state);
                recall_debug!("Submission worker idle");
                inner.idle.notify_waiters();
                return;
            }
            state.remaining_wait(Instant::now())
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        let next = {
            let mut state = inner.state.lock();
            if state.shutting_down {
                continue;
            }
            let next = state.jobs.pop_front();
            if let Some(queued) = next {
                state.last_dispatch_at = Some(Instant::now());
                state.in_flight = Some(InFlight {
                    id: queued.id,
                    job: queued.job.clone(),
                    reply: queued.reply,
                });
                Some((queued.id, queued.job))
            } else {
                None
            }
        };
        let Some((id, job)) = next else {
            continue;
        };

        recall_debug!(
            "Dispatching job {} ({}), attempt {}",
            id,
            job,
            job.attempts + 1
        );
        let outcome = inner.client.deliver(&job).await;
        let Some(reply) = inner.reclaim(id) else {
            recall_info!("Job {} was kept offline during delivery, outcome dropped", id);
            continue;
        };
        inner.handle_outcome(QueuedJob { id, job, reply }, outcome);
    }
}

impl QueueInner {
    /// Takes the in-flight job's reply back once its delivery returned.
    /// `None` when a shutdown spill already claimed the job.
    fn reclaim(&self, id: JobId) -> Option<Option<oneshot::Sender<DeliveryResult>>> {
        let mut state = self.state.lock();
        if state.shutting_down {
            return None;
        }
        match state.in_flight.take() {
            Some(in_flight) if in_flight.id == id => Some(in_flight.reply),
            other => {
                state.in_flight = other;
                None
            }
        }
    }

    fn handle_outcome(&self, mut queued: QueuedJob, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Stored { ids } => {
                recall_info!("Job {} stored ({})", queued.id, queued.job);
                self.sink.emit(PipelineEvent::AnalyzeRequested(AnalyzeRequest {
                    job_id: queued.id,
                    kind: queued.job.kind,
                    subject_id: queued.job.subject_id.clone(),
                    ids: ids.clone(),
                }));
                self.resolve(queued.id, queued.reply, DeliveryResult::Stored { ids });
            }
            DeliveryOutcome::Duplicate => {
                recall_info!("Job {} already stored, skipped", queued.id);
                self.resolve(queued.id, queued.reply, DeliveryResult::Skipped);
            }
            DeliveryOutcome::RateLimited => {
                let interval = self.back_off();
                queued.job.attempts += 1;
                recall_warn!(
                    "Job {} rate limited (attempt {}/{}), interval now {:?}",
                    queued.id,
                    queued.job.attempts,
                    self.settings.max_attempts,
                    interval
                );
                if queued.job.attempts < self.settings.max_attempts {
                    self.state.lock().jobs.push_front(queued);
                } else {
                    self.exhaust(queued);
                }
            }
            DeliveryOutcome::Failed(err) => {
                queued.job.attempts += 1;
                recall_warn!(
                    "Job {} failed (attempt {}/{}): {}",
                    queued.id,
                    queued.job.attempts,
                    self.settings.max_attempts,
                    err
                );
                if queued.job.attempts < self.settings.max_attempts {
                    self.state.lock().jobs.push_back(queued);
                } else {
                    self.exhaust(queued);
                }
            }
        }
    }

    /// Doubles the dispatch interval up to the cap. Never lowers it.
    fn back_off(&self) -> Duration {
        let mut state = self.state.lock();
        let current = state.min_interval;
        state.min_interval = current
            .saturating_mul(2)
            .max(RATE_LIMIT_FLOOR)
            .min(self.settings.max_interval)
            .max(current);
        state.min_interval
    }

    fn exhaust(&self, queued: QueuedJob) {
        let result = self.park_offline(queued.id, queued.job);
        self.resolve(queued.id, queued.reply, result);
    }

    fn park_offline(&self, id: JobId, job: DeliveryJob) -> DeliveryResult {
        match self.offline.spill(job, Utc::now()) {
            Ok(_) => {
                recall_warn!("Job {} moved to the offline store", id);
                let first_notice = {
                    let mut state = self.state.lock();
                    !std::mem::replace(&mut state.offline_notified, true)
                };
                if first_notice {
                    self.sink.emit(PipelineEvent::OfflineNotice {
                        pending: self.offline.len(),
                    });
                }
                DeliveryResult::QueuedOffline
            }
            Err(err) => {
                recall_error!("Job {} could not be saved offline: {}", id, err);
                DeliveryResult::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }

    fn resolve(
        &self,
        id: JobId,
        reply: Option<oneshot::Sender<DeliveryResult>>,
        result: DeliveryResult,
    ) {
        self.sink.emit(PipelineEvent::JobCompleted {
            job_id: id,
            result: result.clone(),
        });
        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
    }
}
