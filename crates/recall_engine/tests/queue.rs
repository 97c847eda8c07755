use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use recall_core::{DeliveryJob, DeliveryResult, Turn};
use recall_engine::{
    DeliveryClient, DeliveryError, DeliveryOutcome, EventSink, OfflineStore, PipelineEvent,
    QueueSettings, SubmissionQueue,
};
use tokio::runtime::Handle;
use tokio::time::Instant;

/// Plays back a fixed list of outcomes, then stores everything.
#[derive(Default)]
struct ScriptedClient {
    script: Mutex<VecDeque<DeliveryOutcome>>,
    calls: Mutex<Vec<(String, u32, Instant)>>,
}

impl ScriptedClient {
    fn new(script: Vec<DeliveryOutcome>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn texts(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(text, _, _)| text.clone())
            .collect()
    }

    fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(_, _, at)| *at).collect()
    }
}

#[async_trait::async_trait]
impl DeliveryClient for ScriptedClient {
    async fn deliver(&self, job: &DeliveryJob) -> DeliveryOutcome {
        let text = job.single_text().unwrap_or_default().to_string();
        self.calls
            .lock()
            .unwrap()
            .push((text, job.attempts, Instant::now()));
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(DeliveryOutcome::Stored { ids: Vec::new() })
    }
}

/// Never answers.
struct StalledClient;

#[async_trait::async_trait]
impl DeliveryClient for StalledClient {
    async fn deliver(&self, _job: &DeliveryJob) -> DeliveryOutcome {
        std::future::pending().await
    }
}

/// Answers with a fixed outcome after a delay.
struct SlowClient {
    delay: Duration,
    outcome: DeliveryOutcome,
}

#[async_trait::async_trait]
impl DeliveryClient for SlowClient {
    async fn deliver(&self, _job: &DeliveryJob) -> DeliveryOutcome {
        tokio::time::sleep(self.delay).await;
        self.outcome.clone()
    }
}

#[derive(Default)]
struct TestSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl TestSink {
    fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap().clone()
    }

    fn completions(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, PipelineEvent::JobCompleted { .. }))
            .count()
    }

    fn offline_notices(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, PipelineEvent::OfflineNotice { .. }))
            .count()
    }
}

impl EventSink for TestSink {
    fn emit(&self, event: PipelineEvent) {
        self.events.lock().unwrap().push(event);
    }
}

struct Harness {
    queue: SubmissionQueue,
    offline: Arc<OfflineStore>,
    sink: Arc<TestSink>,
    _dir: tempfile::TempDir,
}

fn harness(client: Arc<dyn DeliveryClient>, settings: QueueSettings) -> Harness {
    recall_logging::initialize_for_tests();
    let dir = tempfile::tempdir().expect("tempdir");
    let offline = Arc::new(OfflineStore::open(dir.path().to_path_buf(), 100).expect("offline"));
    let sink = Arc::new(TestSink::default());
    let queue = SubmissionQueue::new(
        client,
        offline.clone(),
        sink.clone(),
        settings,
        Handle::current(),
    );
    Harness {
        queue,
        offline,
        sink,
        _dir: dir,
    }
}

fn job(text: &str) -> DeliveryJob {
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    DeliveryJob::single(&Turn::user(text, at), "default", at)
}

fn network_error() -> DeliveryOutcome {
    DeliveryOutcome::Failed(DeliveryError::Network("connection refused".to_string()))
}

#[tokio::test(start_paused = true)]
async fn jobs_are_delivered_in_arrival_order() {
    let client = ScriptedClient::new(Vec::new());
    let h = harness(client.clone(), QueueSettings::default());

    let a = h.queue.enqueue(job("a"));
    let b = h.queue.enqueue(job("b"));
    let c = h.queue.enqueue(job("c"));

    for result in [a.await, b.await, c.await] {
        assert_eq!(result, DeliveryResult::Stored { ids: Vec::new() });
    }
    assert_eq!(client.texts(), vec!["a", "b", "c"]);
    assert!(h.queue.is_idle());
}

#[tokio::test(start_paused = true)]
async fn dispatches_are_spaced_by_the_interval() {
    let client = ScriptedClient::new(Vec::new());
    let h = harness(client.clone(), QueueSettings::default());

    let first = h.queue.enqueue(job("a"));
    let second = h.queue.enqueue(job("b"));
    first.await;
    second.await;

    let times = client.call_times();
    assert!(times[1] - times[0] >= Duration::from_millis(1000));
}

#[tokio::test(start_paused = true)]
async fn repeated_rate_limits_move_the_job_offline() {
    let client = ScriptedClient::new(vec![
        DeliveryOutcome::RateLimited,
        DeliveryOutcome::RateLimited,
        DeliveryOutcome::RateLimited,
    ]);
    let h = harness(client.clone(), QueueSettings::default());

    let result = h.queue.enqueue(job("Hi")).await;

    assert_eq!(result, DeliveryResult::QueuedOffline);
    assert_eq!(client.texts().len(), 3);
    assert_eq!(h.queue.min_interval(), Duration::from_millis(8000));
    let records = h.offline.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].job.user_text.as_deref(), Some("Hi"));
    assert_eq!(records[0].job.attempts, 3);

    let times = client.call_times();
    assert!(times[1] - times[0] >= Duration::from_millis(2000));
    assert!(times[2] - times[1] >= Duration::from_millis(4000));
    assert_eq!(h.sink.offline_notices(), 1);
}

#[tokio::test(start_paused = true)]
async fn interval_is_capped_and_never_shrinks() {
    let client = ScriptedClient::new(vec![
        DeliveryOutcome::RateLimited,
        DeliveryOutcome::RateLimited,
    ]);
    let settings = QueueSettings {
        initial_interval: Duration::from_secs(6),
        ..QueueSettings::default()
    };
    let h = harness(client.clone(), settings);

    let result = h.queue.enqueue(job("Hi")).await;

    assert_eq!(result, DeliveryResult::Stored { ids: Vec::new() });
    assert_eq!(h.queue.min_interval(), Duration::from_secs(10));

    h.queue.enqueue(job("again")).await;
    assert_eq!(h.queue.min_interval(), Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn rate_limited_job_keeps_its_place_at_the_head() {
    let client = ScriptedClient::new(vec![DeliveryOutcome::RateLimited]);
    let h = harness(client.clone(), QueueSettings::default());

    let a = h.queue.enqueue(job("a"));
    let b = h.queue.enqueue(job("b"));
    a.await;
    b.await;

    assert_eq!(client.texts(), vec!["a", "a", "b"]);
}

#[tokio::test(start_paused = true)]
async fn failed_job_retries_behind_the_others() {
    let client = ScriptedClient::new(vec![network_error()]);
    let h = harness(client.clone(), QueueSettings::default());

    let a = h.queue.enqueue(job("a"));
    let b = h.queue.enqueue(job("b"));

    assert_eq!(a.await, DeliveryResult::Stored { ids: Vec::new() });
    assert_eq!(b.await, DeliveryResult::Stored { ids: Vec::new() });
    assert_eq!(client.texts(), vec!["a", "b", "a"]);
    assert_eq!(h.queue.min_interval(), Duration::from_millis(1000));
}

#[tokio::test(start_paused = true)]
async fn failures_exhaust_attempts_then_spill() {
    let client = ScriptedClient::new(vec![network_error(), network_error(), network_error()]);
    let h = harness(client.clone(), QueueSettings::default());

    let result = h.queue.enqueue(job("Hi")).await;

    assert_eq!(result, DeliveryResult::QueuedOffline);
    assert_eq!(h.offline.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn analysis_is_requested_only_for_stored_jobs() {
    let client = ScriptedClient::new(vec![
        DeliveryOutcome::Stored {
            ids: vec!["7".to_string()],
        },
        DeliveryOutcome::Duplicate,
    ]);
    let h = harness(client.clone(), QueueSettings::default());

    let stored = h.queue.enqueue(job("a"));
    let duplicate = h.queue.enqueue(job("b"));

    assert_eq!(
        stored.await,
        DeliveryResult::Stored {
            ids: vec!["7".to_string()]
        }
    );
    assert_eq!(duplicate.await, DeliveryResult::Skipped);

    let analyze: Vec<_> = h
        .sink
        .events()
        .into_iter()
        .filter_map(|event| match event {
            PipelineEvent::AnalyzeRequested(request) => Some(request),
            _ => None,
        })
        .collect();
    assert_eq!(analyze.len(), 1);
    assert_eq!(analyze[0].ids, vec!["7".to_string()]);
    assert_eq!(analyze[0].subject_id, "default");
}

#[tokio::test(start_paused = true)]
async fn every_submitted_job_completes_once() {
    let client = ScriptedClient::new(vec![network_error()]);
    let h = harness(client.clone(), QueueSettings::default());

    let first = h.queue.submit(job("a"));
    let second = h.queue.submit(job("b"));
    assert!(h.queue.wait_idle(Duration::from_secs(30)).await);

    let completed: Vec<_> = h
        .sink
        .events()
        .into_iter()
        .filter_map(|event| match event {
            PipelineEvent::JobCompleted { job_id, .. } => Some(job_id),
            _ => None,
        })
        .collect();
    assert_eq!(completed, vec![second, first]);
}

#[tokio::test(start_paused = true)]
async fn offline_notice_is_raised_once_per_episode() {
    let client = ScriptedClient::new(vec![DeliveryOutcome::RateLimited; 6]);
    let settings = QueueSettings {
        max_attempts: 1,
        ..QueueSettings::default()
    };
    let h = harness(client.clone(), settings);

    h.queue.enqueue(job("a")).await;
    h.queue.enqueue(job("b")).await;
    assert_eq!(h.sink.offline_notices(), 1);

    h.queue.reset_offline_notice();
    h.queue.enqueue(job("c")).await;
    assert_eq!(h.sink.offline_notices(), 2);
    assert_eq!(h.offline.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn unwritable_offline_store_fails_the_job() {
    let client = ScriptedClient::new(vec![network_error()]);
    let settings = QueueSettings {
        max_attempts: 1,
        ..QueueSettings::default()
    };
    let h = harness(client.clone(), settings);
    let data_dir = h.offline.path().parent().expect("parent").to_path_buf();
    std::fs::remove_dir_all(&data_dir).expect("remove dir");
    std::fs::write(&data_dir, b"not a directory").expect("write file");

    let result = h.queue.enqueue(job("Hi")).await;

    assert!(matches!(result, DeliveryResult::Failed { .. }), "{result:?}");
    assert!(h.offline.is_empty());
    std::fs::remove_file(&data_dir).ok();
}

#[tokio::test(start_paused = true)]
async fn spill_pending_saves_queued_and_in_flight_jobs() {
    let h = harness(Arc::new(StalledClient), QueueSettings::default());

    h.queue.submit(job("in flight"));
    let waiting = h.queue.enqueue(job("waiting"));
    while h.queue.pending_jobs().len() > 1 {
        tokio::task::yield_now().await;
    }

    assert!(!h.queue.wait_idle(Duration::from_millis(100)).await);
    assert_eq!(h.queue.spill_pending(), 2);
    assert_eq!(waiting.await, DeliveryResult::QueuedOffline);

    let texts: Vec<_> = h
        .offline
        .records()
        .into_iter()
        .filter_map(|record| record.job.user_text)
        .collect();
    assert_eq!(texts, vec!["in flight", "waiting"]);
}

async fn wait_until_in_flight(queue: &SubmissionQueue) {
    while !queue.pending_jobs().is_empty() {
        tokio::task::yield_now().await;
    }
    tokio::task::yield_now().await;
}

#[tokio::test(start_paused = true)]
async fn failure_after_spill_does_not_store_the_job_twice() {
    let client = Arc::new(SlowClient {
        delay: Duration::from_secs(1),
        outcome: network_error(),
    });
    let settings = QueueSettings {
        max_attempts: 1,
        ..QueueSettings::default()
    };
    let h = harness(client, settings);

    let result = h.queue.enqueue(job("A"));
    wait_until_in_flight(&h.queue).await;

    assert_eq!(h.queue.spill_pending(), 1);
    assert_eq!(result.await, DeliveryResult::QueuedOffline);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.offline.len(), 1);
    assert_eq!(h.sink.completions(), 1);
    assert!(h.queue.is_idle());
}

#[tokio::test(start_paused = true)]
async fn success_after_spill_is_not_reported() {
    let client = Arc::new(SlowClient {
        delay: Duration::from_secs(1),
        outcome: DeliveryOutcome::Stored {
            ids: vec!["9".to_string()],
        },
    });
    let h = harness(client, QueueSettings::default());

    let result = h.queue.enqueue(job("A"));
    wait_until_in_flight(&h.queue).await;
    h.queue.spill_pending();
    assert_eq!(result.await, DeliveryResult::QueuedOffline);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.offline.len(), 1);
    assert_eq!(h.sink.completions(), 1);
    assert!(!h
        .sink
        .events()
        .iter()
        .any(|event| matches!(event, PipelineEvent::AnalyzeRequested(_))));
}

#[tokio::test(start_paused = true)]
async fn jobs_arriving_after_spill_go_straight_offline() {
    let client = ScriptedClient::new(Vec::new());
    let h = harness(client.clone(), QueueSettings::default());

    assert_eq!(h.queue.spill_pending(), 0);
    let result = h.queue.enqueue(job("late")).await;

    assert_eq!(result, DeliveryResult::QueuedOffline);
    assert!(client.texts().is_empty());
    assert_eq!(h.offline.len(), 1);
    assert!(h.queue.wait_idle(Duration::from_millis(10)).await);
}
