use std::sync::Arc;

use chrono::{DateTime, Utc};
use recall_logging::{recall_error, recall_info};

use crate::offline::{OfflineError, OfflineStore};
use crate::queue::SubmissionQueue;
use crate::types::{EventSink, PipelineEvent};

/// Tracks connectivity reports and spots the moments a connection comes up.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityMonitor {
    connected: Option<bool>,
}

impl ConnectivityMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected == Some(true)
    }

    /// True only when the state changes to connected. The first report after
    /// startup counts as a change.
    pub fn observe(&mut self, connected: bool) -> bool {
        let previous = self.connected.replace(connected);
        connected && previous != Some(true)
    }
}

/// Replays the offline store into the submission queue once per reconnect.
pub struct Reconciler {
    monitor: ConnectivityMonitor,
    offline: Arc<OfflineStore>,
    queue: SubmissionQueue,
    sink: Arc<dyn EventSink>,
}

impl Reconciler {
    pub fn new(offline: Arc<OfflineStore>, queue: SubmissionQueue, sink: Arc<dyn EventSink>) -> Self {
        Self {
            monitor: ConnectivityMonitor::new(),
            offline,
            queue,
            sink,
        }
    }

    pub fn monitor(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    /// Feeds one health-check result; reconciles on a connected transition.
    /// Returns how many jobs were replayed, if a replay happened.
    pub fn on_health_check(&mut self, connected: bool) -> Option<usize> {
        if !self.monitor.observe(connected) {
            return None;
        }
        match self.reconcile(Utc::now()) {
            Ok(replayed) => Some(replayed),
            Err(err) => {
                recall_error!("Offline reconciliation failed: {}", err);
                None
            }
        }
    }

    /// Empties the offline store into the queue as fresh jobs.
    pub fn reconcile(&self, now: DateTime<Utc>) -> Result<usize, OfflineError> {
        let records = self.offline.take_all()?;
        let replayed = records.len();
        for record in records {
            self.queue.submit(record.job.into_replay(now));
        }
        self.queue.reset_offline_notice();
        if replayed > 0 {
            recall_info!("Replayed {} offline jobs", replayed);
        }
        self.sink.emit(PipelineEvent::Reconciled { replayed });
        Ok(replayed)
    }
}
