use std::sync::Arc;

use chrono::{DateTime, Utc};
use recall_core::{
    CorrelationSettings, Correlator, DeliveryJob, RenderNode, Role, RuleStore, RuleStoreError,
    StructuralSelector,
};
use recall_logging::{recall_debug, recall_info, recall_warn};

use crate::extract::{ExtractSettings, Extractor, SemanticExtractor};
use crate::offline::OfflineStore;
use crate::queue::SubmissionQueue;
use crate::reconcile::Reconciler;
use crate::types::{EventSink, JobId, PipelineEvent};

#[derive(Debug, Clone, Default)]
pub struct PipelineSettings {
    pub extract: ExtractSettings,
    pub correlation: CorrelationSettings,
}

/// Capture side of the system: extraction, correlation and hand-off to the
/// submission queue. Owns the rule store and the correlator slot.
///
/// Nothing here returns an error for a turn; outcomes are reported as events.
pub struct Pipeline {
    extractor: SemanticExtractor,
    rules: RuleStore,
    correlator: Correlator,
    queue: SubmissionQueue,
    reconciler: Reconciler,
    sink: Arc<dyn EventSink>,
}

impl Pipeline {
    pub fn new(
        settings: PipelineSettings,
        rules: RuleStore,
        queue: SubmissionQueue,
        offline: Arc<OfflineStore>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let reconciler = Reconciler::new(offline, queue.clone(), sink.clone());
        Self {
            extractor: SemanticExtractor::new(settings.extract),
            rules,
            correlator: Correlator::new(settings.correlation),
            queue,
            reconciler,
            sink,
        }
    }

    pub fn queue(&self) -> &SubmissionQueue {
        &self.queue
    }

    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    pub fn on_user_turn(&mut self, root: &RenderNode, now: DateTime<Utc>) -> Vec<JobId> {
        let Some(text) = self.capture(root, Role::User) else {
            return Vec::new();
        };
        let jobs = self.correlator.on_user_turn(&text, now);
        self.submit_all(jobs)
    }

    pub fn on_assistant_turn(
        &mut self,
        root: &RenderNode,
        speaker_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Vec<JobId> {
        let Some(text) = self.capture(root, Role::Assistant) else {
            return Vec::new();
        };
        let jobs = self.correlator.on_assistant_turn(&text, speaker_id, now);
        self.submit_all(jobs)
    }

    /// Connectivity report from the host's health check.
    pub fn on_connectivity(&mut self, connected: bool) -> Option<usize> {
        self.reconciler.on_health_check(connected)
    }

    /// Periodic tick: emits a pending user turn whose reply never came.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Option<JobId> {
        let job = self.correlator.expire_stale(now)?;
        recall_info!("Pending user turn timed out, sending it alone");
        Some(self.queue.submit(job))
    }

    /// Sends whatever the correlator still holds. Used on shutdown.
    pub fn flush(&mut self, now: DateTime<Utc>) -> Option<JobId> {
        let job = self.correlator.flush(now)?;
        Some(self.queue.submit(job))
    }

    pub fn teach_rule(&mut self, selector: StructuralSelector) -> Result<bool, RuleStoreError> {
        let added = self.rules.add(selector)?;
        if added {
            self.publish_rules();
        }
        Ok(added)
    }

    pub fn forget_rule(&mut self, index: usize) -> Result<StructuralSelector, RuleStoreError> {
        let removed = self.rules.remove(index)?;
        self.publish_rules();
        Ok(removed)
    }

    pub fn clear_rules(&mut self) -> Result<(), RuleStoreError> {
        self.rules.clear()?;
        self.publish_rules();
        Ok(())
    }

    pub fn rules(&self) -> &[StructuralSelector] {
        self.rules.list()
    }

    pub fn publish_rules(&self) {
        self.sink.emit(PipelineEvent::RulesChanged {
            rules: self.rules.list().iter().map(ToString::to_string).collect(),
        });
    }

    /// Forwards an event raised outside the pipeline, such as a rejected
    /// rule command.
    pub fn report(&self, event: PipelineEvent) {
        self.sink.emit(event);
    }

    fn capture(&self, root: &RenderNode, role: Role) -> Option<String> {
        let rules = self.rules.rule_set();
        let text = match role {
            Role::User => self.extractor.extract_typed(root, &rules),
            Role::Assistant => self.extractor.extract(root, &rules),
        };
        if text.is_empty() {
            recall_warn!("Nothing to save for {} turn", role.as_str());
            self.sink.emit(PipelineEvent::TurnSkipped { role });
            return None;
        }
        recall_debug!("Captured {} turn, {} chars", role.as_str(), text.chars().count());
        Some(text)
    }

    fn submit_all(&self, jobs: Vec<DeliveryJob>) -> Vec<JobId> {
        jobs.into_iter().map(|job| self.queue.submit(job)).collect()
    }
}
