use std::sync::mpsc;

use recall_core::{DeliveryResult, JobKind, Role};
use serde::Serialize;

pub type JobId = u64;

/// Published after a turn is stored, for whoever runs follow-up analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalyzeRequest {
    pub job_id: JobId,
    pub kind: JobKind,
    pub subject_id: String,
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// Extraction produced no text; nothing was queued.
    TurnSkipped { role: Role },
    JobQueued { job_id: JobId, kind: JobKind },
    AnalyzeRequested(AnalyzeRequest),
    JobCompleted {
        job_id: JobId,
        result: DeliveryResult,
    },
    /// First spill since the last reconciliation.
    OfflineNotice { pending: usize },
    Reconciled { replayed: usize },
    RulesChanged { rules: Vec<String> },
    RuleRejected { reason: String },
}

pub trait EventSink: Send + Sync {
    /// Must not block on the consumer.
    fn emit(&self, event: PipelineEvent);
}

pub struct ChannelEventSink {
    tx: mpsc::Sender<PipelineEvent>,
}

impl ChannelEventSink {
    pub fn new(tx: mpsc::Sender<PipelineEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }
}
