use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::job::DeliveryJob;
use crate::turn::Turn;

pub const DEFAULT_CORRELATION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationSettings {
    /// When disabled every user turn is emitted on its own immediately.
    pub enabled: bool,
    pub timeout: Duration,
    pub subject_id: String,
}

impl Default for CorrelationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: DEFAULT_CORRELATION_TIMEOUT,
            subject_id: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCorrelation {
    pub user_turn: Turn,
    pub cached_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelatorPhase {
    Idle,
    AwaitingReply,
}

/// Pairs each user turn with the assistant turn that follows it.
///
/// Holds at most one pending user turn. A pending turn is only ever replaced
/// after it has been emitted as a job of its own.
#[derive(Debug)]
pub struct Correlator {
    settings: CorrelationSettings,
    pending: Option<PendingCorrelation>,
}

impl Correlator {
    pub fn new(settings: CorrelationSettings) -> Self {
        Self {
            settings,
            pending: None,
        }
    }

    pub fn phase(&self) -> CorrelatorPhase {
        match self.pending {
            Some(_) => CorrelatorPhase::AwaitingReply,
            None => CorrelatorPhase::Idle,
        }
    }

    pub fn pending(&self) -> Option<&PendingCorrelation> {
        self.pending.as_ref()
    }

    pub fn settings(&self) -> &CorrelationSettings {
        &self.settings
    }

    pub fn on_user_turn(&mut self, text: &str, now: DateTime<Utc>) -> Vec<DeliveryJob> {
        let turn = Turn::user(text, now);
        if !self.settings.enabled {
            return vec![self.single(&turn, now)];
        }

        let mut jobs = Vec::new();
        match self.pending.take() {
            Some(existing) if existing.user_turn.text == text => {
                // Repeated notification for the message we already hold.
                self.pending = Some(existing);
                return jobs;
            }
            Some(previous) => jobs.push(self.single(&previous.user_turn, now)),
            None => {}
        }
        self.pending = Some(PendingCorrelation {
            user_turn: turn,
            cached_at: now,
        });
        jobs
    }

    pub fn on_assistant_turn(
        &mut self,
        text: &str,
        speaker_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Vec<DeliveryJob> {
        let reply = Turn::assistant(text, speaker_id, now);
        match self.pending.take() {
            Some(pending) if !self.is_expired(&pending, now) => {
                vec![DeliveryJob::paired(
                    &pending.user_turn,
                    &reply,
                    &self.settings.subject_id,
                    now,
                )]
            }
            Some(stale) => vec![self.single(&stale.user_turn, now), self.single(&reply, now)],
            None => vec![self.single(&reply, now)],
        }
    }

    /// Emits the pending user turn on its own once it is past the timeout.
    pub fn expire_stale(&mut self, now: DateTime<Utc>) -> Option<DeliveryJob> {
        let expired = self
            .pending
            .as_ref()
            .is_some_and(|pending| self.is_expired(pending, now));
        if !expired {
            return None;
        }
        self.flush(now)
    }

    /// Emits whatever is pending, regardless of age.
    pub fn flush(&mut self, now: DateTime<Utc>) -> Option<DeliveryJob> {
        self.pending
            .take()
            .map(|pending| self.single(&pending.user_turn, now))
    }

    fn is_expired(&self, pending: &PendingCorrelation, now: DateTime<Utc>) -> bool {
        let elapsed = (now - pending.cached_at).to_std().unwrap_or_default();
        elapsed > self.settings.timeout
    }

    fn single(&self, turn: &Turn, now: DateTime<Utc>) -> DeliveryJob {
        DeliveryJob::single(turn, &self.settings.subject_id, now)
    }
}
