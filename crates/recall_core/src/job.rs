use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::turn::{Role, Turn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Single,
    Paired,
}

/// One unit of work for the remote store.
///
/// A `Single` job carries exactly one of `user_text`/`assistant_text` and sets
/// `role`; a `Paired` job carries both texts and no role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryJob {
    pub kind: JobKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    pub subject_id: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl DeliveryJob {
    pub fn single(turn: &Turn, subject_id: &str, now: DateTime<Utc>) -> Self {
        let (user_text, assistant_text) = match turn.role {
            Role::User => (Some(turn.text.clone()), None),
            Role::Assistant => (None, Some(turn.text.clone())),
        };
        let mut metadata = BTreeMap::new();
        stamp_turn(&mut metadata, turn, "occurred_at");
        Self {
            kind: JobKind::Single,
            user_text,
            assistant_text,
            role: Some(turn.role),
            subject_id: subject_id.to_string(),
            metadata,
            attempts: 0,
            enqueued_at: now,
        }
    }

    pub fn paired(user: &Turn, assistant: &Turn, subject_id: &str, now: DateTime<Utc>) -> Self {
        let mut metadata = BTreeMap::new();
        stamp_turn(&mut metadata, user, "user_occurred_at");
        stamp_turn(&mut metadata, assistant, "assistant_occurred_at");
        Self {
            kind: JobKind::Paired,
            user_text: Some(user.text.clone()),
            assistant_text: Some(assistant.text.clone()),
            role: None,
            subject_id: subject_id.to_string(),
            metadata,
            attempts: 0,
            enqueued_at: now,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The text of a single job, whichever side it came from.
    pub fn single_text(&self) -> Option<&str> {
        match self.kind {
            JobKind::Single => self
                .user_text
                .as_deref()
                .or(self.assistant_text.as_deref()),
            JobKind::Paired => None,
        }
    }

    /// Fresh copy for re-submission after an offline spell.
    pub fn into_replay(mut self, now: DateTime<Utc>) -> Self {
        self.attempts = 0;
        self.enqueued_at = now;
        self
    }
}

impl fmt::Display for DeliveryJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.role) {
            (JobKind::Paired, _) => write!(f, "paired job for {}", self.subject_id),
            (JobKind::Single, Some(role)) => {
                write!(f, "single {} job for {}", role.as_str(), self.subject_id)
            }
            (JobKind::Single, None) => write!(f, "single job for {}", self.subject_id),
        }
    }
}

fn stamp_turn(metadata: &mut BTreeMap<String, String>, turn: &Turn, key: &str) {
    metadata.insert(key.to_string(), turn.occurred_at.to_rfc3339());
    if let Some(speaker) = &turn.speaker_id {
        metadata.insert("speaker_id".to_string(), speaker.clone());
    }
}

/// Final outcome of one enqueued job. Every job resolves to exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryResult {
    Stored { ids: Vec<String> },
    /// The store already had this turn.
    Skipped,
    QueuedOffline,
    Failed { reason: String },
}

impl DeliveryResult {
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryResult::Stored { .. } | DeliveryResult::Skipped)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{DeliveryJob, JobKind};
    use crate::turn::{Role, Turn};

    #[test]
    fn single_assistant_job_keeps_speaker() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let turn = Turn::assistant("Hello", Some("model-a".into()), at);
        let job = DeliveryJob::single(&turn, "me", at);
        assert_eq!(job.kind, JobKind::Single);
        assert_eq!(job.role, Some(Role::Assistant));
        assert_eq!(job.single_text(), Some("Hello"));
        assert_eq!(job.metadata.get("speaker_id").map(String::as_str), Some("model-a"));
    }

    #[test]
    fn replay_resets_attempts() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap();
        let mut job = DeliveryJob::single(&Turn::user("Hi", at), "me", at);
        job.attempts = 3;
        let replay = job.into_replay(later);
        assert_eq!(replay.attempts, 0);
        assert_eq!(replay.enqueued_at, later);
    }
}
