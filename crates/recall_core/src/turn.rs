use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One captured message, immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub occurred_at: DateTime<Utc>,
    pub speaker_id: Option<String>,
}

impl Turn {
    pub fn user(text: impl Into<String>, occurred_at: DateTime<Utc>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            occurred_at,
            speaker_id: None,
        }
    }

    pub fn assistant(
        text: impl Into<String>,
        speaker_id: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            occurred_at,
            speaker_id,
        }
    }
}
