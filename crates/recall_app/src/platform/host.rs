//! JSON-lines protocol spoken with the host on stdin.
//!
//! ```text
//! {"type":"user_turn","html":"<div><p>Hi</p></div>"}
//! {"type":"assistant_turn","tree":{...},"speaker_id":"model-a"}
//! {"type":"connectivity","connected":true}
//! {"type":"teach_rule","selector":"div.answer span.note"}
//! ```

use recall_core::{RenderNode, SelectorParseError, StructuralSelector};
use recall_engine::{parse_fragment, EngineCommand};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum HostError {
    #[error("unreadable host message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("turn carries none of html, tree or text")]
    MissingContent,
    #[error("bad selector: {0}")]
    Selector(#[from] SelectorParseError),
}

/// Exactly one of the three is expected; `tree` wins over `html` over `text`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct TurnContent {
    #[serde(default)]
    html: Option<String>,
    #[serde(default)]
    tree: Option<RenderNode>,
    #[serde(default)]
    text: Option<String>,
}

impl TurnContent {
    fn into_root(self) -> Result<RenderNode, HostError> {
        if let Some(tree) = self.tree {
            return Ok(tree);
        }
        if let Some(html) = self.html {
            return Ok(parse_fragment(&html));
        }
        match self.text {
            Some(text) => Ok(RenderNode::element("div")
                .with_child(RenderNode::element("p").with_text_child(text))),
            None => Err(HostError::MissingContent),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum HostMessage {
    UserTurn {
        #[serde(flatten)]
        content: TurnContent,
    },
    AssistantTurn {
        #[serde(flatten)]
        content: TurnContent,
        #[serde(default)]
        speaker_id: Option<String>,
    },
    Connectivity {
        connected: bool,
    },
    TeachRule {
        selector: String,
    },
    ForgetRule {
        index: usize,
    },
    ClearRules,
    ListRules,
    Shutdown,
}

impl HostMessage {
    pub(crate) fn into_command(self) -> Result<EngineCommand, HostError> {
        let command = match self {
            HostMessage::UserTurn { content } => EngineCommand::UserTurn {
                root: content.into_root()?,
            },
            HostMessage::AssistantTurn {
                content,
                speaker_id,
            } => EngineCommand::AssistantTurn {
                root: content.into_root()?,
                speaker_id,
            },
            HostMessage::Connectivity { connected } => EngineCommand::Connectivity { connected },
            HostMessage::TeachRule { selector } => EngineCommand::TeachRule {
                selector: StructuralSelector::parse(&selector)?,
            },
            HostMessage::ForgetRule { index } => EngineCommand::ForgetRule { index },
            HostMessage::ClearRules => EngineCommand::ClearRules,
            HostMessage::ListRules => EngineCommand::ListRules,
            HostMessage::Shutdown => EngineCommand::Shutdown,
        };
        Ok(command)
    }
}

/// `None` for blank lines.
pub(crate) fn parse_line(line: &str) -> Option<Result<EngineCommand, HostError>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(
        serde_json::from_str::<HostMessage>(line)
            .map_err(HostError::from)
            .and_then(HostMessage::into_command),
    )
}
