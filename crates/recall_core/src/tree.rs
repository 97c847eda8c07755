use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Tag used for text leaves.
pub const TEXT_TAG: &str = "#text";

/// Read-only snapshot of one node of a rendered message.
///
/// Hosts either build this directly (and send it as JSON) or let the engine
/// derive it from an HTML snapshot. `visible` is the node's own computed
/// visibility; effective visibility also depends on every ancestor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderNode {
    pub tag: String,
    #[serde(default)]
    pub class_names: BTreeSet<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default = "default_visible")]
    pub visible: bool,
    /// Only meaningful on disclosure elements. `Some(false)` means the host
    /// explicitly expanded it.
    #[serde(default)]
    pub collapsed: Option<bool>,
    #[serde(default)]
    pub children: Vec<RenderNode>,
    #[serde(default)]
    pub text: Option<String>,
}

fn default_visible() -> bool {
    true
}

impl RenderNode {
    pub fn element(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            class_names: BTreeSet::new(),
            id: None,
            visible: true,
            collapsed: None,
            children: Vec::new(),
            text: None,
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self {
            text: Some(content.into()),
            ..Self::element(TEXT_TAG)
        }
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class_names.insert(class.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_child(mut self, child: RenderNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_text_child(self, content: impl Into<String>) -> Self {
        self.with_child(RenderNode::text(content))
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn collapsed(mut self, collapsed: bool) -> Self {
        self.collapsed = Some(collapsed);
        self
    }

    pub fn is_text(&self) -> bool {
        self.tag == TEXT_TAG
    }

    pub fn is_disclosure(&self) -> bool {
        self.tag == "details"
    }

    pub fn is_summary(&self) -> bool {
        self.tag == "summary"
    }

    /// A disclosure counts as expanded only when the host says so.
    pub fn is_expanded(&self) -> bool {
        self.collapsed == Some(false)
    }

    /// Concatenated text of all descendants, ignoring visibility.
    pub fn raw_text(&self) -> String {
        let mut out = String::new();
        self.collect_raw_text(&mut out);
        out
    }

    fn collect_raw_text(&self, out: &mut String) {
        if let Some(text) = &self.text {
            out.push_str(text);
        }
        for child in &self.children {
            child.collect_raw_text(out);
        }
    }
}
