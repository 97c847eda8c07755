use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tree::RenderNode;

/// Class/id fragments that mark reasoning or scratch containers.
pub const BUILTIN_KEYWORDS: &[&str] = &[
    "thinking",
    "thought",
    "reasoning",
    "scratchpad",
    "chain-of-thought",
    "monologue",
    "deliberation",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectorParseError {
    #[error("selector is empty")]
    Empty,
    #[error("invalid selector step `{0}`")]
    InvalidStep(String),
}

/// One `tag.class#id` step of a taught selector. Every present part must match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SelectorStep {
    pub tag: Option<String>,
    pub classes: Vec<String>,
    pub id: Option<String>,
}

impl SelectorStep {
    pub fn matches(&self, node: &RenderNode) -> bool {
        if node.is_text() {
            return false;
        }
        if let Some(tag) = &self.tag {
            if !tag.eq_ignore_ascii_case(&node.tag) {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if node.id.as_deref() != Some(id.as_str()) {
                return false;
            }
        }
        self.classes
            .iter()
            .all(|class| node.class_names.contains(class))
    }

    fn parse(raw: &str) -> Result<Self, SelectorParseError> {
        let invalid = || SelectorParseError::InvalidStep(raw.to_string());
        let mut step = SelectorStep {
            tag: None,
            classes: Vec::new(),
            id: None,
        };

        let head_end = raw.find(['.', '#']).unwrap_or(raw.len());
        let head = &raw[..head_end];
        if !head.is_empty() && head != "*" {
            if !head.chars().all(is_name_char) {
                return Err(invalid());
            }
            step.tag = Some(head.to_ascii_lowercase());
        }

        let mut rest = &raw[head_end..];
        while let Some(marker) = rest.chars().next() {
            let body = &rest[1..];
            let end = body.find(['.', '#']).unwrap_or(body.len());
            let name = &body[..end];
            if name.is_empty() || !name.chars().all(is_name_char) {
                return Err(invalid());
            }
            if marker == '.' {
                step.classes.push(name.to_string());
            } else if step.id.replace(name.to_string()).is_some() {
                return Err(invalid());
            }
            rest = &body[end..];
        }

        if step.tag.is_none() && step.classes.is_empty() && step.id.is_none() && head != "*" {
            return Err(invalid());
        }
        Ok(step)
    }
}

impl fmt::Display for SelectorStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tag {
            Some(tag) => write!(f, "{tag}")?,
            None if self.classes.is_empty() && self.id.is_none() => write!(f, "*")?,
            None => {}
        }
        for class in &self.classes {
            write!(f, ".{class}")?;
        }
        if let Some(id) = &self.id {
            write!(f, "#{id}")?;
        }
        Ok(())
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// A structural path captured when the user points at a node to ignore.
///
/// The last step must match the node itself; earlier steps must match its
/// ancestors in order, not necessarily adjacent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructuralSelector {
    steps: Vec<SelectorStep>,
}

impl StructuralSelector {
    pub fn new(steps: Vec<SelectorStep>) -> Result<Self, SelectorParseError> {
        if steps.is_empty() {
            return Err(SelectorParseError::Empty);
        }
        Ok(Self { steps })
    }

    /// Parses the whitespace separated form, e.g. `div.answer span.thinking-box`.
    pub fn parse(raw: &str) -> Result<Self, SelectorParseError> {
        let steps = raw
            .split_whitespace()
            .map(SelectorStep::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(steps)
    }

    pub fn steps(&self) -> &[SelectorStep] {
        &self.steps
    }

    /// `ancestors` is ordered from the outermost node down to the parent.
    pub fn matches(&self, node: &RenderNode, ancestors: &[&RenderNode]) -> bool {
        let Some((last, outer)) = self.steps.split_last() else {
            return false;
        };
        if !last.matches(node) {
            return false;
        }
        let mut remaining = ancestors.iter().rev();
        outer
            .iter()
            .rev()
            .all(|step| remaining.any(|ancestor| step.matches(ancestor)))
    }
}

impl fmt::Display for StructuralSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, step) in self.steps.iter().enumerate() {
            if idx > 0 {
                write!(f, " ")?;
            }
            write!(f, "{step}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExclusionRule {
    /// Case-insensitive substring against the node's classes and id.
    Keyword(String),
    Selector(StructuralSelector),
}

impl ExclusionRule {
    pub fn matches(&self, node: &RenderNode, ancestors: &[&RenderNode]) -> bool {
        match self {
            ExclusionRule::Keyword(keyword) => {
                let keyword = keyword.to_ascii_lowercase();
                node.class_names
                    .iter()
                    .chain(node.id.iter())
                    .any(|name| name.to_ascii_lowercase().contains(&keyword))
            }
            ExclusionRule::Selector(selector) => selector.matches(node, ancestors),
        }
    }
}

/// Snapshot of every active rule, handed to the extractor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<ExclusionRule>,
}

impl RuleSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        Self {
            rules: BUILTIN_KEYWORDS
                .iter()
                .map(|keyword| ExclusionRule::Keyword((*keyword).to_string()))
                .collect(),
        }
    }

    pub fn with_rule(mut self, rule: ExclusionRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[ExclusionRule] {
        &self.rules
    }

    pub fn is_excluded(&self, node: &RenderNode, ancestors: &[&RenderNode]) -> bool {
        self.rules.iter().any(|rule| rule.matches(node, ancestors))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleStoreError {
    #[error("no taught rule at index {index} (have {len})")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("failed to persist taught rules: {0}")]
    Persist(String),
}

/// Durable home of the taught rules.
pub trait RulePersistence: Send {
    fn save(&mut self, rules: &[StructuralSelector]) -> Result<(), RuleStoreError>;
}

/// Keeps taught rules in memory only.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryRulePersistence;

impl RulePersistence for MemoryRulePersistence {
    fn save(&mut self, _rules: &[StructuralSelector]) -> Result<(), RuleStoreError> {
        Ok(())
    }
}

/// Built-in keywords plus the user-taught selectors.
///
/// Every mutation is saved before it becomes visible through `list`, so a
/// failed save leaves the previous list in place.
pub struct RuleStore {
    taught: Vec<StructuralSelector>,
    persistence: Box<dyn RulePersistence>,
}

impl RuleStore {
    pub fn new(initial: Vec<StructuralSelector>, persistence: Box<dyn RulePersistence>) -> Self {
        let mut taught: Vec<StructuralSelector> = Vec::with_capacity(initial.len());
        for rule in initial {
            if !taught.contains(&rule) {
                taught.push(rule);
            }
        }
        Self {
            taught,
            persistence,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Vec::new(), Box::new(MemoryRulePersistence))
    }

    /// Returns `Ok(false)` when the rule is already present.
    pub fn add(&mut self, rule: StructuralSelector) -> Result<bool, RuleStoreError> {
        if self.taught.contains(&rule) {
            return Ok(false);
        }
        let mut next = self.taught.clone();
        next.push(rule);
        self.commit(next)?;
        Ok(true)
    }

    pub fn remove(&mut self, index: usize) -> Result<StructuralSelector, RuleStoreError> {
        if index >= self.taught.len() {
            return Err(RuleStoreError::IndexOutOfRange {
                index,
                len: self.taught.len(),
            });
        }
        let mut next = self.taught.clone();
        let removed = next.remove(index);
        self.commit(next)?;
        Ok(removed)
    }

    pub fn clear(&mut self) -> Result<(), RuleStoreError> {
        self.commit(Vec::new())
    }

    pub fn list(&self) -> &[StructuralSelector] {
        &self.taught
    }

    pub fn rule_set(&self) -> RuleSet {
        self.taught
            .iter()
            .cloned()
            .fold(RuleSet::builtin(), |set, selector| {
                set.with_rule(ExclusionRule::Selector(selector))
            })
    }

    fn commit(&mut self, next: Vec<StructuralSelector>) -> Result<(), RuleStoreError> {
        self.persistence.save(&next)?;
        self.taught = next;
        Ok(())
    }
}

impl fmt::Debug for RuleStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleStore")
            .field("taught", &self.taught)
            .finish_non_exhaustive()
    }
}
