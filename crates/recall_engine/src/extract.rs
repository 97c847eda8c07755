use recall_core::{RenderNode, RuleSet};
use recall_logging::recall_debug;

use crate::sanitize::{sanitize, sanitize_markup};

/// Element kinds the structural pass accepts as direct children.
const CONTENT_TAGS: &[&str] = &[
    "p", "ul", "ol", "blockquote", "h1", "h2", "h3", "h4", "h5", "h6", "details",
];

/// Never content, in any pass.
const SCRIPT_TAGS: &[&str] = &["script", "style", "template", "noscript"];

/// Dropped by the filtered pass on top of `SCRIPT_TAGS`.
const NON_CONTENT_TAGS: &[&str] = &[
    "script", "style", "template", "noscript", "pre", "code", "iframe", "svg", "canvas",
];

const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "details", "div", "dl", "dt",
    "figcaption", "figure", "footer", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li",
    "main", "nav", "ol", "p", "pre", "section", "summary", "table", "td", "th", "tr", "ul",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractSettings {
    /// How much longer (as a fraction) the baseline must be before it wins
    /// over the structural pass.
    pub safety_ratio: f64,
    /// Minimum absolute length difference, in characters, for the same.
    pub safety_min_delta: usize,
}

impl Default for ExtractSettings {
    fn default() -> Self {
        Self {
            safety_ratio: 0.2,
            safety_min_delta: 40,
        }
    }
}

pub trait Extractor: Send + Sync {
    /// Canonical plain text of one message. Empty means nothing to save.
    fn extract(&self, root: &RenderNode, rules: &RuleSet) -> String;

    /// Same as `extract` for text the user typed: lines that look like
    /// toggle labels are kept.
    fn extract_typed(&self, root: &RenderNode, rules: &RuleSet) -> String {
        self.extract(root, rules)
    }
}

/// Three-pass extractor:
/// - direct content children of the message (paragraphs, lists, quotes,
///   headings, disclosure summaries)
/// - otherwise the whole subtree minus code, frames, graphics and scripts
/// - a structural result that is much shorter than the visible text of the
///   whole subtree is replaced by that text.
///
/// Invisible nodes, nodes matched by a rule and the bodies of collapsed
/// disclosures are never read, in any pass.
#[derive(Debug, Default, Clone)]
pub struct SemanticExtractor {
    settings: ExtractSettings,
}

impl SemanticExtractor {
    pub fn new(settings: ExtractSettings) -> Self {
        Self { settings }
    }

    fn structural_pass(&self, root: &RenderNode, rules: &RuleSet) -> String {
        let walker = Walker::new(rules, SCRIPT_TAGS);
        let ancestors = vec![root];
        let blocks: Vec<String> = root
            .children
            .iter()
            .filter(|child| CONTENT_TAGS.contains(&child.tag.as_str()))
            .filter_map(|child| {
                let mut out = TextBuilder::new();
                walker.visit(child, &mut ancestors.clone(), &mut out);
                let text = out.finish();
                (!text.is_empty()).then_some(text)
            })
            .collect();
        blocks.join("\n\n")
    }

    fn subtree_pass(&self, root: &RenderNode, rules: &RuleSet, drop_tags: &[&str]) -> String {
        let walker = Walker::new(rules, drop_tags);
        let mut out = TextBuilder::new();
        walker.visit(root, &mut Vec::new(), &mut out);
        out.finish()
    }

    fn run(&self, root: &RenderNode, rules: &RuleSet, clean: fn(&str) -> String) -> String {
        if !root.visible || rules.is_excluded(root, &[]) {
            recall_debug!("message root <{}> is hidden or excluded", root.tag);
            return String::new();
        }

        let structural = clean(&self.structural_pass(root, rules));
        if structural.is_empty() {
            recall_debug!("structural pass empty, using filtered subtree");
            return clean(&self.subtree_pass(root, rules, NON_CONTENT_TAGS));
        }

        let baseline = clean(&self.subtree_pass(root, rules, SCRIPT_TAGS));
        if self.baseline_wins(&structural, &baseline) {
            recall_debug!(
                "structural pass kept {} of {} chars, using baseline",
                structural.chars().count(),
                baseline.chars().count()
            );
            return baseline;
        }
        structural
    }

    fn baseline_wins(&self, structural: &str, baseline: &str) -> bool {
        let structural_len = structural.chars().count();
        let baseline_len = baseline.chars().count();
        let delta = baseline_len.saturating_sub(structural_len);
        delta > self.settings.safety_min_delta
            && baseline_len as f64 > structural_len as f64 * (1.0 + self.settings.safety_ratio)
    }
}

impl Extractor for SemanticExtractor {
    fn extract(&self, root: &RenderNode, rules: &RuleSet) -> String {
        self.run(root, rules, sanitize)
    }

    fn extract_typed(&self, root: &RenderNode, rules: &RuleSet) -> String {
        self.run(root, rules, sanitize_markup)
    }
}

struct Walker<'r> {
    rules: &'r RuleSet,
    drop_tags: &'r [&'r str],
}

impl<'r> Walker<'r> {
    fn new(rules: &'r RuleSet, drop_tags: &'r [&'r str]) -> Self {
        Self { rules, drop_tags }
    }

    fn visit<'a>(
        &self,
        node: &'a RenderNode,
        ancestors: &mut Vec<&'a RenderNode>,
        out: &mut TextBuilder,
    ) {
        if !node.visible {
            return;
        }
        if node.is_text() {
            if let Some(text) = &node.text {
                out.append_text(text);
            }
            return;
        }
        if self.drop_tags.contains(&node.tag.as_str()) || self.rules.is_excluded(node, ancestors) {
            return;
        }

        let is_block = BLOCK_TAGS.contains(&node.tag.as_str());
        if is_block {
            out.ensure_newline();
        }
        let summary_only = node.is_disclosure() && !node.is_expanded();
        ancestors.push(node);
        for child in &node.children {
            if summary_only && !child.is_summary() {
                continue;
            }
            self.visit(child, ancestors, out);
        }
        ancestors.pop();
        if is_block {
            out.ensure_newline();
        }
    }
}

struct TextBuilder {
    builder: String,
    last_char: Option<char>,
}

impl TextBuilder {
    fn new() -> Self {
        Self {
            builder: String::new(),
            last_char: None,
        }
    }

    fn finish(self) -> String {
        self.builder.trim().to_string()
    }

    fn append_text(&mut self, text: &str) {
        for ch in text.chars() {
            if ch.is_whitespace() {
                if self.last_char.is_none()
                    || self.last_char == Some(' ')
                    || self.last_char == Some('\n')
                {
                    continue;
                }
                self.push_char(' ');
            } else {
                self.push_char(ch);
            }
        }
    }

    fn ensure_newline(&mut self) {
        if self.last_char == Some('\n') || self.builder.is_empty() {
            return;
        }
        if self.last_char == Some(' ') {
            self.builder.pop();
        }
        self.push_char('\n');
    }

    fn push_char(&mut self, ch: char) {
        self.builder.push(ch);
        self.last_char = Some(ch);
    }
}
