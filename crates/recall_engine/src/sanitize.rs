use std::sync::LazyLock;

use regex::{Captures, Regex};

/// Upper bound on whole-pipeline passes before falling back to flattening.
const MAX_PASSES: usize = 4;
/// Upper bound on tag-stripping rounds inside one pass.
const MAX_TAG_ROUNDS: usize = 8;

const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "details", "div", "dl", "dt",
    "figcaption", "figure", "footer", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li",
    "main", "nav", "ol", "p", "pre", "section", "summary", "table", "tr", "ul",
];

/// Toggle and chrome labels hosts render next to replies.
const BOILERPLATE_LABELS: &[&str] = &[
    "thinking",
    "show thinking",
    "hide thinking",
    "thought process",
    "show thought process",
    "show reasoning",
    "hide reasoning",
    "show more",
    "show less",
    "copy",
    "copy code",
    "expand",
    "collapse",
];

static HEAD_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<head\b[^>]*>.*?</head\s*>").expect("valid regex"));
static SCRIPT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").expect("valid regex"));
static STYLE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").expect("valid regex"));
static COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?(?:-->|\z)").expect("valid regex"));
static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(?:/?([A-Za-z][A-Za-z0-9:-]*)|[!?])[^<>]*>").expect("valid regex")
});
static THOUGHT_FOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^thought for [0-9.]+ ?(?:s|secs?|seconds?|m|mins?|minutes?)$")
        .expect("valid regex")
});
static INLINE_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\S\n]+").expect("valid regex"));
static BLANK_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Strips residual markup and chrome from extracted text.
///
/// Idempotent: the result is a fixed point of the cleaning pass.
pub fn sanitize(text: &str) -> String {
    clean(text, true)
}

/// Like [`sanitize`], but keeps lines that look like toggle labels. Used for
/// text a person typed, where "Copy" or "Thinking." is a real message.
pub fn sanitize_markup(text: &str) -> String {
    clean(text, false)
}

fn clean(text: &str, drop_labels: bool) -> String {
    let mut current = text.to_string();
    for _ in 0..MAX_PASSES {
        let next = sanitize_once(&current, drop_labels);
        if next == current {
            return next;
        }
        current = next;
    }
    // Did not settle; without angle brackets no markup rule can fire again.
    let flattened: String = current.chars().filter(|c| !matches!(c, '<' | '>')).collect();
    if drop_labels {
        collapse_whitespace(&drop_boilerplate_lines(&flattened))
    } else {
        collapse_whitespace(&flattened)
    }
}

fn sanitize_once(text: &str, drop_labels: bool) -> String {
    let text = HEAD_BLOCK.replace_all(text, "");
    let text = SCRIPT_BLOCK.replace_all(&text, "");
    let text = STYLE_BLOCK.replace_all(&text, "");
    let text = COMMENT.replace_all(&text, "");
    let text = strip_tags(&text);
    if drop_labels {
        collapse_whitespace(&drop_boilerplate_lines(&text))
    } else {
        collapse_whitespace(&text)
    }
}

fn strip_tags(text: &str) -> String {
    let mut current = text.to_string();
    for _ in 0..MAX_TAG_ROUNDS {
        if !TAG.is_match(&current) {
            break;
        }
        current = TAG
            .replace_all(&current, |caps: &Captures<'_>| {
                let is_block = caps
                    .get(1)
                    .map(|name| name.as_str().to_ascii_lowercase())
                    .is_some_and(|name| BLOCK_TAGS.contains(&name.as_str()));
                if is_block {
                    "\n"
                } else {
                    ""
                }
            })
            .into_owned();
    }
    current
}

pub(crate) fn is_boilerplate_label(line: &str) -> bool {
    let normalized = line
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let normalized = normalized.trim_end_matches(['.', '…', ':']);
    BOILERPLATE_LABELS.contains(&normalized) || THOUGHT_FOR.is_match(normalized)
}

fn drop_boilerplate_lines(text: &str) -> String {
    text.split('\n')
        .filter(|line| !is_boilerplate_label(line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn collapse_whitespace(text: &str) -> String {
    let spaced = INLINE_SPACE.replace_all(text, " ");
    let trimmed_lines = spaced
        .split('\n')
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n");
    BLANK_RUN
        .replace_all(&trimmed_lines, "\n\n")
        .trim()
        .to_string()
}
