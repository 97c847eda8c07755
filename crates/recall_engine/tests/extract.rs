use pretty_assertions::assert_eq;
use recall_core::{ExclusionRule, RenderNode, RuleSet, StructuralSelector};
use recall_engine::{parse_fragment, ExtractSettings, Extractor, SemanticExtractor};

fn extract(root: &RenderNode) -> String {
    SemanticExtractor::default().extract(root, &RuleSet::builtin())
}

fn paragraph(text: &str) -> RenderNode {
    RenderNode::element("p").with_text_child(text)
}

#[test]
fn collapsed_disclosure_contributes_nothing_but_its_label() {
    let root = RenderNode::element("div")
        .with_child(paragraph("Hello"))
        .with_child(
            RenderNode::element("details")
                .collapsed(true)
                .with_child(RenderNode::element("summary").with_text_child("thinking"))
                .with_child(paragraph("secret reasoning")),
        );

    assert_eq!(extract(&root), "Hello");
}

#[test]
fn disclosure_without_collapse_state_counts_as_collapsed() {
    let root = RenderNode::element("div")
        .with_child(paragraph("Answer"))
        .with_child(
            RenderNode::element("details")
                .with_child(RenderNode::element("summary").with_text_child("Sources"))
                .with_text_child("hidden body"),
        );

    let text = extract(&root);
    assert!(!text.contains("hidden body"), "{text:?}");
    assert_eq!(text, "Answer\n\nSources");
}

#[test]
fn expanded_disclosure_is_read_in_full() {
    let root = RenderNode::element("div").with_child(
        RenderNode::element("details")
            .collapsed(false)
            .with_child(RenderNode::element("summary").with_text_child("Sources"))
            .with_child(paragraph("body text")),
    );

    assert_eq!(extract(&root), "Sources\nbody text");
}

#[test]
fn hidden_subtrees_never_leak() {
    let root = RenderNode::element("div")
        .with_child(paragraph("visible text"))
        .with_child(
            RenderNode::element("div")
                .hidden()
                .with_child(paragraph("invisible secret that is long enough to tip any length check")),
        )
        .with_child(paragraph("ghost").hidden());

    let text = extract(&root);
    assert_eq!(text, "visible text");
}

#[test]
fn keyword_container_is_excluded_with_its_descendants() {
    let root = RenderNode::element("div")
        .with_child(paragraph("Final answer"))
        .with_child(
            RenderNode::element("blockquote")
                .with_class("model-Reasoning-panel")
                .with_child(paragraph("step one"))
                .with_child(
                    RenderNode::element("div").with_child(paragraph("step two, deeply nested")),
                ),
        );

    let text = extract(&root);
    assert!(!text.contains("step"), "{text:?}");
    assert_eq!(text, "Final answer");
}

#[test]
fn excluded_or_hidden_root_yields_nothing() {
    let excluded = RenderNode::element("div")
        .with_id("thought-17")
        .with_child(paragraph("text"));
    let hidden = RenderNode::element("div").hidden().with_child(paragraph("text"));

    assert_eq!(extract(&excluded), "");
    assert_eq!(extract(&hidden), "");
}

#[test]
fn filtered_subtree_is_used_when_no_content_blocks_exist() {
    let root = RenderNode::element("div")
        .with_child(RenderNode::element("div").with_child(
            RenderNode::element("span").with_text_child("Answer text"),
        ))
        .with_child(
            RenderNode::element("pre")
                .with_child(RenderNode::element("code").with_text_child("let x = 1;")),
        )
        .with_child(RenderNode::element("script").with_text_child("track()"));

    assert_eq!(extract(&root), "Answer text");
}

#[test]
fn baseline_replaces_a_much_shorter_structural_result() {
    let body = "The bulk of this reply lives in a plain container that is not a paragraph at all.";
    let root = RenderNode::element("div")
        .with_child(paragraph("Short intro."))
        .with_child(RenderNode::element("div").with_text_child(body));

    assert_eq!(extract(&root), format!("Short intro.\n{body}"));
}

#[test]
fn small_differences_keep_the_structural_result() {
    let root = RenderNode::element("div")
        .with_child(paragraph("Intro paragraph here."))
        .with_child(RenderNode::element("span").with_text_child("tiny"));

    assert_eq!(extract(&root), "Intro paragraph here.");
}

#[test]
fn safety_thresholds_are_configurable() {
    let root = RenderNode::element("div")
        .with_child(paragraph("Intro paragraph here."))
        .with_child(RenderNode::element("span").with_text_child("tiny"));
    let eager = SemanticExtractor::new(ExtractSettings {
        safety_ratio: 0.1,
        safety_min_delta: 2,
    });

    assert_eq!(
        eager.extract(&root, &RuleSet::builtin()),
        "Intro paragraph here.\ntiny"
    );
}

#[test]
fn taught_selector_removes_matching_descendants() {
    let root = RenderNode::element("div")
        .with_child(paragraph("Answer"))
        .with_child(
            RenderNode::element("blockquote").with_child(
                RenderNode::element("span")
                    .with_class("badge")
                    .with_text_child("beta"),
            ),
        );
    let selector = StructuralSelector::parse("blockquote span.badge").expect("selector");
    let rules = RuleSet::builtin().with_rule(ExclusionRule::Selector(selector));
    let extractor = SemanticExtractor::default();

    assert_eq!(extractor.extract(&root, &RuleSet::builtin()), "Answer\n\nbeta");
    assert_eq!(extractor.extract(&root, &rules), "Answer");
}

#[test]
fn html_snapshot_extracts_end_to_end() {
    let root = parse_fragment(
        r#"<div class="message"><p>Hello <b>world</b></p><details><summary>Thinking</summary><p>secret</p></details><p style="display:none">ghost</p><div class="thinking-trace"><p>plan</p></div></div>"#,
    );

    assert_eq!(extract(&root), "Hello world");
}

#[test]
fn output_is_already_sanitized() {
    let root = RenderNode::element("div")
        .with_child(paragraph("Use <b>bold</b> sparingly"))
        .with_child(paragraph("Copy code"));

    let text = extract(&root);
    assert_eq!(text, "Use bold sparingly");
    assert_eq!(recall_engine::sanitize(&text), text);
}
