use ego_tree::NodeRef;
use recall_core::RenderNode;
use scraper::node::{Element, Node};
use scraper::{ElementRef, Html};

/// Builds a render tree from an HTML snapshot of one message.
///
/// A fragment with a single top-level element becomes that element; anything
/// else is wrapped in a synthetic `div`. Visibility is derived from the
/// `hidden` attribute, `aria-hidden`, and inline styles.
pub fn parse_fragment(html: &str) -> RenderNode {
    let fragment = Html::parse_fragment(html);
    let mut top: Vec<RenderNode> = fragment
        .root_element()
        .children()
        .filter_map(convert_node)
        .filter(|node| !is_blank_text(node))
        .collect();

    if top.len() == 1 && !top[0].is_text() {
        return top.remove(0);
    }
    top.into_iter()
        .fold(RenderNode::element("div"), RenderNode::with_child)
}

fn is_blank_text(node: &RenderNode) -> bool {
    node.is_text() && node.text.as_deref().is_some_and(|t| t.trim().is_empty())
}

fn convert_node(node: NodeRef<'_, Node>) -> Option<RenderNode> {
    match node.value() {
        Node::Text(text) => Some(RenderNode::text(text.to_string())),
        Node::Element(_) => ElementRef::wrap(node).map(convert_element),
        _ => None,
    }
}

fn convert_element(element: ElementRef<'_>) -> RenderNode {
    let value = element.value();
    let mut node = RenderNode::element(value.name());
    node.class_names = value.classes().map(ToOwned::to_owned).collect();
    node.id = value.id().map(ToOwned::to_owned);
    node.visible = is_visible(value);
    if node.is_disclosure() {
        node.collapsed = Some(value.attr("open").is_none());
    }
    node.children = element.children().filter_map(convert_node).collect();
    node
}

fn is_visible(element: &Element) -> bool {
    if element.attr("hidden").is_some() {
        return false;
    }
    if element
        .attr("aria-hidden")
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"))
    {
        return false;
    }
    element.attr("style").map_or(true, style_is_visible)
}

fn style_is_visible(style: &str) -> bool {
    let mut zero_size = false;
    let mut overflow_hidden = false;
    for declaration in style.split(';') {
        let Some((property, value)) = declaration.split_once(':') else {
            continue;
        };
        let property = property.trim().to_ascii_lowercase();
        let value = value
            .trim()
            .trim_end_matches("!important")
            .trim()
            .to_ascii_lowercase();
        match property.as_str() {
            "display" if value == "none" => return false,
            "visibility" if value == "hidden" || value == "collapse" => return false,
            "width" | "height" | "max-height" if is_zero_length(&value) => zero_size = true,
            "overflow" | "overflow-y" if value == "hidden" => overflow_hidden = true,
            _ => {}
        }
    }
    !(zero_size && overflow_hidden)
}

fn is_zero_length(value: &str) -> bool {
    let number = value.trim_end_matches(|c: char| c.is_ascii_alphabetic() || c == '%');
    number.parse::<f64>().is_ok_and(|n| n == 0.0)
}
