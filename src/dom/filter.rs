use crate::dom::{Document, DomNode, NodeId};

/// Class on the wrapper element of every annotation.
pub const WRAP_CLASS: &str = "vo-wrap";
/// Class on the translation caption inside a wrapper.
pub const CAPTION_CLASS: &str = "vo-caption";
/// Class on the highlighted literal word inside a wrapper.
pub const HIGHLIGHT_CLASS: &str = "vo-highlight";
/// Caption waiting for an in-flight translation.
pub const CAPTION_PENDING_CLASS: &str = "vo-caption-pending";
/// Caption whose translation request failed.
pub const CAPTION_FAILED_CLASS: &str = "vo-caption-failed";
/// Body class that hides every caption.
pub const DEFINITIONS_HIDDEN_CLASS: &str = "vo-definitions-hidden";
/// Id of the floating action control.
pub const FAB_ID: &str = "vo-fab";

/// Tags whose text must never be rewritten.
const SKIP_TAGS: &[&str] = &[
    "script", "style", "noscript", "textarea", "input", "code", "pre", "canvas", "video",
];

/// Class markers of third-party overlays that rewrite page text themselves
/// (page translators, grammar checkers, annotation layers).
const OVERLAY_PATTERNS: &[&str] = &[
    "immersive-translate",
    "goog-te-",
    "skiptranslate",
    "notranslate",
    "grammarly",
    "hypothesis-highlight",
    "annotator-hl",
    "deepl-",
    "linguee",
    "mate-translate",
    "readlang",
    "lingq-",
];

/// Decides which text nodes the renderer may rewrite.
pub struct TextFilter {
    skip_tags: Vec<String>,
    overlay_patterns: Vec<String>,
}

impl TextFilter {
    pub fn new() -> Self {
        Self {
            skip_tags: SKIP_TAGS.iter().map(|s| s.to_string()).collect(),
            overlay_patterns: OVERLAY_PATTERNS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Add a site-specific overlay class marker.
    pub fn with_overlay_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.overlay_patterns.push(pattern.into().to_lowercase());
        self
    }

    /// Whether `text_node` holds annotatable text.
    pub fn accepts(&self, doc: &Document, text_node: NodeId) -> bool {
        let node = doc.node(text_node);
        if !node.is_text() || node.text.trim().is_empty() {
            return false;
        }
        let Some(parent) = doc.parent(text_node) else {
            return false;
        };
        if self.inside_rejected_element(doc, parent) {
            return false;
        }
        !is_editable(doc, parent)
    }

    fn inside_rejected_element(&self, doc: &Document, from: NodeId) -> bool {
        doc.closest(from, |el| {
            self.skip_tags.iter().any(|t| *t == el.tag)
                || is_reserved(el)
                || self.is_overlay(el)
        })
        .is_some()
    }

    fn is_overlay(&self, el: &DomNode) -> bool {
        let class = el.attr("class").unwrap_or("");
        if class.is_empty() {
            return false;
        }
        let class = class.to_lowercase();
        self.overlay_patterns.iter().any(|p| class.contains(p.as_str()))
    }
}

impl Default for TextFilter {
    fn default() -> Self {
        Self::new()
    }
}

fn is_reserved(el: &DomNode) -> bool {
    el.has_class(WRAP_CLASS) || el.attr("id") == Some(FAB_ID)
}

/// `contenteditable` is inherited; the nearest explicit value decides.
fn is_editable(doc: &Document, from: NodeId) -> bool {
    match doc.closest(from, |el| el.attr("contenteditable").is_some()) {
        Some(el) => {
            let value = doc.attr(el, "contenteditable").unwrap_or("");
            !value.eq_ignore_ascii_case("false")
        }
        None => false,
    }
}

/// Whether `node` is, or sits inside, an element the engine created.
pub fn is_self_generated(doc: &Document, node: NodeId) -> bool {
    doc.closest(node, is_reserved).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::parser::parse_html;

    fn text_nodes(doc: &Document) -> Vec<(String, bool)> {
        let filter = TextFilter::new();
        doc.descendants(doc.body().unwrap())
            .into_iter()
            .filter(|&n| doc.node(n).is_text() && !doc.node(n).text.trim().is_empty())
            .map(|n| (doc.node(n).text.clone(), filter.accepts(doc, n)))
            .collect()
    }

    #[test]
    fn skips_code_scripts_and_editable_regions() {
        let html = r#"
        <html><body>
            <p>plain</p>
            <script>scripted</script>
            <pre><span>preformatted</span></pre>
            <div contenteditable="true"><b>editable</b></div>
            <div contenteditable="true"><i contenteditable="false">locked</i></div>
            <textarea>typed</textarea>
        </body></html>
        "#;
        let doc = parse_html(html, "https://example.com");
        let nodes = text_nodes(&doc);
        let accepted: Vec<&str> = nodes
            .iter()
            .filter(|(_, ok)| *ok)
            .map(|(t, _)| t.as_str())
            .collect();
        assert_eq!(accepted, vec!["plain", "locked"]);
    }

    #[test]
    fn skips_annotations_and_overlays() {
        let html = r#"
        <html><body>
            <span class="vo-wrap"><span class="vo-highlight">word</span></span>
            <div class="immersive-translate-target-wrapper">overlay</div>
            <div id="vo-fab"><button>Mark it</button></div>
            <p>free</p>
        </body></html>
        "#;
        let doc = parse_html(html, "https://example.com");
        let accepted: Vec<String> = text_nodes(&doc)
            .into_iter()
            .filter(|(_, ok)| *ok)
            .map(|(t, _)| t)
            .collect();
        assert_eq!(accepted, vec!["free".to_string()]);
    }

    #[test]
    fn detects_self_generated_descendants() {
        let html = r#"<html><body><span class="vo-wrap"><span>x</span></span><p>y</p></body></html>"#;
        let doc = parse_html(html, "https://example.com");
        let wraps = doc.elements_with_class(doc.root(), WRAP_CLASS);
        let inner = doc.children(wraps[0])[0];
        assert!(is_self_generated(&doc, inner));
        let p = doc
            .descendants(doc.root())
            .into_iter()
            .find(|&n| doc.node(n).tag == "p")
            .unwrap();
        assert!(!is_self_generated(&doc, p));
    }
}
