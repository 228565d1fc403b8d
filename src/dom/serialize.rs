use crate::dom::{Document, NodeId, NodeType};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Elements whose text children are emitted unescaped.
const RAW_TEXT: &[&str] = &["script", "style"];

/// Serialize the subtree at `id` as HTML.
pub fn to_html(doc: &Document, id: NodeId) -> String {
    let mut out = String::new();
    write_node(doc, id, &mut out);
    out
}

/// Serialize the whole document, prefixed with an HTML5 doctype.
pub fn document_to_html(doc: &Document) -> String {
    let mut out = String::from("<!DOCTYPE html>");
    for &child in doc.children(doc.root()) {
        write_node(doc, child, &mut out);
    }
    out
}

fn write_node(doc: &Document, id: NodeId, out: &mut String) {
    let node = doc.node(id);
    match node.node_type {
        NodeType::Document => {
            for &child in doc.children(id) {
                write_node(doc, child, out);
            }
        }
        NodeType::Text => {
            let raw = doc
                .parent(id)
                .map(|p| RAW_TEXT.contains(&doc.node(p).tag.as_str()))
                .unwrap_or(false);
            if raw {
                out.push_str(&node.text);
            } else {
                escape_into(&node.text, false, out);
            }
        }
        NodeType::Element => {
            out.push('<');
            out.push_str(&node.tag);
            for (k, v) in &node.attributes {
                out.push(' ');
                out.push_str(k);
                out.push_str("=\"");
                escape_into(v, true, out);
                out.push('"');
            }
            out.push('>');
            if VOID_ELEMENTS.contains(&node.tag.as_str()) {
                return;
            }
            for &child in doc.children(id) {
                write_node(doc, child, out);
            }
            out.push_str("</");
            out.push_str(&node.tag);
            out.push('>');
        }
    }
}

fn escape_into(text: &str, attribute: bool, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::parser::parse_html;

    #[test]
    fn escapes_text_and_attributes() {
        let mut doc = Document::with_body("https://example.com");
        let body = doc.body().unwrap();
        let span = doc.create_element("span");
        doc.set_attr(span, "title", "say \"hi\"");
        let t = doc.create_text("a < b & c");
        doc.append_child(body, span).unwrap();
        doc.append_child(span, t).unwrap();
        assert_eq!(
            to_html(&doc, span),
            r#"<span title="say &quot;hi&quot;">a &lt; b &amp; c</span>"#
        );
    }

    #[test]
    fn script_text_is_raw_and_void_elements_close() {
        let doc = parse_html(
            "<html><body><script>a < b</script><br><p>x</p></body></html>",
            "https://example.com",
        );
        let html = to_html(&doc, doc.body().unwrap());
        assert_eq!(html, "<body><script>a < b</script><br><p>x</p></body>");
    }
}
