use crate::dom::{Document, NodeId};
use scraper::{ElementRef, Html, Node};

/// Parse raw HTML into a live [`Document`].
///
/// Every text node is kept verbatim, including whitespace and the contents
/// of script/style elements, so serializing the result reproduces the page
/// text exactly. Comments and doctype nodes are dropped.
pub fn parse_html(html: &str, url: &str) -> Document {
    let parsed = Html::parse_document(html);

    let title = scraper::Selector::parse("title")
        .ok()
        .and_then(|sel| parsed.select(&sel).next())
        .map(|el| el.text().collect::<String>())
        .unwrap_or_default();

    let mut doc = Document::new(url);
    doc.title = title.trim().to_string();

    let root = doc.root();
    let html_el = convert_element(&mut doc, parsed.root_element());
    // A fresh element under the fresh root always attaches.
    let _ = doc.append_child(root, html_el);
    doc
}

fn convert_element(doc: &mut Document, el: ElementRef<'_>) -> NodeId {
    let tag = el.value().name.local.as_ref().to_string();
    let id = doc.create_element(tag);
    for (k, v) in el.value().attrs() {
        doc.set_attr(id, k, v);
    }

    for child_ref in el.children() {
        let child = match child_ref.value() {
            Node::Element(_) => ElementRef::wrap(child_ref).map(|c| convert_element(doc, c)),
            Node::Text(t) => Some(doc.create_text(t.text.to_string())),
            _ => None,
        };
        if let Some(child) = child {
            // Parent is an element and the child is fresh: cannot fail.
            let _ = doc.append_child(id, child);
        }
    }

    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_html() {
        let html = r#"
        <html>
            <head><title>Test Page</title></head>
            <body>
                <h1>Hello, reader</h1>
                <p class="lead">Content paragraph</p>
            </body>
        </html>
        "#;

        let doc = parse_html(html, "https://example.com");
        assert_eq!(doc.title, "Test Page");
        let body = doc.body().expect("body");
        assert!(doc.text_content(body).contains("Content paragraph"));
        let p = doc.elements_with_class(body, "lead");
        assert_eq!(p.len(), 1);
    }

    #[test]
    fn keeps_script_text_verbatim() {
        let html = r#"<html><body><p>Visible</p><script>if (a < b) run();</script></body></html>"#;

        let doc = parse_html(html, "https://example.com");
        let body = doc.body().unwrap();
        let text = doc.text_content(body);
        assert!(text.contains("Visible"));
        assert!(text.contains("if (a < b) run();"));
    }
}
