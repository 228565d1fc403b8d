//! Annotation renderer.
//!
//! Rewrites accepted text nodes into plain text interleaved with annotation
//! wrappers (`span.vo-wrap > span.vo-caption + span.vo-highlight`), and
//! updates or removes existing annotations in place.

use std::collections::BTreeSet;

use regex::Regex;

use crate::dom::filter::{
    TextFilter, CAPTION_CLASS, CAPTION_FAILED_CLASS, CAPTION_PENDING_CLASS, HIGHLIGHT_CLASS,
    WRAP_CLASS,
};
use crate::dom::{Document, NodeId, TextRange};
use crate::engine::matcher::split_segments;
use crate::error::DomError;
use crate::vocab::{fold_case, VocabularyEntry};

/// Caption text while a translation is missing or in flight.
pub const PLACEHOLDER_TRANSLATION: &str = "...";
/// Caption text after a failed translation request.
pub const FAILED_CAPTION: &str = "translation failed, click to edit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptionState {
    Ready,
    Pending,
    Failed,
}

/// Element handles of one rendered annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Annotation {
    pub wrapper: NodeId,
    pub caption: NodeId,
    pub highlight: NodeId,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RenderStats {
    /// Accepted text nodes examined.
    pub scanned: usize,
    /// Text nodes replaced by a fragment.
    pub replaced: usize,
    /// Annotations created.
    pub annotations: usize,
    /// Nodes skipped because replacement failed.
    pub failures: usize,
}

/// Annotate every accepted text node under `root`.
///
/// A node whose replacement fails (detached in the meantime) is logged and
/// skipped; the rest of the batch still runs.
pub fn render(
    doc: &mut Document,
    entries: &[VocabularyEntry],
    pattern: &Regex,
    root: NodeId,
    filter: &TextFilter,
) -> RenderStats {
    let mut stats = RenderStats::default();
    let candidates: Vec<NodeId> = doc
        .descendants(root)
        .into_iter()
        .filter(|&n| filter.accepts(doc, n))
        .collect();

    for node in candidates {
        stats.scanned += 1;
        match annotate_text_node(doc, entries, pattern, node) {
            Ok(0) => {}
            Ok(n) => {
                stats.replaced += 1;
                stats.annotations += n;
            }
            Err(e) => {
                log::warn!("skipping text node {:?}: {}", node, e);
                stats.failures += 1;
            }
        }
    }

    if stats.annotations > 0 {
        log::debug!(
            "rendered {} annotations across {} text nodes",
            stats.annotations,
            stats.replaced
        );
    }
    stats
}

fn annotate_text_node(
    doc: &mut Document,
    entries: &[VocabularyEntry],
    pattern: &Regex,
    node: NodeId,
) -> Result<usize, DomError> {
    if doc.parent(node).is_none() {
        return Err(DomError::Detached(node));
    }
    let text = doc.node(node).text.clone();
    let segments = split_segments(&text, pattern);
    if segments.len() <= 1 {
        return Ok(0);
    }

    let page_url = doc.url.clone();
    let mut fragment = Vec::with_capacity(segments.len());
    let mut count = 0;
    for (i, segment) in segments.iter().enumerate() {
        if i % 2 == 0 {
            if !segment.is_empty() {
                fragment.push(doc.create_text(*segment));
            }
            continue;
        }
        let entry = entries.iter().find(|e| e.is_word(segment));
        // An entry saved with an empty translation is a failed lookup.
        let (translation, state) = match entry.map(|e| e.translation.as_str()) {
            Some("") => (FAILED_CAPTION, CaptionState::Failed),
            Some(t) => (t, CaptionState::Ready),
            None => (PLACEHOLDER_TRANSLATION, CaptionState::Ready),
        };
        let url = entry.map(|e| e.url.as_str()).unwrap_or(page_url.as_str());
        let color = entry.and_then(|e| e.color.as_deref());
        let annotation = build_annotation(doc, segment, translation, url, color, state);
        fragment.push(annotation.wrapper);
        count += 1;
    }

    if let Err(e) = doc.replace_with(node, &fragment) {
        for n in fragment {
            let _ = doc.release(n);
        }
        return Err(e);
    }
    let _ = doc.release(node);
    Ok(count)
}

/// Create a detached annotation for `literal`.
pub fn build_annotation(
    doc: &mut Document,
    literal: &str,
    translation: &str,
    url: &str,
    color: Option<&str>,
    state: CaptionState,
) -> Annotation {
    let wrapper = doc.create_element("span");
    doc.set_attr(wrapper, "class", WRAP_CLASS);
    doc.set_attr(wrapper, "data-word", fold_case(literal));
    doc.set_attr(wrapper, "data-url", url);

    let caption = doc.create_element("span");
    doc.set_attr(caption, "class", CAPTION_CLASS);
    doc.set_attr(caption, "title", "Click to edit");
    let caption_text = doc.create_text(translation);

    let highlight = doc.create_element("span");
    doc.set_attr(highlight, "class", HIGHLIGHT_CLASS);
    doc.set_attr(highlight, "title", "Click for actions");
    let highlight_text = doc.create_text(literal);

    // All nodes are fresh elements/text: attaching cannot fail.
    let _ = doc.append_child(caption, caption_text);
    let _ = doc.append_child(highlight, highlight_text);
    let _ = doc.append_child(wrapper, caption);
    let _ = doc.append_child(wrapper, highlight);

    let annotation = Annotation {
        wrapper,
        caption,
        highlight,
    };
    set_caption_state(doc, annotation.caption, state);
    apply_color(doc, &annotation, color);
    annotation
}

/// Replace the text in `range` with an annotation, splitting its node.
pub fn wrap_range(
    doc: &mut Document,
    range: &TextRange,
    translation: Option<&str>,
    url: &str,
    color: Option<&str>,
) -> Result<Annotation, DomError> {
    let literal = doc.range_text(range)?.to_string();
    if literal.is_empty() {
        return Err(DomError::OffsetOutOfRange {
            node: range.node,
            offset: range.start,
        });
    }
    if doc.parent(range.node).is_none() {
        return Err(DomError::Detached(range.node));
    }

    if range.end < doc.node(range.node).text.len() {
        doc.split_text(range.node, range.end)?;
    }
    let middle = if range.start > 0 {
        doc.split_text(range.node, range.start)?
    } else {
        range.node
    };

    let (text, state) = match translation {
        Some(t) => (t, CaptionState::Ready),
        None => (PLACEHOLDER_TRANSLATION, CaptionState::Pending),
    };
    let annotation = build_annotation(doc, &literal, text, url, color, state);
    if let Err(e) = doc.replace_with(middle, &[annotation.wrapper]) {
        let _ = doc.release(annotation.wrapper);
        return Err(e);
    }
    let _ = doc.release(middle);
    Ok(annotation)
}

pub fn set_caption_state(doc: &mut Document, caption: NodeId, state: CaptionState) {
    doc.remove_class(caption, CAPTION_PENDING_CLASS);
    doc.remove_class(caption, CAPTION_FAILED_CLASS);
    match state {
        CaptionState::Ready => {}
        CaptionState::Pending => doc.add_class(caption, CAPTION_PENDING_CLASS),
        CaptionState::Failed => doc.add_class(caption, CAPTION_FAILED_CLASS),
    }
}

pub fn caption_state(doc: &Document, caption: NodeId) -> CaptionState {
    if doc.has_class(caption, CAPTION_PENDING_CLASS) {
        CaptionState::Pending
    } else if doc.has_class(caption, CAPTION_FAILED_CLASS) {
        CaptionState::Failed
    } else {
        CaptionState::Ready
    }
}

fn apply_color(doc: &mut Document, annotation: &Annotation, color: Option<&str>) {
    match color {
        Some(c) => {
            doc.set_attr(
                annotation.highlight,
                "style",
                format!(
                    "border-bottom-color: {c}; background-color: color-mix(in srgb, {c}, transparent 90%)"
                ),
            );
            doc.set_attr(annotation.caption, "style", format!("color: {c}"));
        }
        None => {
            doc.remove_attr(annotation.highlight, "style");
            doc.remove_attr(annotation.caption, "style");
        }
    }
}

/// Whether `value` is safe to splice into an inline style as a color.
pub fn is_css_color(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 64
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '#' | '(' | ')' | ',' | '.' | '%' | ' ' | '-'))
}

/// Resolve the annotation that owns `node` (a caption, highlight, or wrapper).
pub fn annotation_for(doc: &Document, node: NodeId) -> Option<Annotation> {
    let wrapper = doc.closest(node, |el| el.has_class(WRAP_CLASS))?;
    annotation_parts(doc, wrapper)
}

fn annotation_parts(doc: &Document, wrapper: NodeId) -> Option<Annotation> {
    let find = |class: &str| {
        doc.children(wrapper)
            .iter()
            .copied()
            .find(|&c| doc.has_class(c, class))
    };
    Some(Annotation {
        wrapper,
        caption: find(CAPTION_CLASS)?,
        highlight: find(HIGHLIGHT_CLASS)?,
    })
}

/// The literal word shown by an annotation.
pub fn highlight_text(doc: &Document, annotation: &Annotation) -> String {
    doc.text_content(annotation.highlight)
}

/// Annotations under `root`, optionally only those showing `word` (any case).
pub fn annotations(doc: &Document, root: NodeId, word: Option<&str>) -> Vec<Annotation> {
    let word = word.map(fold_case);
    doc.elements_with_class(root, WRAP_CLASS)
        .into_iter()
        .filter_map(|w| annotation_parts(doc, w))
        .filter(|a| match &word {
            Some(w) => fold_case(&highlight_text(doc, a)) == *w,
            None => true,
        })
        .collect()
}

/// Turn annotations back into their literal text. Returns how many were removed.
pub fn unwrap_annotations(doc: &mut Document, root: NodeId, word: Option<&str>) -> usize {
    let mut parents = BTreeSet::new();
    let mut removed = 0;
    for annotation in annotations(doc, root, word) {
        let literal = highlight_text(doc, &annotation);
        let Some(parent) = doc.parent(annotation.wrapper) else {
            continue;
        };
        let text = doc.create_text(literal);
        match doc.replace_with(annotation.wrapper, &[text]) {
            Ok(()) => {
                let _ = doc.release(annotation.wrapper);
                parents.insert(parent);
                removed += 1;
            }
            Err(e) => {
                let _ = doc.release(text);
                log::warn!("could not unwrap annotation {:?}: {}", annotation.wrapper, e);
            }
        }
    }
    for parent in parents {
        doc.normalize(parent);
    }
    removed
}

/// Set the caption of every annotation showing `word`.
pub fn update_captions(doc: &mut Document, root: NodeId, word: &str, translation: &str) -> usize {
    let found = annotations(doc, root, Some(word));
    for a in &found {
        if let Err(e) = doc.set_text_content(a.caption, translation) {
            log::warn!("could not update caption {:?}: {}", a.caption, e);
        }
        set_caption_state(doc, a.caption, CaptionState::Ready);
    }
    found.len()
}

/// Set or clear the color override of every annotation showing `word`.
pub fn update_colors(doc: &mut Document, root: NodeId, word: &str, color: Option<&str>) -> usize {
    let found = annotations(doc, root, Some(word));
    for a in &found {
        apply_color(doc, a, color);
    }
    found.len()
}

/// Page text under `root` with captions left out.
///
/// For any rendered subtree this equals the text before rendering.
pub fn literal_text(doc: &Document, root: NodeId) -> String {
    doc.descendants(root)
        .into_iter()
        .filter(|&n| doc.node(n).is_text())
        .filter(|&n| doc.closest(n, |el| el.has_class(CAPTION_CLASS)).is_none())
        .map(|n| doc.node(n).text.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::parser::parse_html;
    use crate::engine::matcher::MatchCompiler;

    const PAGE: &str = "https://example.com/page";

    fn vocab(words: &[(&str, &str)]) -> Vec<VocabularyEntry> {
        words
            .iter()
            .map(|(w, t)| VocabularyEntry::new(*w, *t, PAGE))
            .collect()
    }

    fn render_page(html: &str, entries: &[VocabularyEntry]) -> (Document, RenderStats) {
        let mut doc = parse_html(html, PAGE);
        let mut compiler = MatchCompiler::default();
        let pattern = compiler.compile(entries).unwrap();
        let body = doc.body().unwrap();
        let stats = render(&mut doc, entries, &pattern, body, &TextFilter::new());
        (doc, stats)
    }

    #[test]
    fn wraps_matches_with_caption_and_highlight() {
        let entries = vocab(&[("cat", "gato")]);
        let (doc, stats) = render_page("<html><body><p>The Cat sat.</p></body></html>", &entries);
        assert_eq!(stats.annotations, 1);
        let found = annotations(&doc, doc.root(), Some("cat"));
        assert_eq!(found.len(), 1);
        assert_eq!(doc.text_content(found[0].caption), "gato");
        assert_eq!(highlight_text(&doc, &found[0]), "Cat");
        assert_eq!(doc.attr(found[0].wrapper, "data-url"), Some(PAGE));
    }

    #[test]
    fn transform_is_lossless() {
        let entries = vocab(&[("cat", "gato"), ("dog", "perro"), ("hot dog", "perrito")]);
        let html = "<html><body><p>cat, dog and a hot dog. Cats? CAT!</p><div>dogcat <b>dog</b></div></body></html>";
        let before = {
            let doc = parse_html(html, PAGE);
            literal_text(&doc, doc.body().unwrap())
        };
        let (doc, stats) = render_page(html, &entries);
        assert_eq!(stats.annotations, 5);
        assert_eq!(literal_text(&doc, doc.body().unwrap()), before);
    }

    #[test]
    fn rendering_twice_adds_nothing() {
        let entries = vocab(&[("cat", "gato")]);
        let mut doc = parse_html("<html><body><p>cat and cat</p></body></html>", PAGE);
        let mut compiler = MatchCompiler::default();
        let pattern = compiler.compile(&entries).unwrap();
        let body = doc.body().unwrap();
        let filter = TextFilter::new();
        let first = render(&mut doc, &entries, &pattern, body, &filter);
        let second = render(&mut doc, &entries, &pattern, body, &filter);
        assert_eq!(first.annotations, 2);
        assert_eq!(second.annotations, 0);
        let nested = annotations(&doc, body, None)
            .into_iter()
            .filter(|a| doc.parent(a.wrapper).map(|p| doc.has_class(p, WRAP_CLASS)) == Some(true))
            .count();
        assert_eq!(nested, 0);
    }

    #[test]
    fn unknown_match_gets_placeholder() {
        let mut doc = parse_html("<html><body><p>fresh word</p></body></html>", PAGE);
        let mut compiler = MatchCompiler::default();
        let pattern = compiler.compile_words(&["fresh"]).unwrap();
        let body = doc.body().unwrap();
        render(&mut doc, &[], &pattern, body, &TextFilter::new());
        let a = annotations(&doc, body, Some("fresh"));
        assert_eq!(doc.text_content(a[0].caption), PLACEHOLDER_TRANSLATION);
    }

    #[test]
    fn empty_saved_translation_renders_as_failed() {
        let entries = vocab(&[("cat", "")]);
        let (doc, stats) = render_page("<html><body><p>a cat</p></body></html>", &entries);
        assert_eq!(stats.annotations, 1);
        let a = annotations(&doc, doc.root(), Some("cat"));
        assert_eq!(doc.text_content(a[0].caption), FAILED_CAPTION);
        assert_eq!(caption_state(&doc, a[0].caption), CaptionState::Failed);
    }

    #[test]
    fn final_sigma_matches_its_entry() {
        let entries = vocab(&[("σοφος", "wise")]);
        let (mut doc, stats) = render_page("<html><body><p>ΣΟΦΟΣ and σοφοσ</p></body></html>", &entries);
        assert_eq!(stats.annotations, 2);
        let body = doc.body().unwrap();
        let found = annotations(&doc, body, Some("ΣΟΦΟΣ"));
        assert_eq!(found.len(), 2);
        for a in &found {
            assert_eq!(doc.text_content(a.caption), "wise");
            assert_eq!(caption_state(&doc, a.caption), CaptionState::Ready);
        }
        assert_eq!(unwrap_annotations(&mut doc, body, Some("σοφος")), 2);
    }

    #[test]
    fn render_and_unwrap_cycles_reuse_node_slots() {
        let entries = vocab(&[("cat", "gato"), ("dog", "perro")]);
        let (mut doc, _) = render_page("<html><body><p>a cat and a dog</p><p>cat</p></body></html>", &entries);
        let mut compiler = MatchCompiler::default();
        let pattern = compiler.compile(&entries).unwrap();
        let body = doc.body().unwrap();
        let filter = TextFilter::new();
        unwrap_annotations(&mut doc, body, None);
        let live = doc.node_count();
        let capacity = doc.capacity();
        for _ in 0..200 {
            assert_eq!(render(&mut doc, &entries, &pattern, body, &filter).annotations, 3);
            assert_eq!(unwrap_annotations(&mut doc, body, None), 3);
        }
        assert_eq!(doc.node_count(), live);
        assert!(doc.capacity() <= capacity + 32, "arena grew to {}", doc.capacity());
    }

    #[test]
    fn detached_root_is_ignored() {
        let entries = vocab(&[("cat", "gato")]);
        let mut doc = parse_html("<html><body><p>cat</p></body></html>", PAGE);
        let text = doc
            .descendants(doc.root())
            .into_iter()
            .find(|&n| doc.node(n).text == "cat")
            .unwrap();
        let mut compiler = MatchCompiler::default();
        let pattern = compiler.compile(&entries).unwrap();

        let p = doc.parent(text).unwrap();
        doc.remove(text).unwrap();
        let stats = render(&mut doc, &entries, &pattern, text, &TextFilter::new());
        // Detached root: the filter rejects it before replacement is attempted.
        assert_eq!(stats.annotations, 0);
        assert!(doc.children(p).is_empty());
    }

    #[test]
    fn unwrap_restores_text_and_merges_nodes() {
        let entries = vocab(&[("cat", "gato"), ("dog", "perro")]);
        let (mut doc, _) = render_page("<html><body><p>a cat and a dog</p></body></html>", &entries);
        let body = doc.body().unwrap();
        assert_eq!(unwrap_annotations(&mut doc, body, Some("CAT")), 1);
        assert_eq!(annotations(&doc, body, None).len(), 1);
        assert_eq!(unwrap_annotations(&mut doc, body, None), 1);
        let p = doc.children(body).iter().copied().find(|&n| doc.node(n).tag == "p").unwrap();
        assert_eq!(doc.children(p).len(), 1);
        assert_eq!(doc.text_content(p), "a cat and a dog");
    }

    #[test]
    fn updates_captions_and_colors_in_place() {
        let entries = vocab(&[("cat", "gato")]);
        let (mut doc, _) = render_page("<html><body><p>cat cat</p></body></html>", &entries);
        let body = doc.body().unwrap();
        assert_eq!(update_captions(&mut doc, body, "cat", "minino"), 2);
        assert_eq!(update_colors(&mut doc, body, "cat", Some("#ef4444")), 2);
        for a in annotations(&doc, body, Some("cat")) {
            assert_eq!(doc.text_content(a.caption), "minino");
            assert_eq!(doc.attr(a.caption, "style"), Some("color: #ef4444"));
        }
        update_colors(&mut doc, body, "cat", None);
        assert!(annotations(&doc, body, None)
            .iter()
            .all(|a| doc.attr(a.highlight, "style").is_none()));
    }

    #[test]
    fn wrap_range_splits_text_node() {
        let mut doc = parse_html("<html><body><p>I like green tea a lot</p></body></html>", PAGE);
        let text = doc
            .descendants(doc.root())
            .into_iter()
            .find(|&n| doc.node(n).is_text() && doc.node(n).text.contains("green"))
            .unwrap();
        let range = TextRange {
            node: text,
            start: 7,
            end: 16,
        };
        let a = wrap_range(&mut doc, &range, None, PAGE, Some("#10b981")).unwrap();
        assert_eq!(highlight_text(&doc, &a), "green tea");
        assert_eq!(caption_state(&doc, a.caption), CaptionState::Pending);
        let body = doc.body().unwrap();
        assert_eq!(literal_text(&doc, body), "I like green tea a lot");
    }

    #[test]
    fn color_validation() {
        assert!(is_css_color("#10b981"));
        assert!(is_css_color("rgb(1, 2, 3)"));
        assert!(!is_css_color("red; background: url(x)"));
        assert!(!is_css_color(""));
    }
}
