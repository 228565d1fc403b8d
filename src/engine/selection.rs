//! Selection-to-annotation flow.
//!
//! `Idle -> Selected -> PendingTranslation -> Annotated`, or
//! `Idle -> Selected -> ManualInput -> Annotated`, with a return to `Idle`
//! on an empty or oversized selection and on cancellation. This module owns
//! the state and the validation rules; the session performs the document
//! writes and collaborator calls each transition asks for.

use std::time::{Duration, Instant};

use crate::dom::filter::FAB_ID;
use crate::dom::{Document, NodeId, Rect, TextRange};
use crate::engine::render::Annotation;

/// Gap between the selection and the floating control.
const CONTROL_GAP: f32 = 8.0;
/// Minimum distance from the viewport edges.
const VIEWPORT_MARGIN: f32 = 10.0;
/// Control size assumed before the host has measured it.
pub const DEFAULT_CONTROL_SIZE: (f32, f32) = (200.0, 30.0);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
    pub scroll_x: f32,
    pub scroll_y: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 800.0,
            scroll_x: 0.0,
            scroll_y: 0.0,
        }
    }
}

/// A selection that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedSelection {
    /// Trimmed selection text; becomes the saved word.
    pub text: String,
    /// Range narrowed to the trimmed text, when insertable.
    pub range: Option<TextRange>,
    /// Page coordinates of the floating control.
    pub control_position: (f32, f32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectionState {
    Idle,
    Selected(CapturedSelection),
    PendingTranslation {
        word: String,
        color: Option<String>,
        annotation: Option<Annotation>,
        deadline: Instant,
    },
    ManualInput {
        selection: CapturedSelection,
        color: Option<String>,
    },
    Annotated {
        word: String,
    },
}

/// What a transition asks the session to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Activation {
    /// Insert a pending placeholder and start translating.
    Translate {
        selection: CapturedSelection,
        color: Option<String>,
    },
    /// Ask the user for the translation.
    AwaitingInput,
    /// Nothing was selected.
    Ignored,
}

#[derive(Debug)]
pub struct SelectionFlow {
    state: SelectionState,
    settle_at: Option<Instant>,
    settle_delay: Duration,
    max_words: usize,
}

impl SelectionFlow {
    pub fn new(settle_delay: Duration, max_words: usize) -> Self {
        Self {
            state: SelectionState::Idle,
            settle_at: None,
            settle_delay,
            max_words,
        }
    }

    pub fn state(&self) -> &SelectionState {
        &self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == SelectionState::Idle
    }

    /// Pointer released: read the selection after the settle delay.
    pub fn pointer_up(&mut self, now: Instant) {
        self.settle_at = Some(now + self.settle_delay);
    }

    pub fn settle_due(&self, now: Instant) -> bool {
        self.settle_at.map(|t| now >= t).unwrap_or(false)
    }

    /// Evaluate the document's selection once the settle delay has passed.
    ///
    /// Only `Idle`, `Selected` and `Annotated` react; an activation already
    /// in progress is not disturbed by a new pointer release.
    pub fn settle(&mut self, doc: &Document, viewport: &Viewport, control: (f32, f32), now: Instant) -> bool {
        if !self.settle_due(now) {
            return false;
        }
        self.settle_at = None;
        if !matches!(
            self.state,
            SelectionState::Idle | SelectionState::Selected(_) | SelectionState::Annotated { .. }
        ) {
            return false;
        }

        let captured = doc.selection().and_then(|sel| {
            let text = sel.text.trim();
            if !accept_selection(text, self.max_words) {
                return None;
            }
            Some(CapturedSelection {
                text: text.to_string(),
                range: sel.range.and_then(|r| trimmed_range(doc, &r)),
                control_position: place_action_control(sel.rect, control, viewport),
            })
        });
        match captured {
            Some(c) => {
                self.state = SelectionState::Selected(c);
                true
            }
            None => {
                self.state = SelectionState::Idle;
                false
            }
        }
    }

    /// The user pressed the floating control (optionally a palette color).
    pub fn activate(&mut self, color: Option<String>, auto_translate: bool) -> Activation {
        let SelectionState::Selected(selection) = std::mem::replace(&mut self.state, SelectionState::Idle) else {
            return Activation::Ignored;
        };
        if auto_translate {
            Activation::Translate { selection, color }
        } else {
            self.state = SelectionState::ManualInput { selection, color };
            Activation::AwaitingInput
        }
    }

    pub fn begin_translation(
        &mut self,
        word: String,
        color: Option<String>,
        annotation: Option<Annotation>,
        deadline: Instant,
    ) {
        self.state = SelectionState::PendingTranslation {
            word,
            color,
            annotation,
            deadline,
        };
    }

    /// Take the manual-input context, leaving the flow idle.
    pub fn take_manual(&mut self) -> Option<(CapturedSelection, Option<String>)> {
        match std::mem::replace(&mut self.state, SelectionState::Idle) {
            SelectionState::ManualInput { selection, color } => Some((selection, color)),
            other => {
                self.state = other;
                None
            }
        }
    }

    /// Take the pending-translation context, leaving the flow idle.
    pub fn take_pending(&mut self) -> Option<(String, Option<String>, Option<Annotation>)> {
        match std::mem::replace(&mut self.state, SelectionState::Idle) {
            SelectionState::PendingTranslation {
                word,
                color,
                annotation,
                ..
            } => Some((word, color, annotation)),
            other => {
                self.state = other;
                None
            }
        }
    }

    pub fn pending_deadline(&self) -> Option<Instant> {
        match &self.state {
            SelectionState::PendingTranslation { deadline, .. } => Some(*deadline),
            _ => None,
        }
    }

    pub fn finish(&mut self, word: String) {
        self.state = SelectionState::Annotated { word };
    }

    pub fn reset(&mut self) {
        self.state = SelectionState::Idle;
        self.settle_at = None;
    }
}

/// Non-empty and at most `max_words` whitespace-separated tokens.
pub fn accept_selection(text: &str, max_words: usize) -> bool {
    let text = text.trim();
    !text.is_empty() && text.split_whitespace().count() <= max_words
}

/// Narrow `range` so it excludes leading and trailing whitespace.
fn trimmed_range(doc: &Document, range: &TextRange) -> Option<TextRange> {
    let raw = doc.range_text(range).ok()?;
    let leading = raw.len() - raw.trim_start().len();
    let trailing = raw.len() - raw.trim_end().len();
    let start = range.start + leading;
    let end = range.end - trailing;
    (start < end).then_some(TextRange {
        node: range.node,
        start,
        end,
    })
}

/// Page position for the floating control: centered above the selection,
/// clamped to the viewport margins, flipped below when there is no room.
pub fn place_action_control(selection: Rect, control: (f32, f32), viewport: &Viewport) -> (f32, f32) {
    let (width, height) = control;
    let mut left = selection.left + selection.width / 2.0 - width / 2.0;
    let mut top = selection.top - height - CONTROL_GAP;

    if left < VIEWPORT_MARGIN {
        left = VIEWPORT_MARGIN;
    }
    if left + width > viewport.width - VIEWPORT_MARGIN {
        left = viewport.width - width - VIEWPORT_MARGIN;
    }
    if top < 0.0 {
        top = selection.bottom() + CONTROL_GAP;
    }

    (left + viewport.scroll_x, top + viewport.scroll_y)
}

/// Build the floating control (`#vo-fab`) with a main button and palette.
pub fn create_action_control(doc: &mut Document, palette: &[String]) -> Option<NodeId> {
    let body = doc.body()?;
    let fab = doc.create_element("div");
    doc.set_attr(fab, "id", FAB_ID);
    doc.set_attr(fab, "style", "position: absolute; z-index: 2147483647; display: none");

    let main = doc.create_element("button");
    doc.set_attr(main, "id", "vo-fab-main");
    doc.set_attr(main, "title", "Mark it with the default color");
    let label = doc.create_text("Mark it");
    let palette_el = doc.create_element("div");
    doc.set_attr(palette_el, "id", "vo-palette");

    // Fresh nodes under an element: attaching cannot fail.
    let _ = doc.append_child(main, label);
    let _ = doc.append_child(fab, main);
    let _ = doc.append_child(fab, palette_el);
    fill_palette(doc, palette_el, palette);
    doc.append_child(body, fab).ok()?;
    Some(fab)
}

/// Rebuild the palette dots of an existing control.
pub fn update_palette(doc: &mut Document, palette: &[String]) {
    if let Some(palette_el) = doc.get_element_by_id("vo-palette") {
        let old: Vec<NodeId> = doc.children(palette_el).to_vec();
        for dot in old {
            if doc.remove(dot).is_ok() {
                let _ = doc.release(dot);
            }
        }
        fill_palette(doc, palette_el, palette);
    }
}

fn fill_palette(doc: &mut Document, palette_el: NodeId, palette: &[String]) {
    if palette.is_empty() {
        doc.set_attr(palette_el, "style", "display: none");
        return;
    }
    doc.set_attr(palette_el, "style", "display: flex");
    for color in palette {
        let dot = doc.create_element("div");
        doc.set_attr(dot, "class", "vo-palette-dot");
        doc.set_attr(dot, "data-color", color.as_str());
        doc.set_attr(dot, "style", format!("background-color: {}", color));
        doc.set_attr(dot, "title", format!("Mark with {}", color));
        let _ = doc.append_child(palette_el, dot);
    }
}

pub fn show_action_control(doc: &mut Document, position: (f32, f32)) {
    if let Some(fab) = doc.get_element_by_id(FAB_ID) {
        doc.set_attr(
            fab,
            "style",
            format!(
                "position: absolute; z-index: 2147483647; display: flex; left: {}px; top: {}px",
                position.0, position.1
            ),
        );
    }
}

pub fn hide_action_control(doc: &mut Document) {
    if let Some(fab) = doc.get_element_by_id(FAB_ID) {
        doc.set_attr(fab, "style", "position: absolute; z-index: 2147483647; display: none");
    }
}

pub fn is_action_control_visible(doc: &Document) -> bool {
    doc.get_element_by_id(FAB_ID)
        .and_then(|fab| doc.attr(fab, "style"))
        .map(|s| s.contains("display: flex"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Selection;

    fn words(n: usize) -> String {
        vec!["word"; n].join(" ")
    }

    #[test]
    fn selection_word_bound() {
        assert!(accept_selection(&words(30), 30));
        assert!(!accept_selection(&words(31), 30));
        assert!(!accept_selection("   \n\t ", 30));
        assert!(accept_selection("  single  ", 30));
    }

    #[test]
    fn control_sits_above_and_clamps() {
        let viewport = Viewport {
            width: 800.0,
            height: 600.0,
            scroll_x: 0.0,
            scroll_y: 100.0,
        };
        let sel = Rect {
            left: 300.0,
            top: 200.0,
            width: 100.0,
            height: 20.0,
        };
        assert_eq!(place_action_control(sel, (200.0, 30.0), &viewport), (250.0, 262.0));

        let left_edge = Rect { left: 0.0, ..sel };
        assert_eq!(place_action_control(left_edge, (200.0, 30.0), &viewport).0, 10.0);

        let right_edge = Rect { left: 780.0, ..sel };
        assert_eq!(place_action_control(right_edge, (200.0, 30.0), &viewport).0, 590.0);
    }

    #[test]
    fn control_flips_below_near_top() {
        let sel = Rect {
            left: 300.0,
            top: 5.0,
            width: 100.0,
            height: 20.0,
        };
        let (_, top) = place_action_control(sel, (200.0, 30.0), &Viewport::default());
        assert_eq!(top, 33.0);
    }

    #[test]
    fn settle_captures_trimmed_range() {
        let mut doc = Document::with_body("https://example.com");
        let body = doc.body().unwrap();
        let t = doc.create_text("say  hello  there");
        doc.append_child(body, t).unwrap();
        doc.select_text(t, 3, 12, Rect::default()).unwrap();

        let mut flow = SelectionFlow::new(Duration::from_millis(10), 30);
        let t0 = Instant::now();
        flow.pointer_up(t0);
        assert!(!flow.settle(&doc, &Viewport::default(), DEFAULT_CONTROL_SIZE, t0));
        assert!(flow.settle(&doc, &Viewport::default(), DEFAULT_CONTROL_SIZE, t0 + Duration::from_millis(10)));
        let SelectionState::Selected(captured) = flow.state() else {
            panic!("expected a captured selection");
        };
        assert_eq!(captured.text, "hello");
        assert_eq!(captured.range, Some(TextRange { node: t, start: 5, end: 10 }));
    }

    #[test]
    fn oversized_selection_returns_to_idle() {
        let mut doc = Document::with_body("https://example.com");
        doc.set_selection(Some(Selection {
            text: words(31),
            range: None,
            rect: Rect::default(),
        }));
        let mut flow = SelectionFlow::new(Duration::ZERO, 30);
        let now = Instant::now();
        flow.pointer_up(now);
        assert!(!flow.settle(&doc, &Viewport::default(), DEFAULT_CONTROL_SIZE, now));
        assert!(flow.is_idle());
        assert_eq!(flow.activate(None, true), Activation::Ignored);
    }

    #[test]
    fn manual_mode_waits_for_input() {
        let mut doc = Document::with_body("https://example.com");
        doc.set_selection(Some(Selection {
            text: "bonjour".into(),
            range: None,
            rect: Rect::default(),
        }));
        let mut flow = SelectionFlow::new(Duration::ZERO, 30);
        let now = Instant::now();
        flow.pointer_up(now);
        flow.settle(&doc, &Viewport::default(), DEFAULT_CONTROL_SIZE, now);
        assert_eq!(flow.activate(Some("#ef4444".into()), false), Activation::AwaitingInput);
        let (selection, color) = flow.take_manual().unwrap();
        assert_eq!(selection.text, "bonjour");
        assert_eq!(color.as_deref(), Some("#ef4444"));
        assert!(flow.is_idle());
    }

    #[test]
    fn palette_rebuilds() {
        let mut doc = Document::with_body("https://example.com");
        create_action_control(&mut doc, &["#10b981".to_string()]).unwrap();
        let palette = doc.get_element_by_id("vo-palette").unwrap();
        assert_eq!(doc.children(palette).len(), 1);
        update_palette(&mut doc, &["#111111".to_string(), "#222222".to_string()]);
        assert_eq!(doc.children(palette).len(), 2);
        update_palette(&mut doc, &[]);
        assert_eq!(doc.children(palette).len(), 0);
        assert_eq!(doc.attr(palette, "style"), Some("display: none"));
    }
}
