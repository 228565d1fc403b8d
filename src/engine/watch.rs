//! Mutation watch loop.
//!
//! Two states, `Observing` and `Suspended`. Mutation batches feed a pending
//! work-set; a debounce deadline (reset per batch) decides when to drain it.
//! Draining disconnects observation so the renderer's own writes are never
//! recorded, then restores the previous state even if the renderer panics.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::dom::filter::is_self_generated;
use crate::dom::{Document, MutationRecord, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Observing,
    Suspended,
}

#[derive(Debug)]
pub struct WatchLoop {
    state: WatchState,
    /// Nodes waiting for the next drain, in arrival order.
    pending: Vec<NodeId>,
    queued: HashSet<NodeId>,
    deadline: Option<Instant>,
    delay: Duration,
    draining: bool,
}

/// Restores the pre-suspension state on drop.
struct Resume<'a> {
    watch: &'a mut WatchLoop,
    doc: &'a mut Document,
    previous: WatchState,
}

impl Drop for Resume<'_> {
    fn drop(&mut self) {
        self.watch.draining = false;
        if self.previous == WatchState::Observing {
            self.watch.observe(self.doc);
        }
    }
}

impl WatchLoop {
    /// A loop that starts suspended; call [`WatchLoop::observe`] to begin.
    pub fn new(delay: Duration) -> Self {
        Self {
            state: WatchState::Suspended,
            pending: Vec::new(),
            queued: HashSet::new(),
            deadline: None,
            delay,
            draining: false,
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_draining(&self) -> bool {
        self.draining
    }

    pub fn observe(&mut self, doc: &mut Document) {
        doc.observe();
        self.state = WatchState::Observing;
    }

    /// Stop observing. Records already queued by the document are kept.
    pub fn suspend(&mut self, doc: &mut Document) {
        doc.disconnect();
        self.state = WatchState::Suspended;
    }

    /// Forget all queued work and any armed deadline.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.queued.clear();
        self.deadline = None;
    }

    /// Feed one batch of records. Self-generated changes are dropped; the
    /// rest join the work-set and (re)arm the debounce deadline, even when
    /// the node they touch is already queued.
    pub fn on_mutations(&mut self, doc: &Document, records: Vec<MutationRecord>, now: Instant) {
        let mut touched = false;
        for record in records {
            match record {
                MutationRecord::ChildList { target, added, .. } => {
                    if is_self_generated(doc, target) {
                        continue;
                    }
                    for node in added {
                        if !is_self_generated(doc, node) {
                            self.enqueue(node);
                            touched = true;
                        }
                    }
                }
                MutationRecord::CharacterData { target } => {
                    let Some(parent) = doc.parent(target) else {
                        continue;
                    };
                    if !is_self_generated(doc, parent) {
                        self.enqueue(parent);
                        touched = true;
                    }
                }
            }
        }
        if touched {
            self.deadline = Some(now + self.delay);
        }
    }

    fn enqueue(&mut self, node: NodeId) {
        if self.queued.insert(node) {
            self.pending.push(node);
        }
    }

    /// Whether the debounce deadline has passed with work waiting.
    pub fn is_due(&self, now: Instant) -> bool {
        !self.draining
            && !self.pending.is_empty()
            && self.deadline.map(|d| now >= d).unwrap_or(false)
    }

    /// Run `f` with observation disconnected, restoring the prior state after.
    pub fn suspended<R>(&mut self, doc: &mut Document, f: impl FnOnce(&mut Document) -> R) -> R {
        let previous = self.state;
        self.suspend(doc);
        let mut guard = Resume {
            watch: self,
            doc,
            previous,
        };
        f(&mut *guard.doc)
    }

    /// Drain the work-set once, calling `render` for every pending node that
    /// is still attached. Returns how many nodes were rendered.
    ///
    /// Work that arrives while the drain runs stays queued for the next cycle.
    pub fn drain(
        &mut self,
        doc: &mut Document,
        now: Instant,
        mut render: impl FnMut(&mut Document, NodeId),
    ) -> usize {
        if !self.is_due(now) || self.state != WatchState::Observing {
            return 0;
        }
        self.draining = true;
        let batch = std::mem::take(&mut self.pending);
        self.queued.clear();
        self.deadline = None;

        log::debug!("watch loop draining {} pending nodes", batch.len());
        self.suspended(doc, |doc| {
            let mut rendered = 0;
            for node in batch {
                if doc.is_attached(node) {
                    render(doc, node);
                    rendered += 1;
                }
            }
            rendered
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::filter::WRAP_CLASS;

    fn setup() -> (Document, WatchLoop, Instant) {
        let mut doc = Document::with_body("https://example.com");
        let mut watch = WatchLoop::new(Duration::from_millis(1000));
        watch.observe(&mut doc);
        (doc, watch, Instant::now())
    }

    fn add_paragraph(doc: &mut Document, text: &str) -> NodeId {
        let body = doc.body().unwrap();
        let p = doc.create_element("p");
        let t = doc.create_text(text);
        doc.append_child(p, t).unwrap();
        doc.append_child(body, p).unwrap();
        p
    }

    #[test]
    fn debounces_until_quiet() {
        let (mut doc, mut watch, t0) = setup();
        let p = add_paragraph(&mut doc, "first");
        let records = doc.take_records();
        watch.on_mutations(&doc, records, t0);
        assert_eq!(watch.pending_len(), 1);
        assert!(!watch.is_due(t0 + Duration::from_millis(999)));

        add_paragraph(&mut doc, "second");
        let records = doc.take_records();
        watch.on_mutations(&doc, records, t0 + Duration::from_millis(900));
        assert!(!watch.is_due(t0 + Duration::from_millis(1500)));
        assert!(watch.is_due(t0 + Duration::from_millis(1900)));

        let mut seen = Vec::new();
        let n = watch.drain(&mut doc, t0 + Duration::from_millis(1900), |_, node| seen.push(node));
        assert_eq!(n, 2);
        assert_eq!(seen[0], p);
        assert_eq!(watch.pending_len(), 0);
        assert_eq!(watch.state(), WatchState::Observing);
        assert!(doc.is_observing());
    }

    #[test]
    fn edits_to_a_queued_node_push_the_deadline_back() {
        let (mut doc, mut watch, t0) = setup();
        let p = add_paragraph(&mut doc, "typing");
        let records = doc.take_records();
        watch.on_mutations(&doc, records, t0);
        let text = doc.children(p)[0];
        for (ms, value) in [(500, "typing."), (900, "typing..")] {
            doc.set_text(text, value).unwrap();
            let records = doc.take_records();
            watch.on_mutations(&doc, records, t0 + Duration::from_millis(ms));
        }
        assert_eq!(watch.pending_len(), 1);
        assert!(!watch.is_due(t0 + Duration::from_millis(1000)));
        assert!(!watch.is_due(t0 + Duration::from_millis(1899)));
        assert!(watch.is_due(t0 + Duration::from_millis(1900)));
    }

    #[test]
    fn self_generated_insertions_are_ignored() {
        let (mut doc, mut watch, t0) = setup();
        let body = doc.body().unwrap();
        let wrap = doc.create_element("span");
        doc.set_attr(wrap, "class", WRAP_CLASS);
        let inner = doc.create_text("word");
        doc.append_child(wrap, inner).unwrap();
        doc.append_child(body, wrap).unwrap();
        let caption_text = doc.create_text("palabra");
        doc.append_child(wrap, caption_text).unwrap();

        let records = doc.take_records();
        assert!(!records.is_empty());
        watch.on_mutations(&doc, records, t0);
        assert_eq!(watch.pending_len(), 0);
        assert!(!watch.is_due(t0 + Duration::from_secs(5)));
    }

    #[test]
    fn character_data_queues_parent_element() {
        let (mut doc, mut watch, t0) = setup();
        doc.disconnect();
        let p = add_paragraph(&mut doc, "old");
        doc.observe();
        let text = doc.children(p)[0];
        doc.set_text(text, "new").unwrap();
        let records = doc.take_records();
        watch.on_mutations(&doc, records, t0);
        let mut seen = Vec::new();
        watch.drain(&mut doc, t0 + Duration::from_secs(1), |_, n| seen.push(n));
        assert_eq!(seen, vec![p]);
    }

    #[test]
    fn renderer_writes_are_not_observed() {
        let (mut doc, mut watch, t0) = setup();
        add_paragraph(&mut doc, "text");
        let records = doc.take_records();
        watch.on_mutations(&doc, records, t0);
        watch.drain(&mut doc, t0 + Duration::from_secs(1), |doc, node| {
            let extra = doc.create_text("appended by renderer");
            doc.append_child(node, extra).unwrap();
        });
        assert!(doc.take_records().is_empty());
    }

    #[test]
    fn detached_pending_nodes_are_skipped() {
        let (mut doc, mut watch, t0) = setup();
        let p = add_paragraph(&mut doc, "gone soon");
        let records = doc.take_records();
        watch.on_mutations(&doc, records, t0);
        doc.remove(p).unwrap();
        let n = watch.drain(&mut doc, t0 + Duration::from_secs(1), |_, _| {});
        assert_eq!(n, 0);
    }

    #[test]
    fn panicking_renderer_does_not_leave_loop_suspended() {
        let (mut doc, mut watch, t0) = setup();
        add_paragraph(&mut doc, "boom");
        let records = doc.take_records();
        watch.on_mutations(&doc, records, t0);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            watch.drain(&mut doc, t0 + Duration::from_secs(1), |_, _| panic!("renderer bug"));
        }));
        assert!(result.is_err());
        assert_eq!(watch.state(), WatchState::Observing);
        assert!(!watch.is_draining());
        assert!(doc.is_observing());
    }

    #[test]
    fn suspended_restores_prior_state() {
        let mut doc = Document::with_body("https://example.com");
        let mut watch = WatchLoop::new(Duration::from_millis(10));
        watch.suspended(&mut doc, |_| {});
        assert_eq!(watch.state(), WatchState::Suspended);
        assert!(!doc.is_observing());
    }
}
