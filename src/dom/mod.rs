//! Live document model.
//!
//! An arena of nodes addressed by copyable [`NodeId`]s. Unlike the parsed
//! snapshot a renderer would consume, this tree is mutated in place by both
//! the page host and the annotation engine, and (while observed) records
//! every structural and text change as a [`MutationRecord`].

pub mod filter;
pub mod mutation;
pub mod parser;
pub mod serialize;

pub use mutation::MutationRecord;

use crate::error::DomError;

/// Handle to a node inside one [`Document`].
///
/// Slots of released nodes are reused; the generation tells a stale handle
/// apart from the node that took its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: usize,
    generation: u32,
}

impl NodeId {
    pub fn index(self) -> usize {
        self.index
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Document,
    Element,
    Text,
}

/// A single node. Attribute order is preserved for serialization.
#[derive(Debug, Clone)]
pub struct DomNode {
    pub tag: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub node_type: NodeType,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl DomNode {
    fn new(node_type: NodeType, tag: String, text: String) -> Self {
        Self {
            tag,
            attributes: Vec::new(),
            text,
            node_type,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .map(|c| c.split_whitespace().any(|c| c == class))
            .unwrap_or(false)
    }

    pub fn is_element(&self) -> bool {
        self.node_type == NodeType::Element
    }

    pub fn is_text(&self) -> bool {
        self.node_type == NodeType::Text
    }

    const RELEASED: DomNode = DomNode {
        tag: String::new(),
        attributes: Vec::new(),
        text: String::new(),
        node_type: NodeType::Text,
        parent: None,
        children: Vec::new(),
    };

    fn is_container(&self) -> bool {
        self.node_type != NodeType::Text
    }
}

/// Viewport-relative bounding box of a selection.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn bottom(&self) -> f32 {
        self.top + self.height
    }
}

/// Byte span inside a single text node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextRange {
    pub node: NodeId,
    pub start: usize,
    pub end: usize,
}

/// The user's active text selection.
///
/// `range` is present only when the selection lies inside one text node;
/// selections spanning several nodes carry just their text.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub text: String,
    pub range: Option<TextRange>,
    pub rect: Rect,
}

/// Mutable document with optional mutation recording.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<DomNode>,
    generations: Vec<u32>,
    free: Vec<usize>,
    root: NodeId,
    pub url: String,
    pub title: String,
    observing: bool,
    records: Vec<MutationRecord>,
    selection: Option<Selection>,
}

impl Document {
    /// Empty document with just the `#document` root.
    pub fn new(url: impl Into<String>) -> Self {
        let root = DomNode::new(NodeType::Document, "#document".into(), String::new());
        Self {
            nodes: vec![root],
            generations: vec![0],
            free: Vec::new(),
            root: NodeId { index: 0, generation: 0 },
            url: url.into(),
            title: String::new(),
            observing: false,
            records: Vec::new(),
            selection: None,
        }
    }

    /// Document with an `html > (head, body)` skeleton.
    pub fn with_body(url: impl Into<String>) -> Self {
        let mut doc = Self::new(url);
        let html = doc.create_element("html");
        let head = doc.create_element("head");
        let body = doc.create_element("body");
        let root = doc.root;
        // Fresh nodes under a fresh root cannot fail to attach.
        let _ = doc.append_child(root, html);
        let _ = doc.append_child(html, head);
        let _ = doc.append_child(html, body);
        doc
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The node behind `id`. A released handle reads as an empty,
    /// detached text node.
    pub fn node(&self, id: NodeId) -> &DomNode {
        static RELEASED: DomNode = DomNode::RELEASED;
        if self.is_live(id) {
            &self.nodes[id.index]
        } else {
            &RELEASED
        }
    }

    /// Callers check `is_live` first.
    fn node_mut(&mut self, id: NodeId) -> &mut DomNode {
        &mut self.nodes[id.index]
    }

    /// Whether `id` still names a node that has not been released.
    pub fn is_live(&self, id: NodeId) -> bool {
        self.generations.get(id.index) == Some(&id.generation)
    }

    fn ensure_live(&self, id: NodeId) -> Result<(), DomError> {
        if self.is_live(id) {
            Ok(())
        } else {
            Err(DomError::Released(id))
        }
    }

    /// Nodes currently allocated, attached or not.
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// Arena slots in use or waiting for reuse.
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    /// The root `<html>` element, if any.
    pub fn document_element(&self) -> Option<NodeId> {
        self.node(self.root)
            .children
            .iter()
            .copied()
            .find(|&c| self.node(c).is_element())
    }

    /// The first `<body>` element in tree order.
    pub fn body(&self) -> Option<NodeId> {
        self.descendants(self.root)
            .into_iter()
            .find(|&id| self.node(id).is_element() && self.node(id).tag == "body")
    }

    pub fn create_element(&mut self, tag: impl Into<String>) -> NodeId {
        self.alloc(DomNode::new(NodeType::Element, tag.into(), String::new()))
    }

    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.alloc(DomNode::new(NodeType::Text, String::new(), text.into()))
    }

    fn alloc(&mut self, node: DomNode) -> NodeId {
        match self.free.pop() {
            Some(index) => {
                self.nodes[index] = node;
                NodeId { index, generation: self.generations[index] }
            }
            None => {
                self.nodes.push(node);
                self.generations.push(0);
                NodeId { index: self.nodes.len() - 1, generation: 0 }
            }
        }
    }

    /// Free a detached subtree so its slots can be reused. Handles into it
    /// go stale. Returns the number of nodes freed.
    pub fn release(&mut self, id: NodeId) -> Result<usize, DomError> {
        self.ensure_live(id)?;
        if id == self.root || self.node(id).parent.is_some() {
            return Err(DomError::StillAttached(id));
        }
        let subtree = self.descendants(id);
        for n in &subtree {
            self.nodes[n.index] = DomNode::RELEASED;
            self.generations[n.index] = self.generations[n.index].wrapping_add(1);
            self.free.push(n.index);
        }
        if self.selection.as_ref().and_then(|s| s.range).map_or(false, |r| subtree.contains(&r.node)) {
            self.selection = None;
        }
        Ok(subtree.len())
    }

    /// Detach `id` and release it.
    fn discard(&mut self, id: NodeId) {
        self.detach(id);
        // Detached just above, so release only fails for stale handles.
        let _ = self.release(id);
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    /// Whether `id` is connected to the document root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut cur = Some(id);
        while let Some(n) = cur {
            if n == self.root {
                return true;
            }
            cur = self.node(n).parent;
        }
        false
    }

    fn is_inclusive_ancestor(&self, ancestor: NodeId, of: NodeId) -> bool {
        let mut cur = Some(of);
        while let Some(n) = cur {
            if n == ancestor {
                return true;
            }
            cur = self.node(n).parent;
        }
        false
    }

    fn check_insert(&self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        if !self.node(parent).is_container() {
            return Err(DomError::NotContainer(parent));
        }
        if self.is_inclusive_ancestor(child, parent) {
            return Err(DomError::HierarchyRequest(child));
        }
        Ok(())
    }

    /// Unlink `id` from its parent, recording the removal.
    fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.node(id).parent {
            self.node_mut(parent).children.retain(|&c| c != id);
            self.node_mut(id).parent = None;
            self.record(MutationRecord::ChildList {
                target: parent,
                added: Vec::new(),
                removed: vec![id],
            });
        }
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        self.insert_before(parent, child, None)
    }

    /// Insert `child` into `parent` before `reference` (or at the end).
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<(), DomError> {
        self.ensure_live(parent)?;
        self.ensure_live(child)?;
        self.check_insert(parent, child)?;
        if let Some(r) = reference {
            if self.node(r).parent != Some(parent) {
                return Err(DomError::NotAChild(r));
            }
        }
        self.detach(child);
        let pos = match reference {
            Some(r) => self
                .node(parent)
                .children
                .iter()
                .position(|&c| c == r)
                .ok_or(DomError::NotAChild(r))?,
            None => self.node(parent).children.len(),
        };
        self.node_mut(parent).children.insert(pos, child);
        self.node_mut(child).parent = Some(parent);
        self.record(MutationRecord::ChildList {
            target: parent,
            added: vec![child],
            removed: Vec::new(),
        });
        Ok(())
    }

    pub fn remove(&mut self, id: NodeId) -> Result<(), DomError> {
        if self.node(id).parent.is_none() {
            return Err(DomError::Detached(id));
        }
        self.detach(id);
        Ok(())
    }

    /// Atomically replace `old` with `replacements`, in order.
    ///
    /// Fails without touching the tree when `old` has no parent.
    pub fn replace_with(&mut self, old: NodeId, replacements: &[NodeId]) -> Result<(), DomError> {
        self.ensure_live(old)?;
        let parent = self.node(old).parent.ok_or(DomError::Detached(old))?;
        for &r in replacements {
            self.ensure_live(r)?;
            if r == old {
                return Err(DomError::HierarchyRequest(r));
            }
            self.check_insert(parent, r)?;
        }
        for &r in replacements {
            if self.node(r).parent.is_some() {
                self.detach(r);
            }
        }
        // Re-resolve after detaching in case a replacement was a sibling.
        let pos = self
            .node(parent)
            .children
            .iter()
            .position(|&c| c == old)
            .ok_or(DomError::NotAChild(old))?;
        self.node_mut(parent)
            .children
            .splice(pos..=pos, replacements.iter().copied());
        self.node_mut(old).parent = None;
        for &r in replacements {
            self.node_mut(r).parent = Some(parent);
        }
        self.record(MutationRecord::ChildList {
            target: parent,
            added: replacements.to_vec(),
            removed: vec![old],
        });
        Ok(())
    }

    pub fn set_text(&mut self, id: NodeId, text: impl Into<String>) -> Result<(), DomError> {
        self.ensure_live(id)?;
        if !self.node(id).is_text() {
            return Err(DomError::NotText(id));
        }
        self.node_mut(id).text = text.into();
        self.record(MutationRecord::CharacterData { target: id });
        Ok(())
    }

    /// Replace all children of an element with a single text node. The old
    /// children are released.
    pub fn set_text_content(&mut self, id: NodeId, text: impl Into<String>) -> Result<(), DomError> {
        self.ensure_live(id)?;
        if self.node(id).is_text() {
            return self.set_text(id, text);
        }
        let old: Vec<NodeId> = self.node(id).children.clone();
        for c in old {
            self.discard(c);
        }
        let t = self.create_text(text);
        self.append_child(id, t)
    }

    /// Split a text node at a byte offset; the tail becomes the next sibling.
    pub fn split_text(&mut self, id: NodeId, offset: usize) -> Result<NodeId, DomError> {
        self.ensure_live(id)?;
        let node = self.node(id);
        if !node.is_text() {
            return Err(DomError::NotText(id));
        }
        if offset > node.text.len() || !node.text.is_char_boundary(offset) {
            return Err(DomError::OffsetOutOfRange { node: id, offset });
        }
        let tail_text = node.text[offset..].to_string();
        let head_text = node.text[..offset].to_string();
        let parent = node.parent;
        self.set_text(id, head_text)?;
        let tail = self.create_text(tail_text);
        if let Some(parent) = parent {
            let next = self.next_sibling(id);
            self.insert_before(parent, tail, next)?;
        }
        Ok(tail)
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.node(id).parent?;
        let siblings = &self.node(parent).children;
        let pos = siblings.iter().position(|&c| c == id)?;
        siblings.get(pos + 1).copied()
    }

    /// Merge adjacent text children and drop empty ones. Merged and empty
    /// nodes are released.
    pub fn normalize(&mut self, parent: NodeId) {
        let children = self.node(parent).children.clone();
        let mut run_head: Option<NodeId> = None;
        for child in children {
            if !self.node(child).is_text() {
                run_head = None;
                continue;
            }
            if self.node(child).text.is_empty() {
                self.discard(child);
                continue;
            }
            match run_head {
                Some(head) => {
                    let mut merged = std::mem::take(&mut self.node_mut(head).text);
                    merged.push_str(&self.node(child).text);
                    // `head` is a text node, set_text cannot fail here.
                    let _ = self.set_text(head, merged);
                    self.discard(child);
                }
                None => run_head = Some(child),
            }
        }
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.node(id).attr(name)
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: impl Into<String>) {
        if !self.is_live(id) {
            return;
        }
        let value = value.into();
        let node = self.node_mut(id);
        match node.attributes.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value,
            None => node.attributes.push((name.to_string(), value)),
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) {
        if !self.is_live(id) {
            return;
        }
        self.node_mut(id).attributes.retain(|(k, _)| k != name);
    }

    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.node(id).has_class(class)
    }

    pub fn add_class(&mut self, id: NodeId, class: &str) {
        if self.has_class(id, class) {
            return;
        }
        let joined = match self.attr(id, "class") {
            Some(existing) if !existing.trim().is_empty() => format!("{} {}", existing.trim(), class),
            _ => class.to_string(),
        };
        self.set_attr(id, "class", joined);
    }

    pub fn remove_class(&mut self, id: NodeId, class: &str) {
        let Some(existing) = self.attr(id, "class") else {
            return;
        };
        let kept: Vec<&str> = existing.split_whitespace().filter(|c| *c != class).collect();
        if kept.is_empty() {
            self.remove_attr(id, "class");
        } else {
            let kept = kept.join(" ");
            self.set_attr(id, "class", kept);
        }
    }

    /// Nearest inclusive ancestor element matching `pred`.
    pub fn closest(&self, id: NodeId, pred: impl Fn(&DomNode) -> bool) -> Option<NodeId> {
        let mut cur = Some(id);
        while let Some(n) = cur {
            let node = self.node(n);
            if node.is_element() && pred(node) {
                return Some(n);
            }
            cur = node.parent;
        }
        None
    }

    /// All nodes under `id` (inclusive), in tree order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.node(n).children.iter().rev().copied());
        }
        out
    }

    /// Concatenated text of all descendant text nodes.
    pub fn text_content(&self, id: NodeId) -> String {
        self.descendants(id)
            .into_iter()
            .filter(|&n| self.node(n).is_text())
            .map(|n| self.node(n).text.as_str())
            .collect()
    }

    pub fn get_element_by_id(&self, element_id: &str) -> Option<NodeId> {
        self.descendants(self.root)
            .into_iter()
            .find(|&n| self.node(n).is_element() && self.node(n).attr("id") == Some(element_id))
    }

    /// Elements under `root` (inclusive) carrying `class`, in tree order.
    pub fn elements_with_class(&self, root: NodeId, class: &str) -> Vec<NodeId> {
        self.descendants(root)
            .into_iter()
            .filter(|&n| self.node(n).is_element() && self.node(n).has_class(class))
            .collect()
    }

    // ─── Observation ────────────────────────────────────────────────────

    pub fn observe(&mut self) {
        self.observing = true;
    }

    /// Stop recording. Records queued so far stay available.
    pub fn disconnect(&mut self) {
        self.observing = false;
    }

    pub fn is_observing(&self) -> bool {
        self.observing
    }

    pub fn take_records(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.records)
    }

    /// Queue a record when observing and the target is in the document;
    /// changes inside detached subtrees are not observable.
    fn record(&mut self, record: MutationRecord) {
        if self.observing && self.is_attached(record.target()) {
            self.records.push(record);
        }
    }

    // ─── Selection ──────────────────────────────────────────────────────

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn set_selection(&mut self, selection: Option<Selection>) {
        self.selection = selection;
    }

    /// Select `start..end` of a text node.
    pub fn select_text(
        &mut self,
        node: NodeId,
        start: usize,
        end: usize,
        rect: Rect,
    ) -> Result<(), DomError> {
        let range = TextRange { node, start, end };
        let text = self.range_text(&range)?.to_string();
        self.selection = Some(Selection {
            text,
            range: Some(range),
            rect,
        });
        Ok(())
    }

    pub fn range_text(&self, range: &TextRange) -> Result<&str, DomError> {
        let node = self.node(range.node);
        if !node.is_text() {
            return Err(DomError::NotText(range.node));
        }
        node.text
            .get(range.start..range.end)
            .ok_or(DomError::OffsetOutOfRange {
                node: range.node,
                offset: range.end,
            })
    }
}
