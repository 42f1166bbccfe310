//! In-memory document.
//!
//! A plain tree of nodes with a manually pumped frame queue, used by tests
//! and demos. Every structural call is appended to an operation log so tests
//! can assert not just the final tree but how it was reached (e.g. "exactly
//! one physical move").

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;

use super::{Document, NodeId};
use crate::value::Value;

/// One logged document mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocOp {
    CreateText(NodeId),
    CreateElement(NodeId),
    Append { parent: NodeId, child: NodeId },
    InsertBefore { node: NodeId, reference: NodeId },
    Remove(NodeId),
    SetText(NodeId),
    SetAttribute { node: NodeId, name: String },
    RemoveAttribute { node: NodeId, name: String },
}

#[derive(Debug)]
enum MemKind {
    Text(String),
    Element { tag: String },
}

#[derive(Debug)]
struct MemNode {
    kind: MemKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    attrs: IndexMap<String, Value>,
}

/// Tree-in-memory [`Document`].
pub struct MemoryDocument {
    nodes: RefCell<HashMap<NodeId, MemNode>>,
    /// Creation order, for selector walks over detached roots.
    created: RefCell<Vec<NodeId>>,
    next_id: Cell<u64>,
    frames: RefCell<Vec<Box<dyn FnOnce()>>>,
    ops: RefCell<Vec<DocOp>>,
}

impl MemoryDocument {
    pub fn new() -> Self {
        Self {
            nodes: RefCell::new(HashMap::new()),
            created: RefCell::new(Vec::new()),
            next_id: Cell::new(1),
            frames: RefCell::new(Vec::new()),
            ops: RefCell::new(Vec::new()),
        }
    }

    /// Build a document and install it as the active backend.
    pub fn install() -> Rc<MemoryDocument> {
        let doc = Rc::new(MemoryDocument::new());
        super::install(doc.clone());
        doc
    }

    fn mint(&self, kind: MemKind) -> NodeId {
        let id = NodeId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.nodes.borrow_mut().insert(
            id,
            MemNode {
                kind,
                parent: None,
                children: Vec::new(),
                attrs: IndexMap::new(),
            },
        );
        self.created.borrow_mut().push(id);
        id
    }

    fn detach(&self, node: NodeId) {
        let mut nodes = self.nodes.borrow_mut();
        let Some(parent) = nodes.get(&node).and_then(|n| n.parent) else {
            return;
        };
        if let Some(parent_node) = nodes.get_mut(&parent) {
            parent_node.children.retain(|child| *child != node);
        }
        if let Some(n) = nodes.get_mut(&node) {
            n.parent = None;
        }
    }

    fn log(&self, op: DocOp) {
        self.ops.borrow_mut().push(op);
    }

    // =========================================================================
    // Test/demo surface
    // =========================================================================

    /// Create a detached element to render into.
    pub fn create_root(&self, tag: &str) -> NodeId {
        self.create_element(tag)
    }

    /// Run every queued frame callback once; callbacks queued while running
    /// stay for the next pump. Returns how many ran.
    pub fn run_frames(&self) -> usize {
        let batch: Vec<Box<dyn FnOnce()>> = self.frames.borrow_mut().drain(..).collect();
        let count = batch.len();
        for frame in batch {
            frame();
        }
        count
    }

    /// Drain and return the operation log.
    pub fn take_ops(&self) -> Vec<DocOp> {
        self.ops.borrow_mut().drain(..).collect()
    }

    /// Concatenated text content of a subtree.
    pub fn text_of(&self, node: NodeId) -> String {
        let (own, children) = {
            let nodes = self.nodes.borrow();
            let Some(n) = nodes.get(&node) else {
                return String::new();
            };
            match &n.kind {
                MemKind::Text(text) => (Some(text.clone()), Vec::new()),
                MemKind::Element { .. } => (None, n.children.clone()),
            }
        };
        match own {
            Some(text) => text,
            None => children.iter().map(|c| self.text_of(*c)).collect(),
        }
    }

    pub fn children_of(&self, node: NodeId) -> Vec<NodeId> {
        self.nodes
            .borrow()
            .get(&node)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    pub fn tag_of(&self, node: NodeId) -> Option<String> {
        self.nodes.borrow().get(&node).and_then(|n| match &n.kind {
            MemKind::Element { tag } => Some(tag.clone()),
            MemKind::Text(_) => None,
        })
    }

    pub fn attr_of(&self, node: NodeId, name: &str) -> Option<Value> {
        self.nodes
            .borrow()
            .get(&node)
            .and_then(|n| n.attrs.get(name).cloned())
    }
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl Document for MemoryDocument {
    fn create_text(&self, text: &str) -> NodeId {
        let id = self.mint(MemKind::Text(text.to_string()));
        self.log(DocOp::CreateText(id));
        id
    }

    fn create_element(&self, tag: &str) -> NodeId {
        let id = self.mint(MemKind::Element {
            tag: tag.to_string(),
        });
        self.log(DocOp::CreateElement(id));
        id
    }

    fn is_text(&self, node: NodeId) -> bool {
        self.nodes
            .borrow()
            .get(&node)
            .map(|n| matches!(n.kind, MemKind::Text(_)))
            .unwrap_or(false)
    }

    fn set_text(&self, node: NodeId, text: &str) {
        if let Some(n) = self.nodes.borrow_mut().get_mut(&node) {
            if let MemKind::Text(current) = &mut n.kind {
                *current = text.to_string();
            }
        }
        self.log(DocOp::SetText(node));
    }

    fn query_select(&self, selector: &str) -> Option<NodeId> {
        let nodes = self.nodes.borrow();
        let by_id = selector.strip_prefix('#');
        self.created.borrow().iter().copied().find(|id| {
            let Some(node) = nodes.get(id) else {
                return false;
            };
            match (by_id, &node.kind) {
                (Some(wanted), _) => {
                    node.attrs.get("id").map(|v| v.to_string()).as_deref() == Some(wanted)
                }
                (None, MemKind::Element { tag }) => tag == selector,
                (None, MemKind::Text(_)) => false,
            }
        })
    }

    fn request_frame(&self, callback: Box<dyn FnOnce()>) {
        self.frames.borrow_mut().push(callback);
    }

    fn append(&self, parent: NodeId, child: NodeId) {
        self.detach(child);
        let mut nodes = self.nodes.borrow_mut();
        if let Some(parent_node) = nodes.get_mut(&parent) {
            parent_node.children.push(child);
        }
        if let Some(child_node) = nodes.get_mut(&child) {
            child_node.parent = Some(parent);
        }
        drop(nodes);
        self.log(DocOp::Append { parent, child });
    }

    fn insert_before(&self, node: NodeId, reference: NodeId) {
        if node == reference {
            return;
        }
        let parent = self.nodes.borrow().get(&reference).and_then(|n| n.parent);
        let Some(parent) = parent else { return };

        self.detach(node);
        let mut nodes = self.nodes.borrow_mut();
        if let Some(parent_node) = nodes.get_mut(&parent) {
            let at = parent_node
                .children
                .iter()
                .position(|c| *c == reference)
                .unwrap_or(parent_node.children.len());
            parent_node.children.insert(at, node);
        }
        if let Some(n) = nodes.get_mut(&node) {
            n.parent = Some(parent);
        }
        drop(nodes);
        self.log(DocOp::InsertBefore { node, reference });
    }

    fn remove(&self, node: NodeId) {
        self.detach(node);
        self.log(DocOp::Remove(node));
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.borrow().get(&node).and_then(|n| n.parent)
    }

    fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        let nodes = self.nodes.borrow();
        let parent = nodes.get(&node).and_then(|n| n.parent)?;
        let siblings = &nodes.get(&parent)?.children;
        let at = siblings.iter().position(|c| *c == node)?;
        siblings.get(at + 1).copied()
    }

    fn prev_sibling(&self, node: NodeId) -> Option<NodeId> {
        let nodes = self.nodes.borrow();
        let parent = nodes.get(&node).and_then(|n| n.parent)?;
        let siblings = &nodes.get(&parent)?.children;
        let at = siblings.iter().position(|c| *c == node)?;
        at.checked_sub(1).and_then(|i| siblings.get(i)).copied()
    }

    fn set_attribute(&self, node: NodeId, name: &str, value: &Value) {
        if let Some(n) = self.nodes.borrow_mut().get_mut(&node) {
            n.attrs.insert(name.to_string(), value.clone());
        }
        self.log(DocOp::SetAttribute {
            node,
            name: name.to_string(),
        });
    }

    fn remove_attribute(&self, node: NodeId, name: &str) {
        if let Some(n) = self.nodes.borrow_mut().get_mut(&node) {
            n.attrs.shift_remove(name);
        }
        self.log(DocOp::RemoveAttribute {
            node,
            name: name.to_string(),
        });
    }
}
