//! Rendered output model.
//!
//! User code produces [`Render`] values (text, virtual elements, nested
//! lists); [`format`] normalizes them into [`Output`] - document text
//! leaves, element instances, and live output lists. Formatting does not
//! touch the document tree beyond creating leaves; [`render_output`] runs
//! element instances, and the mount helpers move formatted output around by
//! captured [`Position`]s.
//!
//! An empty [`OutputList`] owns an empty text leaf as placeholder so the
//! list keeps a stable slot in the document while it has no items.

pub mod reconcile;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::backend::{self, NodeId, Position};
use crate::element::{Element, ElementInstance};
use crate::value::Value;

/// What user render functions return.
pub enum Render {
    Null,
    Text(String),
    Element(Element),
    Many(Vec<Render>),
    /// Already-formatted output (the live list mechanism hands these out).
    Live(Output),
}

impl From<&str> for Render {
    fn from(s: &str) -> Self {
        Render::Text(s.to_string())
    }
}

impl From<String> for Render {
    fn from(s: String) -> Self {
        Render::Text(s)
    }
}

impl From<i64> for Render {
    fn from(i: i64) -> Self {
        Render::Text(i.to_string())
    }
}

impl From<Value> for Render {
    fn from(v: Value) -> Self {
        Render::Text(v.to_string())
    }
}

impl From<Element> for Render {
    fn from(element: Element) -> Self {
        Render::Element(element)
    }
}

impl From<Vec<Render>> for Render {
    fn from(children: Vec<Render>) -> Self {
        Render::Many(children)
    }
}

/// Formatted output: only text leaves, element instances, and lists remain.
#[derive(Clone)]
pub enum Output {
    Text(NodeId),
    Element(Rc<ElementInstance>),
    Many(Rc<OutputList>),
}

impl Output {
    /// Same formatted object (not merely equal content).
    pub fn same(&self, other: &Output) -> bool {
        match (self, other) {
            (Output::Text(a), Output::Text(b)) => a == b,
            (Output::Element(a), Output::Element(b)) => Rc::ptr_eq(a, b),
            (Output::Many(a), Output::Many(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Output::Text(id) => f.debug_tuple("Text").field(id).finish(),
            Output::Element(_) => f.write_str("Element"),
            Output::Many(_) => f.write_str("Many"),
        }
    }
}

/// A live, mutable list of outputs (fragment children, list views).
pub struct OutputList {
    items: RefCell<Vec<Output>>,
    placeholder: Cell<Option<NodeId>>,
}

impl OutputList {
    pub fn new(items: Vec<Output>) -> Rc<Self> {
        Rc::new(Self {
            items: RefCell::new(items),
            placeholder: Cell::new(None),
        })
    }

    pub fn empty() -> Rc<Self> {
        Self::new(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Output> {
        self.items.borrow().get(index).cloned()
    }

    pub fn set(&self, index: usize, output: Output) {
        self.items.borrow_mut()[index] = output;
    }

    pub fn push(&self, output: Output) {
        self.items.borrow_mut().push(output);
    }

    pub fn pop(&self) -> Option<Output> {
        self.items.borrow_mut().pop()
    }

    pub fn insert(&self, index: usize, output: Output) {
        self.items.borrow_mut().insert(index, output);
    }

    pub fn remove(&self, index: usize) -> Output {
        self.items.borrow_mut().remove(index)
    }

    pub fn reverse(&self) {
        self.items.borrow_mut().reverse();
    }

    pub fn swap(&self, a: usize, b: usize) {
        self.items.borrow_mut().swap(a, b);
    }

    pub fn splice(&self, start: usize, removed: usize, inserts: Vec<Output>) -> Vec<Output> {
        let mut items = self.items.borrow_mut();
        let len = items.len();
        let end = (start + removed).min(len);
        items.splice(start.min(len)..end, inserts).collect()
    }

    pub fn snapshot(&self) -> Vec<Output> {
        self.items.borrow().clone()
    }

    pub fn replace(&self, items: Vec<Output>) {
        *self.items.borrow_mut() = items;
    }

    /// The empty-list placeholder leaf, created on demand.
    pub(crate) fn ensure_placeholder(&self) -> NodeId {
        if let Some(node) = self.placeholder.get() {
            return node;
        }
        let node = backend::document().create_text("");
        self.placeholder.set(Some(node));
        node
    }

    /// Remove a mounted placeholder from the document, returning its
    /// vacated position.
    pub(crate) fn drop_placeholder(&self) -> Option<Position> {
        let node = self.placeholder.take()?;
        let doc = backend::document();
        let position = Position {
            parent: doc.parent(node),
            next_sibling: doc.next_sibling(node),
        };
        doc.remove(node);
        Some(position)
    }
}

// =============================================================================
// Formatting and mounting
// =============================================================================

/// Normalize a user result into formatted output. Creates text leaves but
/// does not run element instances - see [`render_output`].
pub fn format(render: Render) -> Output {
    match render {
        Render::Null => Output::Text(backend::document().create_text("")),
        Render::Text(text) => Output::Text(backend::document().create_text(&text)),
        Render::Element(element) => Output::Element(Rc::new(ElementInstance::new(element))),
        Render::Many(children) => {
            Output::Many(OutputList::new(children.into_iter().map(format).collect()))
        }
        Render::Live(output) => output,
    }
}

/// Run element instances so their document nodes exist.
pub fn render_output(output: &Output) {
    match output {
        Output::Text(_) => {}
        Output::Element(instance) => ElementInstance::render(instance),
        Output::Many(list) => {
            for item in list.snapshot() {
                render_output(&item);
            }
        }
    }
}

/// Append rendered output under `target`.
pub fn append_output(output: &Output, target: NodeId) {
    match output {
        Output::Text(node) => backend::document().append(target, *node),
        Output::Element(instance) => instance.append_to(target),
        Output::Many(list) => {
            if list.is_empty() {
                let placeholder = list.ensure_placeholder();
                backend::document().append(target, placeholder);
            } else {
                for item in list.snapshot() {
                    append_output(&item, target);
                }
            }
        }
    }
}

/// The document slot just after (`after = true`) or at (`after = false`)
/// this output.
pub fn position_of(output: &Output, after: bool) -> Position {
    match output {
        Output::Text(node) => node_position(*node, after),
        Output::Element(instance) => instance.position(after),
        Output::Many(list) => {
            if list.is_empty() {
                match list.placeholder.get() {
                    Some(node) => node_position(node, after),
                    None => Position::default(),
                }
            } else {
                let items = list.items.borrow();
                let item = if after {
                    items.last()
                } else {
                    items.first()
                };
                let item = item.cloned();
                drop(items);
                match item {
                    Some(item) => position_of(&item, after),
                    None => Position::default(),
                }
            }
        }
    }
}

pub(crate) fn node_position(node: NodeId, after: bool) -> Position {
    let doc = backend::document();
    if after {
        Position {
            parent: doc.parent(node),
            next_sibling: doc.next_sibling(node),
        }
    } else {
        Position {
            parent: doc.parent(node),
            next_sibling: Some(node),
        }
    }
}

/// Mount rendered output at a captured position.
pub fn insert_output(output: &Output, position: &Position) {
    match output {
        Output::Text(node) => backend::insert_at(*node, position),
        Output::Element(instance) => instance.insert_into(position),
        Output::Many(list) => {
            if list.is_empty() {
                let placeholder = list.ensure_placeholder();
                backend::insert_at(placeholder, position);
            } else {
                for item in list.snapshot() {
                    insert_output(&item, position);
                }
            }
        }
    }
}

/// Unmount output from the document, returning the vacated position.
pub fn unmount_output(output: &Output) -> Position {
    match output {
        Output::Text(node) => {
            let position = node_position(*node, true);
            backend::document().remove(*node);
            position
        }
        Output::Element(instance) => instance.unmount(),
        Output::Many(list) => {
            if list.is_empty() {
                return list.drop_placeholder().unwrap_or_default();
            }
            // Anchor past the last item: everything before it is going away.
            let position = position_of(output, true);
            for item in list.snapshot() {
                unmount_output(&item);
            }
            position
        }
    }
}

/// Per-item reconciliation rule.
///
/// Two outputs are the "same instance" only when both are element instances
/// carrying equal identity tags; then the old instance is kept (the fresh
/// one is dropped unrendered). Otherwise the old output is unmounted and the
/// new one rendered into its place.
pub fn diff_output(old: Option<&Output>, new: Output) -> Output {
    let Some(old) = old else {
        render_output(&new);
        return new;
    };
    if old.same(&new) {
        return new;
    }
    if let (Output::Element(previous), Output::Element(fresh)) = (old, &new) {
        if previous.identity() == fresh.identity() {
            return old.clone();
        }
    }
    let position = unmount_output(old);
    render_output(&new);
    insert_output(&new, &position);
    new
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryDocument;
    use crate::element::{create_element, Tag};

    #[test]
    fn test_format_text_variants() {
        let doc = MemoryDocument::install();
        let root = doc.create_root("div");

        let out = format(Render::Many(vec![
            "a".into(),
            Render::Null,
            Render::Text("b".to_string()),
            7i64.into(),
        ]));
        render_output(&out);
        append_output(&out, root);

        assert_eq!(doc.text_of(root), "ab7");
    }

    #[test]
    fn test_empty_list_placeholder_keeps_slot() {
        let doc = MemoryDocument::install();
        let root = doc.create_root("div");

        let before = format(Render::Text("x".into()));
        let empty = format(Render::Many(vec![]));
        let after = format(Render::Text("y".into()));
        for out in [&before, &empty, &after] {
            render_output(out);
            append_output(out, root);
        }

        // Placeholder sits between the text leaves.
        let children = doc.children_of(root);
        assert_eq!(children.len(), 3);
        assert_eq!(doc.text_of(root), "xy");

        // Its position anchors inserts where the list lives.
        let position = position_of(&empty, false);
        assert_eq!(position.next_sibling, Some(children[1]));
    }

    #[test]
    fn test_unmount_captures_position() {
        let doc = MemoryDocument::install();
        let root = doc.create_root("div");

        let out = format(Render::Many(vec!["a".into(), "b".into(), "c".into()]));
        render_output(&out);
        append_output(&out, root);

        let Output::Many(list) = &out else {
            panic!("expected list output")
        };
        let middle = list.get(1).unwrap();
        let position = unmount_output(&middle);
        assert_eq!(doc.text_of(root), "ac");

        let replacement = format(Render::Text("B".into()));
        insert_output(&replacement, &position);
        assert_eq!(doc.text_of(root), "aBc");
    }

    #[test]
    fn test_diff_keeps_equal_identity_instances() {
        let doc = MemoryDocument::install();
        let root = doc.create_root("div");

        let old = format(Render::Element(create_element(
            7,
            Tag::native("span"),
            vec![],
            vec![],
        )));
        render_output(&old);
        append_output(&old, root);

        let fresh = format(Render::Element(create_element(
            7,
            Tag::native("span"),
            vec![],
            vec![],
        )));
        let merged = diff_output(Some(&old), fresh);
        assert!(merged.same(&old), "equal identity keeps the old instance");

        let replaced = diff_output(
            Some(&merged),
            format(Render::Element(create_element(
                8,
                Tag::native("b"),
                vec![],
                vec![],
            ))),
        );
        assert!(!replaced.same(&merged));
        assert_eq!(doc.children_of(root).len(), 1);
        assert_eq!(doc.tag_of(doc.children_of(root)[0]), Some("b".to_string()));
    }
}
