//! Render-target abstraction.
//!
//! The core never touches a concrete output technology: it drives an
//! installed [`Document`] - create text leaves and tagged elements, query,
//! tree surgery, attributes, and a deferred frame callback that the
//! scheduler uses as its tick source. [`memory::MemoryDocument`] is the
//! in-crate implementation used by tests and demos.

pub mod memory;

use std::cell::RefCell;
use std::rc::Rc;

use crate::value::Value;

/// Opaque document-minted node handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u64);

/// A slot in the document tree: insert before `next_sibling`, or append to
/// `parent` when there is no next sibling. A detached position inserts
/// nowhere.
#[derive(Debug, Clone, Default)]
pub struct Position {
    pub parent: Option<NodeId>,
    pub next_sibling: Option<NodeId>,
}

/// The render-target collaborator.
pub trait Document {
    fn create_text(&self, text: &str) -> NodeId;
    fn create_element(&self, tag: &str) -> NodeId;
    fn is_text(&self, node: NodeId) -> bool;
    fn set_text(&self, node: NodeId, text: &str);

    /// Resolve a selector: `#name` matches an `id` attribute, anything else
    /// matches a tag name.
    fn query_select(&self, selector: &str) -> Option<NodeId>;

    /// Schedule a callback for the next paint/tick.
    fn request_frame(&self, callback: Box<dyn FnOnce()>);

    fn append(&self, parent: NodeId, child: NodeId);
    /// Insert `node` immediately before `reference` (under `reference`'s
    /// parent). Inserting a node before itself is a no-op.
    fn insert_before(&self, node: NodeId, reference: NodeId);
    fn remove(&self, node: NodeId);

    fn parent(&self, node: NodeId) -> Option<NodeId>;
    fn next_sibling(&self, node: NodeId) -> Option<NodeId>;
    fn prev_sibling(&self, node: NodeId) -> Option<NodeId>;

    fn set_attribute(&self, node: NodeId, name: &str, value: &Value);
    fn remove_attribute(&self, node: NodeId, name: &str);
}

thread_local! {
    static DOCUMENT: RefCell<Option<Rc<dyn Document>>> = RefCell::new(None);
}

/// Install the active document backend (the rendering entry points require
/// one).
pub fn install(document: Rc<dyn Document>) {
    DOCUMENT.with(|slot| *slot.borrow_mut() = Some(document));
}

pub fn installed() -> bool {
    DOCUMENT.with(|slot| slot.borrow().is_some())
}

/// The active document.
///
/// Panics when none is installed; `render` guards the entry, so internal
/// render paths only run with a document present.
pub(crate) fn document() -> Rc<dyn Document> {
    DOCUMENT.with(|slot| {
        slot.borrow()
            .clone()
            .expect("no document backend installed; call backend::install first")
    })
}

/// Forward a frame request to the installed document; without one the
/// request is dropped (and the flush it would have driven never happens).
pub(crate) fn request_frame(callback: Box<dyn FnOnce()>) {
    let doc = DOCUMENT.with(|slot| slot.borrow().clone());
    match doc {
        Some(doc) => doc.request_frame(callback),
        None => tracing::warn!("frame requested with no document installed; dropped"),
    }
}

/// Mount `node` at `position`.
pub(crate) fn insert_at(node: NodeId, position: &Position) {
    let doc = document();
    if let Some(reference) = position.next_sibling {
        doc.insert_before(node, reference);
    } else if let Some(parent) = position.parent {
        doc.append(parent, node);
    }
}
