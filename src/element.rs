//! Virtual elements.
//!
//! [`create_element`] builds a tree node from an identity id (assigned per
//! call site - the identity tag the per-item diff rule compares), a tag, a
//! property list, and a children list of thunks. Rendering an element
//! produces an [`ElementInstance`]:
//!
//! - **component**: a reactive props record assembled by one task per
//!   property, and a scheduler-bound main task that runs the component
//!   function and diffs the result in place;
//! - **native**: a document element, one task per property binding the
//!   attribute (with a removal disposer), children rendered as a live
//!   fragment;
//! - **fragment**: per-child tasks - first run pushes, later runs diff their
//!   slot in place.
//!
//! Dynamic content flows through child thunks and property getters: their
//! tasks re-run individually, so a text change never re-instantiates the
//! element around it.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::backend::{self, NodeId, Position};
use crate::error::Error;
use crate::render::{
    append_output, diff_output, format, insert_output, node_position, position_of, render_output,
    unmount_output, Output, OutputList, Render,
};
use crate::store::Reactive;
use crate::task::{Cleanup, Task, TaskOptions};
use crate::value::{Key, Str, Value};

/// Component function: props record in, render result out.
pub type ComponentFn = Rc<dyn Fn(&Reactive) -> Render>;

/// Child thunk, re-evaluated by its own task.
pub type ChildFn = Rc<dyn Fn() -> Render>;

#[derive(Clone)]
pub enum Tag {
    Native(Str),
    Component(ComponentFn),
    Fragment,
}

impl Tag {
    pub fn native(name: &str) -> Tag {
        Tag::Native(Rc::from(name))
    }

    pub fn component(f: impl Fn(&Reactive) -> Render + 'static) -> Tag {
        Tag::Component(Rc::new(f))
    }
}

/// A property value: static, or a getter re-evaluated reactively.
#[derive(Clone)]
pub enum PropValue {
    Static(Value),
    Getter(Rc<dyn Fn() -> Value>),
}

impl PropValue {
    pub fn value(value: impl Into<Value>) -> PropValue {
        PropValue::Static(value.into())
    }

    pub fn getter(f: impl Fn() -> Value + 'static) -> PropValue {
        PropValue::Getter(Rc::new(f))
    }

    /// Current value. Reading a getter inside a task run tracks its
    /// dependencies against that task.
    pub fn get(&self) -> Value {
        match self {
            PropValue::Static(value) => value.clone(),
            PropValue::Getter(f) => f(),
        }
    }
}

#[derive(Clone)]
pub struct Prop {
    pub name: Str,
    pub value: PropValue,
}

impl Prop {
    pub fn new(name: &str, value: PropValue) -> Prop {
        Prop {
            name: Rc::from(name),
            value,
        }
    }
}

/// A virtual tree node, cheap to clone.
#[derive(Clone)]
pub struct Element {
    id: u64,
    tag: Tag,
    props: Vec<Prop>,
    children: Vec<ChildFn>,
}

/// Factory for a tree node. `id` is the element's identity tag: instances
/// with equal ids are considered the same component across reconciliation.
pub fn create_element(id: u64, tag: Tag, props: Vec<Prop>, children: Vec<ChildFn>) -> Element {
    Element {
        id,
        tag,
        props,
        children,
    }
}

// =============================================================================
// Element instances
// =============================================================================

/// One rendered element.
pub struct ElementInstance {
    element: Element,
    rendered: Cell<bool>,
    main_task: RefCell<Option<Task>>,
    render_result: RefCell<Option<Output>>,
    children_result: RefCell<Option<Rc<OutputList>>>,
    native: Cell<Option<NodeId>>,
}

impl ElementInstance {
    pub(crate) fn new(element: Element) -> Self {
        Self {
            element,
            rendered: Cell::new(false),
            main_task: RefCell::new(None),
            render_result: RefCell::new(None),
            children_result: RefCell::new(None),
            native: Cell::new(None),
        }
    }

    /// The identity tag assigned at the element's creation site.
    pub fn identity(&self) -> u64 {
        self.element.id
    }

    /// Instantiate tasks and document nodes. Idempotent.
    pub fn render(instance: &Rc<Self>) {
        if instance.rendered.replace(true) {
            return;
        }
        match instance.element.tag.clone() {
            Tag::Component(component) => Self::render_component(instance, component),
            Tag::Native(tag) => Self::render_native(instance, &tag),
            Tag::Fragment => {
                let main = Task::new(|_| None, TaskOptions::default());
                Self::render_fragment(instance, &main);
                *instance.main_task.borrow_mut() = Some(main);
            }
        }
    }

    fn render_component(instance: &Rc<Self>, component: ComponentFn) {
        let main = Task::new(
            |_| None,
            TaskOptions {
                auto_run: false,
                name: Some("component"),
                ..Default::default()
            },
        );
        let props = build_props(&instance.element, &main);

        let owner = instance.clone();
        let body = Task::new(
            move |_| {
                let fresh = format(component(&props));
                let merged = {
                    let previous = owner.render_result.borrow();
                    diff_output(previous.as_ref(), fresh)
                };
                *owner.render_result.borrow_mut() = Some(merged);
                None
            },
            TaskOptions {
                name: Some("component-body"),
                ..Default::default()
            },
        );
        body.bind_scheduler(None);
        main.add_child(&body);
        *instance.main_task.borrow_mut() = Some(main);
    }

    fn render_native(instance: &Rc<Self>, tag: &str) {
        let node = backend::document().create_element(tag);
        instance.native.set(Some(node));

        let main = Task::new(
            |_| None,
            TaskOptions {
                auto_run: false,
                name: Some("native"),
                ..Default::default()
            },
        );
        let props = build_props(&instance.element, &main);

        // One attribute task per property; the disposer drops the attribute
        // so a re-run rebinds it and unmount clears it.
        for prop in &instance.element.props {
            let name = prop.name.clone();
            let record = props.clone();
            let attr = Task::new(
                move |_| {
                    let value = record.get(&Key::Field(name.clone()));
                    backend::document().set_attribute(node, &name, &value);
                    let cleanup_name = name.clone();
                    Some(Box::new(move || {
                        backend::document().remove_attribute(node, &cleanup_name);
                    }) as Cleanup)
                },
                TaskOptions {
                    name: Some("attribute"),
                    ..Default::default()
                },
            );
            attr.bind_scheduler(None);
            main.add_child(&attr);
        }

        Self::render_fragment(instance, &main);
        if let Some(children) = instance.children_result.borrow().as_ref() {
            append_output(&Output::Many(children.clone()), node);
        }
        *instance.main_task.borrow_mut() = Some(main);
    }

    fn render_fragment(instance: &Rc<Self>, main: &Task) {
        let list = OutputList::empty();
        for (index, child) in instance.element.children.iter().enumerate() {
            let child_fn = child.clone();
            let slot = list.clone();
            let unmount_slot = list.clone();
            let task = Task::new(
                move |ctx| {
                    if ctx.first_run() {
                        let output = format(child_fn());
                        render_output(&output);
                        slot.push(output);
                    } else {
                        let previous = slot.get(index);
                        let merged = diff_output(previous.as_ref(), format(child_fn()));
                        slot.set(index, merged);
                    }
                    None
                },
                TaskOptions {
                    name: Some("child"),
                    on_stopped: Some(Box::new(move || {
                        if let Some(output) = unmount_slot.get(index) {
                            unmount_output(&output);
                        }
                    })),
                    ..Default::default()
                },
            );
            task.bind_scheduler(None);
            main.add_child(&task);
        }
        *instance.children_result.borrow_mut() = Some(list);
    }

    pub fn append_to(&self, target: NodeId) {
        match (&self.element.tag, self.native.get()) {
            (Tag::Native(_), Some(node)) => backend::document().append(target, node),
            (Tag::Component(_), _) => {
                if let Some(result) = self.render_result.borrow().as_ref() {
                    append_output(result, target);
                }
            }
            _ => {
                if let Some(children) = self.children_result.borrow().as_ref() {
                    append_output(&Output::Many(children.clone()), target);
                }
            }
        }
    }

    pub fn insert_into(&self, position: &Position) {
        match (&self.element.tag, self.native.get()) {
            (Tag::Native(_), Some(node)) => backend::insert_at(node, position),
            (Tag::Component(_), _) => {
                if let Some(result) = self.render_result.borrow().as_ref() {
                    insert_output(result, position);
                }
            }
            _ => {
                if let Some(children) = self.children_result.borrow().as_ref() {
                    insert_output(&Output::Many(children.clone()), position);
                }
            }
        }
    }

    pub fn position(&self, after: bool) -> Position {
        match (&self.element.tag, self.native.get()) {
            (Tag::Native(_), Some(node)) => node_position(node, after),
            (Tag::Component(_), _) => self
                .render_result
                .borrow()
                .as_ref()
                .map(|result| position_of(result, after))
                .unwrap_or_default(),
            _ => self
                .children_result
                .borrow()
                .as_ref()
                .map(|children| position_of(&Output::Many(children.clone()), after))
                .unwrap_or_default(),
        }
    }

    /// Stop every owned task and detach from the document; returns the
    /// vacated position.
    pub fn unmount(&self) -> Position {
        let position = self.position(true);
        if let Some(main) = self.main_task.borrow_mut().take() {
            main.stop();
        }
        match (&self.element.tag, self.native.get()) {
            (Tag::Native(_), Some(node)) => {
                backend::document().remove(node);
            }
            (Tag::Component(_), _) => {
                if let Some(result) = self.render_result.borrow_mut().take() {
                    unmount_output(&result);
                }
            }
            _ => {
                // Child tasks unmounted their slots on stop; only an empty
                // list's placeholder can remain.
                if let Some(children) = self.children_result.borrow_mut().take() {
                    if children.is_empty() {
                        let _ = children.drop_placeholder();
                    }
                }
            }
        }
        position
    }
}

/// Assemble the reactive props record: statics write once, getters get one
/// task each (owned by `owner`) re-running on dependency change.
fn build_props(element: &Element, owner: &Task) -> Reactive {
    let record = Reactive::record();
    for prop in &element.props {
        match &prop.value {
            PropValue::Static(value) => {
                if let Some(raw) = record.raw().as_record() {
                    raw.insert(prop.name.clone(), value.clone());
                }
            }
            PropValue::Getter(getter) => {
                let target = record.clone();
                let name = prop.name.clone();
                let getter = getter.clone();
                let task = Task::new(
                    move |_| {
                        let _ = target.set(Key::Field(name.clone()), getter());
                        None
                    },
                    TaskOptions {
                        name: Some("prop"),
                        ..Default::default()
                    },
                );
                owner.add_child(&task);
            }
        }
    }
    record
}

// =============================================================================
// Render entry point
// =============================================================================

/// Where `render` mounts its output.
pub enum MountTarget {
    Node(NodeId),
    Selector(String),
}

impl From<NodeId> for MountTarget {
    fn from(node: NodeId) -> Self {
        MountTarget::Node(node)
    }
}

impl From<&str> for MountTarget {
    fn from(selector: &str) -> Self {
        MountTarget::Selector(selector.to_string())
    }
}

impl From<String> for MountTarget {
    fn from(selector: String) -> Self {
        MountTarget::Selector(selector)
    }
}

/// Format, render, and append a root result into the document.
///
/// Fails with [`Error::TargetNotFound`] when no document is installed or the
/// selector matches nothing. Returns the mounted output; unmounting it tears
/// the whole tree down.
pub fn render(root: Render, target: impl Into<MountTarget>) -> Result<Output, Error> {
    if !backend::installed() {
        return Err(Error::TargetNotFound);
    }
    let node = match target.into() {
        MountTarget::Node(node) => node,
        MountTarget::Selector(selector) => backend::document()
            .query_select(&selector)
            .ok_or(Error::TargetNotFound)?,
    };
    let output = format(root);
    render_output(&output);
    append_output(&output, node);
    Ok(output)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryDocument;

    #[test]
    fn test_native_element_with_static_attribute() {
        let doc = MemoryDocument::install();
        let root = doc.create_root("app");

        let element = create_element(
            1,
            Tag::native("div"),
            vec![Prop::new("id", PropValue::value("main"))],
            vec![Rc::new(|| "hello".into())],
        );
        render(element.into(), root).unwrap();

        let div = doc.children_of(root)[0];
        assert_eq!(doc.tag_of(div), Some("div".to_string()));
        assert_eq!(doc.attr_of(div, "id"), Some("main".into()));
        assert_eq!(doc.text_of(root), "hello");
    }

    #[test]
    fn test_getter_attribute_rebinds_on_change() {
        let doc = MemoryDocument::install();
        let root = doc.create_root("app");

        let state = Reactive::record();
        state.set("class", "cold").unwrap();

        let s = state.clone();
        let element = create_element(
            1,
            Tag::native("div"),
            vec![Prop::new(
                "class",
                PropValue::getter(move || s.get(&"class".into())),
            )],
            vec![],
        );
        render(element.into(), root).unwrap();

        let div = doc.children_of(root)[0];
        assert_eq!(doc.attr_of(div, "class"), Some("cold".into()));

        state.set("class", "hot").unwrap();
        doc.run_frames();
        assert_eq!(doc.attr_of(div, "class"), Some("hot".into()));
    }

    #[test]
    fn test_child_thunk_updates_in_place() {
        let doc = MemoryDocument::install();
        let root = doc.create_root("app");

        let state = Reactive::record();
        state.set("n", 1).unwrap();

        let s = state.clone();
        let element = create_element(
            1,
            Tag::Fragment,
            vec![],
            vec![
                Rc::new(|| "n=".into()),
                Rc::new(move || s.get(&"n".into()).to_string().into()),
            ],
        );
        render(element.into(), root).unwrap();
        assert_eq!(doc.text_of(root), "n=1");

        state.set("n", 2).unwrap();
        assert_eq!(doc.text_of(root), "n=1", "update is deferred to the flush");
        doc.run_frames();
        assert_eq!(doc.text_of(root), "n=2");
    }

    #[test]
    fn test_component_props_flow() {
        let doc = MemoryDocument::install();
        let root = doc.create_root("app");

        let state = Reactive::record();
        state.set("who", "world").unwrap();

        let component = Tag::component(|props: &Reactive| {
            let props = props.clone();
            Render::Element(create_element(
                2,
                Tag::Fragment,
                vec![],
                vec![Rc::new(move || {
                    format!("hello {}", props.get(&"who".into())).into()
                })],
            ))
        });

        let s = state.clone();
        let element = create_element(
            1,
            component,
            vec![Prop::new(
                "who",
                PropValue::getter(move || s.get(&"who".into())),
            )],
            vec![],
        );
        render(element.into(), root).unwrap();
        assert_eq!(doc.text_of(root), "hello world");

        state.set("who", "glint").unwrap();
        doc.run_frames();
        assert_eq!(doc.text_of(root), "hello glint");
    }

    #[test]
    fn test_unmount_tears_down_and_clears_attributes() {
        let doc = MemoryDocument::install();
        let root = doc.create_root("app");

        let element = create_element(
            1,
            Tag::native("div"),
            vec![Prop::new("id", PropValue::value("gone"))],
            vec![Rc::new(|| "content".into())],
        );
        let output = render(element.into(), root).unwrap();

        let position = unmount_output(&output);
        assert_eq!(doc.text_of(root), "");
        assert!(doc.children_of(root).is_empty());
        assert_eq!(position.parent, Some(root));
    }
}
