//! Todos demo - reactive store, keyed list, and structural fast-paths.
//!
//! Renders a todo list into the in-memory document and prints the document
//! text after each mutation, showing which operations go through the
//! structural fast-paths and which fall back to keyed reconciliation.
//!
//! Run with: cargo run --example todos

use std::rc::Rc;

use glint_ui::backend::memory::MemoryDocument;
use glint_ui::{
    create_element, for_each, render, ForProps, Prop, PropValue, Reactive, Render, Tag, Value,
};

fn main() {
    let doc = MemoryDocument::install();
    let root = doc.create_root("app");

    // Reactive state: a record holding a wrapped sequence of todos.
    let todos = Reactive::seq_from(vec!["learn glint".into(), "write demo".into()]);

    let state = Reactive::record();
    state.set("title", "todos").unwrap();

    // A native element with a reactive title attribute and a keyed list.
    let title_state = state.clone();
    let list_data = Value::from(todos.raw().clone());
    let app = create_element(
        1,
        Tag::native("section"),
        vec![Prop::new(
            "title",
            PropValue::getter(move || title_state.get(&"title".into())),
        )],
        vec![Rc::new(move || {
            for_each(ForProps {
                data: PropValue::value(list_data.clone()),
                key: Some(Rc::new(|value: &Value, _| value.clone())),
                render: Rc::new(|ctx| Render::Text(format!("[{}] ", ctx.value()))),
            })
        })],
    );
    render(app.into(), root).unwrap();
    println!("mounted:   {}", doc.text_of(root));

    // Structural fast-paths: each patches only the affected items.
    todos.push("ship it").unwrap();
    println!("push:      {}", doc.text_of(root));

    todos.move_to(2, 0).unwrap();
    println!("move_to:   {}", doc.text_of(root));

    todos.exchange(0, 2).unwrap();
    println!("exchange:  {}", doc.text_of(root));

    todos.splice(1, 1, vec!["take a break".into()]).unwrap();
    println!("splice:    {}", doc.text_of(root));

    todos.reverse().unwrap();
    println!("reverse:   {}", doc.text_of(root));

    // Arbitrary reordering: keyed reconciliation preserves the items.
    todos
        .sort_by(|a, b| a.to_string().cmp(&b.to_string()))
        .unwrap();
    println!("sort:      {}", doc.text_of(root));

    // Attribute updates coalesce through the scheduler; the frame pump is
    // the tick source.
    state.set("title", "todos (done)").unwrap();
    doc.run_frames();
    let section = doc.children_of(root)[0];
    println!(
        "title:     {}",
        doc.attr_of(section, "title").unwrap_or(Value::Unit)
    );
}
