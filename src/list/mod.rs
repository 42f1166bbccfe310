//! Keyed list rendering.
//!
//! [`for_each`] renders one item per element of a wrapped sequence and keeps
//! the document in sync through structural fast-paths: push/pop/shift/
//! unshift/splice/reverse/move_to/exchange each patch only the affected
//! items and re-index only the affected span. `sort_by` and wholesale `data`
//! replacement are arbitrary reorderings, so they fall back to the generic
//! keyed reconciler (preserving the computations of surviving keys).
//!
//! # Per-item computation split
//!
//! Every item owns two computations. The *value task* projects "current
//! value at my index" out of the backing sequence and re-runs only when its
//! specific index slot fires. The *render task* produces output from the
//! projected value and index. Re-indexing after a structural mutation
//! changes "index" but not "value", so the value task re-runs, writes the
//! same value back, and the render task stays idle unless the render body
//! actually read the index.
//!
//! Item render functions see a read-only projected record (`value`/`index`)
//! backed by a store read transform; assigning to either field is a loud
//! usage error.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::backend::Position;
use crate::element::PropValue;
use crate::render::reconcile::{reconcile, Keyed};
use crate::render::{
    diff_output, format, insert_output, position_of, render_output, unmount_output, Output,
    OutputList, Render,
};
use crate::store::{self, Reactive, SeqEvent};
use crate::task::{Task, TaskOptions, UpdatePolicy};
use crate::value::{AggregateId, Key, Value};

/// Key accessor: `(value, index) -> reconciliation key`.
pub type KeyFn = Rc<dyn Fn(&Value, usize) -> Value>;

/// Item render function.
pub type ItemRender = Rc<dyn Fn(&ItemCtx) -> Render>;

/// Inputs to [`for_each`].
pub struct ForProps {
    /// Must resolve to a wrapped sequence; use a getter to allow wholesale
    /// replacement (replacement reconciles by key).
    pub data: PropValue,
    /// Without a key accessor items never match across reconciliations and
    /// are rebuilt.
    pub key: Option<KeyFn>,
    pub render: ItemRender,
}

/// What an item render function receives.
pub struct ItemCtx {
    props: Reactive,
}

impl ItemCtx {
    /// The read-only projected record carrying `value` and `index`.
    pub fn props(&self) -> &Reactive {
        &self.props
    }

    /// Current value at this item's index (tracked).
    pub fn value(&self) -> Value {
        self.props.get(&"value".into())
    }

    /// Current index of this item (tracked; reading it makes the output
    /// re-render on re-indexing).
    pub fn index(&self) -> usize {
        self.props.get(&"index".into()).as_int().unwrap_or(0) as usize
    }
}

// =============================================================================
// Shared list state
// =============================================================================

#[derive(Clone)]
struct Projection {
    value_cell: Reactive,
    index_cell: Reactive,
}

struct ListShared {
    data: RefCell<Option<Reactive>>,
    items: RefCell<Vec<ItemState>>,
    outputs: Rc<OutputList>,
    /// Projected-record id -> backing cells, consulted by the read transform.
    projections: Rc<RefCell<HashMap<AggregateId, Projection>>>,
    key_fn: Option<KeyFn>,
    render_fn: ItemRender,
}

struct ItemState {
    index_cell: Reactive,
    proj: Reactive,
    value_task: Task,
    render_task: Task,
    slot: Rc<RefCell<Option<Output>>>,
    key: Option<Value>,
}

fn raw_index(index_cell: &Reactive) -> usize {
    index_cell
        .raw()
        .as_record()
        .and_then(|r| r.get("value"))
        .and_then(|v| v.as_int())
        .unwrap_or(0) as usize
}

impl ItemState {
    fn new(shared: &Rc<ListShared>, index: usize, key: Option<Value>) -> ItemState {
        let value_cell = Reactive::record();
        let index_cell = Reactive::record();
        if let Some(raw) = index_cell.raw().as_record() {
            raw.insert(Rc::from("value"), Value::from(index));
        }

        let proj = Reactive::projected();
        shared.projections.borrow_mut().insert(
            proj.id(),
            Projection {
                value_cell: value_cell.clone(),
                index_cell: index_cell.clone(),
            },
        );

        // Value projection: re-runs only when the slot it currently occupies
        // fires (or its own index cell does), keeping sibling changes out.
        let policy_index = index_cell.clone();
        let policy_shared = shared.clone();
        let body_index = index_cell.clone();
        let body_shared = shared.clone();
        let value_task = Task::new(
            move |_| {
                let index = body_index.get(&"value".into()).as_int().unwrap_or(0) as usize;
                let data = body_shared.data.borrow().clone();
                if let Some(data) = data {
                    let value = data.get(&Key::Index(index));
                    let _ = value_cell.set("value", value);
                }
                None
            },
            TaskOptions {
                name: Some("item-value"),
                policy: UpdatePolicy::Custom(Rc::new(move |reasons| {
                    let current = raw_index(&policy_index);
                    let data_id = policy_shared.data.borrow().as_ref().map(Reactive::id);
                    reasons.iter().any(|r| {
                        r.target == policy_index.id()
                            || (Some(r.target) == data_id && r.key == Key::Index(current))
                    })
                })),
                ..Default::default()
            },
        );

        // Render: depends on whatever the render body read through the
        // projected record; updates its output slot in place on re-runs.
        let slot: Rc<RefCell<Option<Output>>> = Rc::new(RefCell::new(None));
        let render_slot = slot.clone();
        let render_shared = shared.clone();
        let render_proj = proj.clone();
        let render_index = index_cell.clone();
        let render_task = Task::new(
            move |ctx| {
                let item_ctx = ItemCtx {
                    props: render_proj.clone(),
                };
                let fresh = format((render_shared.render_fn)(&item_ctx));
                if ctx.first_run() {
                    *render_slot.borrow_mut() = Some(fresh);
                } else {
                    let index = raw_index(&render_index);
                    let previous = render_shared.outputs.get(index);
                    let merged = diff_output(previous.as_ref(), fresh);
                    if index < render_shared.outputs.len() {
                        render_shared.outputs.set(index, merged.clone());
                    }
                    *render_slot.borrow_mut() = Some(merged);
                }
                None
            },
            TaskOptions {
                name: Some("item-render"),
                ..Default::default()
            },
        );

        ItemState {
            index_cell,
            proj,
            value_task,
            render_task,
            slot,
            key,
        }
    }

    fn output(&self) -> Output {
        self.slot
            .borrow()
            .clone()
            .unwrap_or_else(|| format(Render::Null))
    }

    fn stop(&self, shared: &ListShared) {
        self.value_task.stop();
        self.render_task.stop();
        shared.projections.borrow_mut().remove(&self.proj.id());
    }
}

// =============================================================================
// for_each
// =============================================================================

/// Render a wrapped sequence as a live keyed list.
///
/// The returned output is owned by a root task appended to the currently
/// active computation, so unmounting the surrounding element tears the list
/// down. Duplicate non-null keys in one reconciliation snapshot are a
/// consistency error and panic (fail fast).
pub fn for_each(props: ForProps) -> Render {
    let ForProps { data, key, render } = props;

    let outputs = OutputList::empty();
    let shared = Rc::new(ListShared {
        data: RefCell::new(None),
        items: RefCell::new(Vec::new()),
        outputs: outputs.clone(),
        projections: Rc::new(RefCell::new(HashMap::new())),
        key_fn: key,
        render_fn: render,
    });

    // One read transform per list: reads of any of this list's projected
    // records route to the item's value/index cells (tracked).
    let projections = shared.projections.clone();
    let transform_cleanup = store::add_read_transform(move |value, target, key| {
        let projection = projections.borrow().get(&target.id()).cloned();
        let Some(projection) = projection else {
            return value;
        };
        match key {
            Key::Field(name) if &**name == "value" => projection.value_cell.get(&"value".into()),
            Key::Field(name) if &**name == "index" => projection.index_cell.get(&"value".into()),
            _ => value,
        }
    });

    let body_shared = shared.clone();
    let stop_shared = shared.clone();
    let _root = Task::new(
        move |ctx| {
            let value = data.get();
            let wrapper = store::try_wrap(&value)
                .filter(|w| w.raw().as_seq().is_some())
                .unwrap_or_else(|| panic!("for_each: data is not a sequence"));

            let replaced = {
                let mut slot = body_shared.data.borrow_mut();
                let changed = slot.as_ref().map(Reactive::id) != Some(wrapper.id());
                *slot = Some(wrapper.clone());
                changed
            };
            if ctx.first_run() {
                build_initial(&body_shared);
            } else if replaced {
                reconcile_items(&body_shared);
            }

            let sync = body_shared.clone();
            let unsubscribe = store::on_seq_event(&wrapper, move |event| {
                apply_seq_event(&sync, event);
            });
            Some(unsubscribe)
        },
        TaskOptions {
            auto_append_parent: true,
            name: Some("for_each"),
            on_stopped: Some(Box::new(move || {
                let items = std::mem::take(&mut *stop_shared.items.borrow_mut());
                for item in &items {
                    item.stop(&stop_shared);
                }
                transform_cleanup();
            })),
            ..Default::default()
        },
    );

    Render::Live(Output::Many(outputs))
}

fn item_key(shared: &ListShared, value: &Value, index: usize) -> Option<Value> {
    shared.key_fn.as_ref().map(|f| f(value, index))
}

fn data_values(shared: &ListShared) -> Option<Vec<Value>> {
    let data = shared.data.borrow().clone()?;
    data.raw().as_seq().map(|s| s.to_vec())
}

fn build_initial(shared: &Rc<ListShared>) {
    let Some(values) = data_values(shared) else {
        return;
    };
    for (index, value) in values.iter().enumerate() {
        let key = item_key(shared, value, index);
        let item = ItemState::new(shared, index, key);
        let output = item.output();
        render_output(&output);
        shared.outputs.push(output);
        shared.items.borrow_mut().push(item);
    }
}

/// Absolute re-index of every item from `from` on. Index cells are
/// collected first: writing one re-runs value tasks synchronously.
fn reindex(shared: &ListShared, from: usize) {
    let cells: Vec<Reactive> = shared
        .items
        .borrow()
        .iter()
        .skip(from)
        .map(|item| item.index_cell.clone())
        .collect();
    for (offset, cell) in cells.into_iter().enumerate() {
        let _ = cell.set("value", from + offset);
    }
}

// =============================================================================
// Structural fast-paths
// =============================================================================

fn apply_seq_event(shared: &Rc<ListShared>, event: &SeqEvent) {
    match *event {
        SeqEvent::Push { count } => {
            let Some(values) = data_values(shared) else {
                return;
            };
            let start = values.len().saturating_sub(count);
            let anchor = end_anchor(shared);
            insert_items(shared, start, count, &anchor);
        }
        SeqEvent::Pop => {
            let item = shared.items.borrow_mut().pop();
            let Some(item) = item else { return };
            item.stop(shared);
            let Some(output) = shared.outputs.pop() else {
                return;
            };
            let position = unmount_output(&output);
            restore_placeholder(shared, &position);
        }
        SeqEvent::Shift => {
            let item = {
                let mut items = shared.items.borrow_mut();
                if items.is_empty() {
                    return;
                }
                items.remove(0)
            };
            item.stop(shared);
            let output = shared.outputs.remove(0);
            let position = unmount_output(&output);
            restore_placeholder(shared, &position);
            reindex(shared, 0);
        }
        SeqEvent::Unshift { count } => {
            let anchor = front_anchor(shared);
            insert_items(shared, 0, count, &anchor);
            reindex(shared, count);
        }
        SeqEvent::Splice {
            start,
            removed,
            inserted,
        } => {
            // Boundary = first surviving item after the removed block; its
            // position outlives the removal.
            let boundary = start + removed;
            let anchor = match shared.outputs.get(boundary) {
                Some(output) => position_of(&output, false),
                None => end_anchor(shared),
            };

            let removed_items: Vec<ItemState> = {
                let mut items = shared.items.borrow_mut();
                let len = items.len();
                let end = (start + removed).min(len);
                items
                    .splice(start.min(len)..end, std::iter::empty())
                    .collect()
            };
            for item in &removed_items {
                item.stop(shared);
            }
            let removed_outputs = shared.outputs.splice(start, removed, Vec::new());
            let mut last_vacated = Position::default();
            for output in &removed_outputs {
                last_vacated = unmount_output(output);
            }

            insert_items(shared, start, inserted, &anchor);
            if inserted != removed {
                reindex(shared, start + inserted);
            }
            if shared.outputs.is_empty() {
                restore_placeholder(shared, &last_vacated);
            }
        }
        SeqEvent::Reverse => {
            let len = shared.items.borrow().len();
            if len < 2 {
                return;
            }
            let anchor = position_of(&Output::Many(shared.outputs.clone()), true);
            let snapshot = shared.outputs.snapshot();
            // Walking backwards and re-inserting at the end anchor lays the
            // items out reversed with one physical move each.
            for output in snapshot.iter().rev().skip(1) {
                insert_output(output, &anchor);
            }
            shared.outputs.reverse();
            shared.items.borrow_mut().reverse();
            reindex(shared, 0);
        }
        SeqEvent::MoveTo { from, to } => {
            let len = shared.items.borrow().len();
            if from >= len || to >= len {
                return;
            }
            let anchor = match shared.outputs.get(to) {
                Some(occupant) => position_of(&occupant, from < to),
                None => end_anchor(shared),
            };
            {
                let mut items = shared.items.borrow_mut();
                let item = items.remove(from);
                items.insert(to, item);
            }
            let moved = shared.outputs.remove(from);
            shared.outputs.insert(to, moved.clone());
            insert_output(&moved, &anchor);

            // Only the span between the two positions is re-indexed.
            let (low, high) = if from < to { (from, to) } else { (to, from) };
            let cells: Vec<Reactive> = shared
                .items
                .borrow()
                .iter()
                .skip(low)
                .take(high - low + 1)
                .map(|item| item.index_cell.clone())
                .collect();
            for (offset, cell) in cells.into_iter().enumerate() {
                let _ = cell.set("value", low + offset);
            }
        }
        SeqEvent::Exchange { a, b } => {
            let len = shared.items.borrow().len();
            if a >= len || b >= len || a == b {
                return;
            }
            let (low, high) = if a < b { (a, b) } else { (b, a) };
            let (out_low, out_high) = match (shared.outputs.get(low), shared.outputs.get(high)) {
                (Some(low_out), Some(high_out)) => (low_out, high_out),
                _ => return,
            };
            let after_low = position_of(&out_low, true);
            let after_high = position_of(&out_high, true);

            shared.items.borrow_mut().swap(low, high);
            shared.outputs.swap(low, high);
            insert_output(&out_low, &after_high);
            insert_output(&out_high, &after_low);

            let cells: Vec<(usize, Reactive)> = {
                let items = shared.items.borrow();
                vec![
                    (low, items[low].index_cell.clone()),
                    (high, items[high].index_cell.clone()),
                ]
            };
            for (index, cell) in cells {
                let _ = cell.set("value", index);
            }
        }
        SeqEvent::Sorted => reconcile_items(shared),
    }
}

fn end_anchor(shared: &ListShared) -> Position {
    if shared.outputs.is_empty() {
        shared.outputs.drop_placeholder().unwrap_or_default()
    } else {
        position_of(&Output::Many(shared.outputs.clone()), true)
    }
}

fn front_anchor(shared: &ListShared) -> Position {
    if shared.outputs.is_empty() {
        shared.outputs.drop_placeholder().unwrap_or_default()
    } else {
        match shared.outputs.get(0) {
            Some(first) => position_of(&first, false),
            None => Position::default(),
        }
    }
}

fn restore_placeholder(shared: &ListShared, position: &Position) {
    if shared.outputs.is_empty() {
        insert_output(&Output::Many(shared.outputs.clone()), position);
    }
}

/// Create `count` items at shadow position `start`, mounting them in order
/// at `anchor`.
fn insert_items(shared: &Rc<ListShared>, start: usize, count: usize, anchor: &Position) {
    let Some(values) = data_values(shared) else {
        return;
    };
    for offset in 0..count {
        let index = start + offset;
        let Some(value) = values.get(index) else {
            continue;
        };
        let key = item_key(shared, value, index);
        let item = ItemState::new(shared, index, key);
        let output = item.output();
        render_output(&output);
        insert_output(&output, anchor);
        shared.outputs.insert(index, output);
        shared.items.borrow_mut().insert(index, item);
    }
}

// =============================================================================
// Keyed fallback (sort, wholesale replacement)
// =============================================================================

/// Reconcile the shadow list against the current data by key, preserving
/// surviving items' computations.
fn reconcile_items(shared: &Rc<ListShared>) {
    let Some(values) = data_values(shared) else {
        return;
    };

    // Fail fast on duplicate keys before creating or tearing down anything.
    let new_keys: Vec<Option<Value>> = values
        .iter()
        .enumerate()
        .map(|(index, value)| item_key(shared, value, index))
        .collect();
    let mut seen = HashSet::new();
    for key in new_keys.iter().flatten() {
        if !seen.insert(key.clone()) {
            tracing::error!(%key, "duplicate key in list reconciliation");
            panic!("for_each: duplicate key `{key}` in one reconciliation snapshot");
        }
    }

    let old_items: Vec<ItemState> = std::mem::take(&mut *shared.items.borrow_mut());
    let old_keyed: Vec<Keyed> = old_items
        .iter()
        .enumerate()
        .map(|(index, item)| Keyed {
            key: item.key.clone(),
            output: shared.outputs.get(index).unwrap_or_else(|| item.output()),
        })
        .collect();
    let mut claimable: HashMap<Value, usize> = HashMap::new();
    for (index, item) in old_items.iter().enumerate() {
        if let Some(key) = &item.key {
            claimable.insert(key.clone(), index);
        }
    }

    // Plan the new list: reuse matching items, build fresh ones. Reused
    // outputs short-circuit inside the reconciler's per-item diff.
    let fallback = end_anchor(shared);
    let mut old_slots: Vec<Option<ItemState>> = old_items.into_iter().map(Some).collect();
    let mut new_items: Vec<ItemState> = Vec::with_capacity(values.len());
    let mut new_keyed: Vec<Keyed> = Vec::with_capacity(values.len());
    for (index, key) in new_keys.into_iter().enumerate() {
        let reused = key
            .as_ref()
            .and_then(|k| claimable.remove(k))
            .and_then(|old_index| {
                old_slots[old_index]
                    .take()
                    .map(|item| (old_index, item))
            });
        match reused {
            Some((old_index, mut item)) => {
                item.key = key.clone();
                new_keyed.push(Keyed {
                    key,
                    output: old_keyed[old_index].output.clone(),
                });
                new_items.push(item);
            }
            None => {
                let item = ItemState::new(shared, index, key.clone());
                let output = item.output();
                new_keyed.push(Keyed { key, output });
                new_items.push(item);
            }
        }
    }

    let result = match reconcile(&old_keyed, new_keyed, &fallback) {
        Ok(result) => result,
        Err(error) => panic!("for_each: {error}"),
    };
    shared.outputs.replace(result);
    restore_placeholder(shared, &fallback);

    // Stop items whose keys vanished (the reconciler already unmounted
    // their outputs).
    for leftover in old_slots.into_iter().flatten() {
        leftover.stop(shared);
    }

    *shared.items.borrow_mut() = new_items;
    // Every surviving item re-projects against its (possibly new) slot.
    reindex(shared, 0);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryDocument;
    use crate::backend::NodeId;
    use crate::element::render;
    use crate::error::Error;
    use std::cell::Cell;

    struct ListFixture {
        doc: Rc<MemoryDocument>,
        root: NodeId,
        seq: Reactive,
        renders: Rc<Cell<usize>>,
    }

    /// Mount a keyed-by-value list; `with_index` renders make the output
    /// depend on the item index as well.
    fn fixture(values: Vec<Value>, with_index: bool) -> ListFixture {
        let doc = MemoryDocument::install();
        let root = doc.create_root("div");
        let seq = Reactive::seq_from(values);

        let renders = Rc::new(Cell::new(0));
        let renders_in = renders.clone();
        let render_fn: ItemRender = Rc::new(move |ctx| {
            renders_in.set(renders_in.get() + 1);
            if with_index {
                Render::Text(format!("{}:{} ", ctx.index(), ctx.value()))
            } else {
                Render::Text(ctx.value().to_string())
            }
        });

        let list = for_each(ForProps {
            data: PropValue::value(Value::from(seq.raw().clone())),
            key: Some(Rc::new(|value: &Value, _| value.clone())),
            render: render_fn,
        });
        render(list, root).unwrap();

        ListFixture {
            doc,
            root,
            seq,
            renders,
        }
    }

    #[test]
    fn test_initial_render_in_order() {
        let f = fixture(vec!["a".into(), "b".into(), "c".into()], false);
        assert_eq!(f.doc.text_of(f.root), "abc");
        assert_eq!(f.renders.get(), 3);
    }

    #[test]
    fn test_push_and_pop_with_placeholder_cycle() {
        let f = fixture(vec![], false);
        assert_eq!(f.doc.text_of(f.root), "");
        assert_eq!(f.renders.get(), 0);

        f.seq.push("a").unwrap();
        f.seq.push("b").unwrap();
        assert_eq!(f.doc.text_of(f.root), "ab");
        assert_eq!(f.renders.get(), 2);

        f.seq.pop().unwrap();
        f.seq.pop().unwrap();
        assert_eq!(f.doc.text_of(f.root), "");

        // The placeholder holds the slot: the list comes back in place.
        f.seq.push("c").unwrap();
        assert_eq!(f.doc.text_of(f.root), "c");
    }

    #[test]
    fn test_shift_and_unshift() {
        let f = fixture(vec!["b".into(), "c".into()], true);
        assert_eq!(f.doc.text_of(f.root), "0:b 1:c ");

        f.seq.unshift(vec!["a".into()]).unwrap();
        assert_eq!(f.doc.text_of(f.root), "0:a 1:b 2:c ");

        f.seq.shift().unwrap();
        assert_eq!(f.doc.text_of(f.root), "0:b 1:c ");
    }

    #[test]
    fn test_splice_reindexes_suffix_only() {
        let f = fixture(
            vec!["a".into(), "b".into(), "c".into(), "d".into()],
            false,
        );
        assert_eq!(f.renders.get(), 4);

        // Replace b,c with x: suffix shifts by one.
        f.seq
            .splice(1, 2, vec!["x".into()])
            .unwrap();
        assert_eq!(f.doc.text_of(f.root), "axd");
        // Only the inserted item rendered; survivors kept their output.
        assert_eq!(f.renders.get(), 5);
    }

    #[test]
    fn test_reverse() {
        let f = fixture(vec!["a".into(), "b".into(), "c".into()], false);
        f.seq.reverse().unwrap();
        assert_eq!(f.doc.text_of(f.root), "cba");
        // Reversal re-indexes but never re-renders value-only items.
        assert_eq!(f.renders.get(), 3);
    }

    #[test]
    fn test_move_to_does_not_rerender_value_only_items() {
        let f = fixture(
            vec!["a".into(), "b".into(), "c".into(), "d".into(), "e".into()],
            false,
        );
        assert_eq!(f.renders.get(), 5);
        f.doc.take_ops();

        f.seq.move_to(1, 3).unwrap();
        assert_eq!(f.doc.text_of(f.root), "acdbe");
        assert_eq!(
            f.renders.get(),
            5,
            "re-indexing must not re-render outputs that ignore the index"
        );
    }

    #[test]
    fn test_move_to_rerenders_only_the_span_when_index_is_read() {
        let f = fixture(
            vec!["a".into(), "b".into(), "c".into(), "d".into(), "e".into()],
            true,
        );
        assert_eq!(f.renders.get(), 5);

        f.seq.move_to(1, 3).unwrap();
        // Items 1..=3 re-rendered (their index changed); 0 and 4 untouched.
        assert_eq!(f.renders.get(), 8);
        assert_eq!(f.doc.text_of(f.root), "0:a 1:c 2:d 3:b 4:e ");
    }

    #[test]
    fn test_exchange() {
        let f = fixture(vec!["a".into(), "b".into(), "c".into(), "d".into()], false);
        f.seq.exchange(0, 3).unwrap();
        assert_eq!(f.doc.text_of(f.root), "dbca");

        f.seq.exchange(1, 2).unwrap();
        assert_eq!(f.doc.text_of(f.root), "dcba");
        assert_eq!(f.renders.get(), 4);
    }

    #[test]
    fn test_exchange_same_index_is_inert() {
        let f = fixture(vec!["a".into(), "b".into(), "c".into()], true);
        let before = f.renders.get();
        f.doc.take_ops();

        assert!(!f.seq.exchange(2, 2).unwrap());
        assert_eq!(f.renders.get(), before, "no computation may re-run");
        assert!(f.doc.take_ops().is_empty(), "no document mutation may happen");
    }

    #[test]
    fn test_sort_falls_back_to_keyed_reconciliation() {
        let f = fixture(vec![3.into(), 1.into(), 2.into()], false);
        assert_eq!(f.doc.text_of(f.root), "312");

        f.seq
            .sort_by(|a, b| a.as_int().unwrap_or(0).cmp(&b.as_int().unwrap_or(0)))
            .unwrap();
        assert_eq!(f.doc.text_of(f.root), "123");
        // Every key survived: no item re-rendered.
        assert_eq!(f.renders.get(), 3);
    }

    #[test]
    fn test_wholesale_replacement_reconciles_by_key() {
        let doc = MemoryDocument::install();
        let root = doc.create_root("div");

        let state = Reactive::record();
        let first = Reactive::seq_from(vec!["a".into(), "b".into(), "c".into()]);
        state.set("rows", first.raw().clone()).unwrap();

        let renders = Rc::new(Cell::new(0));
        let renders_in = renders.clone();
        let s = state.clone();
        let list = for_each(ForProps {
            data: PropValue::getter(move || s.get(&"rows".into())),
            key: Some(Rc::new(|value: &Value, _| value.clone())),
            render: Rc::new(move |ctx| {
                renders_in.set(renders_in.get() + 1);
                Render::Text(ctx.value().to_string())
            }),
        });
        render(list, root).unwrap();
        assert_eq!(doc.text_of(root), "abc");
        assert_eq!(renders.get(), 3);

        let second = Reactive::seq_from(vec!["b".into(), "c".into(), "d".into()]);
        state.set("rows", second.raw().clone()).unwrap();

        assert_eq!(doc.text_of(root), "bcd");
        // b and c survived with their outputs; only d rendered fresh.
        assert_eq!(renders.get(), 4);

        // The new sequence is live, the old one is detached.
        second.push("e").unwrap();
        assert_eq!(doc.text_of(root), "bcde");
        first.push("z").unwrap();
        assert_eq!(doc.text_of(root), "bcde");
    }

    #[test]
    fn test_item_value_updates_through_index_slot() {
        let f = fixture(vec!["a".into(), "b".into()], false);

        f.seq.set(1usize, "B").unwrap();
        assert_eq!(f.doc.text_of(f.root), "aB");
        assert_eq!(f.renders.get(), 3, "only the written slot re-renders");
    }

    #[test]
    fn test_projected_fields_are_read_only() {
        let doc = MemoryDocument::install();
        let root = doc.create_root("div");
        let seq = Reactive::seq_from(vec![1.into()]);

        let failures = Rc::new(Cell::new(0));
        let failures_in = failures.clone();
        let list = for_each(ForProps {
            data: PropValue::value(Value::from(seq.raw().clone())),
            key: None,
            render: Rc::new(move |ctx| {
                if matches!(
                    ctx.props().set("value", 9),
                    Err(Error::ReadOnly { .. })
                ) && matches!(
                    ctx.props().set("index", 9),
                    Err(Error::ReadOnly { .. })
                ) {
                    failures_in.set(failures_in.get() + 1);
                }
                Render::Text(ctx.value().to_string())
            }),
        });
        render(list, root).unwrap();

        assert_eq!(failures.get(), 1);
        assert_eq!(doc.text_of(root), "1");
    }

    #[test]
    #[should_panic(expected = "duplicate key")]
    fn test_duplicate_keys_fail_fast() {
        let f = fixture(vec![1.into(), 1.into(), 2.into()], false);
        // Initial build is positional; the keyed fallback rejects dupes.
        let _ = f.seq.sort_by(|a, b| {
            a.as_int().unwrap_or(0).cmp(&b.as_int().unwrap_or(0))
        });
    }

    #[test]
    fn test_unmounting_owner_stops_item_tasks() {
        let doc = MemoryDocument::install();
        let root = doc.create_root("div");
        let seq = Reactive::seq_from(vec!["a".into(), "b".into()]);

        let owner = Task::new(
            {
                let seq = seq.clone();
                let renders: ItemRender = Rc::new(|ctx| Render::Text(ctx.value().to_string()));
                move |ctx| {
                    if ctx.first_run() {
                        let list = for_each(ForProps {
                            data: PropValue::value(Value::from(seq.raw().clone())),
                            key: None,
                            render: renders.clone(),
                        });
                        let output = format(list);
                        render_output(&output);
                        crate::render::append_output(&output, root);
                    }
                    None
                }
            },
            TaskOptions::default(),
        );
        assert_eq!(doc.text_of(root), "ab");

        owner.stop();
        // Item computations are gone: mutations no longer reach the tree.
        seq.push("c").unwrap();
        assert_eq!(doc.text_of(root), "ab");
    }
}
