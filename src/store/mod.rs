//! Reactive store - canonical wrappers and tracked access.
//!
//! A [`Reactive`] is the observable wrapper around one raw aggregate. At most
//! one wrapper exists per aggregate process-wide: [`wrap`] returns the cached
//! wrapper for an aggregate it has seen before, so wrapping is idempotent and
//! wrapper identity is stable. The raw aggregate stays reachable through
//! [`Reactive::raw`] and is never copied.
//!
//! Reads through a wrapper record a dependency edge for the active
//! computation; writes and deletes notify subscribers through the
//! [`registry`]. Structural sequence operations (`push`, `splice`,
//! `move_to`, ...) are first-class: each performs the raw mutation, notifies
//! the synthetic length key when the length changed, and emits exactly one
//! [`SeqEvent`] to structural subscribers - never a cascade of per-index set
//! notifications.

pub mod registry;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crate::error::Error;
use crate::task::{Cleanup, ChangeKind};
use crate::value::{Aggregate, AggregateId, Key, RecordRef, SeqRef, Value};

// =============================================================================
// Canonical wrapper cache
// =============================================================================

thread_local! {
    static WRAPPERS: RefCell<HashMap<AggregateId, Weak<ReactiveInner>>> =
        RefCell::new(HashMap::new());

    static READ_TRANSFORMS: RefCell<Vec<(u64, ReadTransform)>> = RefCell::new(Vec::new());

    static SEQ_SUBSCRIBERS: RefCell<HashMap<AggregateId, Vec<(u64, SeqHandler)>>> =
        RefCell::new(HashMap::new());

    static NEXT_HOOK_ID: Cell<u64> = const { Cell::new(1) };
}

type ReadTransform = Rc<dyn Fn(Value, &Aggregate, &Key) -> Value>;
type SeqHandler = Rc<dyn Fn(&SeqEvent)>;

fn next_hook_id() -> u64 {
    NEXT_HOOK_ID.with(|next| {
        let id = next.get();
        next.set(id + 1);
        id
    })
}

/// The canonical observable wrapper around one raw aggregate.
#[derive(Clone)]
pub struct Reactive {
    inner: Rc<ReactiveInner>,
}

struct ReactiveInner {
    target: Aggregate,
    /// Projected records (list item `value`/`index` views) reject writes.
    read_only: bool,
}

/// Wrap an aggregate, returning its canonical wrapper.
pub fn wrap(target: impl Into<Aggregate>) -> Reactive {
    Reactive::wrap_inner(target.into(), false)
}

/// Wrap the aggregate inside a value; `None` for non-aggregates, which pass
/// through the store unchanged.
pub fn try_wrap(value: &Value) -> Option<Reactive> {
    match value {
        Value::Record(r) => Some(wrap(r.clone())),
        Value::Seq(s) => Some(wrap(s.clone())),
        _ => None,
    }
}

impl Reactive {
    /// Fresh wrapped empty record.
    pub fn record() -> Reactive {
        wrap(RecordRef::new())
    }

    /// Fresh wrapped empty sequence.
    pub fn seq() -> Reactive {
        wrap(SeqRef::new())
    }

    /// Fresh wrapped sequence with initial contents.
    pub fn seq_from(values: Vec<Value>) -> Reactive {
        wrap(SeqRef::from_values(values))
    }

    /// Fresh read-only record: reads are tracked and transformable, writes
    /// fail with [`Error::ReadOnly`].
    pub(crate) fn projected() -> Reactive {
        Reactive::wrap_inner(Aggregate::Record(RecordRef::new()), true)
    }

    fn wrap_inner(target: Aggregate, read_only: bool) -> Reactive {
        let id = target.id();
        WRAPPERS.with(|cache| {
            let mut cache = cache.borrow_mut();
            if let Some(existing) = cache.get(&id).and_then(Weak::upgrade) {
                return Reactive { inner: existing };
            }
            let inner = Rc::new(ReactiveInner { target, read_only });
            cache.insert(id, Rc::downgrade(&inner));
            Reactive { inner }
        })
    }

    /// The raw backing aggregate (untracked).
    pub fn raw(&self) -> &Aggregate {
        &self.inner.target
    }

    pub fn id(&self) -> AggregateId {
        self.inner.target.id()
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.read_only
    }

    // =========================================================================
    // Tracked access
    // =========================================================================

    /// Tracked read.
    ///
    /// Records a dependency edge for the active computation, canonically
    /// wraps aggregate results so repeated reads stay reference-stable, and
    /// applies registered read transforms in registration order.
    pub fn get(&self, key: &Key) -> Value {
        registry::track(self.id(), key);

        let value = match (&self.inner.target, key) {
            (Aggregate::Record(r), Key::Field(name)) => r.get(name).unwrap_or(Value::Unit),
            (Aggregate::Seq(s), Key::Index(i)) => s.get(*i).unwrap_or(Value::Unit),
            (Aggregate::Seq(s), Key::Length) => Value::Int(s.len() as i64),
            _ => Value::Unit,
        };
        if value.is_aggregate() {
            let _ = try_wrap(&value);
        }

        let transforms: Vec<ReadTransform> = READ_TRANSFORMS.with(|hooks| {
            hooks.borrow().iter().map(|(_, h)| h.clone()).collect()
        });
        transforms
            .into_iter()
            .fold(value, |v, h| h(v, &self.inner.target, key))
    }

    /// Tracked sequence length; for records, the untracked field count.
    pub fn len(&self) -> usize {
        match &self.inner.target {
            Aggregate::Seq(_) => self.get(&Key::Length).as_int().unwrap_or(0) as usize,
            Aggregate::Record(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write a value, notifying subscribers with an add or set reason.
    ///
    /// Sequence index writes must target an existing index: structural
    /// growth goes through the structural operations, so plain index writes
    /// never imply insertion or removal.
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<(), Error> {
        let key = key.into();
        let value = value.into();
        if self.inner.read_only {
            return Err(Error::ReadOnly { key });
        }
        match (&self.inner.target, &key) {
            (Aggregate::Record(r), Key::Field(name)) => {
                let is_add = !r.contains(name);
                let old = r.insert(name.clone(), value.clone());
                let kind = if is_add { ChangeKind::Add } else { ChangeKind::Set };
                registry::notify(self.id(), &key, kind, old, Some(value));
                Ok(())
            }
            (Aggregate::Seq(s), Key::Index(i)) => {
                let old = s.set(*i, value.clone()).ok_or(Error::OutOfRange {
                    index: *i,
                    len: s.len(),
                })?;
                registry::notify(self.id(), &key, ChangeKind::Set, Some(old), Some(value));
                Ok(())
            }
            (_, Key::Length) => Err(Error::ReadOnly { key }),
            (Aggregate::Record(_), Key::Index(_)) => Err(Error::NotASequence),
            (Aggregate::Seq(_), Key::Field(_)) => Err(Error::NotARecord),
        }
    }

    /// Delete a record field, notifying subscribers with a delete reason.
    pub fn delete(&self, key: &Key) -> Result<Option<Value>, Error> {
        if self.inner.read_only {
            return Err(Error::ReadOnly { key: key.clone() });
        }
        match (&self.inner.target, key) {
            (Aggregate::Record(r), Key::Field(name)) => {
                let old = r.remove(name);
                if old.is_some() {
                    registry::notify(self.id(), key, ChangeKind::Delete, old.clone(), None);
                }
                Ok(old)
            }
            _ => Err(Error::NotARecord),
        }
    }

    // =========================================================================
    // Structural sequence operations
    // =========================================================================

    fn seq_ref(&self) -> Result<&SeqRef, Error> {
        self.inner.target.as_seq().ok_or(Error::NotASequence)
    }

    fn notify_len(&self, old_len: usize, new_len: usize) {
        if old_len != new_len {
            registry::notify(
                self.id(),
                &Key::Length,
                ChangeKind::Set,
                Some(Value::from(old_len)),
                Some(Value::from(new_len)),
            );
        }
    }

    /// Append one value.
    pub fn push(&self, value: impl Into<Value>) -> Result<usize, Error> {
        let seq = self.seq_ref()?;
        let old_len = seq.len();
        seq.push(value.into());
        self.notify_len(old_len, old_len + 1);
        emit(self.id(), &SeqEvent::Push { count: 1 });
        Ok(old_len + 1)
    }

    /// Remove and return the last value; `Ok(None)` on an empty sequence.
    pub fn pop(&self) -> Result<Option<Value>, Error> {
        let seq = self.seq_ref()?;
        let old_len = seq.len();
        let Some(value) = seq.pop() else {
            return Ok(None);
        };
        self.notify_len(old_len, old_len - 1);
        emit(self.id(), &SeqEvent::Pop);
        Ok(Some(value))
    }

    /// Remove and return the first value; `Ok(None)` on an empty sequence.
    pub fn shift(&self) -> Result<Option<Value>, Error> {
        let seq = self.seq_ref()?;
        let old_len = seq.len();
        let Some(value) = seq.shift() else {
            return Ok(None);
        };
        self.notify_len(old_len, old_len - 1);
        emit(self.id(), &SeqEvent::Shift);
        Ok(Some(value))
    }

    /// Insert values at the front, preserving their order.
    pub fn unshift(&self, values: Vec<Value>) -> Result<usize, Error> {
        let seq = self.seq_ref()?;
        if values.is_empty() {
            return Ok(seq.len());
        }
        let old_len = seq.len();
        let count = values.len();
        seq.unshift(values);
        self.notify_len(old_len, old_len + count);
        emit(self.id(), &SeqEvent::Unshift { count });
        Ok(old_len + count)
    }

    /// Remove `removed` values starting at `start`, inserting `inserts` in
    /// their place. Out-of-range spans clamp to the sequence end.
    pub fn splice(
        &self,
        start: usize,
        removed: usize,
        inserts: Vec<Value>,
    ) -> Result<Vec<Value>, Error> {
        let seq = self.seq_ref()?;
        let old_len = seq.len();
        let start = start.min(old_len);
        let inserted = inserts.len();
        let taken = seq.splice(start, removed, inserts);
        self.notify_len(old_len, old_len - taken.len() + inserted);
        emit(
            self.id(),
            &SeqEvent::Splice {
                start,
                removed: taken.len(),
                inserted,
            },
        );
        Ok(taken)
    }

    /// Reverse the sequence in place.
    pub fn reverse(&self) -> Result<(), Error> {
        let seq = self.seq_ref()?;
        seq.reverse();
        emit(self.id(), &SeqEvent::Reverse);
        Ok(())
    }

    /// Sort the sequence in place with a comparator.
    ///
    /// Sorting is arbitrary reordering, so list views fall back to keyed
    /// reconciliation rather than a structural fast-path.
    pub fn sort_by(
        &self,
        compare: impl FnMut(&Value, &Value) -> std::cmp::Ordering,
    ) -> Result<(), Error> {
        let seq = self.seq_ref()?;
        seq.sort_by(compare);
        emit(self.id(), &SeqEvent::Sorted);
        Ok(())
    }

    /// Shift every element between `from` and `to` by one slot and place the
    /// moved element at `to`. `Ok(false)` (no change, no event) when the
    /// positions are equal.
    pub fn move_to(&self, from: usize, to: usize) -> Result<bool, Error> {
        let seq = self.seq_ref()?;
        let len = seq.len();
        Self::check_index(from, len)?;
        Self::check_index(to, len)?;
        if from == to {
            return Ok(false);
        }
        seq.move_to(from, to);
        emit(self.id(), &SeqEvent::MoveTo { from, to });
        Ok(true)
    }

    /// Swap two positions. `Ok(false)` (no change, no event) when equal.
    pub fn exchange(&self, a: usize, b: usize) -> Result<bool, Error> {
        let seq = self.seq_ref()?;
        let len = seq.len();
        Self::check_index(a, len)?;
        Self::check_index(b, len)?;
        if a == b {
            return Ok(false);
        }
        seq.exchange(a, b);
        emit(self.id(), &SeqEvent::Exchange { a, b });
        Ok(true)
    }

    fn check_index(index: usize, len: usize) -> Result<(), Error> {
        if index < len {
            Ok(())
        } else {
            Err(Error::OutOfRange { index, len })
        }
    }
}

impl PartialEq for Reactive {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Reactive {}

impl std::fmt::Debug for Reactive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactive")
            .field("id", &self.id())
            .field("read_only", &self.inner.read_only)
            .finish()
    }
}

// =============================================================================
// Read transforms
// =============================================================================

/// Register a read transform applied, in registration order, to every value
/// returned by a tracked read. The list mechanism uses this to project
/// `value`/`index` accessors without altering storage.
///
/// The returned cleanup unregisters the transform.
pub fn add_read_transform(
    transform: impl Fn(Value, &Aggregate, &Key) -> Value + 'static,
) -> Cleanup {
    let id = next_hook_id();
    READ_TRANSFORMS.with(|hooks| {
        hooks.borrow_mut().push((id, Rc::new(transform)));
    });
    Box::new(move || {
        READ_TRANSFORMS.with(|hooks| {
            hooks.borrow_mut().retain(|(hook_id, _)| *hook_id != id);
        });
    })
}

// =============================================================================
// Structural events
// =============================================================================

/// One structural mutation of a wrapped sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqEvent {
    Push { count: usize },
    Pop,
    Shift,
    Unshift { count: usize },
    Splice { start: usize, removed: usize, inserted: usize },
    Reverse,
    MoveTo { from: usize, to: usize },
    Exchange { a: usize, b: usize },
    Sorted,
}

/// Subscribe to structural mutations of one wrapped sequence. The handler
/// runs synchronously after the raw mutation and its length notification.
///
/// The returned cleanup unsubscribes.
pub fn on_seq_event(target: &Reactive, handler: impl Fn(&SeqEvent) + 'static) -> Cleanup {
    let id = next_hook_id();
    let aggregate = target.id();
    SEQ_SUBSCRIBERS.with(|subs| {
        subs.borrow_mut()
            .entry(aggregate)
            .or_default()
            .push((id, Rc::new(handler)));
    });
    Box::new(move || {
        SEQ_SUBSCRIBERS.with(|subs| {
            let mut subs = subs.borrow_mut();
            if let Some(handlers) = subs.get_mut(&aggregate) {
                handlers.retain(|(hook_id, _)| *hook_id != id);
                if handlers.is_empty() {
                    subs.remove(&aggregate);
                }
            }
        });
    })
}

fn emit(target: AggregateId, event: &SeqEvent) {
    let handlers: Vec<SeqHandler> = SEQ_SUBSCRIBERS.with(|subs| {
        subs.borrow()
            .get(&target)
            .map(|handlers| handlers.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default()
    });
    for handler in handlers {
        handler(event);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Task, TaskOptions};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    #[test]
    fn test_wrap_is_canonical() {
        let raw = RecordRef::new();
        let a = wrap(raw.clone());
        let b = wrap(raw.clone());

        assert_eq!(a, b);
        assert_eq!(a.id(), raw.id());
    }

    #[test]
    fn test_unwrap_round_trip() {
        let raw = SeqRef::from_values(vec![1.into()]);
        let wrapped = wrap(raw.clone());

        match wrapped.raw() {
            Aggregate::Seq(s) => assert_eq!(s.id(), raw.id()),
            Aggregate::Record(_) => panic!("wrapped a sequence, unwrapped a record"),
        }
    }

    #[test]
    fn test_wrap_through_read_is_canonical() {
        let outer = Reactive::record();
        let inner = RecordRef::new();
        outer.set("child", inner.clone()).unwrap();

        let first = try_wrap(&outer.get(&"child".into())).unwrap();
        let second = try_wrap(&outer.get(&"child".into())).unwrap();

        assert_eq!(first, second);
        assert_eq!(first, wrap(inner));
    }

    #[test]
    fn test_try_wrap_passes_scalars_through() {
        assert!(try_wrap(&Value::from(1)).is_none());
        assert!(try_wrap(&Value::from("x")).is_none());
    }

    #[test]
    fn test_same_value_write_does_not_rerun() {
        let record = Reactive::record();
        record.set("count", 1).unwrap();

        let runs = Rc::new(Cell::new(0));
        let r = record.clone();
        let runs_in = runs.clone();
        let _task = Task::new(
            move |_| {
                runs_in.set(runs_in.get() + 1);
                let _ = r.get(&"count".into());
                None
            },
            TaskOptions::default(),
        );
        assert_eq!(runs.get(), 1);

        record.set("count", 1).unwrap();
        assert_eq!(runs.get(), 1, "same-value write must not re-run");

        record.set("count", 2).unwrap();
        assert_eq!(runs.get(), 2, "changed value must re-run");
    }

    #[test]
    fn test_length_reads_track_structural_growth() {
        let seq = Reactive::seq_from(vec![1.into()]);

        let seen = Rc::new(Cell::new(0));
        let s = seq.clone();
        let seen_in = seen.clone();
        let _task = Task::new(
            move |_| {
                seen_in.set(s.len());
                None
            },
            TaskOptions::default(),
        );
        assert_eq!(seen.get(), 1);

        seq.push(2).unwrap();
        assert_eq!(seen.get(), 2);

        seq.pop().unwrap();
        assert_eq!(seen.get(), 1);
    }

    #[test]
    fn test_index_write_out_of_range() {
        let seq = Reactive::seq_from(vec![1.into()]);
        assert!(matches!(
            seq.set(3usize, 9),
            Err(Error::OutOfRange { index: 3, len: 1 })
        ));
    }

    #[test]
    fn test_move_to_validation_and_noop() {
        let seq = Reactive::seq_from(vec![1.into(), 2.into(), 3.into()]);

        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        let _unsub = on_seq_event(&seq, move |e| sink.borrow_mut().push(*e));

        assert!(matches!(seq.move_to(0, 3), Err(Error::OutOfRange { .. })));
        assert!(matches!(seq.exchange(7, 0), Err(Error::OutOfRange { .. })));

        assert!(!seq.move_to(1, 1).unwrap());
        assert!(!seq.exchange(2, 2).unwrap());
        assert!(events.borrow().is_empty(), "no-ops must not emit events");

        assert!(seq.move_to(0, 2).unwrap());
        assert_eq!(
            *events.borrow(),
            vec![SeqEvent::MoveTo { from: 0, to: 2 }]
        );
    }

    #[test]
    fn test_read_transforms_apply_in_order() {
        let record = Reactive::record();
        record.set("x", 1).unwrap();

        let a = add_read_transform(|v, _, _| match v {
            Value::Int(i) => Value::Int(i + 1),
            other => other,
        });
        let _b = add_read_transform(|v, _, _| match v {
            Value::Int(i) => Value::Int(i * 10),
            other => other,
        });

        // (1 + 1) * 10, not (1 * 10) + 1.
        assert_eq!(record.get(&"x".into()), Value::Int(20));

        a();
        assert_eq!(record.get(&"x".into()), Value::Int(10));
    }

    #[test]
    fn test_projected_record_rejects_writes() {
        let projected = Reactive::projected();
        assert!(matches!(
            projected.set("value", 1),
            Err(Error::ReadOnly { .. })
        ));
        assert!(matches!(
            projected.delete(&"value".into()),
            Err(Error::ReadOnly { .. })
        ));
    }

    #[test]
    fn test_length_key_is_read_only() {
        let seq = Reactive::seq();
        assert!(matches!(
            seq.set(Key::Length, 5),
            Err(Error::ReadOnly { .. })
        ));
    }

    #[test]
    fn test_unsubscribed_seq_handler_stops_firing() {
        let seq = Reactive::seq_from(vec![1.into()]);
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let unsub = on_seq_event(&seq, move |_| c.set(c.get() + 1));

        seq.push(2).unwrap();
        assert_eq!(count.get(), 1);

        unsub();
        seq.push(3).unwrap();
        assert_eq!(count.get(), 1);
    }
}
