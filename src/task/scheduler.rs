//! Update scheduler - re-run coalescing and the next-tick queue.
//!
//! Many synchronous "dependency changed" notifications for one node within a
//! tick collapse into a single re-run: [`enqueue`] adds to a pending set and
//! schedules one deferred flush (through the installed document's frame
//! callback) only when the set was empty. On flush every distinct pending
//! node updates at most once, seeing the union of reasons accumulated since
//! its previous flush; afterwards the one-shot next-tick FIFO drains, so
//! next-tick callbacks observe the post-flush state of everything enqueued
//! before the flush began.

use std::cell::RefCell;

use indexmap::IndexSet;

use crate::backend;
use crate::task::{Task, TaskKey};

thread_local! {
    /// First-enqueue ordered, deduplicated.
    static PENDING: RefCell<IndexSet<TaskKey>> = RefCell::new(IndexSet::new());

    static NEXT_TICKS: RefCell<Vec<Box<dyn FnOnce()>>> = RefCell::new(Vec::new());
}

/// Add a node to the pending set; schedules the deferred flush when the set
/// was empty before this call.
pub(crate) fn enqueue(task: &Task) {
    let was_empty = PENDING.with(|pending| {
        let mut pending = pending.borrow_mut();
        let was_empty = pending.is_empty();
        pending.insert(task.key());
        was_empty
    });
    if was_empty {
        backend::request_frame(Box::new(flush));
    }
}

/// Register a one-shot callback for after the next flush.
pub fn next_tick(callback: impl FnOnce() + 'static) {
    NEXT_TICKS.with(|ticks| ticks.borrow_mut().push(Box::new(callback)));
}

/// Update every pending node once, then drain the next-tick queue.
///
/// Normally invoked by the document's frame callback; public so hosts with
/// their own tick loop can pump synchronously.
pub fn flush() {
    let batch: Vec<TaskKey> = PENDING.with(|pending| pending.borrow_mut().drain(..).collect());
    tracing::trace!(nodes = batch.len(), "scheduler flush");
    for key in batch {
        let _ = Task::from_key(key).force_update();
    }

    let ticks: Vec<Box<dyn FnOnce()>> = NEXT_TICKS.with(|ticks| ticks.borrow_mut().drain(..).collect());
    for tick in ticks {
        tick();
    }
}

/// Drop a node from the pending set (stopped tasks must not flush).
pub(crate) fn discard(key: TaskKey) {
    PENDING.with(|pending| {
        pending.borrow_mut().shift_remove(&key);
    });
}
