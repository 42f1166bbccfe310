//! Dependency registry - the bidirectional (aggregate, key) ⇄ task index.
//!
//! Tracked reads add edges for the currently active task; writes and deletes
//! consult the edges to notify subscribers. Both directions are kept so that
//! releasing a task is O(its own edges), not a scan.
//!
//! The anti-leak invariant lives here: a task's edge set always reflects
//! exactly its most recent run. [`release`] is called both when a task stops
//! and right before it re-runs, so stale edges from earlier runs never
//! survive.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use crate::task::{self, ChangeKind, ChangeReason, Task, TaskKey};
use crate::value::{AggregateId, Key, Value};

thread_local! {
    /// (aggregate, key) -> subscribed tasks.
    static TARGET_TASKS: RefCell<HashMap<AggregateId, HashMap<Key, HashSet<TaskKey>>>> =
        RefCell::new(HashMap::new());

    /// task -> (aggregate -> keys) it read during its latest run.
    static TASK_TARGETS: RefCell<HashMap<TaskKey, HashMap<AggregateId, HashSet<Key>>>> =
        RefCell::new(HashMap::new());
}

/// Record a dependency edge from (target, key) to the active task.
///
/// No-op when no task is active: untracked reads are free.
pub(crate) fn track(target: AggregateId, key: &Key) {
    let Some(active) = task::current() else {
        return;
    };
    let task_key = active.key();

    TASK_TARGETS.with(|map| {
        map.borrow_mut()
            .entry(task_key)
            .or_default()
            .entry(target)
            .or_default()
            .insert(key.clone());
    });
    TARGET_TASKS.with(|map| {
        map.borrow_mut()
            .entry(target)
            .or_default()
            .entry(key.clone())
            .or_default()
            .insert(task_key);
    });
}

/// Drop every edge attributed to `task`, in both directions.
pub(crate) fn release(task: TaskKey) {
    let owned = TASK_TARGETS.with(|map| map.borrow_mut().remove(&task));
    let Some(owned) = owned else { return };

    TARGET_TASKS.with(|map| {
        let mut map = map.borrow_mut();
        for (target, keys) in owned {
            let Some(by_key) = map.get_mut(&target) else {
                continue;
            };
            for key in keys {
                if let Some(subscribers) = by_key.get_mut(&key) {
                    subscribers.remove(&task);
                    if subscribers.is_empty() {
                        by_key.remove(&key);
                    }
                }
            }
            if by_key.is_empty() {
                map.remove(&target);
            }
        }
    });
}

/// Notify every task subscribed to (target, key) of a change.
///
/// Subscribers are snapshotted before dispatch: a notified task may re-run
/// synchronously and mutate the registry while we iterate.
pub(crate) fn notify(
    target: AggregateId,
    key: &Key,
    kind: ChangeKind,
    old: Option<Value>,
    new: Option<Value>,
) {
    let subscribers: Vec<TaskKey> = TARGET_TASKS.with(|map| {
        map.borrow()
            .get(&target)
            .and_then(|by_key| by_key.get(key))
            .map(|tasks| tasks.iter().copied().collect())
            .unwrap_or_default()
    });

    for task_key in subscribers {
        let task = Task::from_key(task_key);
        task.add_reason(ChangeReason {
            target,
            key: key.clone(),
            kind,
            old: old.clone(),
            new: new.clone(),
        });
        task.update();
    }
}

/// Number of edges currently attributed to a task.
pub fn edge_count(task: &Task) -> usize {
    TASK_TARGETS.with(|map| {
        map.borrow()
            .get(&task.key())
            .map(|targets| targets.values().map(HashSet::len).sum())
            .unwrap_or(0)
    })
}

/// Number of tasks subscribed to one (target, key) pair.
pub fn subscriber_count(target: AggregateId, key: &Key) -> usize {
    TARGET_TASKS.with(|map| {
        map.borrow()
            .get(&target)
            .and_then(|by_key| by_key.get(key))
            .map(HashSet::len)
            .unwrap_or(0)
    })
}
