//! Computation nodes.
//!
//! A [`Task`] is a re-runnable unit of work. While its body runs it is the
//! single active computation: every tracked store read records a dependency
//! edge against it. On each re-run all edges from the previous run are
//! dropped first, so a task's dependency set always reflects exactly its
//! most recent run.
//!
//! Nodes live in a thread-local `slotmap` arena; a [`Task`] is a cheap
//! generational handle, and every operation on a stopped or dead handle is a
//! no-op (teardown ordering across owners is not guaranteed by callers).
//! The active computation is an explicit stack with push/pop guard
//! discipline: strictly nested, restored even when a body panics. A
//! panicking body aborts that run, leaves no disposer for it, and propagates
//! to whichever caller triggered the run.

pub mod scheduler;

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::store::registry;
use crate::value::{AggregateId, Key, Value};

slotmap::new_key_type! {
    /// Generational arena key for one computation node.
    pub struct TaskKey;
}

/// Disposal / cleanup function.
pub type Cleanup = Box<dyn FnOnce()>;

type Body = Rc<dyn Fn(&TaskCtx) -> Option<Cleanup>>;

// =============================================================================
// Change reasons
// =============================================================================

/// What kind of mutation produced a change reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    Set,
    Delete,
}

/// One pending "dependency changed" notification.
#[derive(Debug, Clone)]
pub struct ChangeReason {
    pub target: AggregateId,
    pub key: Key,
    pub kind: ChangeKind,
    pub old: Option<Value>,
    pub new: Option<Value>,
}

/// When a task with pending reasons should actually re-run.
#[derive(Clone)]
pub enum UpdatePolicy {
    /// Collapse reasons per (target, key) to (oldest old, newest new) and
    /// update iff at least one collapsed pair differs.
    Collapse,
    /// Node-specific predicate over the raw pending reasons.
    Custom(Rc<dyn Fn(&[ChangeReason]) -> bool>),
}

impl Default for UpdatePolicy {
    fn default() -> Self {
        UpdatePolicy::Collapse
    }
}

// =============================================================================
// Arena
// =============================================================================

struct TaskNode {
    body: Body,
    disposer: Option<Cleanup>,
    children: Vec<TaskKey>,
    parent: Option<TaskKey>,
    runs: u32,
    reasons: SmallVec<[ChangeReason; 4]>,
    stopped: bool,
    /// Scheduler-bound tasks enqueue on `update()` instead of re-running
    /// synchronously.
    deferred: bool,
    policy: UpdatePolicy,
    data: Option<Rc<dyn Any>>,
    name: Option<&'static str>,
    on_stopped: Option<Cleanup>,
    on_updated: Option<Rc<dyn Fn()>>,
}

thread_local! {
    static TASKS: RefCell<SlotMap<TaskKey, TaskNode>> = RefCell::new(SlotMap::with_key());

    /// Strictly nested stack of running computations.
    static ACTIVE: RefCell<Vec<TaskKey>> = RefCell::new(Vec::new());
}

/// The currently running computation, if any.
pub fn current() -> Option<Task> {
    ACTIVE.with(|stack| stack.borrow().last().copied()).map(Task::from_key)
}

struct ActiveGuard;

impl ActiveGuard {
    fn push(key: TaskKey) -> Self {
        ACTIVE.with(|stack| stack.borrow_mut().push(key));
        ActiveGuard
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        ACTIVE.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

// =============================================================================
// Options and context
// =============================================================================

/// Construction options: `TaskOptions { name: Some("x"),
/// ..Default::default() }`.
pub struct TaskOptions {
    /// Run synchronously on construction (default true).
    pub auto_run: bool,
    /// Register as a child of the currently active computation; the child's
    /// lifetime then cannot exceed the parent's.
    pub auto_append_parent: bool,
    pub name: Option<&'static str>,
    /// Opaque per-node data slot.
    pub data: Option<Rc<dyn Any>>,
    pub policy: UpdatePolicy,
    pub on_stopped: Option<Cleanup>,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            auto_run: true,
            auto_append_parent: false,
            name: None,
            data: None,
            policy: UpdatePolicy::Collapse,
            on_stopped: None,
        }
    }
}

/// Context handed to a task body on every run.
pub struct TaskCtx {
    task: Task,
    runs: u32,
    reasons: Vec<ChangeReason>,
}

impl TaskCtx {
    /// 1-based run counter.
    pub fn runs(&self) -> u32 {
        self.runs
    }

    pub fn first_run(&self) -> bool {
        self.runs == 1
    }

    /// The reasons that triggered this run (empty on the first run).
    pub fn reasons(&self) -> &[ChangeReason] {
        &self.reasons
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    /// Take ownership of `child`: it is stopped when this task stops.
    pub fn add_child(&self, child: &Task) {
        self.task.add_child(child);
    }

    /// Request self-stop; safe from within the body.
    pub fn stop(&self) {
        self.task.stop();
    }

    pub fn set_data(&self, data: Rc<dyn Any>) {
        self.task.set_data(data);
    }

    pub fn data(&self) -> Option<Rc<dyn Any>> {
        self.task.data()
    }
}

// =============================================================================
// Task handle
// =============================================================================

/// Cheap cloneable handle to one computation node.
#[derive(Clone, PartialEq, Eq)]
pub struct Task {
    key: TaskKey,
}

impl Task {
    /// Construct a node. Unless `auto_run` is disabled the first run happens
    /// synchronously, establishing the initial dependency edges. The body's
    /// return value, if any, is stored as the disposer for the next cycle.
    pub fn new(
        body: impl Fn(&TaskCtx) -> Option<Cleanup> + 'static,
        options: TaskOptions,
    ) -> Task {
        let TaskOptions {
            auto_run,
            auto_append_parent,
            name,
            data,
            policy,
            on_stopped,
        } = options;

        let key = TASKS.with(|tasks| {
            tasks.borrow_mut().insert(TaskNode {
                body: Rc::new(body),
                disposer: None,
                children: Vec::new(),
                parent: None,
                runs: 0,
                reasons: SmallVec::new(),
                stopped: false,
                deferred: false,
                policy,
                data,
                name,
                on_stopped,
                on_updated: None,
            })
        });
        let task = Task { key };

        if auto_append_parent {
            if let Some(parent) = current() {
                parent.add_child(&task);
            }
        }
        if auto_run {
            task.run();
        }
        task
    }

    pub(crate) fn from_key(key: TaskKey) -> Task {
        Task { key }
    }

    pub(crate) fn key(&self) -> TaskKey {
        self.key
    }

    /// Execute the body with this node as the active computation.
    ///
    /// Nested runs are strictly nested: the outer computation is restored on
    /// return even if the body panics.
    pub fn run(&self) {
        let prepared = TASKS.with(|tasks| {
            let mut tasks = tasks.borrow_mut();
            let node = tasks.get_mut(self.key)?;
            if node.stopped {
                return None;
            }
            node.runs += 1;
            Some((node.body.clone(), node.runs, node.reasons.to_vec()))
        });
        let Some((body, runs, reasons)) = prepared else {
            return;
        };

        let ctx = TaskCtx {
            task: self.clone(),
            runs,
            reasons,
        };
        let disposer = {
            let _guard = ActiveGuard::push(self.key);
            body(&ctx)
        };

        let orphaned = TASKS.with(|tasks| {
            let mut tasks = tasks.borrow_mut();
            match tasks.get_mut(self.key) {
                Some(node) if !node.stopped => {
                    node.disposer = disposer;
                    None
                }
                // Self-stopped during the run: the fresh disposer still owns
                // resources created by this run, so it must fire.
                _ => disposer,
            }
        });
        if let Some(dispose) = orphaned {
            dispose();
        }
    }

    /// Number of completed-or-started runs.
    pub fn runs(&self) -> u32 {
        TASKS.with(|tasks| tasks.borrow().get(self.key).map(|n| n.runs).unwrap_or(0))
    }

    /// True for stopped nodes and for handles whose node is gone.
    pub fn is_stopped(&self) -> bool {
        TASKS.with(|tasks| {
            tasks
                .borrow()
                .get(self.key)
                .map(|node| node.stopped)
                .unwrap_or(true)
        })
    }

    pub fn name(&self) -> Option<&'static str> {
        TASKS.with(|tasks| tasks.borrow().get(self.key).and_then(|n| n.name))
    }

    /// Append a pending change reason; no-op on a terminal node.
    pub fn add_reason(&self, reason: ChangeReason) {
        TASKS.with(|tasks| {
            let mut tasks = tasks.borrow_mut();
            if let Some(node) = tasks.get_mut(self.key) {
                if !node.stopped {
                    node.reasons.push(reason);
                }
            }
        });
    }

    /// Evaluate this node's update policy over its pending reasons.
    pub fn should_update(&self) -> bool {
        let snapshot = TASKS.with(|tasks| {
            let tasks = tasks.borrow();
            let node = tasks.get(self.key)?;
            if node.stopped {
                return None;
            }
            Some((node.policy.clone(), node.reasons.to_vec()))
        });
        let Some((policy, reasons)) = snapshot else {
            return false;
        };
        match policy {
            UpdatePolicy::Collapse => collapse_changed(&reasons),
            UpdatePolicy::Custom(predicate) => predicate(&reasons),
        }
    }

    /// Re-run now if the update policy says so.
    ///
    /// Releases every dependency edge from the previous run, invokes the
    /// prior disposer, re-runs, clears pending reasons. Returns whether a
    /// re-run happened; terminal nodes always return false.
    pub fn force_update(&self) -> bool {
        if self.is_stopped() || !self.should_update() {
            return false;
        }

        registry::release(self.key);
        let disposer = TASKS.with(|tasks| {
            tasks
                .borrow_mut()
                .get_mut(self.key)
                .and_then(|node| node.disposer.take())
        });
        if let Some(dispose) = disposer {
            dispose();
        }

        self.run();

        let hook = TASKS.with(|tasks| {
            let mut tasks = tasks.borrow_mut();
            tasks.get_mut(self.key).and_then(|node| {
                node.reasons.clear();
                node.on_updated.clone()
            })
        });
        if let Some(on_updated) = hook {
            on_updated();
        }
        true
    }

    /// External notification entry point.
    ///
    /// Scheduler-bound nodes enqueue for the next flush; everything else
    /// updates synchronously. The indirection keeps dependency notification
    /// from re-rendering mid-write: writes are allowed inside another
    /// computation's run.
    pub fn update(&self) {
        let deferred = TASKS.with(|tasks| {
            tasks
                .borrow()
                .get(self.key)
                .map(|node| (node.stopped, node.deferred))
        });
        match deferred {
            Some((false, true)) => scheduler::enqueue(self),
            Some((false, false)) => {
                let _ = self.force_update();
            }
            _ => {}
        }
    }

    /// Route `update()` through the scheduler from now on; `on_updated`
    /// fires after each re-run that actually happened.
    pub fn bind_scheduler(&self, on_updated: Option<Rc<dyn Fn()>>) {
        TASKS.with(|tasks| {
            if let Some(node) = tasks.borrow_mut().get_mut(self.key) {
                node.deferred = true;
                node.on_updated = on_updated;
            }
        });
    }

    /// Stop this node: every child first (children cannot outlive the
    /// parent), then detach from the parent, run the disposer, release all
    /// dependency edges. Idempotent; safe from within the node's own body or
    /// disposer. Afterwards `update()`/`force_update()` are permanent no-ops.
    pub fn stop(&self) {
        let prepared = TASKS.with(|tasks| {
            let mut tasks = tasks.borrow_mut();
            let node = tasks.get_mut(self.key)?;
            if node.stopped {
                return None;
            }
            node.stopped = true;
            Some((std::mem::take(&mut node.children), node.parent.take()))
        });
        let Some((children, parent)) = prepared else {
            return;
        };

        for child in children {
            Task::from_key(child).stop();
        }
        if let Some(parent) = parent {
            TASKS.with(|tasks| {
                if let Some(node) = tasks.borrow_mut().get_mut(parent) {
                    node.children.retain(|child| *child != self.key);
                }
            });
        }

        let (disposer, on_stopped) = TASKS.with(|tasks| {
            let mut tasks = tasks.borrow_mut();
            match tasks.get_mut(self.key) {
                Some(node) => (node.disposer.take(), node.on_stopped.take()),
                None => (None, None),
            }
        });
        if let Some(dispose) = disposer {
            dispose();
        }
        if let Some(on_stopped) = on_stopped {
            on_stopped();
        }

        registry::release(self.key);
        scheduler::discard(self.key);
        TASKS.with(|tasks| {
            tasks.borrow_mut().remove(self.key);
        });
    }

    /// Take ownership of `child`.
    pub fn add_child(&self, child: &Task) {
        TASKS.with(|tasks| {
            let mut tasks = tasks.borrow_mut();
            if !tasks.contains_key(self.key) || !tasks.contains_key(child.key) {
                return;
            }
            let node = &mut tasks[self.key];
            if !node.children.contains(&child.key) {
                node.children.push(child.key);
            }
            tasks[child.key].parent = Some(self.key);
        });
    }

    pub fn set_data(&self, data: Rc<dyn Any>) {
        TASKS.with(|tasks| {
            if let Some(node) = tasks.borrow_mut().get_mut(self.key) {
                node.data = Some(data);
            }
        });
    }

    pub fn data(&self) -> Option<Rc<dyn Any>> {
        TASKS.with(|tasks| tasks.borrow().get(self.key).and_then(|n| n.data.clone()))
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("key", &self.key)
            .field("name", &self.name())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Default policy: collapse per (target, key) to (oldest old, newest new)
/// and report a change iff some collapsed pair differs.
fn collapse_changed(reasons: &[ChangeReason]) -> bool {
    let mut collapsed: IndexMap<(AggregateId, Key), (Option<Value>, Option<Value>)> =
        IndexMap::new();
    for reason in reasons {
        collapsed
            .entry((reason.target, reason.key.clone()))
            .and_modify(|(_, newest)| *newest = reason.new.clone())
            .or_insert((reason.old.clone(), reason.new.clone()));
    }
    collapsed.values().any(|(old, new)| old != new)
}

// =============================================================================
// Tests
// =============================================================================
