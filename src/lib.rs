//! # glint-ui
//!
//! Fine-grained reactive rendering engine for Rust.
//!
//! User code declares output in terms of plain dynamic data; the engine
//! tracks exactly which (aggregate, key) pairs each computation reads and
//! re-executes only the minimal set when that data changes.
//!
//! ## Architecture
//!
//! ```text
//! Reactive store -> dependency registry -> tasks -> scheduler -> output diff
//!                                                       |
//!                                   keyed list reconciler + structural fast-paths
//! ```
//!
//! - a write through a [`store::Reactive`] wrapper notifies every task that
//!   read that (aggregate, key) during its latest run;
//! - scheduler-bound tasks coalesce notifications into one re-run per tick
//!   (tick source: the installed document's frame callback);
//! - re-runs produce new output, diffed in place by identity; keyed list
//!   views patch the document through structural fast-paths, falling back to
//!   the generic keyed reconciler for sorts and wholesale replacement.
//!
//! Execution is single-threaded and cooperative: all engine state is
//! thread-local, only one computation is active at a time (strict nesting),
//! and the scheduler's deferred flush is the sole suspension point.
//!
//! ## Modules
//!
//! - [`value`] - dynamic values, keys, raw aggregates
//! - [`store`] - canonical wrappers, tracked access, structural operations
//! - [`task`] - computation nodes and the update scheduler
//! - [`render`] - output model, mount helpers, keyed reconciler
//! - [`element`] - virtual elements and the render entry point
//! - [`list`] - keyed list views with structural fast-paths
//! - [`backend`] - render-target trait and the in-memory document

pub mod backend;
pub mod element;
pub mod error;
pub mod list;
pub mod render;
pub mod store;
pub mod task;
pub mod value;

pub use backend::{Document, NodeId, Position};
pub use element::{
    create_element, render, ChildFn, ComponentFn, Element, ElementInstance, MountTarget, Prop,
    PropValue, Tag,
};
pub use error::Error;
pub use list::{for_each, ForProps, ItemCtx, ItemRender, KeyFn};
pub use render::reconcile::{reconcile, Keyed};
pub use render::{
    append_output, diff_output, format, insert_output, position_of, render_output, unmount_output,
    Output, OutputList, Render,
};
pub use store::{add_read_transform, on_seq_event, try_wrap, wrap, Reactive, SeqEvent};
pub use task::scheduler::{flush, next_tick};
pub use task::{ChangeKind, ChangeReason, Cleanup, Task, TaskCtx, TaskOptions, UpdatePolicy};
pub use value::{Aggregate, AggregateId, Key, RecordRef, SeqRef, Str, Value};
