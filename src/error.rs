//! Error taxonomy for the reactive core.
//!
//! Usage errors (bad indices, writes to read-only projections) fail loudly
//! through `Result`. Consistency errors (duplicate reconciliation keys) are
//! rejected fail-fast. Lifecycle operations on stopped computations are
//! defined as no-ops and never surface here.

use thiserror::Error;

use crate::value::{Key, Value};

/// Errors surfaced synchronously to the caller that triggered them.
#[derive(Debug, Error)]
pub enum Error {
    /// An index passed to `move_to`, `exchange`, or a sequence write is
    /// outside the current bounds.
    #[error("index {index} out of range for sequence of length {len}")]
    OutOfRange { index: usize, len: usize },

    /// Write to a read-only key: a projected list-item field (`value`,
    /// `index`) or the synthetic length key.
    #[error("cannot write read-only key `{key}`")]
    ReadOnly { key: Key },

    /// A sequence operation was applied to a record aggregate.
    #[error("expected a sequence aggregate")]
    NotASequence,

    /// A record operation was applied to a sequence aggregate.
    #[error("expected a record aggregate")]
    NotARecord,

    /// Two non-null entries in one reconciliation snapshot share a key.
    #[error("duplicate key `{0}` in keyed reconciliation")]
    DuplicateKey(Value),

    /// The selector passed to `render` matched nothing in the document.
    #[error("render target not found")]
    TargetNotFound,
}
