//! Generic keyed sequence reconciler.
//!
//! Single-pass "longest prefix of already-ordered matches" walk: correct
//! (every surviving item ends in the right slot) but not move-count optimal;
//! ties break by walk order. Items with a null key never match across
//! snapshots - the old one is torn down, the new one freshly mounted.
//!
//! Duplicate non-null keys within the new snapshot are rejected before any
//! document mutation (`Error::DuplicateKey`).

use std::collections::{HashMap, HashSet};

use super::{diff_output, insert_output, position_of, render_output, unmount_output, Output};
use crate::backend::Position;
use crate::error::Error;
use crate::value::Value;

/// One rendered item of a keyed list snapshot.
#[derive(Clone)]
pub struct Keyed {
    pub key: Option<Value>,
    pub output: Output,
}

/// Reconcile `old` against `new`, patching the document minimally.
///
/// `fallback` anchors insertions when no old item survives to position
/// against (e.g. reconciling into an empty slot).
pub fn reconcile(old: &[Keyed], new: Vec<Keyed>, fallback: &Position) -> Result<Vec<Output>, Error> {
    reconcile_with(old, new, fallback, |_, _| {})
}

/// [`reconcile`], reporting every key match as `(old_index, new_index)` so
/// callers with parallel bookkeeping (the list mechanism's shadow items) can
/// follow along.
pub fn reconcile_with(
    old: &[Keyed],
    new: Vec<Keyed>,
    fallback: &Position,
    mut on_match: impl FnMut(usize, usize),
) -> Result<Vec<Output>, Error> {
    // Validate before touching the document: fail fast leaves it intact.
    let mut seen = HashSet::new();
    for item in &new {
        if let Some(key) = &item.key {
            if !seen.insert(key.clone()) {
                return Err(Error::DuplicateKey(key.clone()));
            }
        }
    }

    // Key -> old index; null-key old items are unmounted immediately.
    let mut by_key: HashMap<Value, usize> = HashMap::new();
    let mut first_keyed: Option<Output> = None;
    for (index, item) in old.iter().enumerate() {
        match &item.key {
            Some(key) => {
                by_key.insert(key.clone(), index);
                if first_keyed.is_none() {
                    first_keyed = Some(item.output.clone());
                }
            }
            None => {
                unmount_output(&item.output);
            }
        }
    }

    let mut result = Vec::with_capacity(new.len());
    let mut last_matched: i64 = -1;
    let mut previous: Option<Output> = None;

    for (new_index, item) in new.into_iter().enumerate() {
        let matched = match &item.key {
            Some(key) => by_key.remove(key).map(|old_index| (old_index, key.clone())),
            None => None,
        };
        let output = match matched {
            None => {
                // Pure insertion: right after the previous new item, or at
                // the first surviving old item when it leads the walk.
                render_output(&item.output);
                let position = match (&previous, &first_keyed) {
                    (Some(prev), _) => position_of(prev, true),
                    (None, Some(first)) => position_of(first, false),
                    (None, None) => fallback.clone(),
                };
                insert_output(&item.output, &position);
                item.output
            }
            Some((old_index, _key)) => {
                on_match(old_index, new_index);
                let merged = diff_output(Some(&old[old_index].output), item.output);
                if (old_index as i64) > last_matched {
                    // Already in relative order: leave it untouched.
                    last_matched = old_index as i64;
                } else if let Some(prev) = &previous {
                    insert_output(&merged, &position_of(prev, true));
                }
                merged
            }
        };
        previous = Some(output.clone());
        result.push(output);
    }

    // Keys never matched: their old items are gone from the new snapshot.
    for (index, item) in old.iter().enumerate() {
        if let Some(key) = &item.key {
            if by_key.get(key) == Some(&index) {
                unmount_output(&item.output);
            }
        }
    }

    Ok(result)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{DocOp, MemoryDocument};
    use crate::backend::NodeId;
    use crate::render::{append_output, format, Render};

    fn mounted_items(root: NodeId, texts: &[&str]) -> Vec<Keyed> {
        texts
            .iter()
            .map(|text| {
                let output = format(Render::Text(text.to_string()));
                render_output(&output);
                append_output(&output, root);
                Keyed {
                    key: Some(Value::from(*text)),
                    output,
                }
            })
            .collect()
    }

    fn physical_moves(ops: &[DocOp]) -> usize {
        ops.iter()
            .filter(|op| matches!(op, DocOp::InsertBefore { .. } | DocOp::Append { .. }))
            .count()
    }

    #[test]
    fn test_rotation_performs_exactly_one_move() {
        let doc = MemoryDocument::install();
        let root = doc.create_root("div");
        let old = mounted_items(root, &["1", "2", "3"]);
        doc.take_ops();

        // [1,2,3] -> [2,3,1]: 2 and 3 stay, 1 relocates.
        let new = vec![old[1].clone(), old[2].clone(), old[0].clone()];
        let result = reconcile(&old, new, &Position::default()).unwrap();

        assert_eq!(doc.text_of(root), "231");
        assert_eq!(result.len(), 3);
        assert_eq!(physical_moves(&doc.take_ops()), 1);
    }

    #[test]
    fn test_pure_insertion_before_first_survivor() {
        let doc = MemoryDocument::install();
        let root = doc.create_root("div");
        let old = mounted_items(root, &["1", "2"]);
        doc.take_ops();

        let fresh = Keyed {
            key: Some(Value::from("3")),
            output: format(Render::Text("3".to_string())),
        };
        let new = vec![fresh, old[0].clone(), old[1].clone()];
        reconcile(&old, new, &Position::default()).unwrap();

        assert_eq!(doc.text_of(root), "312");
        // One creation, one insertion; 1 and 2 untouched.
        assert_eq!(physical_moves(&doc.take_ops()), 1);
    }

    #[test]
    fn test_insertion_in_the_middle() {
        let doc = MemoryDocument::install();
        let root = doc.create_root("div");
        let old = mounted_items(root, &["a", "c"]);

        let fresh = Keyed {
            key: Some(Value::from("b")),
            output: format(Render::Text("b".to_string())),
        };
        let new = vec![old[0].clone(), fresh, old[1].clone()];
        reconcile(&old, new, &Position::default()).unwrap();

        assert_eq!(doc.text_of(root), "abc");
    }

    #[test]
    fn test_removed_keys_unmount() {
        let doc = MemoryDocument::install();
        let root = doc.create_root("div");
        let old = mounted_items(root, &["a", "b", "c"]);

        let new = vec![old[0].clone(), old[2].clone()];
        reconcile(&old, new, &Position::default()).unwrap();

        assert_eq!(doc.text_of(root), "ac");
    }

    #[test]
    fn test_null_keys_never_match() {
        let doc = MemoryDocument::install();
        let root = doc.create_root("div");

        let output = format(Render::Text("old".to_string()));
        render_output(&output);
        append_output(&output, root);
        let old = vec![Keyed { key: None, output }];

        let new = vec![Keyed {
            key: None,
            output: format(Render::Text("new".to_string())),
        }];
        reconcile(&old, new, &Position {
            parent: Some(root),
            next_sibling: None,
        })
        .unwrap();

        assert_eq!(doc.text_of(root), "new");
    }

    #[test]
    fn test_duplicate_keys_rejected_before_mutation() {
        let doc = MemoryDocument::install();
        let root = doc.create_root("div");
        let old = mounted_items(root, &["a", "b"]);
        doc.take_ops();

        let new = vec![old[0].clone(), old[0].clone()];
        let err = reconcile(&old, new, &Position::default()).unwrap_err();

        assert!(matches!(err, Error::DuplicateKey(_)));
        assert_eq!(doc.text_of(root), "ab", "failed reconciliation must not touch the tree");
        assert!(doc.take_ops().is_empty());
    }

    #[test]
    fn test_reconcile_into_empty_slot_uses_fallback() {
        let doc = MemoryDocument::install();
        let root = doc.create_root("div");

        let new = vec![
            Keyed {
                key: Some(Value::from("x")),
                output: format(Render::Text("x".to_string())),
            },
            Keyed {
                key: Some(Value::from("y")),
                output: format(Render::Text("y".to_string())),
            },
        ];
        reconcile(
            &[],
            new,
            &Position {
                parent: Some(root),
                next_sibling: None,
            },
        )
        .unwrap();

        assert_eq!(doc.text_of(root), "xy");
    }
}
