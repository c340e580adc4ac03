//! Collapses the changes of one table into at most one effective change per row key.

use std::collections::HashMap;

use crate::error::LoaderResult;
use crate::types::{Change, ChangeKind, RowKey};

/// Changes of one table after merging, split by their effective kind.
///
/// Every row key appears in at most one bucket and at most once in it. Each bucket keeps the
/// order in which its keys first appeared in the input.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MergedChanges {
    deletes: Vec<Change>,
    inserts: Vec<Change>,
    updates: Vec<Change>,
}

impl MergedChanges {
    /// Returns the bucket holding the changes whose effective kind is `kind`.
    pub fn bucket(&self, kind: ChangeKind) -> &[Change] {
        match kind {
            ChangeKind::Delete => &self.deletes,
            ChangeKind::Insert => &self.inserts,
            ChangeKind::Update => &self.updates,
        }
    }

    /// Consumes the result, returning the buckets in [`ChangeKind::APPLY_ORDER`].
    pub fn into_buckets(self) -> [(ChangeKind, Vec<Change>); 3] {
        [
            (ChangeKind::Delete, self.deletes),
            (ChangeKind::Insert, self.inserts),
            (ChangeKind::Update, self.updates),
        ]
    }

    /// Total number of effective changes.
    pub fn len(&self) -> usize {
        self.deletes.len() + self.inserts.len() + self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Effective {
    kind: ChangeKind,
    change: Change,
}

/// Per-key state of the merge, in first-appearance order of the keys.
#[derive(Default)]
struct KeyedChanges {
    slots: Vec<Effective>,
    positions: HashMap<RowKey, usize>,
}

impl KeyedChanges {
    fn get(&self, key: &RowKey) -> Option<&Effective> {
        self.positions.get(key).map(|&position| &self.slots[position])
    }

    fn set(&mut self, key: RowKey, effective: Effective) {
        match self.positions.get(&key) {
            Some(&position) => self.slots[position] = effective,
            None => {
                self.positions.insert(key, self.slots.len());
                self.slots.push(effective);
            }
        }
    }

    fn apply_insert(&mut self, key: RowKey, change: Change) {
        let kind = match self.get(&key) {
            Some(previous) if previous.kind != ChangeKind::Delete => ChangeKind::Update,
            _ => ChangeKind::Insert,
        };
        self.set(key, Effective { kind, change });
    }

    fn apply_delete(&mut self, key: RowKey, change: Change) {
        self.set(
            key,
            Effective {
                kind: ChangeKind::Delete,
                change,
            },
        );
    }
}

/// Merges the ordered changes of one table by row key.
///
/// Replaying the result has the same effect as replaying the input when the table is seen as a
/// key-value store:
/// - an insert of an absent or deleted key stays an insert, an insert of a live key becomes an
///   update;
/// - an update replaces whatever was recorded for its key;
/// - an update that changes the key deletes the old key and inserts the new one;
/// - a delete discards whatever was recorded for its key.
///
/// Fails with [`crate::error::ErrorKind::KeyResolutionFailed`] if any change has no usable key,
/// in which case nothing is returned.
pub fn merge_by_key(changes: &[Change]) -> LoaderResult<MergedChanges> {
    let mut keyed = KeyedChanges::default();

    for change in changes {
        let key = change.row_key()?;

        match change.kind {
            ChangeKind::Insert => keyed.apply_insert(key, change.clone()),
            ChangeKind::Delete => keyed.apply_delete(key, change.clone()),
            ChangeKind::Update => {
                let new_key = change.new_row_key()?;
                if new_key == key {
                    keyed.set(
                        key,
                        Effective {
                            kind: ChangeKind::Update,
                            change: change.clone(),
                        },
                    );
                } else {
                    let delete = Change::delete(change.table.clone(), change.old_values.clone());
                    let insert = Change::insert(change.table.clone(), change.values.clone());
                    keyed.apply_delete(key, delete);
                    keyed.apply_insert(new_key, insert);
                }
            }
        }
    }

    let mut merged = MergedChanges::default();
    for Effective { kind, change } in keyed.slots {
        match kind {
            ChangeKind::Delete => merged.deletes.push(change),
            ChangeKind::Insert => merged.inserts.push(change),
            ChangeKind::Update => merged.updates.push(change),
        }
    }

    Ok(merged)
}
