//! Merged and batched application checked against applying every change on its own, in order.

mod common;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::slice;

use loader::database::MemoryDatabase;
use loader::executor::Executor;
use loader::merge::merge_by_key;
use loader::types::{Cell, Change, ChangeKind};
use proptest::prelude::*;

use common::*;

#[derive(Debug, Clone, Copy)]
enum Op {
    Insert {
        id: i64,
        email: u8,
    },
    Update {
        id: i64,
        new_id: Option<i64>,
        email: Option<u8>,
        name: u8,
    },
    Delete {
        id: i64,
    },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..6i64, 0..4u8).prop_map(|(id, email)| Op::Insert { id, email }),
        (
            0..6i64,
            proptest::option::of(0..6i64),
            proptest::option::of(0..4u8),
            0..3u8
        )
            .prop_map(|(id, new_id, email, name)| Op::Update {
                id,
                new_id,
                email,
                name,
            }),
        (0..6i64).prop_map(|id| Op::Delete { id }),
    ]
}

fn seed_ops() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(
        (0..6i64, 0..4u8).prop_map(|(id, email)| Op::Insert { id, email }),
        0..5,
    )
}

/// Live rows of `users` by id, as `(email, name)`.
type Model = BTreeMap<i64, (String, String)>;

fn email_taken(model: &Model, email: &str, except: Option<i64>) -> bool {
    model
        .iter()
        .any(|(id, (taken, _))| Some(*id) != except && taken == email)
}

/// Turns `ops` into changes that are each valid against `model` at their position, dropping
/// the ones that would break a key.
fn changes_from(model: &mut Model, ops: &[Op]) -> Vec<Change> {
    let mut changes = Vec::new();

    for op in ops {
        match *op {
            Op::Insert { id, email } => {
                let email = format!("u{email}@x");
                if model.contains_key(&id) || email_taken(model, &email, None) {
                    continue;
                }

                changes.push(Change::insert(users(), user(id, &email, "n0")));
                model.insert(id, (email, "n0".to_string()));
            }
            Op::Update {
                id,
                new_id,
                email,
                name,
            } => {
                let Some((old_email, old_name)) = model.get(&id).cloned() else {
                    continue;
                };
                let new_id = new_id.unwrap_or(id);
                let email = email
                    .map(|email| format!("u{email}@x"))
                    .unwrap_or_else(|| old_email.clone());
                let name = format!("n{name}");
                if (new_id != id && model.contains_key(&new_id))
                    || email_taken(model, &email, Some(id))
                {
                    continue;
                }

                changes.push(Change::update(
                    users(),
                    user(id, &old_email, &old_name),
                    user(new_id, &email, &name),
                ));
                model.remove(&id);
                model.insert(new_id, (email, name));
            }
            Op::Delete { id } => {
                let Some((email, name)) = model.remove(&id) else {
                    continue;
                };

                changes.push(Change::delete(users(), user(id, &email, &name)));
            }
        }
    }

    changes
}

fn model_rows(model: &Model) -> Vec<Vec<Cell>> {
    let mut rows: Vec<_> = model
        .iter()
        .map(|(id, (email, name))| user_row(*id, email, name))
        .collect();
    rows.sort_by_key(|row| row.first().map(|cell| cell.to_string()));
    rows
}

fn id_of(image: &HashMap<String, Cell>) -> i64 {
    match image.get("id") {
        Some(Cell::I64(id)) => *id,
        other => panic!("unexpected id {other:?}"),
    }
}

async fn seeded(seed: &[Change], batch_size: usize) -> Executor<MemoryDatabase> {
    let executor = Executor::new(memory_database()).with_batch_size(batch_size);
    executor.single_exec(seed, false).await.unwrap();
    executor
}

/// Final `users` rows after applying `changes` row by row, merged, and in safe mode.
fn final_rows(seed: &[Change], changes: &[Change], batch_size: usize) -> [Vec<Vec<Cell>>; 3] {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async {
        let row_by_row = seeded(seed, batch_size).await;
        for change in changes {
            row_by_row
                .single_exec(slice::from_ref(change), false)
                .await
                .unwrap();
        }

        let merged = seeded(seed, batch_size).await;
        merged.exec_table_batch(changes).await.unwrap();

        let safe = seeded(seed, batch_size).await;
        safe.single_exec(changes, true).await.unwrap();

        [row_by_row, merged, safe]
            .map(|executor| sorted_rows(executor.database(), &users().name))
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn merged_and_safe_apply_match_row_by_row_apply(
        seed in seed_ops(),
        ops in prop::collection::vec(op(), 0..24),
        batch_size in 1usize..8,
    ) {
        let mut model = Model::new();
        let seed = changes_from(&mut model, &seed);
        let changes = changes_from(&mut model, &ops);

        let [row_by_row, merged, safe] = final_rows(&seed, &changes, batch_size);

        prop_assert_eq!(&row_by_row, &model_rows(&model));
        prop_assert_eq!(&merged, &row_by_row);
        prop_assert_eq!(&safe, &row_by_row);
    }

    #[test]
    fn merging_keeps_one_final_change_per_key(
        seed in seed_ops(),
        ops in prop::collection::vec(op(), 0..24),
    ) {
        let mut model = Model::new();
        changes_from(&mut model, &seed);
        let changes = changes_from(&mut model, &ops);

        let touched: BTreeSet<i64> = changes
            .iter()
            .flat_map(|change| [&change.old_values, &change.values])
            .filter(|image| !image.is_empty())
            .map(id_of)
            .collect();

        let merged = merge_by_key(&changes).unwrap();
        let mut keys = HashSet::new();
        let mut merged_ids = BTreeSet::new();
        for kind in ChangeKind::APPLY_ORDER {
            for change in merged.bucket(kind) {
                let key = change.new_row_key().unwrap();
                prop_assert!(keys.insert(key.to_string()), "key {} merged twice", key);

                if kind == ChangeKind::Delete {
                    let id = id_of(&change.old_values);
                    prop_assert!(!model.contains_key(&id));
                    merged_ids.insert(id);
                } else {
                    let id = id_of(&change.values);
                    let (email, name) = &model[&id];
                    prop_assert_eq!(&change.values, &user(id, email, name));
                    merged_ids.insert(id);
                }
            }
        }

        prop_assert_eq!(merged_ids, touched);
    }
}
