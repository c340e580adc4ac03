#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use loader::apply::{ChangeSource, Loader, LoaderOptions, ReplayItem};
use loader::database::MemoryDatabase;
use loader::ddl::MySqlDdlErrorClassifier;
use loader::error::LoaderResult;
use loader::executor::Executor;
use loader::retry::RetryPolicy;
use loader::types::{Cell, TableInfo, TableName};

/// Table keyed by `id` with a unique `email`.
pub fn users() -> Arc<TableInfo> {
    Arc::new(TableInfo::new(
        TableName::new("app", "users"),
        vec!["id".into(), "email".into(), "name".into()],
        vec!["id".into()],
        vec![vec!["email".into()]],
    ))
}

/// Table keyed by `id` only.
pub fn orders() -> Arc<TableInfo> {
    Arc::new(TableInfo::new(
        TableName::new("app", "orders"),
        vec!["id".into(), "total".into()],
        vec!["id".into()],
        vec![],
    ))
}

pub fn user(id: i64, email: &str, name: &str) -> HashMap<String, Cell> {
    HashMap::from([
        ("id".to_string(), Cell::I64(id)),
        ("email".to_string(), Cell::from(email)),
        ("name".to_string(), Cell::from(name)),
    ])
}

pub fn user_row(id: i64, email: &str, name: &str) -> Vec<Cell> {
    vec![Cell::I64(id), Cell::from(email), Cell::from(name)]
}

pub fn order(id: i64, total: i64) -> HashMap<String, Cell> {
    HashMap::from([
        ("id".to_string(), Cell::I64(id)),
        ("total".to_string(), Cell::I64(total)),
    ])
}

/// Returns rows sorted by their first column, storage order being irrelevant to assertions.
pub fn sorted_rows(database: &MemoryDatabase, table: &TableName) -> Vec<Vec<Cell>> {
    let mut rows = database.rows(table);
    rows.sort_by_key(|row| row.first().map(|cell| cell.to_string()));
    rows
}

/// Creates a database holding the [`users`] and [`orders`] tables.
pub fn memory_database() -> MemoryDatabase {
    let database = MemoryDatabase::new();
    database.create_table(users());
    database.create_table(orders());
    database
}

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::from_millis(10))
}

pub fn loader_options(safe_mode: bool, max_attempts: u32) -> LoaderOptions {
    LoaderOptions {
        safe_mode,
        retry: fast_retry(max_attempts),
        max_parallel_tables: 4,
    }
}

pub fn memory_loader(
    database: MemoryDatabase,
    batch_size: usize,
    options: LoaderOptions,
) -> Loader<MemoryDatabase, MySqlDdlErrorClassifier> {
    let executor = Executor::new(database).with_batch_size(batch_size);
    Loader::new(executor, MySqlDdlErrorClassifier, options)
}

/// [`ChangeSource`] replaying a fixed list of items.
#[derive(Debug, Default)]
pub struct VecSource {
    items: VecDeque<ReplayItem>,
}

impl VecSource {
    pub fn new(items: impl IntoIterator<Item = ReplayItem>) -> Self {
        Self {
            items: items.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.items.len()
    }
}

impl ChangeSource for VecSource {
    async fn next_item(&mut self) -> LoaderResult<Option<ReplayItem>> {
        Ok(self.items.pop_front())
    }
}
