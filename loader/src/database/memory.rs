use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::database::{Database, Transaction};
use crate::error::{ErrorKind, LoaderError, LoaderResult};
use crate::loader_error;
use crate::types::{Cell, Statement, StatementShape, TableInfo, TableName};

/// Errors raised by [`MemoryDatabase`] while applying statements.
///
/// Mirrors the MySQL server errors the real destination would report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryDbError {
    #[error("Duplicate entry '{key}' for key '{constraint}' on {table}")]
    DuplicateEntry {
        table: TableName,
        constraint: String,
        key: String,
    },
    #[error("Table {0} doesn't exist")]
    TableMissing(TableName),
    #[error("Unknown column '{column}' in {table}")]
    UnknownColumn { table: TableName, column: String },
    #[error("Statement expects {expected} arguments but {actual} were bound")]
    ArgumentCount { expected: usize, actual: usize },
    #[error("Injected {0} failure")]
    Injected(&'static str),
    #[error("Server error {code}: {message}")]
    Server { code: u16, message: String },
}

impl MemoryDbError {
    /// Returns the MySQL error number matching this error, if any.
    pub fn mysql_error_code(&self) -> Option<u16> {
        match self {
            MemoryDbError::DuplicateEntry { .. } => Some(1062),
            MemoryDbError::TableMissing(_) => Some(1146),
            MemoryDbError::UnknownColumn { .. } => Some(1054),
            MemoryDbError::Server { code, .. } => Some(*code),
            MemoryDbError::ArgumentCount { .. } | MemoryDbError::Injected(_) => None,
        }
    }

    fn into_loader_error(self, description: &'static str) -> LoaderError {
        let kind = match self {
            MemoryDbError::DuplicateEntry { .. } => ErrorKind::DestinationConstraintViolation,
            MemoryDbError::TableMissing(_) => ErrorKind::DestinationTableMissing,
            _ => ErrorKind::DestinationQueryFailed,
        };

        loader_error!(kind, description, self.to_string(), source: self)
    }
}

/// Transaction counters of a [`MemoryDatabase`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionStats {
    pub begun: usize,
    pub committed: usize,
    pub rolled_back: usize,
}

#[derive(Debug, Clone)]
struct MemoryTable {
    info: Arc<TableInfo>,
    rows: Vec<Vec<Cell>>,
}

impl MemoryTable {
    fn column_index(&self, column: &str) -> Result<usize, MemoryDbError> {
        self.info
            .columns
            .iter()
            .position(|candidate| candidate == column)
            .ok_or_else(|| MemoryDbError::UnknownColumn {
                table: self.info.name.clone(),
                column: column.to_string(),
            })
    }

    /// Returns the unique constraints as `(name, column indexes)`.
    fn constraints(&self) -> Result<Vec<(String, Vec<usize>)>, MemoryDbError> {
        let mut constraints = Vec::new();
        if !self.info.primary_key.is_empty() {
            constraints.push(("PRIMARY".to_string(), self.indexes(&self.info.primary_key)?));
        }
        for key in self.info.unique_keys.iter().filter(|key| !key.is_empty()) {
            constraints.push((key.join("_"), self.indexes(key)?));
        }

        Ok(constraints)
    }

    fn indexes(&self, columns: &[String]) -> Result<Vec<usize>, MemoryDbError> {
        columns
            .iter()
            .map(|column| self.column_index(column))
            .collect()
    }

    /// Builds a full row from `columns` and `values`, unlisted columns being `NULL`.
    fn build_row(&self, columns: &[String], values: &[Cell]) -> Result<Vec<Cell>, MemoryDbError> {
        let mut row = vec![Cell::Null; self.info.columns.len()];
        for (column, value) in columns.iter().zip(values) {
            row[self.column_index(column)?] = value.clone();
        }

        Ok(row)
    }

    /// Returns the position of the first row whose `key_columns` equal `key_values`.
    fn find_by_key(
        &self,
        key_columns: &[String],
        key_values: &[Cell],
    ) -> Result<Option<usize>, MemoryDbError> {
        let indexes = self.indexes(key_columns)?;

        Ok(self.rows.iter().position(|row| {
            indexes
                .iter()
                .zip(key_values)
                .all(|(&index, value)| cells_equal(&row[index], value))
        }))
    }

    /// Returns the positions of rows, other than `skip`, conflicting with `row` on any unique
    /// constraint. `NULL` values never conflict.
    fn conflicts(
        &self,
        row: &[Cell],
        skip: Option<usize>,
    ) -> Result<Vec<(usize, String, String)>, MemoryDbError> {
        let mut conflicts = Vec::new();
        for (name, indexes) in self.constraints()? {
            if indexes.iter().any(|&index| row[index].is_null()) {
                continue;
            }

            for (position, existing) in self.rows.iter().enumerate() {
                if Some(position) == skip || conflicts.iter().any(|(p, _, _)| *p == position) {
                    continue;
                }

                if indexes
                    .iter()
                    .all(|&index| cells_equal(&existing[index], &row[index]))
                {
                    let key = indexes
                        .iter()
                        .map(|&index| row[index].to_string())
                        .collect::<Vec<_>>()
                        .join("-");
                    conflicts.push((position, name.clone(), key));
                }
            }
        }

        Ok(conflicts)
    }
}

fn cells_equal(a: &Cell, b: &Cell) -> bool {
    !a.is_null() && !b.is_null() && a.key_encoding() == b.key_encoding()
}

fn check_argument_count(expected: usize, actual: usize) -> Result<(), MemoryDbError> {
    if expected != actual {
        return Err(MemoryDbError::ArgumentCount { expected, actual });
    }

    Ok(())
}

#[derive(Debug, Clone, Default)]
struct Tables {
    tables: HashMap<TableName, MemoryTable>,
}

impl Tables {
    fn table_mut(&mut self, name: &TableName) -> Result<&mut MemoryTable, MemoryDbError> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| MemoryDbError::TableMissing(name.clone()))
    }

    /// Applies `statement` with MySQL semantics and returns the affected row count.
    fn apply(&mut self, statement: &Statement) -> Result<u64, MemoryDbError> {
        let args = statement.args.as_slice();

        match &statement.shape {
            StatementShape::Delete { table, key_columns } => {
                check_argument_count(key_columns.len(), args.len())?;
                let table = self.table_mut(table)?;

                match table.find_by_key(key_columns, args)? {
                    Some(position) => {
                        table.rows.remove(position);
                        Ok(1)
                    }
                    None => Ok(0),
                }
            }
            StatementShape::Replace {
                table,
                columns,
                rows,
            } => {
                check_argument_count(columns.len() * rows, args.len())?;
                let table = self.table_mut(table)?;

                let mut affected = 0;
                for values in args.chunks(columns.len().max(1)).take(*rows) {
                    let row = table.build_row(columns, values)?;

                    let mut conflicting = table
                        .conflicts(&row, None)?
                        .into_iter()
                        .map(|(position, _, _)| position)
                        .collect::<Vec<_>>();
                    conflicting.sort_unstable();
                    for position in conflicting.into_iter().rev() {
                        table.rows.remove(position);
                        affected += 1;
                    }

                    table.rows.push(row);
                    affected += 1;
                }

                Ok(affected)
            }
            StatementShape::Insert { table, columns } => {
                check_argument_count(columns.len(), args.len())?;
                let table = self.table_mut(table)?;

                let row = table.build_row(columns, args)?;
                if let Some((_, constraint, key)) = table.conflicts(&row, None)?.into_iter().next()
                {
                    return Err(MemoryDbError::DuplicateEntry {
                        table: table.info.name.clone(),
                        constraint,
                        key,
                    });
                }

                table.rows.push(row);
                Ok(1)
            }
            StatementShape::Update {
                table,
                columns,
                key_columns,
            } => {
                check_argument_count(columns.len() + key_columns.len(), args.len())?;
                let table = self.table_mut(table)?;

                let (values, key_values) = args.split_at(columns.len());
                let Some(position) = table.find_by_key(key_columns, key_values)? else {
                    return Ok(0);
                };

                let mut row = table.rows[position].clone();
                for (column, value) in columns.iter().zip(values) {
                    row[table.column_index(column)?] = value.clone();
                }

                if let Some((_, constraint, key)) =
                    table.conflicts(&row, Some(position))?.into_iter().next()
                {
                    return Err(MemoryDbError::DuplicateEntry {
                        table: table.info.name.clone(),
                        constraint,
                        key,
                    });
                }

                if table.rows[position] == row {
                    return Ok(0);
                }
                table.rows[position] = row;
                Ok(1)
            }
            StatementShape::Raw => Ok(0),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    tables: Tables,
    exec_failures: usize,
    exec_failure_skips: usize,
    commit_failures: usize,
    raw_failures: VecDeque<u16>,
    executed: Vec<Statement>,
    stats: TransactionStats,
}

/// In-process [`Database`] emulating a MySQL destination.
///
/// Tables enforce their primary and unique keys, and statements follow MySQL `DELETE`,
/// `REPLACE`, `INSERT` and `UPDATE` semantics. Each transaction works on a snapshot taken when
/// it begins and replays its statements onto the shared state when it commits, so concurrent
/// transactions touching disjoint keys never interfere.
///
/// Failures can be injected to exercise retries and rollbacks.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates `table`, replacing any existing table with the same name and its rows.
    pub fn create_table(&self, table: Arc<TableInfo>) {
        let mut inner = self.inner.lock();

        info!(table = %table.name, "creating in-memory table");

        inner.tables.tables.insert(
            table.name.clone(),
            MemoryTable {
                info: table,
                rows: Vec::new(),
            },
        );
    }

    /// Returns the committed rows of `table` in storage order, each in the table's column order.
    pub fn rows(&self, table: &TableName) -> Vec<Vec<Cell>> {
        let inner = self.inner.lock();
        inner
            .tables
            .tables
            .get(table)
            .map(|table| table.rows.clone())
            .unwrap_or_default()
    }

    /// Returns every successfully executed statement, committed or not, in execution order.
    pub fn executed_statements(&self) -> Vec<Statement> {
        self.inner.lock().executed.clone()
    }

    pub fn transaction_stats(&self) -> TransactionStats {
        self.inner.lock().stats
    }

    /// Makes the next `count` statement executions fail.
    pub fn inject_exec_failures(&self, count: usize) {
        self.inject_exec_failures_after(0, count);
    }

    /// Lets the next `successes` statement executions through, then makes `count` fail.
    pub fn inject_exec_failures_after(&self, successes: usize, count: usize) {
        let mut inner = self.inner.lock();
        inner.exec_failure_skips = successes;
        inner.exec_failures = count;
    }

    /// Makes the next `count` commits fail.
    pub fn inject_commit_failures(&self, count: usize) {
        self.inner.lock().commit_failures = count;
    }

    /// Makes the next raw statement fail with the MySQL error number `code`.
    pub fn fail_next_raw(&self, code: u16) {
        self.inner.lock().raw_failures.push_back(code);
    }
}

impl Database for MemoryDatabase {
    type Transaction = MemoryTransaction;

    fn name() -> &'static str {
        "memory"
    }

    async fn begin(&self) -> LoaderResult<Self::Transaction> {
        let mut inner = self.inner.lock();
        inner.stats.begun += 1;

        Ok(MemoryTransaction {
            database: self.clone(),
            snapshot: inner.tables.clone(),
            statements: Vec::new(),
        })
    }
}

/// Transaction of a [`MemoryDatabase`].
#[derive(Debug)]
pub struct MemoryTransaction {
    database: MemoryDatabase,
    snapshot: Tables,
    statements: Vec<Statement>,
}

impl Transaction for MemoryTransaction {
    async fn exec(&mut self, statement: &Statement) -> LoaderResult<u64> {
        {
            let mut inner = self.database.inner.lock();
            if inner.exec_failures > 0 {
                if inner.exec_failure_skips > 0 {
                    inner.exec_failure_skips -= 1;
                } else {
                    inner.exec_failures -= 1;
                    return Err(
                        MemoryDbError::Injected("exec").into_loader_error("Statement failed")
                    );
                }
            }

            if matches!(statement.shape, StatementShape::Raw) {
                if let Some(code) = inner.raw_failures.pop_front() {
                    let err = MemoryDbError::Server {
                        code,
                        message: format!("injected failure for `{}`", statement.sql),
                    };
                    return Err(err.into_loader_error("Statement failed"));
                }
            }
        }

        let affected = self
            .snapshot
            .apply(statement)
            .map_err(|err| err.into_loader_error("Statement failed"))?;

        debug!(%statement, affected, "applied statement to snapshot");

        self.statements.push(statement.clone());
        self.database.inner.lock().executed.push(statement.clone());

        Ok(affected)
    }

    async fn commit(self) -> LoaderResult<()> {
        let mut inner = self.database.inner.lock();
        if inner.commit_failures > 0 {
            inner.commit_failures -= 1;
            return Err(loader_error!(
                ErrorKind::DestinationTransactionFailed,
                "Commit failed",
                source: MemoryDbError::Injected("commit")
            ));
        }

        let mut tables = inner.tables.clone();
        for statement in &self.statements {
            tables
                .apply(statement)
                .map_err(|err| err.into_loader_error("Commit failed"))?;
        }

        inner.tables = tables;
        inner.stats.committed += 1;

        Ok(())
    }

    async fn rollback(self) -> LoaderResult<()> {
        self.database.inner.lock().stats.rolled_back += 1;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Change;

    fn users() -> Arc<TableInfo> {
        Arc::new(TableInfo::new(
            TableName::new("test", "users"),
            vec!["id".into(), "email".into()],
            vec!["id".into()],
            vec![vec!["email".into()]],
        ))
    }

    fn user(id: i64, email: &str) -> HashMap<String, Cell> {
        HashMap::from([
            ("id".to_string(), Cell::I64(id)),
            ("email".to_string(), Cell::from(email)),
        ])
    }

    async fn exec_committed(database: &MemoryDatabase, statements: &[Statement]) -> LoaderResult<()> {
        let mut transaction = database.begin().await?;
        for statement in statements {
            transaction.exec(statement).await?;
        }
        transaction.commit().await
    }

    #[tokio::test]
    async fn replace_removes_rows_conflicting_on_any_unique_key() {
        let database = MemoryDatabase::new();
        database.create_table(users());

        let first = Change::insert(users(), user(1, "a@x")).replace_statement().unwrap();
        let second = Change::insert(users(), user(2, "a@x")).replace_statement().unwrap();
        exec_committed(&database, &[first, second]).await.unwrap();

        assert_eq!(
            database.rows(&users().name),
            vec![vec![Cell::I64(2), Cell::from("a@x")]]
        );
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_unique_key() {
        let database = MemoryDatabase::new();
        database.create_table(users());

        let first = Change::insert(users(), user(1, "a@x")).natural_statement().unwrap();
        let second = Change::insert(users(), user(2, "a@x")).natural_statement().unwrap();
        let err = exec_committed(&database, &[first, second]).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DestinationConstraintViolation);
        assert!(database.rows(&users().name).is_empty());
    }

    #[tokio::test]
    async fn update_of_a_missing_row_affects_nothing() {
        let database = MemoryDatabase::new();
        database.create_table(users());

        let update = Change::update(users(), user(1, "a@x"), user(1, "b@x"));
        let mut transaction = database.begin().await.unwrap();
        let affected = transaction
            .exec(&update.natural_statement().unwrap())
            .await
            .unwrap();

        assert_eq!(affected, 0);
    }

    #[tokio::test]
    async fn uncommitted_changes_are_invisible() {
        let database = MemoryDatabase::new();
        database.create_table(users());

        let mut transaction = database.begin().await.unwrap();
        transaction
            .exec(&Change::insert(users(), user(1, "a@x")).replace_statement().unwrap())
            .await
            .unwrap();
        assert!(database.rows(&users().name).is_empty());

        transaction.rollback().await.unwrap();
        assert!(database.rows(&users().name).is_empty());
        assert_eq!(
            database.transaction_stats(),
            TransactionStats {
                begun: 1,
                committed: 0,
                rolled_back: 1
            }
        );
    }

    #[tokio::test]
    async fn unknown_tables_are_reported_as_missing() {
        let database = MemoryDatabase::new();

        let err = exec_committed(
            &database,
            &[Change::insert(users(), user(1, "a@x")).replace_statement().unwrap()],
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DestinationTableMissing);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let database = MemoryDatabase::new();
        database.create_table(users());
        database.inject_exec_failures(1);
        database.inject_commit_failures(1);

        let statement = Change::insert(users(), user(1, "a@x")).replace_statement().unwrap();

        let err = exec_committed(&database, &[statement.clone()]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DestinationQueryFailed);

        let err = exec_committed(&database, &[statement.clone()]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DestinationTransactionFailed);

        exec_committed(&database, &[statement]).await.unwrap();
        assert_eq!(database.rows(&users().name).len(), 1);
    }

    #[test]
    fn server_errors_expose_their_code() {
        let err = MemoryDbError::Server {
            code: 1050,
            message: "table exists".to_string(),
        };
        assert_eq!(err.mysql_error_code(), Some(1050));
        assert_eq!(MemoryDbError::Injected("exec").mysql_error_code(), None);
    }
}
