//! Applies changes to the destination in transactions.

mod transaction;

pub use transaction::MeteredTransaction;

use metrics::counter;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::batch::{delete_statements, replace_statement, split_changes};
use crate::database::Database;
use crate::ddl::DdlStatement;
use crate::error::{ErrorKind, LoaderError, LoaderResult};
use crate::loader_error;
use crate::merge::merge_by_key;
use crate::metrics::LOADER_CHANGES_APPLIED_TOTAL;
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::types::{Change, ChangeKind, Statement, quote_identifier};

/// Default maximum number of changes applied by one transaction.
pub const DEFAULT_BATCH_SIZE: usize = 128;

/// Statement form used to apply a merged bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BulkOperation {
    /// One `DELETE` per change.
    Delete,
    /// A single multi-row `REPLACE`.
    Replace,
}

impl BulkOperation {
    fn for_kind(kind: ChangeKind) -> Self {
        match kind {
            ChangeKind::Delete => BulkOperation::Delete,
            ChangeKind::Insert | ChangeKind::Update => BulkOperation::Replace,
        }
    }

    fn statements(self, batch: &[Change]) -> LoaderResult<Vec<Statement>> {
        match self {
            BulkOperation::Delete => delete_statements(batch),
            BulkOperation::Replace => Ok(replace_statement(batch)?.into_iter().collect()),
        }
    }
}

/// Applies the changes of one table to a [`Database`].
#[derive(Debug, Clone)]
pub struct Executor<D> {
    database: D,
    batch_size: usize,
    default_schema: Option<String>,
}

impl<D> Executor<D>
where
    D: Database,
{
    pub fn new(database: D) -> Self {
        Self {
            database,
            batch_size: DEFAULT_BATCH_SIZE,
            default_schema: None,
        }
    }

    /// Sets the maximum number of changes per transaction, zero being treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Sets the schema selected for DDL statements that do not name one.
    pub fn with_default_schema(mut self, schema: impl Into<String>) -> Self {
        self.default_schema = Some(schema.into());
        self
    }

    pub fn database(&self) -> &D {
        &self.database
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Merges the changes of one table and applies the resulting buckets.
    ///
    /// Buckets are applied in [`ChangeKind::APPLY_ORDER`], each one only after the previous one
    /// fully committed. The batches of a bucket are applied concurrently in independent
    /// transactions. When some of them fail, the others may still have committed.
    pub async fn exec_table_batch(&self, changes: &[Change]) -> LoaderResult<()> {
        let applied = self.exec_merged(changes).await?;
        record_applied(&applied);

        Ok(())
    }

    /// Runs [`Executor::exec_table_batch`] under `policy`, retrying the whole table on failure.
    ///
    /// Applied changes are counted once, after the table succeeded.
    pub async fn exec_table_batch_retry(
        &self,
        changes: &[Change],
        policy: &RetryPolicy,
    ) -> LoaderResult<()> {
        let applied = retry_with_backoff(policy, "table", || self.exec_merged(changes)).await?;
        record_applied(&applied);

        Ok(())
    }

    /// Applies the merged buckets and returns the number of changes of each kind.
    async fn exec_merged(&self, changes: &[Change]) -> LoaderResult<Vec<(ChangeKind, u64)>> {
        let Some(first) = changes.first() else {
            return Ok(Vec::new());
        };

        let merged = merge_by_key(changes)?;

        debug!(
            database = D::name(),
            table = %first.table_name(),
            changes = changes.len(),
            deletes = merged.bucket(ChangeKind::Delete).len(),
            inserts = merged.bucket(ChangeKind::Insert).len(),
            updates = merged.bucket(ChangeKind::Update).len(),
            "merged table changes"
        );

        let mut applied = Vec::with_capacity(ChangeKind::APPLY_ORDER.len());
        for (kind, bucket) in merged.into_buckets() {
            if bucket.is_empty() {
                continue;
            }

            let count = bucket.len() as u64;
            self.split_exec(bucket, BulkOperation::for_kind(kind)).await?;
            applied.push((kind, count));
        }

        Ok(applied)
    }

    /// Applies `changes` one by one in a single transaction.
    ///
    /// In safe mode updates are rewritten as a delete followed by a replace and inserts as a
    /// replace, which tolerates rows that are missing or already present. Every other change
    /// uses its natural statement.
    pub async fn single_exec(&self, changes: &[Change], safe_mode: bool) -> LoaderResult<()> {
        if changes.is_empty() {
            return Ok(());
        }

        // Built before the transaction opens so that unusable changes never open one.
        let statements = single_statements(changes, safe_mode)?;

        exec_in_transaction(&self.database, &statements).await
    }

    /// Runs [`Executor::single_exec`] on consecutive groups of at most the batch size, retrying
    /// each group independently under `policy`.
    ///
    /// Stops at the first group that still fails after its retries; earlier groups stay applied.
    pub async fn single_exec_retry(
        &self,
        changes: &[Change],
        safe_mode: bool,
        policy: &RetryPolicy,
    ) -> LoaderResult<()> {
        for group in changes.chunks(self.batch_size) {
            retry_with_backoff(policy, "group", || self.single_exec(group, safe_mode)).await?;

            counter!(LOADER_CHANGES_APPLIED_TOTAL, "change_kind" => "single")
                .increment(group.len() as u64);
        }

        Ok(())
    }

    /// Executes a DDL statement in its own transaction.
    ///
    /// The statement's schema, or else the default schema, is selected first. A selected schema
    /// stays on the pooled connection after the transaction, so it is set for every DDL.
    pub async fn exec_ddl(&self, ddl: &DdlStatement) -> LoaderResult<()> {
        let mut statements = Vec::with_capacity(2);
        if let Some(schema) = ddl.schema.as_deref().or(self.default_schema.as_deref()) {
            statements.push(Statement::raw(format!("USE {}", quote_identifier(schema))));
        }
        statements.push(Statement::raw(ddl.sql.clone()));

        exec_in_transaction(&self.database, &statements).await
    }

    /// Applies every batch of `bucket` concurrently, each in its own transaction.
    ///
    /// All batches run to completion. Their failures are aggregated in the order they were
    /// observed.
    async fn split_exec(&self, bucket: Vec<Change>, operation: BulkOperation) -> LoaderResult<()> {
        let batches = split_changes(bucket, self.batch_size)
            .iter()
            .map(|batch| operation.statements(batch))
            .collect::<LoaderResult<Vec<_>>>()?;

        let mut join_set = JoinSet::new();
        for statements in batches.into_iter().filter(|statements| !statements.is_empty()) {
            let database = self.database.clone();
            join_set.spawn(async move { exec_in_transaction(&database, &statements).await });
        }

        let mut errors = Vec::new();
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => errors.push(err),
                Err(join_err) => errors.push(loader_error!(
                    ErrorKind::ApplyTaskPanic,
                    "Batch task did not complete",
                    join_err
                )),
            }
        }

        if errors.is_empty() {
            return Ok(());
        }

        Err(LoaderError::from(errors))
    }
}

fn record_applied(applied: &[(ChangeKind, u64)]) {
    for &(kind, count) in applied {
        counter!(LOADER_CHANGES_APPLIED_TOTAL, "change_kind" => kind.as_str()).increment(count);
    }
}

/// Returns the statements applying `changes` one at a time.
fn single_statements(changes: &[Change], safe_mode: bool) -> LoaderResult<Vec<Statement>> {
    let mut statements = Vec::with_capacity(changes.len());
    for change in changes {
        match (safe_mode, change.kind) {
            (true, ChangeKind::Update) => {
                statements.push(change.delete_statement()?);
                statements.push(change.replace_statement()?);
            }
            (true, ChangeKind::Insert) => statements.push(change.replace_statement()?),
            _ => statements.push(change.natural_statement()?),
        }
    }

    Ok(statements)
}

/// Executes `statements` in order in one transaction and commits it.
///
/// The first failing statement rolls the transaction back and its error is returned.
pub async fn exec_in_transaction<D>(database: &D, statements: &[Statement]) -> LoaderResult<()>
where
    D: Database,
{
    let mut transaction = MeteredTransaction::begin(database).await?;

    for statement in statements {
        debug!(%statement, "executing statement");

        if let Err(err) = transaction.exec(statement).await {
            error!(%statement, error = %err, "statement failed, rolling back transaction");

            if let Err(rollback_err) = transaction.rollback().await {
                warn!(error = %rollback_err, "failed to roll back transaction");
            }

            return Err(err);
        }
    }

    transaction.commit().await
}
