//! Drives the replay of a change stream: DML batches per table and DDL statements in order.

use std::future::Future;
use std::sync::Arc;

use loader_config::shared::LoaderConfig;
use metrics::counter;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::database::Database;
use crate::ddl::{DdlErrorClassifier, DdlStatement};
use crate::error::{ErrorKind, LoaderError, LoaderResult};
use crate::executor::Executor;
use crate::loader_error;
use crate::metrics::LOADER_DDL_ERRORS_IGNORED_TOTAL;
use crate::retry::RetryPolicy;
use crate::types::{Change, TableName};

/// One unit read from a change source.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayItem {
    /// Row changes, possibly spanning several tables.
    Dml(Vec<Change>),
    /// A schema change.
    Ddl(DdlStatement),
}

/// Upstream producer of replay items.
pub trait ChangeSource: Send {
    /// Returns the next item, or `None` once the source is exhausted.
    fn next_item(&mut self) -> impl Future<Output = LoaderResult<Option<ReplayItem>>> + Send;
}

/// Outcome of applying a DDL statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdlOutcome {
    Applied,
    /// The statement failed with an error classified as ignorable.
    Ignored,
}

/// Counters describing a completed replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub items: u64,
    pub changes: u64,
    pub ddls: u64,
    pub ignored_ddl_errors: u64,
}

/// Options of a [`Loader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderOptions {
    /// Applies changes row by row instead of merging them.
    pub safe_mode: bool,
    pub retry: RetryPolicy,
    /// Maximum number of tables applied concurrently.
    pub max_parallel_tables: usize,
}

impl From<&LoaderConfig> for LoaderOptions {
    fn from(config: &LoaderConfig) -> Self {
        Self {
            safe_mode: config.safe_mode,
            retry: RetryPolicy::from(&config.retry),
            max_parallel_tables: usize::from(config.max_parallel_tables),
        }
    }
}

/// Applies replayed changes and schema changes to a destination database.
pub struct Loader<D, C> {
    executor: Executor<D>,
    classifier: C,
    options: LoaderOptions,
    table_permits: Arc<Semaphore>,
}

impl<D, C> Loader<D, C>
where
    D: Database,
    C: DdlErrorClassifier,
{
    pub fn new(executor: Executor<D>, classifier: C, options: LoaderOptions) -> Self {
        let table_permits = Arc::new(Semaphore::new(options.max_parallel_tables.max(1)));

        Self {
            executor,
            classifier,
            options,
            table_permits,
        }
    }

    pub fn executor(&self) -> &Executor<D> {
        &self.executor
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    /// Applies a mixed stream of row changes.
    ///
    /// Changes are grouped by table, keeping their relative order, and tables are applied
    /// concurrently. Each table is retried as a whole, or group by group in safe mode. Failures
    /// of all tables are aggregated.
    pub async fn apply_dmls(&self, changes: Vec<Change>) -> LoaderResult<()> {
        let tables = group_by_table(changes);
        if tables.is_empty() {
            return Ok(());
        }

        debug!(tables = tables.len(), "applying changes");

        let mut join_set = JoinSet::new();
        for (table, changes) in tables {
            let executor = self.executor.clone();
            let permits = self.table_permits.clone();
            let options = self.options;

            join_set.spawn(async move {
                let _permit = permits.acquire_owned().await.map_err(|err| {
                    loader_error!(
                        ErrorKind::InvalidState,
                        "Table concurrency limiter closed",
                        err
                    )
                })?;

                let result = if options.safe_mode {
                    executor
                        .single_exec_retry(&changes, true, &options.retry)
                        .await
                } else {
                    executor
                        .exec_table_batch_retry(&changes, &options.retry)
                        .await
                };

                result.map_err(|err| {
                    let kind = err.kind();
                    loader_error!(kind, "Applying table changes failed", table, source: err)
                })
            });
        }

        let mut errors = Vec::new();
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => errors.push(err),
                Err(join_err) => errors.push(loader_error!(
                    ErrorKind::ApplyTaskPanic,
                    "Table task did not complete",
                    join_err
                )),
            }
        }

        if errors.is_empty() {
            return Ok(());
        }

        Err(LoaderError::from(errors))
    }

    /// Applies a schema change, skipping it when the failure is classified as ignorable.
    pub async fn apply_ddl(&self, ddl: &DdlStatement) -> LoaderResult<DdlOutcome> {
        match self.executor.exec_ddl(ddl).await {
            Ok(()) => {
                info!(sql = %ddl.sql, schema = ?ddl.schema, "applied ddl");
                Ok(DdlOutcome::Applied)
            }
            Err(err) if self.classifier.is_ignorable(&err) => {
                warn!(sql = %ddl.sql, schema = ?ddl.schema, error = %err, "ignoring ddl error");
                counter!(LOADER_DDL_ERRORS_IGNORED_TOTAL).increment(1);
                Ok(DdlOutcome::Ignored)
            }
            Err(err) => Err(err),
        }
    }

    /// Drains `source`, applying every item before reading the next one.
    pub async fn run<S>(&self, source: &mut S) -> LoaderResult<ReplayStats>
    where
        S: ChangeSource,
    {
        let mut stats = ReplayStats::default();

        while let Some(item) = source.next_item().await? {
            stats.items += 1;

            match item {
                ReplayItem::Dml(changes) => {
                    stats.changes += changes.len() as u64;
                    self.apply_dmls(changes).await?;
                }
                ReplayItem::Ddl(ddl) => {
                    stats.ddls += 1;
                    if self.apply_ddl(&ddl).await? == DdlOutcome::Ignored {
                        stats.ignored_ddl_errors += 1;
                    }
                }
            }
        }

        info!(
            items = stats.items,
            changes = stats.changes,
            ddls = stats.ddls,
            ignored_ddl_errors = stats.ignored_ddl_errors,
            "replay completed"
        );

        Ok(stats)
    }
}

/// Groups changes by table in order of first appearance, keeping their relative order.
pub fn group_by_table(changes: Vec<Change>) -> Vec<(TableName, Vec<Change>)> {
    let mut tables: Vec<(TableName, Vec<Change>)> = Vec::new();

    for change in changes {
        match tables
            .iter_mut()
            .find(|(table, _)| table == change.table_name())
        {
            Some((_, table_changes)) => table_changes.push(change),
            None => tables.push((change.table_name().clone(), vec![change])),
        }
    }

    tables
}
