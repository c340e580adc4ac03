use std::time::Instant;

use metrics::histogram;

use crate::database::{Database, Transaction};
use crate::error::{LoaderError, LoaderResult};
use crate::loader_error;
use crate::metrics::{LOADER_QUERY_DURATION_SECONDS, QUERY_TYPE_LABEL};
use crate::types::Statement;

/// Transaction recording the latency of every execution and commit.
///
/// Failures keep their [`crate::error::ErrorKind`] and carry the failing statement. The
/// transaction is never rolled back on an execution failure, the caller decides.
pub struct MeteredTransaction<T> {
    inner: T,
}

impl<T> MeteredTransaction<T>
where
    T: Transaction,
{
    /// Opens a transaction on `database`.
    pub async fn begin<D>(database: &D) -> LoaderResult<Self>
    where
        D: Database<Transaction = T>,
    {
        let inner = database.begin().await?;

        Ok(Self { inner })
    }

    pub async fn exec(&mut self, statement: &Statement) -> LoaderResult<u64> {
        let start = Instant::now();
        let result = self.inner.exec(statement).await;
        histogram!(LOADER_QUERY_DURATION_SECONDS, QUERY_TYPE_LABEL => "exec")
            .record(start.elapsed().as_secs_f64());

        result.map_err(|err| with_statement(err, statement))
    }

    pub async fn commit(self) -> LoaderResult<()> {
        let start = Instant::now();
        let result = self.inner.commit().await;
        histogram!(LOADER_QUERY_DURATION_SECONDS, QUERY_TYPE_LABEL => "commit")
            .record(start.elapsed().as_secs_f64());

        result.map_err(|err| {
            let kind = err.kind();
            loader_error!(kind, "Transaction commit failed", source: err)
        })
    }

    pub async fn rollback(self) -> LoaderResult<()> {
        self.inner.rollback().await
    }
}

/// Wraps `err` with the statement that caused it, keeping its kind.
fn with_statement(err: LoaderError, statement: &Statement) -> LoaderError {
    let kind = err.kind();
    let detail = match err.detail() {
        Some(cause) => format!("statement: {statement}\ncause: {cause}"),
        None => format!("statement: {statement}"),
    };

    loader_error!(kind, "Statement execution failed", detail = detail, source: err)
}
