use std::future::Future;

use crate::error::LoaderResult;
use crate::types::Statement;

/// Pooled handle to the destination database.
///
/// The handle is cloned into every concurrently applied batch, so cloning must be cheap and
/// clones must share the same underlying pool.
pub trait Database: Clone + Send + Sync + 'static {
    type Transaction: Transaction;

    /// Returns the name of the database implementation.
    fn name() -> &'static str;

    /// Opens a transaction on its own connection checked out from the pool.
    fn begin(&self) -> impl Future<Output = LoaderResult<Self::Transaction>> + Send;
}

/// A transaction holding one connection until it is committed or rolled back.
///
/// Dropping a transaction without committing it rolls it back.
pub trait Transaction: Send {
    /// Executes `statement` and returns the number of affected rows.
    fn exec(&mut self, statement: &Statement) -> impl Future<Output = LoaderResult<u64>> + Send;

    fn commit(self) -> impl Future<Output = LoaderResult<()>> + Send;

    fn rollback(self) -> impl Future<Output = LoaderResult<()>> + Send;
}
