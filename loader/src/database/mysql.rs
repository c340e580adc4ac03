use loader_config::shared::{IntoConnectOptions, MySqlConnectionConfig};
use sqlx::mysql::{MySqlArguments, MySqlPoolOptions};
use sqlx::query::Query;
use sqlx::{MySql, MySqlPool};
use tracing::info;

use crate::database::{Database, Transaction};
use crate::error::LoaderResult;
use crate::types::{Cell, Statement, StatementShape};

/// [`Database`] backed by a `sqlx` MySQL connection pool.
#[derive(Debug, Clone)]
pub struct MySqlDatabase {
    pool: MySqlPool,
}

impl MySqlDatabase {
    /// Connects a pool to the configured destination database.
    pub async fn connect(config: &MySqlConnectionConfig) -> LoaderResult<Self> {
        let options = config.with_db();

        let pool = MySqlPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        info!(
            host = %config.host,
            port = config.port,
            database = %config.name,
            max_connections = config.max_connections,
            "connected to destination database"
        );

        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

impl Database for MySqlDatabase {
    type Transaction = MySqlTransaction;

    fn name() -> &'static str {
        "mysql"
    }

    async fn begin(&self) -> LoaderResult<Self::Transaction> {
        let inner = self.pool.begin().await?;

        Ok(MySqlTransaction { inner })
    }
}

/// Transaction on a pooled MySQL connection.
pub struct MySqlTransaction {
    inner: sqlx::Transaction<'static, MySql>,
}

impl Transaction for MySqlTransaction {
    async fn exec(&mut self, statement: &Statement) -> LoaderResult<u64> {
        // Raw statements go through the text protocol since not every DDL can be prepared.
        if matches!(statement.shape, StatementShape::Raw) && statement.args.is_empty() {
            let result =
                sqlx::Executor::execute(&mut *self.inner, sqlx::raw_sql(&statement.sql)).await?;
            return Ok(result.rows_affected());
        }

        let query = statement
            .args
            .iter()
            .fold(sqlx::query(&statement.sql), bind_cell);
        let result = query.execute(&mut *self.inner).await?;

        Ok(result.rows_affected())
    }

    async fn commit(self) -> LoaderResult<()> {
        self.inner.commit().await?;

        Ok(())
    }

    async fn rollback(self) -> LoaderResult<()> {
        self.inner.rollback().await?;

        Ok(())
    }
}

fn bind_cell<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    cell: &Cell,
) -> Query<'q, MySql, MySqlArguments> {
    match cell {
        Cell::Null => query.bind(None::<String>),
        Cell::Bool(value) => query.bind(*value),
        Cell::I64(value) => query.bind(*value),
        Cell::U64(value) => query.bind(*value),
        Cell::F64(value) => query.bind(*value),
        Cell::String(value) => query.bind(value.clone()),
        Cell::Bytes(value) => query.bind(value.clone()),
        Cell::Date(value) => query.bind(*value),
        Cell::Time(value) => query.bind(*value),
        Cell::Timestamp(value) => query.bind(*value),
        Cell::Json(value) => query.bind(sqlx::types::Json(value.clone())),
    }
}
