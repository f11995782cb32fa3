//! Connection setup and the caller-side transaction helper.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DatabaseTransaction,
    TransactionTrait,
};

use crate::error::EngineError;

/// Pool options applied on connect.
#[derive(Debug, Clone, Default)]
pub struct ConnectOpts {
    pub max_conns: Option<u32>,
    pub min_conns: Option<u32>,
    pub acquire_timeout: Option<Duration>,
    /// Emit sqlx statement logs.
    pub sql_logging: bool,
}

/// Open a pooled connection.
///
/// # Errors
/// Returns [`EngineError::Execution`] if the pool cannot be created.
pub async fn connect_db(dsn: &str, opts: ConnectOpts) -> Result<Db, EngineError> {
    let ConnectOpts {
        max_conns,
        min_conns,
        acquire_timeout,
        sql_logging,
    } = opts;

    let mut options = ConnectOptions::new(dsn.to_owned());
    if let Some(n) = max_conns {
        options.max_connections(n);
    }
    if let Some(n) = min_conns {
        options.min_connections(n);
    }
    if let Some(t) = acquire_timeout {
        options.acquire_timeout(t);
    }
    options.sqlx_logging(sql_logging);

    let conn = Database::connect(options).await?;
    tracing::debug!(backend = ?conn.get_database_backend(), "database connected");
    Ok(Db { conn })
}

/// Owned database handle.
#[derive(Debug, Clone)]
pub struct Db {
    conn: DatabaseConnection,
}

impl Db {
    #[must_use]
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    #[must_use]
    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    /// Begin a transaction owned by the caller.
    ///
    /// # Errors
    /// Returns [`EngineError::Execution`] if the backend refuses to begin.
    pub async fn begin(&self) -> Result<DatabaseTransaction, EngineError> {
        Ok(self.conn.begin().await?)
    }

    /// Run `f` inside a fresh transaction. Commits on `Ok`, rolls back on `Err`.
    ///
    /// # Errors
    /// Returns the closure's error, or [`EngineError::Execution`] if begin or
    /// commit fails.
    pub async fn transaction<T, F>(&self, f: F) -> Result<T, EngineError>
    where
        T: Send,
        F: for<'a> FnOnce(
                &'a DatabaseTransaction,
            ) -> Pin<Box<dyn Future<Output = Result<T, EngineError>> + Send + 'a>>
            + Send,
    {
        let txn = self.conn.begin().await?;
        match f(&txn).await {
            Ok(v) => {
                txn.commit().await?;
                Ok(v)
            }
            Err(e) => {
                if let Err(rollback) = txn.rollback().await {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }
}
