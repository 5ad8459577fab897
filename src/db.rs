//! Database driver seam.
//!
//! The pipeline only needs to open connections, run a plain statement and
//! stream a batch through `COPY ... FROM STDIN`. [`PgConnector`] provides
//! that on top of sqlx; tests plug in an in-memory implementation.

use async_trait::async_trait;
use log::LevelFilter;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Connection};

use crate::copy::{Batch, CopyCommand};
use crate::error::{CopyError, CopyResult};

const APPLICATION_NAME: &str = "parallel-copy";

/// Opens connections for workers and for the truncate pre-step.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Handle: CopyHandle;

    async fn connect(&self) -> CopyResult<Self::Handle>;
}

/// One open connection, owned by a single task.
#[async_trait]
pub trait CopyHandle: Send + 'static {
    /// Run a statement, returning the affected row count.
    async fn execute(&mut self, sql: &str) -> CopyResult<u64>;

    /// Stream `batch` through `command`, returning the rows the server
    /// reports as copied.
    async fn copy_batch(&mut self, batch: &Batch, command: &CopyCommand) -> CopyResult<u64>;

    async fn close(self) -> CopyResult<()>;
}

/// Adjustments applied on top of the parsed connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionOverride {
    DatabaseName(String),
}

impl ConnectionOverride {
    fn apply(&self, options: PgConnectOptions) -> PgConnectOptions {
        match self {
            ConnectionOverride::DatabaseName(name) => options.database(name),
        }
    }
}

/// PostgreSQL connector backed by sqlx.
#[derive(Debug, Clone)]
pub struct PgConnector {
    options: PgConnectOptions,
}

impl PgConnector {
    pub fn new(url: &str, overrides: &[ConnectionOverride]) -> CopyResult<Self> {
        let options: PgConnectOptions = url.parse().map_err(CopyError::Connect)?;
        Ok(Self::with_options(options, overrides))
    }

    pub fn with_options(options: PgConnectOptions, overrides: &[ConnectionOverride]) -> Self {
        let options = overrides
            .iter()
            .fold(options, |options, item| item.apply(options))
            .application_name(APPLICATION_NAME)
            .log_statements(LevelFilter::Debug);
        Self { options }
    }

    #[cfg(test)]
    fn database(&self) -> Option<&str> {
        self.options.get_database()
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Handle = PgHandle;

    async fn connect(&self) -> CopyResult<PgHandle> {
        let conn = PgConnection::connect_with(&self.options)
            .await
            .map_err(CopyError::Connect)?;
        Ok(PgHandle { conn })
    }
}

pub struct PgHandle {
    conn: PgConnection,
}

#[async_trait]
impl CopyHandle for PgHandle {
    async fn execute(&mut self, sql: &str) -> CopyResult<u64> {
        let result = sqlx::query(sql).execute(&mut self.conn).await?;
        Ok(result.rows_affected())
    }

    async fn copy_batch(&mut self, batch: &Batch, command: &CopyCommand) -> CopyResult<u64> {
        let mut copy = self.conn.copy_in_raw(command.as_str()).await?;

        let sent = copy.send(batch.copy_payload()).await.map(|_| ());
        if let Err(err) = sent {
            if let Err(abort_err) = copy.abort(err.to_string()).await {
                log::debug!("aborting COPY failed: {}", abort_err);
            }
            return Err(err.into());
        }

        let rows = copy.finish().await?;
        log::trace!("copied {} rows", rows);
        Ok(rows)
    }

    async fn close(self) -> CopyResult<()> {
        self.conn.close().await?;
        Ok(())
    }
}
