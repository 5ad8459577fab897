pub mod config;
pub mod copy;
pub mod db;
pub mod error;

pub use config::{BatchOptions, CopyConfig, CopyTarget, RowCountSource};
pub use copy::{CopyReport, ParallelCopy};
pub use db::{ConnectionOverride, Connector, CopyHandle, PgConnector};
pub use error::{ConfigError, CopyError, CopyResult};

use env_logger::Env;
use std::sync::Once;

static LOGGER: Once = Once::new();

/// Initialise `env_logger` once; `RUST_LOG` overrides the default filter.
pub fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(Env::default().default_filter_or("info"))
            .format_timestamp(None)
            .init();
    });
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    pub use database::{TestDatabase, TestDatabaseError};
    pub use input::FailingReader;
    pub use memory::MemoryConnector;

    pub mod input {
        use std::io;
        use std::pin::Pin;
        use std::task::{Context, Poll};

        use tokio::io::{AsyncRead, ReadBuf};

        /// Reader whose every read fails; chain it after real input to cut a
        /// stream short with an I/O error.
        #[derive(Debug, Clone, Copy, Default)]
        pub struct FailingReader;

        impl AsyncRead for FailingReader {
            fn poll_read(
                self: Pin<&mut Self>,
                _cx: &mut Context<'_>,
                _buf: &mut ReadBuf<'_>,
            ) -> Poll<io::Result<()>> {
                Poll::Ready(Err(io::Error::other("disk went away")))
            }
        }
    }

    pub mod memory {
        use std::io;
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::time::Duration;

        use async_trait::async_trait;
        use parking_lot::Mutex;

        use crate::copy::{Batch, CopyCommand};
        use crate::db::{Connector, CopyHandle};
        use crate::error::{CopyError, CopyResult};

        #[derive(Debug, Default)]
        struct Recorded {
            batches: Vec<Vec<Vec<u8>>>,
            commands: Vec<String>,
            executed: Vec<String>,
        }

        /// In-memory stand-in for a database that records every batch it
        /// receives. Clones share the same recording.
        #[derive(Debug, Clone, Default)]
        pub struct MemoryConnector {
            recorded: Arc<Mutex<Recorded>>,
            copy_calls: Arc<AtomicUsize>,
            closed: Arc<AtomicUsize>,
            fail_on_copy: Option<usize>,
            fail_connect: bool,
            reported_rows: Option<u64>,
            copy_delay: Duration,
        }

        impl MemoryConnector {
            pub fn new() -> Self {
                Self::default()
            }

            /// Fail the `call`-th copy across all handles (1-based).
            pub fn failing_on_copy(mut self, call: usize) -> Self {
                self.fail_on_copy = Some(call);
                self
            }

            pub fn failing_connect(mut self) -> Self {
                self.fail_connect = true;
                self
            }

            /// Report `rows` for every copy instead of the batch length.
            pub fn reporting_rows(mut self, rows: u64) -> Self {
                self.reported_rows = Some(rows);
                self
            }

            pub fn with_copy_delay(mut self, delay: Duration) -> Self {
                self.copy_delay = delay;
                self
            }

            /// Batches that were copied successfully, in completion order.
            pub fn batches(&self) -> Vec<Vec<Vec<u8>>> {
                self.recorded.lock().batches.clone()
            }

            pub fn commands(&self) -> Vec<String> {
                self.recorded.lock().commands.clone()
            }

            pub fn executed(&self) -> Vec<String> {
                self.recorded.lock().executed.clone()
            }

            pub fn copied_rows(&self) -> usize {
                self.recorded.lock().batches.iter().map(Vec::len).sum()
            }

            /// Copy attempts, including failed ones.
            pub fn copy_calls(&self) -> usize {
                self.copy_calls.load(Ordering::SeqCst)
            }

            pub fn closed_connections(&self) -> usize {
                self.closed.load(Ordering::SeqCst)
            }
        }

        #[async_trait]
        impl Connector for MemoryConnector {
            type Handle = MemoryHandle;

            async fn connect(&self) -> CopyResult<MemoryHandle> {
                if self.fail_connect {
                    let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
                    return Err(CopyError::Connect(sqlx::Error::Io(refused)));
                }
                Ok(MemoryHandle {
                    connector: self.clone(),
                })
            }
        }

        pub struct MemoryHandle {
            connector: MemoryConnector,
        }

        #[async_trait]
        impl CopyHandle for MemoryHandle {
            async fn execute(&mut self, sql: &str) -> CopyResult<u64> {
                self.connector.recorded.lock().executed.push(sql.to_string());
                Ok(0)
            }

            async fn copy_batch(&mut self, batch: &Batch, command: &CopyCommand) -> CopyResult<u64> {
                let call = self.connector.copy_calls.fetch_add(1, Ordering::SeqCst) + 1;
                if !self.connector.copy_delay.is_zero() {
                    tokio::time::sleep(self.connector.copy_delay).await;
                }
                if self.connector.fail_on_copy == Some(call) {
                    return Err(CopyError::Database(sqlx::Error::Protocol(format!(
                        "copy {call} rejected"
                    ))));
                }

                let mut recorded = self.connector.recorded.lock();
                recorded.batches.push(batch.records().to_vec());
                recorded.commands.push(command.to_string());
                Ok(self
                    .connector
                    .reported_rows
                    .unwrap_or(batch.len() as u64))
            }

            async fn close(self) -> CopyResult<()> {
                self.connector.closed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    pub mod database {
        use log::LevelFilter;
        use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
        use sqlx::{ConnectOptions, PgPool};
        use testcontainers::ImageExt;
        use testcontainers_modules::postgres::Postgres;
        use testcontainers_modules::testcontainers::{
            ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
        };
        use thiserror::Error;

        const POSTGRES_TAG: &str = "16-alpine";

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("container error: {0}")]
            Container(#[from] TestcontainersError),
        }

        /// PostgreSQL instance for integration tests.
        pub struct TestDatabase {
            pool: PgPool,
            url: String,
            _container: Option<ContainerAsync<Postgres>>,
        }

        impl TestDatabase {
            /// Use `TEST_DATABASE_URL` when set, otherwise launch a disposable
            /// Postgres container.
            pub async fn new_from_env() -> Result<Self, TestDatabaseError> {
                match std::env::var("TEST_DATABASE_URL") {
                    Ok(url) => Self::connect(url, None).await,
                    Err(_) => Self::new().await,
                }
            }

            pub async fn new() -> Result<Self, TestDatabaseError> {
                let container = Postgres::default().with_tag(POSTGRES_TAG).start().await?;
                let host = container.get_host().await?.to_string();
                let port = container.get_host_port_ipv4(5432).await?;
                let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);
                Self::connect(url, Some(container)).await
            }

            async fn connect(
                url: String,
                container: Option<ContainerAsync<Postgres>>,
            ) -> Result<Self, TestDatabaseError> {
                let options: PgConnectOptions = url.parse()?;
                let pool = PgPoolOptions::new()
                    .max_connections(2)
                    .connect_with(options.log_statements(LevelFilter::Off))
                    .await?;

                Ok(Self {
                    pool,
                    url,
                    _container: container,
                })
            }

            pub fn url(&self) -> &str {
                &self.url
            }

            pub fn pool(&self) -> &PgPool {
                &self.pool
            }

            /// Close pooled connections before the container goes away.
            pub async fn close(self) {
                self.pool.close().await;
            }
        }
    }
}
