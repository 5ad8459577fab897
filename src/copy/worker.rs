use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use super::command::CopyCommand;
use super::progress::{ProgressCounter, per_second};
use super::queue::BatchReceiver;
use crate::config::{CopyConfig, RowCountSource};
use crate::db::{Connector, CopyHandle};
use crate::error::{CopyError, CopyResult};

/// Per-worker knobs taken from the run configuration.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub log_batches: bool,
    pub batch_size: usize,
    pub row_count_source: RowCountSource,
}

impl From<&CopyConfig> for WorkerSettings {
    fn from(config: &CopyConfig) -> Self {
        Self {
            log_batches: config.log_batches,
            batch_size: config.batch.size,
            row_count_source: config.row_count_source,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub batches: usize,
    pub rows: u64,
}

/// Owns one connection and copies every batch it dequeues.
pub struct CopyWorker<C: Connector> {
    id: usize,
    connector: Arc<C>,
    command: CopyCommand,
    queue: BatchReceiver,
    progress: ProgressCounter,
    cancel: CancellationToken,
    settings: WorkerSettings,
}

impl<C: Connector> CopyWorker<C> {
    pub fn new(
        id: usize,
        connector: Arc<C>,
        command: CopyCommand,
        queue: BatchReceiver,
        progress: ProgressCounter,
        cancel: CancellationToken,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            id,
            connector,
            command,
            queue,
            progress,
            cancel,
            settings,
        }
    }

    /// Copy batches until the queue is drained or the run is cancelled.
    ///
    /// Any connect or copy failure cancels the whole run; committed batches
    /// stay committed and nothing is retried.
    pub async fn run(self) -> CopyResult<WorkerStats> {
        match self.copy_batches().await {
            Ok(stats) => {
                log::debug!(
                    "worker {}: done, {} batches / {} rows",
                    self.id,
                    stats.batches,
                    stats.rows
                );
                Ok(stats)
            }
            Err(err) => {
                log::error!("worker {}: {}", self.id, err);
                self.cancel.cancel();
                Err(CopyError::worker(self.id, err))
            }
        }
    }

    async fn copy_batches(&self) -> CopyResult<WorkerStats> {
        let mut handle = self.connector.connect().await?;
        log::debug!("worker {}: connected", self.id);

        let result = self.drain_queue(&mut handle).await;

        if let Err(err) = handle.close().await {
            log::warn!("worker {}: failed to close connection: {}", self.id, err);
        }
        result
    }

    async fn drain_queue(&self, handle: &mut C::Handle) -> CopyResult<WorkerStats> {
        let mut stats = WorkerStats::default();

        loop {
            let batch = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    log::debug!("worker {}: run cancelled", self.id);
                    break;
                }
                next = self.queue.recv() => match next {
                    Some(batch) => batch,
                    None => break,
                },
            };

            let start = Instant::now();
            let reported = handle.copy_batch(&batch, &self.command).await?;
            let lines = batch.len() as u64;
            if reported != lines {
                log::warn!(
                    "worker {}: server reported {} rows for a batch of {} lines",
                    self.id,
                    reported,
                    lines
                );
            }

            let rows = match self.settings.row_count_source {
                RowCountSource::Driver => reported,
                RowCountSource::Batch => lines,
            };
            self.progress.add(rows);
            stats.batches += 1;
            stats.rows += rows;

            if self.settings.log_batches {
                let took = start.elapsed();
                println!(
                    "[BATCH] took {:?}, batch size {}, row rate {:.6}/sec",
                    took,
                    self.settings.batch_size,
                    per_second(self.settings.batch_size as u64, took)
                );
            }
        }

        Ok(stats)
    }
}
