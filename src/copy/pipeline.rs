use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncBufRead;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::command::CopyCommand;
use super::progress::{ProgressCounter, RateReporter, per_second};
use super::queue::batch_queue;
use super::scanner::{ScanStats, scan};
use super::worker::{CopyWorker, WorkerSettings};
use crate::config::CopyConfig;
use crate::db::{Connector, CopyHandle};
use crate::error::{ConfigError, CopyError, CopyResult};

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct CopyReport {
    /// Final progress counter value, including any starting offset.
    pub rows: u64,
    pub took: Duration,
    pub workers: usize,
    pub scan: ScanStats,
    pub verbose: bool,
}

impl CopyReport {
    pub fn mean_rate(&self) -> f64 {
        per_second(self.rows, self.took)
    }
}

impl fmt::Display for CopyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "COPY {}", self.rows)?;
        if self.verbose {
            write!(
                f,
                ", took {:?} with {} worker(s) (mean rate {:.6}/sec)",
                self.took,
                self.workers,
                self.mean_rate()
            )?;
        }
        Ok(())
    }
}

/// Parallel bulk loader: one scanner feeding a pool of COPY workers.
pub struct ParallelCopy<C: Connector> {
    connector: Arc<C>,
    config: CopyConfig,
}

impl<C: Connector> ParallelCopy<C> {
    pub fn new(connector: C, config: CopyConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            connector: Arc::new(connector),
            config,
        })
    }

    pub fn config(&self) -> &CopyConfig {
        &self.config
    }

    /// Remove all existing rows from the target table.
    pub async fn truncate(&self) -> CopyResult<()> {
        let sql = format!("TRUNCATE {}", self.config.target.qualified_name());
        log::info!("truncating {}", self.config.target.qualified_name());

        let mut handle = self.connector.connect().await?;
        let result = handle.execute(&sql).await;
        handle.close().await?;
        result.map(|_| ())
    }

    /// Load `input` into the target table.
    ///
    /// Returns [`CopyError::Aborted`] carrying the committed row count if a
    /// worker fails or the input cannot be read; batches committed before
    /// the failure are not rolled back.
    pub async fn run<R>(&self, input: R) -> CopyResult<CopyReport>
    where
        R: AsyncBufRead + Unpin,
    {
        let config = &self.config;
        let options = config.batch_options();
        if config.verbose && options.skip > 0 {
            println!("Skipping the first {} lines of the input.", options.skip);
        }

        let progress = ProgressCounter::new(config.start_rows);
        let cancel = CancellationToken::new();
        let (sender, receiver) = batch_queue(config.workers);
        let command = CopyCommand::from_config(config);
        let settings = WorkerSettings::from(config);

        log::info!(
            "copying into {} with {} worker(s), batch size {}",
            config.target.qualified_name(),
            config.workers,
            options.size
        );
        log::debug!("copy command: {}", command);

        let mut workers = JoinSet::new();
        for id in 0..config.workers {
            let worker = CopyWorker::new(
                id,
                self.connector.clone(),
                command.clone(),
                receiver.clone(),
                progress.clone(),
                cancel.clone(),
                settings,
            );
            workers.spawn(worker.run());
        }
        drop(receiver);

        let reporter_stop = cancel.child_token();
        let reporter = (!config.reporting_period.is_zero()).then(|| {
            RateReporter::new(config.reporting_period, progress.clone())
                .spawn(reporter_stop.clone())
        });

        let start = Instant::now();
        let scanned = scan(input, &options, sender, &cancel).await;
        if let Err(err) = &scanned {
            log::error!("scanner stopped: {}", err);
        }

        let mut failure = None;
        while let Some(joined) = workers.join_next().await {
            let outcome = joined.map_err(CopyError::from).and_then(|result| result);
            if let Err(err) = outcome {
                cancel.cancel();
                failure.get_or_insert(err);
            }
        }
        let took = start.elapsed();

        reporter_stop.cancel();
        if let Some(reporter) = reporter {
            if let Err(err) = reporter.await {
                log::warn!("rate reporter task failed: {}", err);
            }
        }

        let rows = progress.load();
        // a worker failure explains a cancelled scan, so it wins
        let scan = match (failure, scanned) {
            (Some(err), _) | (None, Err(err)) => {
                return Err(CopyError::Aborted {
                    rows_committed: rows,
                    source: Box::new(err),
                });
            }
            (None, Ok(scan)) => scan,
        };

        Ok(CopyReport {
            rows,
            took,
            workers: config.workers,
            scan,
            verbose: config.verbose,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CopyTarget;
    use crate::test_support::{FailingReader, MemoryConnector};
    use tokio::io::{AsyncReadExt, BufReader};

    fn numbered_lines(n: usize) -> Vec<u8> {
        (1..=n).map(|i| format!("{i}\n")).collect::<String>().into_bytes()
    }

    fn config(workers: usize, size: usize) -> CopyConfig {
        let mut config = CopyConfig::new(CopyTarget::new("public", "readings"));
        config.workers = workers;
        config.batch.size = size;
        config
    }

    async fn run(
        connector: MemoryConnector,
        config: CopyConfig,
        input: &[u8],
    ) -> (MemoryConnector, CopyResult<CopyReport>) {
        let recorder = connector.clone();
        let copy = ParallelCopy::new(connector, config).expect("valid config");
        let result = copy.run(input).await;
        (recorder, result)
    }

    fn sorted_sizes(connector: &MemoryConnector) -> Vec<usize> {
        let mut sizes: Vec<usize> = connector.batches().iter().map(Vec::len).collect();
        sizes.sort_unstable_by(|a, b| b.cmp(a));
        sizes
    }

    #[tokio::test]
    async fn ten_lines_in_batches_of_three() {
        let (connector, result) =
            run(MemoryConnector::new(), config(2, 3), &numbered_lines(10)).await;
        let report = result.expect("run succeeds");

        assert_eq!(sorted_sizes(&connector), vec![3, 3, 3, 1]);
        assert_eq!(report.rows, 10);
        assert_eq!(report.scan.batches, 4);
        assert_eq!(report.to_string(), "COPY 10");
    }

    #[tokio::test]
    async fn header_lines_never_reach_the_database() {
        let mut config = config(1, 4);
        config.skip_header = true;
        config.header_line_count = 2;

        let (connector, result) = run(MemoryConnector::new(), config, &numbered_lines(10)).await;

        assert_eq!(result.unwrap().rows, 8);
        assert_eq!(sorted_sizes(&connector), vec![4, 4]);
        assert_eq!(connector.batches()[0][0], b"3".to_vec());
    }

    #[tokio::test]
    async fn row_limit_caps_the_load() {
        let mut config = config(3, 10);
        config.batch.limit = 15;

        let (connector, result) = run(MemoryConnector::new(), config, &numbered_lines(100)).await;

        assert_eq!(result.unwrap().rows, 15);
        assert_eq!(sorted_sizes(&connector), vec![10, 5]);
    }

    #[tokio::test]
    async fn every_line_is_copied_once_for_any_worker_count() {
        for workers in [1, 2, 4, 8] {
            let (connector, result) =
                run(MemoryConnector::new(), config(workers, 7), &numbered_lines(500)).await;

            assert_eq!(result.unwrap().rows, 500);
            let mut seen: Vec<u64> = connector
                .batches()
                .into_iter()
                .flatten()
                .map(|line| String::from_utf8(line).unwrap().parse().unwrap())
                .collect();
            seen.sort_unstable();
            assert_eq!(seen, (1..=500).collect::<Vec<u64>>());
            assert_eq!(connector.closed_connections(), workers);
        }
    }

    #[tokio::test]
    async fn start_rows_seed_the_counter() {
        let mut config = config(1, 5);
        config.start_rows = 1_000;
        config.verbose = true;

        let (_, result) = run(MemoryConnector::new(), config, &numbered_lines(12)).await;
        let report = result.unwrap();

        assert_eq!(report.rows, 1_012);
        let line = report.to_string();
        assert!(line.starts_with("COPY 1012, took "));
        assert!(line.contains("with 1 worker(s) (mean rate "));
    }

    #[tokio::test]
    async fn every_worker_uses_the_same_command() {
        let mut config = config(2, 5);
        config.columns = Some("id".to_string());

        let (connector, result) = run(MemoryConnector::new(), config, &numbered_lines(20)).await;
        result.unwrap();

        let commands = connector.commands();
        assert_eq!(commands.len(), 4);
        assert!(commands.iter().all(|c| {
            c == r#"COPY "public"."readings"(id) FROM STDIN WITH DELIMITER ',' CSV"#
        }));
    }

    #[tokio::test]
    async fn copy_failure_aborts_with_committed_rows() {
        let (connector, result) = run(
            MemoryConnector::new().failing_on_copy(3),
            config(1, 10),
            &numbered_lines(100),
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.rows_committed(), Some(20));
        match err {
            CopyError::Aborted { source, .. } => {
                assert!(matches!(*source, CopyError::Worker { worker: 0, .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        // no retry of the failed batch
        assert_eq!(connector.copy_calls(), 3);
        assert_eq!(connector.copied_rows(), 20);
    }

    #[tokio::test]
    async fn failure_with_many_workers_stops_the_scanner() {
        let (connector, result) = run(
            MemoryConnector::new().failing_on_copy(2),
            config(4, 1),
            &numbered_lines(10_000),
        )
        .await;

        assert!(result.is_err());
        assert!(connector.copied_rows() < 10_000);
    }

    #[tokio::test]
    async fn read_error_still_copies_queued_batches() {
        let connector = MemoryConnector::new();
        let recorder = connector.clone();
        let copy = ParallelCopy::new(connector, config(2, 3)).unwrap();
        let lines = numbered_lines(7);
        let input = BufReader::new(lines.as_slice().chain(FailingReader));

        let err = copy.run(input).await.unwrap_err();

        match &err {
            CopyError::Aborted { source, .. } => {
                assert!(matches!(**source, CopyError::Read(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        // the two full batches were queued before the error; the partial
        // seventh row never was
        assert_eq!(err.rows_committed(), Some(6));
        assert_eq!(recorder.copied_rows(), 6);
        assert_eq!(sorted_sizes(&recorder), vec![3, 3]);
        assert_eq!(recorder.closed_connections(), 2);
    }

    #[tokio::test]
    async fn connect_failure_aborts_the_run() {
        let (_, result) = run(
            MemoryConnector::new().failing_connect(),
            config(2, 10),
            &numbered_lines(50),
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.rows_committed(), Some(0));
    }

    #[tokio::test]
    async fn truncate_runs_before_loading() {
        let connector = MemoryConnector::new();
        let recorder = connector.clone();
        let copy = ParallelCopy::new(connector, config(1, 10)).unwrap();

        copy.truncate().await.unwrap();
        assert_eq!(recorder.executed(), vec![r#"TRUNCATE "public"."readings""#.to_string()]);
        assert_eq!(recorder.closed_connections(), 1);
    }

    #[tokio::test]
    async fn reporter_runs_alongside_the_copy() {
        let mut config = config(2, 5);
        config.reporting_period = Duration::from_millis(5);

        let (_, result) = run(
            MemoryConnector::new().with_copy_delay(Duration::from_millis(2)),
            config,
            &numbered_lines(50),
        )
        .await;
        assert_eq!(result.unwrap().rows, 50);
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let result = ParallelCopy::new(MemoryConnector::new(), config(1, 0));
        assert!(matches!(result, Err(ConfigError::BatchSize(0))));
    }
}
