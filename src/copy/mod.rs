//! Parallel bulk-copy pipeline.
//!
//! # Architecture Overview
//!
//! - **`scanner`**: reads the input stream, drops header lines, cuts the rest
//!   into fixed-size batches and honours the row limit.
//! - **`queue`**: bounded hand-off (capacity `2 × workers`) between the
//!   scanner and the workers. A full queue suspends the scanner.
//! - **`worker`**: each worker owns one database connection and a prebuilt
//!   `COPY ... FROM STDIN` command, and copies every batch it dequeues.
//! - **`progress`**: lock-free row counter shared by all workers, plus the
//!   optional periodic rate report.
//! - **`pipeline`**: wires the pieces together, waits for the workers to
//!   drain the queue and produces the final summary.
//!
//! ## Data Flow
//!
//! input → scanner → queue → workers → database
//!
//! Batches reach the database in no particular global order; a single
//! worker copies its batches in the order it dequeued them.
//!
//! ## Failure Model
//!
//! Loading is not transactional. The first connect or copy error cancels the
//! run: the scanner and the remaining workers stop at their next queue
//! operation and the error is returned with the number of rows already
//! committed. Nothing is retried or rolled back.

pub mod batch;
pub mod command;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod scanner;
pub mod worker;

pub use batch::Batch;
pub use command::{CopyCommand, CopyCommandBuilder};
pub use pipeline::{CopyReport, ParallelCopy};
pub use progress::{ProgressCounter, RateReporter};
pub use queue::{BatchReceiver, BatchSender, batch_queue};
pub use scanner::{ScanStats, scan};
pub use worker::{CopyWorker, WorkerSettings, WorkerStats};
