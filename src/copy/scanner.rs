//! Streaming batch scanner.
//!
//! Turns an input byte stream into fixed-size [`Batch`]es and pushes them
//! onto the hand-off queue. With a quote byte configured, a newline inside a
//! quoted field does not end the record, so a logical row is never split
//! across two batches.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;

use super::batch::Batch;
use super::queue::BatchSender;
use crate::config::BatchOptions;
use crate::error::{CopyError, CopyResult};

/// Totals for one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Header records discarded.
    pub skipped: usize,
    /// Data records placed into batches.
    pub rows: u64,
    pub batches: usize,
}

/// Read `reader` to the end (or to the row limit), queueing batches as they
/// fill up. The queue is closed when this returns, on every path.
pub async fn scan<R>(
    reader: R,
    options: &BatchOptions,
    queue: BatchSender,
    cancel: &CancellationToken,
) -> CopyResult<ScanStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut records = RecordReader::new(reader, options.quote, options.escape);
    let mut stats = ScanStats::default();

    // header lines are dropped as raw lines, before any quote tracking
    while stats.skipped < options.skip {
        if !records.skip_line().await? {
            log::debug!("scanner: input ended inside the {} header lines", options.skip);
            return Ok(stats);
        }
        stats.skipped += 1;
    }

    let size = options.size.max(1);
    let mut batch = Batch::with_capacity(size);

    loop {
        if options.limit > 0 && stats.rows >= options.limit {
            log::debug!("scanner: row limit {} reached", options.limit);
            break;
        }

        let Some(record) = records.next_record().await? else {
            break;
        };
        batch.push(record);
        stats.rows += 1;

        if batch.len() == size {
            let full = std::mem::replace(&mut batch, Batch::with_capacity(size));
            emit(&queue, full, cancel).await?;
            stats.batches += 1;
        }
    }

    if !batch.is_empty() {
        emit(&queue, batch, cancel).await?;
        stats.batches += 1;
    }

    log::debug!(
        "scanner: {} rows in {} batches ({} header lines skipped)",
        stats.rows,
        stats.batches,
        stats.skipped
    );
    queue.close();
    Ok(stats)
}

async fn emit(queue: &BatchSender, batch: Batch, cancel: &CancellationToken) -> CopyResult<()> {
    let rows = batch.len();
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CopyError::Cancelled),
        sent = queue.send(batch) => {
            sent.map_err(|_| CopyError::Cancelled)?;
            log::trace!("scanner: queued batch of {} rows", rows);
            Ok(())
        }
    }
}

/// Splits a buffered stream into records.
struct RecordReader<R> {
    reader: R,
    quote: Option<u8>,
    escape: Option<u8>,
}

impl<R: AsyncBufRead + Unpin> RecordReader<R> {
    fn new(reader: R, quote: Option<u8>, escape: Option<u8>) -> Self {
        Self {
            reader,
            quote,
            escape,
        }
    }

    /// Discard one physical line. Returns `false` at end of input.
    async fn skip_line(&mut self) -> io::Result<bool> {
        let mut line = Vec::new();
        Ok(self.reader.read_until(b'\n', &mut line).await? > 0)
    }

    /// Next record without its terminating newline, `None` at end of input.
    async fn next_record(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut record = Vec::new();
        let mut state = QuoteState::default();

        loop {
            let start = record.len();
            let read = self.reader.read_until(b'\n', &mut record).await?;
            if read == 0 {
                return Ok((!record.is_empty()).then(|| trim_line_end(record)));
            }

            if let Some(quote) = self.quote {
                state.advance(&record[start..], quote, self.escape);
            }

            if record.last() != Some(&b'\n') {
                // final line without a newline
                return Ok(Some(trim_line_end(record)));
            }
            if !state.in_quotes {
                return Ok(Some(trim_line_end(record)));
            }
        }
    }
}

/// Strip a trailing `\n` or `\r\n`.
fn trim_line_end(mut record: Vec<u8>) -> Vec<u8> {
    if record.last() == Some(&b'\n') {
        record.pop();
    }
    if record.last() == Some(&b'\r') {
        record.pop();
    }
    record
}

#[derive(Debug, Default)]
struct QuoteState {
    in_quotes: bool,
    escaped: bool,
}

impl QuoteState {
    fn advance(&mut self, bytes: &[u8], quote: u8, escape: Option<u8>) {
        for &byte in bytes {
            if self.escaped {
                self.escaped = false;
                continue;
            }
            // an escape equal to the quote byte is handled by toggling twice
            if self.in_quotes && escape.is_some_and(|e| e != quote && e == byte) {
                self.escaped = true;
                continue;
            }
            if byte == quote {
                self.in_quotes = !self.in_quotes;
            }
        }
    }
}
