use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_SCHEMA: &str = "public";
pub const DEFAULT_COPY_OPTIONS: &str = "CSV";
pub const DEFAULT_SPLIT: &str = ",";
pub const DEFAULT_BATCH_SIZE: usize = 5000;

/// Fully-qualified destination table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyTarget {
    pub schema: String,
    pub table: String,
}

impl CopyTarget {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// `"schema"."table"` with embedded double quotes doubled.
    pub fn qualified_name(&self) -> String {
        format!(
            "\"{}\".\"{}\"",
            self.schema.replace('"', "\"\""),
            self.table.replace('"', "\"\"")
        )
    }
}

/// How the scanner slices the input into batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    /// Records per batch.
    pub size: usize,
    /// Leading records discarded before batching.
    pub skip: usize,
    /// Maximum data records to read; 0 means unlimited.
    pub limit: u64,
    pub quote: Option<u8>,
    pub escape: Option<u8>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            size: DEFAULT_BATCH_SIZE,
            skip: 0,
            limit: 0,
            quote: None,
            escape: None,
        }
    }
}

/// Which number a worker adds to the progress counter after a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum RowCountSource {
    /// Rows reported by the server for the COPY command.
    #[default]
    Driver,
    /// Lines contained in the batch that was sent.
    Batch,
}

/// Everything the pipeline needs besides the connector and the input.
#[derive(Debug, Clone)]
pub struct CopyConfig {
    pub target: CopyTarget,
    /// Raw column list fragment, e.g. `time,device,value`.
    pub columns: Option<String>,
    /// Delimiter as given by the operator; `\t` selects a tab.
    pub split: String,
    /// Raw trailing options appended to the COPY command.
    pub copy_options: String,
    pub workers: usize,
    pub batch: BatchOptions,
    pub skip_header: bool,
    pub header_line_count: usize,
    pub truncate: bool,
    pub reporting_period: Duration,
    pub log_batches: bool,
    pub verbose: bool,
    /// Row count the progress counter starts from.
    pub start_rows: u64,
    pub row_count_source: RowCountSource,
}

impl CopyConfig {
    pub fn new(target: CopyTarget) -> Self {
        Self {
            target,
            columns: None,
            split: DEFAULT_SPLIT.to_string(),
            copy_options: DEFAULT_COPY_OPTIONS.to_string(),
            workers: 1,
            batch: BatchOptions::default(),
            skip_header: false,
            header_line_count: 1,
            truncate: false,
            reporting_period: Duration::ZERO,
            log_batches: false,
            verbose: false,
            start_rows: 0,
            row_count_source: RowCountSource::default(),
        }
    }

    /// Reject configurations that must fail before any work begins.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Workers(self.workers));
        }
        if self.batch.size == 0 {
            return Err(ConfigError::BatchSize(self.batch.size));
        }
        if self.skip_header && self.header_line_count == 0 {
            return Err(ConfigError::HeaderLineCount(self.header_line_count));
        }
        Ok(())
    }

    /// Batch options with header skipping folded in.
    pub fn batch_options(&self) -> BatchOptions {
        let skip = if self.skip_header {
            self.header_line_count
        } else {
            0
        };
        BatchOptions {
            skip,
            ..self.batch.clone()
        }
    }
}

/// Parse an optional single-byte quote character; empty means unset.
pub fn parse_quote(value: &str) -> Result<Option<u8>, ConfigError> {
    single_byte(value).ok_or(ConfigError::MultiByteQuote)
}

/// Parse an optional single-byte escape character; empty means unset.
pub fn parse_escape(value: &str) -> Result<Option<u8>, ConfigError> {
    single_byte(value).ok_or(ConfigError::MultiByteEscape)
}

fn single_byte(value: &str) -> Option<Option<u8>> {
    match value.as_bytes() {
        [] => Some(None),
        [byte] => Some(Some(*byte)),
        _ => None,
    }
}
