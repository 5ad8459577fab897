use thiserror::Error;

pub type CopyResult<T> = Result<T, CopyError>;

/// Problems with the requested run, detected before any connection is opened.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("provided --quote must be a single-byte character")]
    MultiByteQuote,
    #[error("provided --escape must be a single-byte character")]
    MultiByteEscape,
    #[error("provided --header-line-count ({0}) must be greater than 0")]
    HeaderLineCount(usize),
    #[error("provided --batch-size ({0}) must be greater than 0")]
    BatchSize(usize),
    #[error("provided --workers ({0}) must be greater than 0")]
    Workers(usize),
}

#[derive(Debug, Error)]
pub enum CopyError {
    #[error("failed to connect: {0}")]
    Connect(#[source] sqlx::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("error reading input: {0}")]
    Read(#[from] std::io::Error),
    #[error("worker {worker} failed: {source}")]
    Worker {
        worker: usize,
        #[source]
        source: Box<CopyError>,
    },
    #[error("copy aborted with {rows_committed} rows committed: {source}")]
    Aborted {
        rows_committed: u64,
        #[source]
        source: Box<CopyError>,
    },
    #[error("copy cancelled")]
    Cancelled,
    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl CopyError {
    pub fn worker(worker: usize, source: CopyError) -> Self {
        CopyError::Worker {
            worker,
            source: Box::new(source),
        }
    }

    /// Rows known to be committed when the run stopped, if the error came
    /// out of a started pipeline.
    pub fn rows_committed(&self) -> Option<u64> {
        match self {
            CopyError::Aborted { rows_committed, .. } => Some(*rows_committed),
            _ => None,
        }
    }
}
