use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, BufReader};

use parallel_copy::config::{
    DEFAULT_BATCH_SIZE, DEFAULT_COPY_OPTIONS, DEFAULT_SCHEMA, DEFAULT_SPLIT, parse_escape,
    parse_quote,
};
use parallel_copy::{
    ConfigError, ConnectionOverride, CopyConfig, CopyError, CopyTarget, ParallelCopy, PgConnector,
    RowCountSource, init_logger,
};

#[derive(Parser, Debug)]
#[command(
    name = "parallel-copy",
    about = "Load delimited text into PostgreSQL with parallel COPY workers"
)]
struct Args {
    /// File to read from; standard input when omitted.
    #[arg(long)]
    file: Option<PathBuf>,

    /// PostgreSQL connection URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://postgres@localhost:5432/postgres?sslmode=disable"
    )]
    connection: String,

    /// Database to connect to, overriding the one in the connection URL.
    #[arg(long)]
    db_name: Option<String>,

    /// Destination schema.
    #[arg(long, default_value = DEFAULT_SCHEMA)]
    schema: String,

    /// Destination table.
    #[arg(long)]
    table: String,

    /// Truncate the destination table before loading.
    #[arg(long)]
    truncate: bool,

    /// Extra options appended to the COPY command.
    #[arg(long, default_value = DEFAULT_COPY_OPTIONS)]
    copy_options: String,

    /// Field delimiter; `\t` selects a tab.
    #[arg(long, default_value = DEFAULT_SPLIT)]
    split: String,

    /// Quote character for CSV input.
    #[arg(long, default_value = "")]
    quote: String,

    /// Escape character for CSV input.
    #[arg(long, default_value = "")]
    escape: String,

    /// Comma-separated column list to copy into.
    #[arg(long)]
    columns: Option<String>,

    /// Skip header lines at the start of the input.
    #[arg(long)]
    skip_header: bool,

    /// Number of header lines to skip with --skip-header.
    #[arg(long, default_value_t = 1)]
    header_line_count: usize,

    /// Number of parallel COPY workers.
    #[arg(long, env = "PARALLEL_COPY_WORKERS", default_value_t = 1)]
    workers: usize,

    /// Maximum number of rows to load; 0 loads everything.
    #[arg(long, default_value_t = 0)]
    limit: u64,

    /// Rows per COPY batch.
    #[arg(long, env = "PARALLEL_COPY_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Print timing for every batch.
    #[arg(long)]
    log_batches: bool,

    /// Seconds between progress reports; 0 disables them.
    #[arg(long, default_value_t = 0)]
    reporting_period: u64,

    /// Print the skip notice and a detailed summary.
    #[arg(long)]
    verbose: bool,

    /// Row count to start the progress counter from.
    #[arg(long, default_value_t = 0)]
    start_rows: u64,

    /// Where per-batch row counts come from.
    #[arg(long, value_enum, default_value_t = RowCountSource::Driver)]
    count_rows_from: RowCountSource,
}

impl Args {
    fn copy_config(&self) -> Result<CopyConfig, ConfigError> {
        let mut config = CopyConfig::new(CopyTarget::new(&self.schema, &self.table));
        config.columns = self.columns.clone();
        config.split = self.split.clone();
        config.copy_options = self.copy_options.clone();
        config.workers = self.workers;
        config.batch.size = self.batch_size;
        config.batch.limit = self.limit;
        config.batch.quote = parse_quote(&self.quote)?;
        config.batch.escape = parse_escape(&self.escape)?;
        config.skip_header = self.skip_header;
        config.header_line_count = self.header_line_count;
        config.truncate = self.truncate;
        config.reporting_period = Duration::from_secs(self.reporting_period);
        config.log_batches = self.log_batches;
        config.verbose = self.verbose;
        config.start_rows = self.start_rows;
        config.row_count_source = self.count_rows_from;
        config.validate()?;
        Ok(config)
    }

    fn overrides(&self) -> Vec<ConnectionOverride> {
        self.db_name
            .iter()
            .map(|name| ConnectionOverride::DatabaseName(name.clone()))
            .collect()
    }
}

async fn open_input(path: Option<&PathBuf>) -> io::Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    Ok(match path {
        Some(path) => Box::new(BufReader::new(File::open(path).await?)),
        None => Box::new(BufReader::new(tokio::io::stdin())),
    })
}

fn fail(err: &dyn std::fmt::Display) -> ! {
    let _ = writeln!(io::stderr(), "ERROR: {err}");
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    init_logger();

    let args = Args::parse();
    let config = args.copy_config().unwrap_or_else(|err| fail(&err));

    let connector = PgConnector::new(&args.connection, &args.overrides())
        .unwrap_or_else(|err| fail(&err));
    let copy = ParallelCopy::new(connector, config).unwrap_or_else(|err| fail(&err));

    if copy.config().truncate {
        if let Err(err) = copy.truncate().await {
            fail(&err);
        }
    }

    let input = open_input(args.file.as_ref())
        .await
        .unwrap_or_else(|err| fail(&CopyError::Read(err)));

    match copy.run(input).await {
        Ok(report) => println!("{report}"),
        Err(err) => {
            if let Some(rows) = err.rows_committed() {
                log::error!("{} rows were committed before the failure", rows);
            }
            fail(&err);
        }
    }
}
