//! drift CLI: replay newline-delimited JSON change events into a sink.
//!
//! Each input line is one row change:
//!
//! ```json
//! {"schema":"db","table":"users","version":1,"commit_ts":42,"op":"insert","columns":{"id":1}}
//! ```
//!
//! Consecutive lines for the same table, version, and commit timestamp are
//! grouped into one transaction.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use clap::Parser;
use indexmap::IndexMap;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{error, info};

use drift::{
    ChangeTxn, CloudStorageSink, ColumnDef, RowChange, RowOp, SinkConfig, TableName, TableSchema,
    VersionedTable, init_tracing,
};

/// drift - cloud storage CDC sink
#[derive(Parser, Debug)]
#[command(name = "drift")]
#[command(about = "Replays NDJSON change events into a cloud storage sink")]
struct Args {
    /// Sink URI (e.g. "s3://bucket/prefix?protocol=csv" or a local path)
    #[arg(short, long)]
    sink_uri: String,

    /// Input file with one JSON change event per line
    #[arg(short, long)]
    input: PathBuf,

    /// Changefeed identifier used in logs and metrics
    #[arg(short, long, default_value = "cli")]
    changefeed: String,

    /// Address of the Prometheus metrics endpoint
    #[arg(long, default_value = drift::DEFAULT_METRICS_ADDR)]
    metrics_address: String,
}

#[derive(Debug, Deserialize)]
struct ChangeEvent {
    schema: String,
    table: String,
    #[serde(default = "default_version")]
    version: u64,
    commit_ts: u64,
    op: RowOp,
    columns: IndexMap<String, serde_json::Value>,
}

fn default_version() -> u64 {
    1
}

impl ChangeEvent {
    fn key(&self) -> (TableName, u64, u64) {
        (
            TableName::new(self.schema.clone(), self.table.clone()),
            self.version,
            self.commit_ts,
        )
    }

    /// Derive a column layout from the event's own columns.
    fn table_schema(&self) -> TableSchema {
        let columns = self
            .columns
            .iter()
            .map(|(name, value)| ColumnDef::new(name.clone(), json_type_name(value)))
            .collect();
        TableSchema::new(columns)
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args = Args::parse();

    let config = match SinkConfig::from_uri(&args.sink_uri) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid sink URI: {e}");
            return ExitCode::FAILURE;
        }
    };

    match args.metrics_address.parse() {
        Ok(addr) => {
            if let Err(e) = drift::init_metrics(addr) {
                eprintln!("Failed to initialize metrics: {e}");
                return ExitCode::FAILURE;
            }
        }
        Err(e) => {
            eprintln!("Invalid metrics address: {e}");
            return ExitCode::FAILURE;
        }
    }

    let input = match std::fs::read_to_string(&args.input) {
        Ok(input) => input,
        Err(e) => {
            eprintln!("Failed to read {}: {e}", args.input.display());
            return ExitCode::FAILURE;
        }
    };

    let (error_tx, mut error_rx) = mpsc::channel(1);
    let sink = match CloudStorageSink::new(args.changefeed.clone(), config, error_tx).await {
        Ok(sink) => sink,
        Err(e) => {
            eprintln!("Failed to create sink: {e}");
            return ExitCode::FAILURE;
        }
    };

    let acked = Arc::new(AtomicU64::new(0));
    let submitted = Arc::new(AtomicU64::new(0));

    tokio::select! {
        _ = drift::shutdown_signal() => {
            info!("Shutdown requested; closing sink");
        }
        _ = replay(&sink, &input, &acked, &submitted) => {}
    }

    sink.close().await;

    if let Ok(e) = error_rx.try_recv() {
        eprintln!("Sink failed: {e}");
        return ExitCode::FAILURE;
    }

    info!(
        transactions = submitted.load(Ordering::SeqCst),
        acknowledged = acked.load(Ordering::SeqCst),
        "Replay complete"
    );
    ExitCode::SUCCESS
}

async fn replay(
    sink: &CloudStorageSink,
    input: &str,
    acked: &Arc<AtomicU64>,
    submitted: &Arc<AtomicU64>,
) {
    let mut pending: Vec<ChangeEvent> = Vec::new();
    for (number, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event: ChangeEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                error!(line = number + 1, error = %e, "Skipping malformed event");
                continue;
            }
        };

        let boundary = pending
            .last()
            .is_some_and(|last| last.key() != event.key());
        if boundary {
            if let Err(e) = submit(sink, std::mem::take(&mut pending), acked).await {
                error!(error = %e, "Sink rejected transaction");
                return;
            }
            submitted.fetch_add(1, Ordering::SeqCst);
        }
        pending.push(event);
    }

    if !pending.is_empty() {
        match submit(sink, pending, acked).await {
            Ok(()) => {
                submitted.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => error!(error = %e, "Sink rejected transaction"),
        }
    }
}

async fn submit(
    sink: &CloudStorageSink,
    events: Vec<ChangeEvent>,
    acked: &Arc<AtomicU64>,
) -> Result<(), drift::SinkError> {
    let first = &events[0];
    let table = VersionedTable::new(
        TableName::new(first.schema.clone(), first.table.clone()),
        first.version,
    );
    let schema = Arc::new(first.table_schema());
    let commit_ts = first.commit_ts;

    let rows = events
        .into_iter()
        .map(|event| RowChange::new(event.op, event.columns))
        .collect();

    let counter = acked.clone();
    let txn = ChangeTxn::new(table, schema, commit_ts, rows).with_callback(Box::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    sink.write_events(vec![txn]).await
}
