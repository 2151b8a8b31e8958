//! End-to-end sink scenarios over local filesystem storage.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use indexmap::IndexMap;
use tempfile::TempDir;
use tokio::sync::mpsc;

use drift::{
    ChangeTxn, CloudStorageSink, ColumnDef, RowChange, RowOp, SinkConfig, SinkError, TableName,
    TableSchema, VersionedTable,
};

fn table_schema() -> Arc<TableSchema> {
    Arc::new(TableSchema::new(vec![
        ColumnDef::new("id", "bigint"),
        ColumnDef::new("name", "varchar"),
    ]))
}

fn row(id: i64, name: &str) -> RowChange {
    let mut columns = IndexMap::new();
    columns.insert("id".to_string(), serde_json::json!(id));
    columns.insert("name".to_string(), serde_json::json!(name));
    RowChange::new(RowOp::Insert, columns)
}

/// A transaction whose callback records its commit timestamp.
fn txn(
    schema: &str,
    table: &str,
    version: u64,
    commit_ts: u64,
    rows: Vec<RowChange>,
    acked: &Arc<Mutex<Vec<u64>>>,
) -> ChangeTxn {
    let acked = acked.clone();
    ChangeTxn::new(
        VersionedTable::new(TableName::new(schema, table), version),
        table_schema(),
        commit_ts,
        rows,
    )
    .with_callback(Box::new(move || {
        acked.lock().unwrap().push(commit_ts);
    }))
}

fn config_for(dir: &TempDir) -> SinkConfig {
    let mut config = SinkConfig::from_uri(dir.path().to_str().unwrap()).unwrap();
    config.worker_count = 4;
    config.emit_schema_files = false;
    config
}

fn commit_ts_lines(path: &std::path::Path) -> Vec<u64> {
    let content = std::fs::read_to_string(path).unwrap();
    content
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            value["commit_ts"].as_u64().unwrap()
        })
        .collect()
}

fn data_files(dir: &std::path::Path) -> Vec<String> {
    let mut files: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with("CDC"))
        .collect();
    files.sort();
    files
}

/// S1: five ordered transactions for one table land in one file, rows in
/// ingest order, callbacks in order.
#[tokio::test]
async fn test_ordered_single_table() {
    let dir = TempDir::new().unwrap();
    let acked = Arc::new(Mutex::new(Vec::new()));
    let (error_tx, _error_rx) = mpsc::channel(1);

    let sink = CloudStorageSink::new("s1", config_for(&dir), error_tx)
        .await
        .unwrap();

    let txns: Vec<ChangeTxn> = (1..=5)
        .map(|ts| {
            txn(
                "db",
                "t",
                1,
                ts,
                vec![row(ts as i64, &format!("row-{ts}"))],
                &acked,
            )
        })
        .collect();
    sink.write_events(txns).await.unwrap();
    sink.close().await;

    let file = dir.path().join("db/t/1/CDC0000000001.json");
    assert!(file.exists(), "expected single data file at index 1");
    assert_eq!(commit_ts_lines(&file), vec![1, 2, 3, 4, 5]);
    assert_eq!(*acked.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    assert_eq!(data_files(&dir.path().join("db/t/1")).len(), 1);
}

/// S2: with a pool of encoders completing in arbitrary order, the writer
/// still observes ingest order.
#[tokio::test]
async fn test_parallel_encoding_preserves_order() {
    let dir = TempDir::new().unwrap();
    let acked = Arc::new(Mutex::new(Vec::new()));
    let (error_tx, _error_rx) = mpsc::channel(1);

    let sink = CloudStorageSink::new("s2", config_for(&dir), error_tx)
        .await
        .unwrap();

    for ts in 1..=50u64 {
        let t = txn(
            "db",
            "t",
            1,
            ts,
            vec![row(ts as i64, &format!("row-{ts}"))],
            &acked,
        );
        sink.write_events(vec![t]).await.unwrap();
    }
    sink.close().await;

    let file = dir.path().join("db/t/1/CDC0000000001.json");
    let expected: Vec<u64> = (1..=50).collect();
    assert_eq!(commit_ts_lines(&file), expected);
    assert_eq!(*acked.lock().unwrap(), expected);
}

/// S3: alternating transactions between two tables produce two files, each
/// with only its own rows in ingest order.
#[tokio::test]
async fn test_two_tables_are_independent() {
    let dir = TempDir::new().unwrap();
    let acked = Arc::new(Mutex::new(Vec::new()));
    let (error_tx, _error_rx) = mpsc::channel(1);

    let sink = CloudStorageSink::new("s3", config_for(&dir), error_tx)
        .await
        .unwrap();

    for ts in 1..=6u64 {
        let table = if ts % 2 == 1 { "a" } else { "b" };
        let t = txn("db", table, 1, ts, vec![row(ts as i64, "x")], &acked);
        sink.write_events(vec![t]).await.unwrap();
    }
    sink.close().await;

    let file_a = dir.path().join("db/a/1/CDC0000000001.json");
    let file_b = dir.path().join("db/b/1/CDC0000000001.json");
    assert_eq!(commit_ts_lines(&file_a), vec![1, 3, 5]);
    assert_eq!(commit_ts_lines(&file_b), vec![2, 4, 6]);

    let mut all = acked.lock().unwrap().clone();
    all.sort();
    assert_eq!(all, vec![1, 2, 3, 4, 5, 6]);
}

/// S4: a schema version bump rotates into a fresh version directory with its
/// own rotation counter and schema descriptor.
#[tokio::test]
async fn test_schema_version_bump() {
    let dir = TempDir::new().unwrap();
    let acked = Arc::new(Mutex::new(Vec::new()));
    let (error_tx, _error_rx) = mpsc::channel(1);

    let mut config = config_for(&dir);
    config.emit_schema_files = true;

    let sink = CloudStorageSink::new("s4", config, error_tx).await.unwrap();

    for ts in 1..=3u64 {
        let t = txn("db", "t", 1, ts, vec![row(ts as i64, "v1")], &acked);
        sink.write_events(vec![t]).await.unwrap();
    }
    for ts in 4..=6u64 {
        let t = txn("db", "t", 2, ts, vec![row(ts as i64, "v2")], &acked);
        sink.write_events(vec![t]).await.unwrap();
    }
    sink.close().await;

    let v1_file = dir.path().join("db/t/1/CDC0000000001.json");
    let v2_file = dir.path().join("db/t/2/CDC0000000001.json");
    assert_eq!(commit_ts_lines(&v1_file), vec![1, 2, 3]);
    assert_eq!(commit_ts_lines(&v2_file), vec![4, 5, 6]);

    // Schema descriptors sit in each version directory
    for version in [1, 2] {
        let descriptor: serde_json::Value = serde_json::from_slice(
            &std::fs::read(dir.path().join(format!("db/t/{version}/schema.json"))).unwrap(),
        )
        .unwrap();
        assert_eq!(descriptor["version"], version);
        assert_eq!(descriptor["columns"][0]["name"], "id");
    }
}

/// S5: a 1 KiB size bound over ~400 B transactions yields 4-5 files with
/// ascending rotation indices.
#[tokio::test]
async fn test_size_bounded_rotation() {
    let dir = TempDir::new().unwrap();
    let acked = Arc::new(Mutex::new(Vec::new()));
    let (error_tx, _error_rx) = mpsc::channel(1);

    let mut config = config_for(&dir);
    config.max_file_size = 1024;

    let sink = CloudStorageSink::new("s5", config, error_tx).await.unwrap();

    let filler = "x".repeat(320);
    for ts in 1..=10u64 {
        let t = txn("db", "t", 1, ts, vec![row(ts as i64, &filler)], &acked);
        sink.write_events(vec![t]).await.unwrap();
    }
    sink.close().await;

    let files = data_files(&dir.path().join("db/t/1"));
    assert!(
        (4..=5).contains(&files.len()),
        "expected 4-5 files, got {files:?}"
    );
    for (i, name) in files.iter().enumerate() {
        assert_eq!(name, &format!("CDC{:010}.json", i + 1));
        let size = std::fs::metadata(dir.path().join("db/t/1").join(name))
            .unwrap()
            .len();
        assert!(size <= 1024 + 450, "file {name} too large: {size}");
    }

    // Every transaction acknowledged exactly once, in order
    assert_eq!(*acked.lock().unwrap(), (1..=10).collect::<Vec<u64>>());
}

/// S6: a permanently failing storage backend kills the sink: the dead
/// signal fires, exactly one error reaches the error channel, writes fail
/// fast, close still returns.
#[tokio::test]
async fn test_fatal_storage_error_kills_sink() {
    let dir = TempDir::new().unwrap();
    let acked = Arc::new(Mutex::new(Vec::new()));
    let (error_tx, mut error_rx) = mpsc::channel(4);

    let sink_root = dir.path().join("sink");
    let mut config = SinkConfig::from_uri(sink_root.to_str().unwrap()).unwrap();
    config.emit_schema_files = false;
    config.max_file_size = 1; // flush on the first transaction
    config.upload_retries = 0;
    config.upload_timeout = Duration::from_secs(5);

    let sink = CloudStorageSink::new("s6", config, error_tx).await.unwrap();

    // Replace the storage root with a regular file: every upload now fails
    std::fs::remove_dir_all(&sink_root).unwrap();
    std::fs::write(&sink_root, b"not a directory").unwrap();

    let t = txn("db", "t", 1, 1, vec![row(1, "doomed")], &acked);
    sink.write_events(vec![t]).await.unwrap();

    tokio::time::timeout(Duration::from_secs(10), sink.dead())
        .await
        .expect("sink must transition to dead in bounded time");
    assert!(sink.is_dead());

    // Exactly one error is forwarded
    let error = error_rx.recv().await.expect("error must be forwarded");
    assert!(matches!(error, SinkError::Upload { .. }), "got: {error}");
    assert!(error_rx.try_recv().is_err());

    // Writes fail fast; the lost batch was never acknowledged
    let late = txn("db", "t", 1, 2, vec![row(2, "late")], &acked);
    let err = sink.write_events(vec![late]).await.unwrap_err();
    assert!(matches!(err, SinkError::DeadSink));
    assert!(acked.lock().unwrap().is_empty());

    sink.close().await;
}

/// CSV protocol end to end: schema-ordered columns, csv extension.
#[tokio::test]
async fn test_csv_protocol_end_to_end() {
    let dir = TempDir::new().unwrap();
    let acked = Arc::new(Mutex::new(Vec::new()));
    let (error_tx, _error_rx) = mpsc::channel(1);

    let uri = format!("file://{}?protocol=csv", dir.path().display());
    let mut config = SinkConfig::from_uri(&uri).unwrap();
    config.emit_schema_files = false;

    let sink = CloudStorageSink::new("csv", config, error_tx).await.unwrap();

    let t = txn("db", "t", 1, 9, vec![row(7, "seven")], &acked);
    sink.write_events(vec![t]).await.unwrap();
    sink.close().await;

    let content =
        std::fs::read_to_string(dir.path().join("db/t/1/CDC0000000001.csv")).unwrap();
    assert_eq!(content, "insert,db,t,9,7,seven\n");
    assert_eq!(*acked.lock().unwrap(), vec![9]);
}

/// After close() returns, no further callbacks fire and no new files appear.
#[tokio::test]
async fn test_close_quiesces() {
    let dir = TempDir::new().unwrap();
    let acked = Arc::new(Mutex::new(Vec::new()));
    let (error_tx, _error_rx) = mpsc::channel(1);

    let sink = CloudStorageSink::new("quiesce", config_for(&dir), error_tx)
        .await
        .unwrap();

    for ts in 1..=3u64 {
        let t = txn("db", "t", 1, ts, vec![row(ts as i64, "x")], &acked);
        sink.write_events(vec![t]).await.unwrap();
    }
    sink.close().await;

    let count_after_close = acked.lock().unwrap().len();
    let files_after_close = data_files(&dir.path().join("db/t/1")).len();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(acked.lock().unwrap().len(), count_after_close);
    assert_eq!(data_files(&dir.path().join("db/t/1")).len(), files_after_close);
}
