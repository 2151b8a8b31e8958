//! The cloud storage sink: public ingest surface, worker supervision, and
//! liveness signalling.
//!
//! `WriteEvents -> ingest channel -> [N encoding workers] -> defragmenter
//! -> ordered channel -> DML writer -> table writers -> storage`. All
//! workers run under one supervisor; the first fatal error cancels the
//! scope, marks the sink dead, and is forwarded once to the external error
//! channel.

mod defrag;
mod dml;
mod encoding;
mod table;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use snafu::prelude::*;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info, warn};

use drift_core::storage::{StorageProvider, StorageProviderRef};

use crate::codec;
use crate::config::SinkConfig;
use crate::error::{DeadSinkSnafu, SinkError, StorageSnafu, WorkerPanicSnafu};
use crate::model::{ChangeTxn, EventFragment, TableState, VersionedTable};
use crate::path::FilePathBuilder;

use defrag::Defragmenter;
use dml::DmlWriter;
use encoding::EncodingWorker;
use table::TableWriterConfig;

/// A cloud-storage CDC sink for one changefeed.
///
/// `write_events` applies back-pressure through the bounded ingest channel;
/// `close` drains and flushes; `dead` resolves once the sink has terminated
/// (fatal error or close).
pub struct CloudStorageSink {
    changefeed: String,
    /// Taken on close; in-flight sends hold clones, so the channel closes
    /// once the last one resolves.
    ingest_tx: Mutex<Option<flume::Sender<EventFragment>>>,
    last_seq: AtomicU64,
    /// Next per-table ingest index, used by the defragmenter for gap-free
    /// reordering.
    table_seqs: Mutex<HashMap<VersionedTable, u64>>,
    cancel: CancellationToken,
    dead: CancellationToken,
    is_dead: Arc<AtomicBool>,
    supervisor: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl CloudStorageSink {
    /// Build the sink and spawn its worker groups.
    ///
    /// Fatal pipeline errors are forwarded (once, best effort) to
    /// `error_tx`; the consumer drives changefeed-level recovery.
    pub async fn new(
        changefeed: impl Into<String>,
        config: SinkConfig,
        error_tx: mpsc::Sender<SinkError>,
    ) -> Result<Self, SinkError> {
        let changefeed = changefeed.into();

        let storage: StorageProviderRef = Arc::new(
            StorageProvider::for_url_with_options(
                &config.storage_uri,
                config.storage_options.clone(),
            )
            .await
            .context(StorageSnafu)?,
        );

        let builder = codec::builder_for(config.protocol);
        let paths = FilePathBuilder::new(builder.extension(), config.file_index_width);

        let (ingest_tx, ingest_rx) = flume::bounded::<EventFragment>(config.channel_size);
        let (encoded_tx, encoded_rx) = mpsc::channel(config.channel_size);
        let (ordered_tx, ordered_rx) = mpsc::channel(config.channel_size);

        let cancel = CancellationToken::new();
        let dead = CancellationToken::new();
        let is_dead = Arc::new(AtomicBool::new(false));

        let mut tasks: JoinSet<Result<(), SinkError>> = JoinSet::new();
        for id in 0..config.worker_count {
            let worker = EncodingWorker::new(
                id,
                changefeed.clone(),
                builder.build(),
                ingest_rx.clone(),
                encoded_tx.clone(),
            );
            tasks.spawn(worker.run(cancel.clone()));
        }
        // The workers hold the only receivers/senders of these channels, so
        // channel closure cascades through the pipeline on drain.
        drop(ingest_rx);
        drop(encoded_tx);

        let defragmenter = Defragmenter::new(changefeed.clone(), encoded_rx, ordered_tx);
        tasks.spawn(defragmenter.run(cancel.clone()));

        let writer = DmlWriter::new(
            changefeed.clone(),
            storage,
            paths,
            TableWriterConfig::from_sink(&config),
            ordered_rx,
        );
        tasks.spawn(writer.run(cancel.clone()));

        info!(
            changefeed = %changefeed,
            uri = %config.storage_uri,
            workers = config.worker_count,
            "Created cloud storage sink"
        );

        let supervisor = tokio::spawn(supervise(
            changefeed.clone(),
            tasks,
            cancel.clone(),
            dead.clone(),
            is_dead.clone(),
            error_tx,
        ));

        Ok(Self {
            changefeed,
            ingest_tx: Mutex::new(Some(ingest_tx)),
            last_seq: AtomicU64::new(0),
            table_seqs: Mutex::new(HashMap::new()),
            cancel,
            dead,
            is_dead,
            supervisor: Mutex::new(Some(supervisor)),
        })
    }

    /// Submit transactions to the sink.
    ///
    /// Transactions for non-sinking tables (and empty transactions) are
    /// acknowledged immediately and dropped. Blocks when the ingest channel
    /// is full; fails fast with [`SinkError::DeadSink`] once the sink is
    /// dead or closed.
    pub async fn write_events<I>(&self, txns: I) -> Result<(), SinkError>
    where
        I: IntoIterator<Item = ChangeTxn>,
    {
        ensure!(!self.is_dead.load(Ordering::Acquire), DeadSinkSnafu);

        let Some(ingest) = self.ingest_tx.lock().expect("ingest lock poisoned").clone() else {
            return DeadSinkSnafu.fail();
        };

        for mut txn in txns {
            if txn.state.load() != TableState::Sinking {
                // The table is stopping; the event is safe to drop.
                txn.ack();
                continue;
            }
            if txn.rows.is_empty() {
                txn.ack();
                continue;
            }

            let seq = self.last_seq.fetch_add(1, Ordering::AcqRel) + 1;
            let table_seq = {
                let mut table_seqs = self.table_seqs.lock().expect("seq lock poisoned");
                let entry = table_seqs.entry(txn.table.clone()).or_insert(0);
                *entry += 1;
                *entry
            };

            let fragment = EventFragment {
                seq,
                table_seq,
                table: txn.table.clone(),
                txn,
                encoded: None,
            };
            if ingest.send_async(fragment).await.is_err() {
                return DeadSinkSnafu.fail();
            }
        }

        Ok(())
    }

    /// Close the sink and wait for the pipeline to drain.
    ///
    /// Idempotent. Closing the ingest channel lets every worker exit on a
    /// drained input; table writers flush partial buffers and fire the
    /// remaining callbacks before the supervisor joins.
    pub async fn close(&self) {
        self.ingest_tx.lock().expect("ingest lock poisoned").take();

        let supervisor = self.supervisor.lock().expect("supervisor lock poisoned").take();
        match supervisor {
            Some(handle) => {
                let _ = handle.await;
            }
            // Another close already joined the supervisor; wait for it.
            None => self.dead.cancelled().await,
        }

        self.cancel.cancel();
        debug!(changefeed = %self.changefeed, "Sink closed");
    }

    /// Resolves when the sink has transitioned to dead.
    pub fn dead(&self) -> WaitForCancellationFuture<'_> {
        self.dead.cancelled()
    }

    /// Whether the sink has terminated.
    pub fn is_dead(&self) -> bool {
        self.is_dead.load(Ordering::Acquire)
    }
}

/// Join all workers; on the first failure cancel the scope and forward the
/// error once. Subsequent errors are discarded.
async fn supervise(
    changefeed: String,
    mut tasks: JoinSet<Result<(), SinkError>>,
    cancel: CancellationToken,
    dead: CancellationToken,
    is_dead: Arc<AtomicBool>,
    error_tx: mpsc::Sender<SinkError>,
) {
    let mut first_error: Option<SinkError> = None;

    while let Some(result) = tasks.join_next().await {
        let failure = match result {
            Ok(Ok(())) => None,
            Ok(Err(error)) => Some(error),
            Err(join_error) => Some(
                WorkerPanicSnafu {
                    message: join_error.to_string(),
                }
                .build(),
            ),
        };

        if let Some(error) = failure {
            if first_error.is_none() {
                warn!(
                    changefeed = %changefeed,
                    error = %error,
                    "Sink worker failed; cancelling pipeline"
                );
                cancel.cancel();
                first_error = Some(error);
            } else {
                debug!(changefeed = %changefeed, error = %error, "Discarding subsequent error");
            }
        }
    }

    is_dead.store(true, Ordering::Release);
    dead.cancel();

    if let Some(error) = first_error {
        // Best effort: the consumer may already be gone.
        let _ = error_tx.try_send(error);
    }

    info!(changefeed = %changefeed, "Sink terminated");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColumnDef, RowChange, RowOp, SinkStateHandle, TableName, TableSchema};
    use indexmap::IndexMap;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> SinkConfig {
        let mut config = SinkConfig::from_uri(dir.path().to_str().unwrap()).unwrap();
        config.emit_schema_files = false;
        config
    }

    fn txn(counter: &Arc<AtomicUsize>) -> ChangeTxn {
        let counter = counter.clone();
        let mut columns = IndexMap::new();
        columns.insert("id".to_string(), serde_json::json!(1));
        ChangeTxn::new(
            VersionedTable::new(TableName::new("db", "t"), 1),
            Arc::new(TableSchema::new(vec![ColumnDef::new("id", "bigint")])),
            1,
            vec![RowChange::new(RowOp::Insert, columns)],
        )
        .with_callback(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[tokio::test]
    async fn test_stopping_table_events_are_acked_and_dropped() {
        let dir = TempDir::new().unwrap();
        let (error_tx, _error_rx) = mpsc::channel(1);
        let sink = CloudStorageSink::new("test", test_config(&dir), error_tx)
            .await
            .unwrap();

        let acked = Arc::new(AtomicUsize::new(0));
        let state = SinkStateHandle::new();
        state.store(TableState::Stopping);
        let txn = txn(&acked).with_state(state);

        sink.write_events(vec![txn]).await.unwrap();
        assert_eq!(acked.load(Ordering::SeqCst), 1);

        sink.close().await;

        // Nothing reached storage
        assert!(!dir.path().join("db").exists());
    }

    #[tokio::test]
    async fn test_empty_txn_is_acked_and_dropped() {
        let dir = TempDir::new().unwrap();
        let (error_tx, _error_rx) = mpsc::channel(1);
        let sink = CloudStorageSink::new("test", test_config(&dir), error_tx)
            .await
            .unwrap();

        let acked = Arc::new(AtomicUsize::new(0));
        let mut txn = txn(&acked);
        txn.rows.clear();

        sink.write_events(vec![txn]).await.unwrap();
        assert_eq!(acked.load(Ordering::SeqCst), 1);

        sink.close().await;
        assert!(!dir.path().join("db").exists());
    }

    #[tokio::test]
    async fn test_write_after_close_is_dead() {
        let dir = TempDir::new().unwrap();
        let (error_tx, _error_rx) = mpsc::channel(1);
        let sink = CloudStorageSink::new("test", test_config(&dir), error_tx)
            .await
            .unwrap();

        sink.close().await;
        assert!(sink.is_dead());

        let acked = Arc::new(AtomicUsize::new(0));
        let err = sink.write_events(vec![txn(&acked)]).await.unwrap_err();
        assert!(matches!(err, SinkError::DeadSink));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (error_tx, _error_rx) = mpsc::channel(1);
        let sink = CloudStorageSink::new("test", test_config(&dir), error_tx)
            .await
            .unwrap();

        sink.close().await;
        sink.close().await;
        assert!(sink.is_dead());
    }

    #[tokio::test]
    async fn test_seq_is_unique_and_increasing() {
        let dir = TempDir::new().unwrap();
        let (error_tx, _error_rx) = mpsc::channel(1);
        let sink = CloudStorageSink::new("test", test_config(&dir), error_tx)
            .await
            .unwrap();

        let acked = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            sink.write_events(vec![txn(&acked)]).await.unwrap();
        }
        assert_eq!(sink.last_seq.load(Ordering::Acquire), 10);

        sink.close().await;
        assert_eq!(acked.load(Ordering::SeqCst), 10);
    }
}
