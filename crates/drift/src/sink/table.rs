//! Per-table file writer: batches encoded fragments into size- and
//! time-bounded files, uploads them, and acknowledges transactions once
//! their bytes are durable.
//!
//! One writer task exists per versioned table. Rotation happens at
//! transaction boundaries only, so a single transaction larger than the
//! size bound still produces one valid file.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use object_store::PutPayload;
use object_store::path::Path;
use serde::Serialize;
use snafu::prelude::*;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use drift_core::emit;
use drift_core::error::StorageError;
use drift_core::metrics::events::{
    CallbacksFired, DataFileWritten, FlushDuration, SchemaFileWritten, UploadRetried,
};
use drift_core::storage::StorageProviderRef;

use crate::codec::SerializeSnafu;
use crate::config::SinkConfig;
use crate::error::{EncodeSnafu, SinkError, UnencodedFragmentSnafu, UploadSnafu};
use crate::model::{Callback, ColumnDef, EventFragment, TableSchema, VersionedTable};
use crate::path::FilePathBuilder;

const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(500);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(8);

/// The slice of sink configuration a table writer needs.
#[derive(Debug, Clone)]
pub(crate) struct TableWriterConfig {
    pub flush_interval: Duration,
    pub max_file_size: usize,
    pub emit_schema_files: bool,
    pub upload_retries: usize,
    pub upload_timeout: Duration,
}

impl TableWriterConfig {
    pub(crate) fn from_sink(config: &SinkConfig) -> Self {
        Self {
            flush_interval: config.flush_interval,
            max_file_size: config.max_file_size,
            emit_schema_files: config.emit_schema_files,
            upload_retries: config.upload_retries,
            upload_timeout: config.upload_timeout,
        }
    }
}

/// Serialized into the per-version `schema.json` sidecar.
#[derive(Serialize)]
struct SchemaDescriptor<'a> {
    schema: &'a str,
    table: &'a str,
    version: u64,
    columns: &'a [ColumnDef],
}

pub(crate) struct TableWriter {
    changefeed: String,
    table: VersionedTable,
    input: mpsc::Receiver<EventFragment>,
    storage: StorageProviderRef,
    paths: FilePathBuilder,
    config: TableWriterConfig,

    /// The open file buffer.
    buffer: BytesMut,
    buffered_rows: usize,
    /// When the open file received its first byte; arms the flush timer.
    first_write: Option<Instant>,
    /// Callbacks of buffered transactions, in arrival (= seq) order.
    pending_acks: Vec<(u64, Callback)>,
    /// Schema of this versioned table, captured from the first fragment.
    schema: Option<std::sync::Arc<TableSchema>>,
    schema_written: bool,
    /// Rotation index of the next data file (1-based, monotone).
    next_index: u64,
}

impl TableWriter {
    pub(crate) fn new(
        changefeed: String,
        table: VersionedTable,
        input: mpsc::Receiver<EventFragment>,
        storage: StorageProviderRef,
        paths: FilePathBuilder,
        config: TableWriterConfig,
    ) -> Self {
        Self {
            changefeed,
            table,
            input,
            storage,
            paths,
            config,
            buffer: BytesMut::new(),
            buffered_rows: 0,
            first_write: None,
            pending_acks: Vec::new(),
            schema: None,
            schema_written: false,
            next_index: 1,
        }
    }

    pub(crate) async fn run(mut self, cancel: CancellationToken) -> Result<(), SinkError> {
        loop {
            let flush_deadline = match self.first_write {
                Some(first) => first + self.config.flush_interval,
                // Disabled below; placeholder keeps the arm well-formed.
                None => Instant::now() + self.config.flush_interval,
            };

            tokio::select! {
                biased;

                // Forced close: the in-flight buffer is discarded. Upstream
                // re-emits unacknowledged transactions after restart.
                _ = cancel.cancelled() => {
                    if !self.buffer.is_empty() {
                        debug!(
                            changefeed = %self.changefeed,
                            table = %self.table,
                            bytes = self.buffer.len(),
                            "Discarding partial buffer on cancellation"
                        );
                    }
                    return Ok(());
                }

                _ = sleep_until(flush_deadline), if self.first_write.is_some() => {
                    self.flush().await?;
                }

                fragment = self.input.recv() => match fragment {
                    Some(fragment) => {
                        self.append(fragment)?;
                        if self.buffer.len() > self.config.max_file_size {
                            self.flush().await?;
                        }
                    }
                    // Graceful close: flush the partial file, then retire.
                    None => {
                        self.flush().await?;
                        debug!(
                            changefeed = %self.changefeed,
                            table = %self.table,
                            "Table writer retired"
                        );
                        return Ok(());
                    }
                },
            }
        }
    }

    fn append(&mut self, fragment: EventFragment) -> Result<(), SinkError> {
        let EventFragment {
            seq, mut txn, encoded, ..
        } = fragment;
        let Some(messages) = encoded else {
            return UnencodedFragmentSnafu.fail();
        };

        if self.schema.is_none() {
            self.schema = Some(txn.schema.clone());
        }

        for message in &messages {
            self.buffer.extend_from_slice(&message.payload);
            self.buffered_rows += message.row_count;
        }
        if self.first_write.is_none() && !self.buffer.is_empty() {
            self.first_write = Some(Instant::now());
        }

        if let Some(callback) = txn.callback.take() {
            self.pending_acks.push((seq, callback));
        }
        Ok(())
    }

    /// Upload the open buffer as the next data file and acknowledge its
    /// transactions.
    async fn flush(&mut self) -> Result<(), SinkError> {
        if self.buffer.is_empty() {
            self.first_write = None;
            return Ok(());
        }

        let start = std::time::Instant::now();

        if self.config.emit_schema_files && !self.schema_written {
            self.write_schema_descriptor().await?;
            self.schema_written = true;
        }

        let path = self.paths.data_path(&self.table, self.next_index);
        let bytes = self.buffer.split().freeze();
        let size = bytes.len();
        let rows = std::mem::take(&mut self.buffered_rows);

        self.put_with_retry(&path, bytes).await?;

        self.next_index += 1;
        self.first_write = None;

        // Fragments arrive in ascending seq order, so draining in place
        // acknowledges transactions in seq order.
        let acked = self.pending_acks.len() as u64;
        for (_, callback) in self.pending_acks.drain(..) {
            callback();
        }

        emit!(DataFileWritten {
            bytes: size as u64,
            rows: rows as u64,
            changefeed: self.changefeed.clone(),
        });
        emit!(CallbacksFired {
            count: acked,
            changefeed: self.changefeed.clone(),
        });
        emit!(FlushDuration {
            duration: start.elapsed(),
            changefeed: self.changefeed.clone(),
        });
        info!(
            changefeed = %self.changefeed,
            table = %self.table,
            path = %path,
            bytes = size,
            rows = rows,
            "Wrote data file"
        );

        Ok(())
    }

    async fn write_schema_descriptor(&self) -> Result<(), SinkError> {
        let Some(schema) = &self.schema else {
            return Ok(());
        };

        let descriptor = SchemaDescriptor {
            schema: &self.table.name.schema,
            table: &self.table.name.table,
            version: self.table.version,
            columns: &schema.columns,
        };
        let body = serde_json::to_vec_pretty(&descriptor)
            .context(SerializeSnafu)
            .context(EncodeSnafu)?;

        let path = self.paths.schema_path(&self.table);
        self.put_with_retry(&path, Bytes::from(body)).await?;

        emit!(SchemaFileWritten {
            changefeed: self.changefeed.clone(),
        });
        debug!(
            changefeed = %self.changefeed,
            table = %self.table,
            path = %path,
            "Wrote schema descriptor"
        );
        Ok(())
    }

    async fn put_with_retry(&self, path: &str, bytes: Bytes) -> Result<(), SinkError> {
        let object_path = Path::from(path);
        let mut delay = INITIAL_RETRY_DELAY;
        let mut attempts = 0;

        loop {
            attempts += 1;
            let put = self
                .storage
                .put(&object_path, PutPayload::from(bytes.clone()));
            let error = match tokio::time::timeout(self.config.upload_timeout, put).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(error)) => error,
                Err(_) => StorageError::Timeout {
                    deadline: self.config.upload_timeout,
                },
            };

            if attempts > self.config.upload_retries {
                return Err(error).context(UploadSnafu {
                    path: path.to_string(),
                    attempts,
                });
            }

            warn!(
                changefeed = %self.changefeed,
                table = %self.table,
                path = %path,
                attempt = attempts,
                error = %error,
                "Upload failed, backing off"
            );
            emit!(UploadRetried {
                changefeed: self.changefeed.clone(),
            });
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(MAX_RETRY_DELAY);
        }
    }
}
