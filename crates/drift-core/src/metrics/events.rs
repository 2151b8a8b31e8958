//! Internal events for drift metrics emission.
//!
//! Each event struct represents a measurable occurrence in the sink pipeline.
//! Events implement the `InternalEvent` trait which emits the corresponding
//! Prometheus metric.
//!
//! ## Changefeed Labels
//!
//! Sink-level metrics include a `changefeed` label so that multiple
//! changefeeds sharing one process can be observed independently.

use std::time::Duration;

use metrics::{counter, gauge, histogram};
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Event emitted when row changes have been encoded by a worker.
pub struct RowsEncoded {
    pub count: u64,
    pub changefeed: String,
}

impl InternalEvent for RowsEncoded {
    fn emit(self) {
        trace!(count = self.count, changefeed = %self.changefeed, "Rows encoded");
        counter!("drift_rows_encoded_total", "changefeed" => self.changefeed).increment(self.count);
    }
}

/// Event emitted when the defragmenter's out-of-order backlog changes.
pub struct FragmentsPending {
    pub count: usize,
    pub changefeed: String,
}

impl InternalEvent for FragmentsPending {
    fn emit(self) {
        gauge!("drift_fragments_pending", "changefeed" => self.changefeed).set(self.count as f64);
    }
}

/// Event emitted when a data file lands in storage.
pub struct DataFileWritten {
    pub bytes: u64,
    pub rows: u64,
    pub changefeed: String,
}

impl InternalEvent for DataFileWritten {
    fn emit(self) {
        trace!(bytes = self.bytes, rows = self.rows, changefeed = %self.changefeed, "Data file written");
        counter!("drift_files_written_total", "changefeed" => self.changefeed.clone()).increment(1);
        counter!("drift_file_bytes_written_total", "changefeed" => self.changefeed.clone())
            .increment(self.bytes);
        counter!("drift_file_rows_written_total", "changefeed" => self.changefeed)
            .increment(self.rows);
    }
}

/// Event emitted when a schema descriptor lands in storage.
pub struct SchemaFileWritten {
    pub changefeed: String,
}

impl InternalEvent for SchemaFileWritten {
    fn emit(self) {
        counter!("drift_schema_files_written_total", "changefeed" => self.changefeed).increment(1);
    }
}

/// Event emitted when an upload attempt fails and will be retried.
pub struct UploadRetried {
    pub changefeed: String,
}

impl InternalEvent for UploadRetried {
    fn emit(self) {
        counter!("drift_upload_retries_total", "changefeed" => self.changefeed).increment(1);
    }
}

/// Event emitted when transaction callbacks fire after a durable flush.
pub struct CallbacksFired {
    pub count: u64,
    pub changefeed: String,
}

impl InternalEvent for CallbacksFired {
    fn emit(self) {
        counter!("drift_callbacks_fired_total", "changefeed" => self.changefeed)
            .increment(self.count);
    }
}

/// Event emitted with the wall-clock duration of a flush (buffer to storage).
pub struct FlushDuration {
    pub duration: Duration,
    pub changefeed: String,
}

impl InternalEvent for FlushDuration {
    fn emit(self) {
        histogram!("drift_flush_duration_seconds", "changefeed" => self.changefeed)
            .record(self.duration.as_secs_f64());
    }
}

/// Storage operation kinds, used as metric labels.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    Put,
    Get,
    Exists,
}

impl StorageOperation {
    fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Put => "put",
            StorageOperation::Get => "get",
            StorageOperation::Exists => "exists",
        }
    }
}

/// Outcome of a storage request.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// Event emitted for each storage request.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        counter!(
            "drift_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str(),
        )
        .increment(1);
    }
}

/// Event emitted with the duration of a storage request.
pub struct StorageRequestDuration {
    pub operation: StorageOperation,
    pub duration: Duration,
}

impl InternalEvent for StorageRequestDuration {
    fn emit(self) {
        histogram!(
            "drift_storage_request_duration_seconds",
            "operation" => self.operation.as_str(),
        )
        .record(self.duration.as_secs_f64());
    }
}
