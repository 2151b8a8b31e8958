//! drift: Cloud-storage CDC sink.
//!
//! This crate handles:
//! - Fanning row-change transactions out to a pool of encoding workers
//! - Restoring per-table order after parallel encoding
//! - Batching encoded rows into size- and time-bounded files per table
//! - Uploading files to cloud storage (S3, GCS, Azure, local) with retry
//! - Acknowledging transactions once their bytes are durable

pub mod codec;
pub mod config;
pub mod error;
pub mod model;
pub mod path;
pub mod sink;

// Re-export commonly used items
pub use config::SinkConfig;
pub use error::SinkError;
pub use model::{
    Callback, ChangeTxn, ColumnDef, RowChange, RowOp, SinkStateHandle, TableName, TableSchema,
    TableState, VersionedTable,
};
pub use sink::CloudStorageSink;

// Re-export from drift-core
pub use drift_core::{
    DEFAULT_METRICS_ADDR, StorageProvider, StorageProviderRef, init_metrics, init_tracing,
    shutdown_signal,
};
