//! Common error types shared between drift-core and the sink crate.
//!
//! Defines errors for storage, sink configuration, and metrics operations.

use std::time::Duration;

use snafu::prelude::*;

// ============ Storage Errors ============

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Invalid storage URL format.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed: {source}"))]
    ObjectStore { source: object_store::Error },

    /// IO error during storage operations.
    #[snafu(display("IO error: {source}"))]
    Io { source: std::io::Error },

    /// A storage request exceeded its per-attempt deadline.
    #[snafu(display("Storage operation timed out after {}", humantime::format_duration(*deadline)))]
    Timeout { deadline: Duration },

    /// S3 configuration error.
    #[snafu(display("S3 configuration error: {source}"))]
    S3Config { source: object_store::Error },

    /// GCS configuration error.
    #[snafu(display("GCS configuration error: {source}"))]
    GcsConfig { source: object_store::Error },

    /// Azure configuration error.
    #[snafu(display("Azure configuration error: {source}"))]
    AzureConfig { source: object_store::Error },
}

impl StorageError {
    /// Check if this error represents a "not found" condition (404, NoSuchKey, etc.)
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::ObjectStore { source } => {
                matches!(source, object_store::Error::NotFound { .. })
            }
            _ => false,
        }
    }
}

// ============ Config Errors ============

/// Errors that can occur while parsing and validating sink configuration.
///
/// Any of these refuses sink creation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// The sink URI could not be parsed at all.
    #[snafu(display("Invalid sink URI '{uri}': {source}"))]
    InvalidSinkUri { uri: String, source: url::ParseError },

    /// Unknown codec protocol in the `protocol` query parameter.
    #[snafu(display("Unknown codec protocol '{protocol}' (expected 'json' or 'csv')"))]
    UnknownProtocol { protocol: String },

    /// A query parameter held a value that could not be parsed.
    #[snafu(display("Invalid value '{value}' for sink parameter '{param}'"))]
    InvalidParam { param: String, value: String },

    /// Flush interval outside the supported range.
    #[snafu(display(
        "flush-interval {} out of range ({} to {})",
        humantime::format_duration(*interval),
        humantime::format_duration(*min),
        humantime::format_duration(*max),
    ))]
    FlushIntervalOutOfRange {
        interval: Duration,
        min: Duration,
        max: Duration,
    },

    /// Target file size outside the supported range.
    #[snafu(display("file-size {size} out of range ({min} to {max} bytes)"))]
    FileSizeOutOfRange { size: usize, min: usize, max: usize },

    /// Worker count outside the supported range.
    #[snafu(display("worker-count {count} out of range (1 to {max})"))]
    WorkerCountOutOfRange { count: usize, max: usize },

    /// File index width outside the supported range.
    #[snafu(display("file-index-width {width} out of range ({min} to {max})"))]
    FileIndexWidthOutOfRange { width: usize, min: usize, max: usize },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },

    /// Metrics server already initialized (double-init attempted).
    #[snafu(display("Metrics server already initialized"))]
    AlreadyInitialized,

    /// Metrics server not initialized (controller accessed before init).
    #[snafu(display("Metrics server not initialized"))]
    NotInitialized,
}
