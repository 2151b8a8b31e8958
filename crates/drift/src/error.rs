//! Error types for the cloud-storage sink.

use snafu::prelude::*;

// Re-export common errors
pub use drift_core::error::{ConfigError, StorageError};

pub use crate::codec::CodecError;

/// Top-level sink errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SinkError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Codec error while encoding a transaction.
    #[snafu(display("Encoding error: {source}"))]
    Encode { source: CodecError },

    /// Storage error outside the upload path (e.g. building the provider).
    #[snafu(display("Storage error: {source}"))]
    Storage { source: StorageError },

    /// Upload retry budget exhausted.
    #[snafu(display("Upload of '{path}' failed after {attempts} attempts: {source}"))]
    Upload {
        path: String,
        attempts: usize,
        source: StorageError,
    },

    /// The sink is dead; no further events are accepted.
    #[snafu(display("dead sink"))]
    DeadSink,

    /// An internal pipeline channel closed unexpectedly.
    #[snafu(display("Sink channel closed unexpectedly"))]
    ChannelClosed,

    /// A fragment bypassed the encoder pool.
    #[snafu(display("Fragment reached the writer without an encoded payload"))]
    UnencodedFragment,

    /// A sink worker panicked.
    #[snafu(display("Sink worker panicked: {message}"))]
    WorkerPanic { message: String },
}

impl From<ConfigError> for SinkError {
    fn from(source: ConfigError) -> Self {
        SinkError::Config { source }
    }
}

impl From<CodecError> for SinkError {
    fn from(source: CodecError) -> Self {
        SinkError::Encode { source }
    }
}

impl From<StorageError> for SinkError {
    fn from(source: StorageError) -> Self {
        SinkError::Storage { source }
    }
}
