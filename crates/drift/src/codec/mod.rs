//! Codec plugin contract and built-in codecs.
//!
//! A codec turns one transaction into one or more opaque byte messages.
//! Encoders are stateful and not thread-safe: each encoding worker builds
//! its own instance through an [`EncoderBuilder`].

mod csv;
mod json;

pub use csv::CsvEncoderBuilder;
pub use json::JsonEncoderBuilder;

use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::model::{ChangeTxn, RowChange};

/// Errors produced while encoding row changes.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CodecError {
    /// JSON serialization failed.
    #[snafu(display("Failed to serialize row change: {source}"))]
    Serialize { source: serde_json::Error },

    /// A row is missing a column its table schema declares.
    #[snafu(display("Row for {table} is missing column '{column}'"))]
    MissingColumn { table: String, column: String },
}

/// One encoded message: opaque bytes plus the number of rows they carry.
#[derive(Debug, Clone)]
pub struct EncodedMessage {
    pub payload: Bytes,
    pub row_count: usize,
}

/// The wire protocol a sink encodes with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Json,
    Csv,
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Protocol::Json),
            "csv" => Ok(Protocol::Csv),
            other => Err(other.to_string()),
        }
    }
}

/// Stateful per-worker encoder.
///
/// Workers feed every row of a transaction through [`Encoder::append_row`],
/// then drain the buffered output with [`Encoder::build_messages`] at the
/// transaction boundary.
pub trait Encoder: Send {
    /// Buffer one row change of the given transaction.
    fn append_row(&mut self, txn: &ChangeTxn, row: &RowChange) -> Result<(), CodecError>;

    /// Drain everything buffered since the last call into ordered messages.
    fn build_messages(&mut self) -> Result<Vec<EncodedMessage>, CodecError>;
}

/// Factory for [`Encoder`] instances, one per encoding worker.
pub trait EncoderBuilder: Send + Sync {
    /// Build a fresh encoder.
    fn build(&self) -> Box<dyn Encoder>;

    /// The file extension of artifacts this codec produces (without dot).
    fn extension(&self) -> &'static str;
}

/// Resolve the builder for a protocol.
pub fn builder_for(protocol: Protocol) -> Arc<dyn EncoderBuilder> {
    match protocol {
        Protocol::Json => Arc::new(JsonEncoderBuilder),
        Protocol::Csv => Arc::new(CsvEncoderBuilder),
    }
}
