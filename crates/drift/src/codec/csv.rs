//! CSV codec.
//!
//! Emits one record per row change with the fixed lead columns
//! `op,schema,table,commit_ts` followed by the table's columns in schema
//! order. Fields containing separators, quotes, or newlines are quoted with
//! doubled inner quotes.

use bytes::Bytes;
use snafu::prelude::*;

use crate::model::{ChangeTxn, RowChange};

use super::{CodecError, EncodedMessage, Encoder, EncoderBuilder, MissingColumnSnafu};

/// Builder for the CSV codec.
pub struct CsvEncoderBuilder;

impl EncoderBuilder for CsvEncoderBuilder {
    fn build(&self) -> Box<dyn Encoder> {
        Box::new(CsvEncoder::default())
    }

    fn extension(&self) -> &'static str {
        "csv"
    }
}

#[derive(Default)]
struct CsvEncoder {
    buf: Vec<u8>,
    rows: usize,
}

impl Encoder for CsvEncoder {
    fn append_row(&mut self, txn: &ChangeTxn, row: &RowChange) -> Result<(), CodecError> {
        let mut fields: Vec<String> = Vec::with_capacity(4 + txn.schema.columns.len());
        fields.push(row.op.as_str().to_string());
        fields.push(txn.table.name.schema.clone());
        fields.push(txn.table.name.table.clone());
        fields.push(txn.commit_ts.to_string());

        for column in &txn.schema.columns {
            let value = row.columns.get(&column.name).ok_or_else(|| {
                MissingColumnSnafu {
                    table: txn.table.to_string(),
                    column: column.name.clone(),
                }
                .build()
            })?;
            fields.push(render_value(value));
        }

        let mut first = true;
        for field in &fields {
            if !first {
                self.buf.push(b',');
            }
            first = false;
            self.buf.extend_from_slice(escape_field(field).as_bytes());
        }
        self.buf.push(b'\n');
        self.rows += 1;
        Ok(())
    }

    fn build_messages(&mut self) -> Result<Vec<EncodedMessage>, CodecError> {
        if self.buf.is_empty() {
            return Ok(Vec::new());
        }
        let payload = Bytes::from(std::mem::take(&mut self.buf));
        let row_count = std::mem::take(&mut self.rows);
        Ok(vec![EncodedMessage { payload, row_count }])
    }
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
