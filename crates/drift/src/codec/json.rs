//! Newline-delimited JSON codec.
//!
//! Emits one JSON object per row change:
//!
//! ```json
//! {"schema":"db","table":"users","version":1,"commit_ts":42,"op":"insert","data":{"id":1}}
//! ```

use bytes::Bytes;
use serde::Serialize;
use snafu::prelude::*;

use crate::model::{ChangeTxn, RowChange};

use super::{CodecError, EncodedMessage, Encoder, EncoderBuilder, SerializeSnafu};

/// Builder for the NDJSON codec.
pub struct JsonEncoderBuilder;

impl EncoderBuilder for JsonEncoderBuilder {
    fn build(&self) -> Box<dyn Encoder> {
        Box::new(JsonEncoder::default())
    }

    fn extension(&self) -> &'static str {
        "json"
    }
}

#[derive(Serialize)]
struct JsonEnvelope<'a> {
    schema: &'a str,
    table: &'a str,
    version: u64,
    commit_ts: u64,
    op: &'static str,
    data: &'a indexmap::IndexMap<String, serde_json::Value>,
}

#[derive(Default)]
struct JsonEncoder {
    buf: Vec<u8>,
    rows: usize,
}

impl Encoder for JsonEncoder {
    fn append_row(&mut self, txn: &ChangeTxn, row: &RowChange) -> Result<(), CodecError> {
        let envelope = JsonEnvelope {
            schema: &txn.table.name.schema,
            table: &txn.table.name.table,
            version: txn.table.version,
            commit_ts: txn.commit_ts,
            op: row.op.as_str(),
            data: &row.columns,
        };
        serde_json::to_writer(&mut self.buf, &envelope).context(SerializeSnafu)?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColumnDef, RowOp, TableName, TableSchema, VersionedTable};
    use indexmap::IndexMap;
    use std::sync::Arc;

    fn txn_with_rows(rows: Vec<RowChange>) -> ChangeTxn {
        ChangeTxn::new(
            VersionedTable::new(TableName::new("db", "users"), 1),
            Arc::new(TableSchema::new(vec![
                ColumnDef::new("id", "bigint"),
                ColumnDef::new("name", "varchar"),
            ])),
            42,
            rows,
        )
    }

    fn row(op: RowOp, id: i64, name: &str) -> RowChange {
        let mut columns = IndexMap::new();
        columns.insert("id".to_string(), serde_json::json!(id));
        columns.insert("name".to_string(), serde_json::json!(name));
        RowChange::new(op, columns)
    }

    #[test]
    fn test_one_line_per_row() {
        let txn = txn_with_rows(vec![
            row(RowOp::Insert, 1, "alice"),
            row(RowOp::Delete, 2, "bob"),
        ]);

        let mut encoder = JsonEncoderBuilder.build();
        for r in &txn.rows {
            encoder.append_row(&txn, r).unwrap();
        }
        let messages = encoder.build_messages().unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].row_count, 2);

        let text = String::from_utf8(messages[0].payload.to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["schema"], "db");
        assert_eq!(first["table"], "users");
        assert_eq!(first["version"], 1);
        assert_eq!(first["commit_ts"], 42);
        assert_eq!(first["op"], "insert");
        assert_eq!(first["data"]["name"], "alice");

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["op"], "delete");
    }

    #[test]
    fn test_build_messages_drains() {
        let txn = txn_with_rows(vec![row(RowOp::Insert, 1, "a")]);

        let mut encoder = JsonEncoderBuilder.build();
        encoder.append_row(&txn, &txn.rows[0]).unwrap();

        assert_eq!(encoder.build_messages().unwrap().len(), 1);
        assert!(encoder.build_messages().unwrap().is_empty());
    }
}
