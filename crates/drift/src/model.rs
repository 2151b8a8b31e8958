//! Core data model: tables, row changes, transactions, and the pipeline's
//! unit of work.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::codec::EncodedMessage;

/// A table identity: schema (database) plus table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableName {
    pub schema: String,
    pub table: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// A table identity pinned to one schema version.
///
/// Rows for different versions of the same table are written to distinct
/// file streams; within one stream all rows share a schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionedTable {
    pub name: TableName,
    pub version: u64,
}

impl VersionedTable {
    pub fn new(name: TableName, version: u64) -> Self {
        Self { name, version }
    }
}

impl fmt::Display for VersionedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@v{}", self.name, self.version)
    }
}

/// One column of a table schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: String,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// The column layout of one schema version of a table.
///
/// Carried on every transaction; the CSV codec uses it for column order and
/// the table writer serializes it into the schema descriptor sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Self { columns }
    }
}

/// The kind of a row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowOp {
    Insert,
    Update,
    Delete,
}

impl RowOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowOp::Insert => "insert",
            RowOp::Update => "update",
            RowOp::Delete => "delete",
        }
    }
}

/// One changed row. Column insertion order is preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowChange {
    pub op: RowOp,
    pub columns: IndexMap<String, serde_json::Value>,
}

impl RowChange {
    pub fn new(op: RowOp, columns: IndexMap<String, serde_json::Value>) -> Self {
        Self { op, columns }
    }
}

/// Lifecycle state of the table sink a transaction belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    /// The table is replicating; events are accepted.
    Sinking,
    /// The table is being stopped; new events are acknowledged and dropped.
    Stopping,
    /// The table is stopped.
    Stopped,
}

const STATE_SINKING: u8 = 0;
const STATE_STOPPING: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// Shared handle to a table sink's lifecycle state.
///
/// Upstream flips the state; the sink reads it at ingest time. Clones share
/// the underlying state.
#[derive(Debug, Clone)]
pub struct SinkStateHandle(Arc<AtomicU8>);

impl SinkStateHandle {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(STATE_SINKING)))
    }

    pub fn load(&self) -> TableState {
        match self.0.load(Ordering::Acquire) {
            STATE_SINKING => TableState::Sinking,
            STATE_STOPPING => TableState::Stopping,
            _ => TableState::Stopped,
        }
    }

    pub fn store(&self, state: TableState) {
        let raw = match state {
            TableState::Sinking => STATE_SINKING,
            TableState::Stopping => STATE_STOPPING,
            TableState::Stopped => STATE_STOPPED,
        };
        self.0.store(raw, Ordering::Release);
    }
}

impl Default for SinkStateHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-transaction acknowledgement callback, fired exactly once when the
/// transaction's bytes are durable (or when the transaction is dropped for a
/// stopping table).
pub type Callback = Box<dyn FnOnce() + Send + Sync + 'static>;

/// One upstream transaction targeting a single versioned table.
pub struct ChangeTxn {
    pub table: VersionedTable,
    pub schema: Arc<TableSchema>,
    pub commit_ts: u64,
    pub rows: Vec<RowChange>,
    pub callback: Option<Callback>,
    pub state: SinkStateHandle,
}

impl ChangeTxn {
    pub fn new(
        table: VersionedTable,
        schema: Arc<TableSchema>,
        commit_ts: u64,
        rows: Vec<RowChange>,
    ) -> Self {
        Self {
            table,
            schema,
            commit_ts,
            rows,
            callback: None,
            state: SinkStateHandle::new(),
        }
    }

    pub fn with_callback(mut self, callback: Callback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn with_state(mut self, state: SinkStateHandle) -> Self {
        self.state = state;
        self
    }

    /// Fire the acknowledgement callback, if it hasn't fired yet.
    pub(crate) fn ack(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback();
        }
    }
}

impl fmt::Debug for ChangeTxn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeTxn")
            .field("table", &self.table)
            .field("commit_ts", &self.commit_ts)
            .field("rows", &self.rows.len())
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// The pipeline's unit of work: one transaction plus routing metadata.
///
/// `seq` is assigned globally at ingest and strictly increases; `table_seq`
/// is a monotone per-table index (from 1) that the defragmenter reorders on.
/// `encoded` is empty until an encoding worker fills it.
#[derive(Debug)]
pub(crate) struct EventFragment {
    pub seq: u64,
    pub table_seq: u64,
    pub table: VersionedTable,
    pub txn: ChangeTxn,
    pub encoded: Option<Vec<EncodedMessage>>,
}
