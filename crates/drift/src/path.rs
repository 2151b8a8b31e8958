//! Deterministic file paths for sink artifacts.
//!
//! Data files: `<schema>/<table>/<version>/CDC<padded index>.<ext>`
//! Schema descriptors: `<schema>/<table>/<version>/schema.json`
//!
//! Paths are relative to the sink root; the storage provider prepends its
//! configured prefix. The layout is a stable contract for downstream
//! consumers.

use crate::model::VersionedTable;

/// File name of the per-version schema descriptor sidecar.
pub const SCHEMA_FILE_NAME: &str = "schema.json";

/// Builds the paths of sink artifacts for one codec extension and index width.
#[derive(Debug, Clone)]
pub struct FilePathBuilder {
    extension: &'static str,
    index_width: usize,
}

impl FilePathBuilder {
    pub fn new(extension: &'static str, index_width: usize) -> Self {
        Self {
            extension,
            index_width,
        }
    }

    /// Path of the data file with the given rotation index (1-based).
    pub fn data_path(&self, table: &VersionedTable, index: u64) -> String {
        format!(
            "{}/{}/{}/CDC{:0width$}.{}",
            table.name.schema,
            table.name.table,
            table.version,
            index,
            self.extension,
            width = self.index_width,
        )
    }

    /// Path of the schema descriptor for the table's version directory.
    pub fn schema_path(&self, table: &VersionedTable) -> String {
        format!(
            "{}/{}/{}/{}",
            table.name.schema, table.name.table, table.version, SCHEMA_FILE_NAME,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TableName;

    fn table() -> VersionedTable {
        VersionedTable::new(TableName::new("db", "t"), 1)
    }

    #[test]
    fn test_data_path_padding() {
        let paths = FilePathBuilder::new("json", 10);
        assert_eq!(paths.data_path(&table(), 1), "db/t/1/CDC0000000001.json");
        assert_eq!(paths.data_path(&table(), 42), "db/t/1/CDC0000000042.json");
    }

    #[test]
    fn test_data_path_respects_width() {
        let paths = FilePathBuilder::new("csv", 6);
        assert_eq!(paths.data_path(&table(), 7), "db/t/1/CDC000007.csv");
    }

    #[test]
    fn test_index_wider_than_padding() {
        let paths = FilePathBuilder::new("json", 6);
        assert_eq!(
            paths.data_path(&table(), 12_345_678),
            "db/t/1/CDC12345678.json"
        );
    }

    #[test]
    fn test_schema_path() {
        let paths = FilePathBuilder::new("json", 10);
        assert_eq!(paths.schema_path(&table()), "db/t/1/schema.json");
    }

    #[test]
    fn test_version_in_path() {
        let paths = FilePathBuilder::new("json", 10);
        let v2 = VersionedTable::new(TableName::new("db", "t"), 2);
        assert_eq!(paths.data_path(&v2, 1), "db/t/2/CDC0000000001.json");
    }
}
