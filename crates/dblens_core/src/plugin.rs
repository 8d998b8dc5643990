use crate::{
    CancelToken, CellValue, Column, ConnectionProfile, Credentials, DbError, ExportOptions,
    ExportSink, GraphUnit, RowQuery, RowSet, SslStatus, StorageUnit, UnitField, Value,
};
use bitflags::bitflags;
use std::sync::Arc;

bitflags! {
    /// Capabilities a backend plugin may support.
    ///
    /// Callers query these instead of matching on backend kinds.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PluginCapabilities: u32 {
        /// Server hosts multiple databases.
        const DATABASES = 1 << 0;
        /// Databases contain named schemas.
        const SCHEMAS = 1 << 1;
        /// Raw statement execution.
        const RAW_QUERY = 1 << 2;
        /// Storage-unit creation (DDL or index mapping).
        const CREATE_UNIT = 1 << 3;
        /// Row/document insertion.
        const INSERT = 1 << 4;
        /// Key-driven updates.
        const UPDATE = 1 << 5;
        /// Key-driven deletes.
        const DELETE = 1 << 6;
        /// Relationship graph derivation.
        const GRAPH = 1 << 7;
        /// TLS-capable transport.
        const SSL = 1 << 8;
        /// Scoped filtering via the where tree.
        const FILTERING = 1 << 9;
        /// Multi-key sorting.
        const SORTING = 1 << 10;
    }
}

/// High-level data model of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseCategory {
    Relational,
    Document,
    KeyValue,
    Search,
}

impl DatabaseCategory {
    pub fn unit_name(&self) -> &'static str {
        match self {
            DatabaseCategory::Relational => "table",
            DatabaseCategory::Document => "collection",
            DatabaseCategory::KeyValue => "keyspace",
            DatabaseCategory::Search => "index",
        }
    }
}

/// Static description of a plugin: identity, capabilities, and the
/// operator set its where-tree translator accepts.
#[derive(Debug, Clone, Copy)]
pub struct PluginMetadata {
    pub display_name: &'static str,
    pub description: &'static str,
    pub category: DatabaseCategory,
    pub capabilities: PluginCapabilities,
    /// Supported filter operators as `(symbol, ast tag)` pairs, surfaced
    /// so an embedder can restrict operator pickers per backend.
    pub operators: &'static [(&'static str, &'static str)],
}

impl PluginMetadata {
    pub fn supports_operator(&self, symbol: &str) -> bool {
        self.operators
            .iter()
            .any(|(s, _)| s.eq_ignore_ascii_case(symbol))
    }
}

/// The documented minimum operator set for SQL plugins.
pub const SQL_OPERATORS: &[(&str, &str)] = &[
    ("=", "eq"),
    ("!=", "ne"),
    ("<>", "ne"),
    ("<", "lt"),
    ("<=", "le"),
    (">", "gt"),
    (">=", "ge"),
    ("LIKE", "like"),
    ("NOT LIKE", "not_like"),
    ("IN", "in"),
    ("NOT IN", "not_in"),
    ("IS NULL", "is_null"),
    ("IS NOT NULL", "is_not_null"),
];

/// Backend plugin: connection factory plus static metadata.
///
/// One instance per registered backend kind; the registry dispatches all
/// uniform operations through it.
pub trait DatabasePlugin: Send + Sync {
    /// The backend kind this plugin handles.
    fn kind(&self) -> crate::BackendKind;

    fn metadata(&self) -> &'static PluginMetadata;

    /// Validate credentials without opening a connection.
    fn validate(&self, credentials: &Credentials) -> Result<(), DbError> {
        credentials.validate()
    }

    /// Open a connection handle. `database` overrides the profile's
    /// default database for backends with the notion.
    fn connect(
        &self,
        profile: &ConnectionProfile,
        database: Option<&str>,
    ) -> Result<Arc<dyn Connection>, DbError>;
}

/// Live connection handle. Owned by the pool, shared by concurrent
/// callers resolving the same profile id.
///
/// Default implementations return `Unsupported` so each plugin only
/// implements what its backend has a notion of.
pub trait Connection: Send + Sync {
    fn kind(&self) -> crate::BackendKind;

    fn metadata(&self) -> &'static PluginMetadata;

    /// Cheap liveness probe; policy is plugin-defined (`SELECT 1`,
    /// cluster info, `PING`, ...).
    fn ping(&self) -> Result<(), DbError>;

    /// Release backend resources. Called by the pool on eviction.
    fn close(&self) -> Result<(), DbError>;

    fn databases(&self) -> Result<Vec<String>, DbError> {
        Err(DbError::unsupported(format!(
            "{} has no notion of databases",
            self.metadata().display_name
        )))
    }

    fn schemas(&self) -> Result<Vec<String>, DbError> {
        Err(DbError::unsupported(format!(
            "{} has no notion of schemas",
            self.metadata().display_name
        )))
    }

    /// List row containers in a schema or database scope.
    fn storage_units(&self, scope: &str) -> Result<Vec<StorageUnit>, DbError>;

    /// Column metadata for one unit. Document stores synthesize a single
    /// `document` column.
    fn columns(&self, scope: &str, unit: &str) -> Result<Vec<Column>, DbError>;

    /// Paged, filtered, sorted rows.
    fn rows(
        &self,
        scope: &str,
        unit: &str,
        query: &RowQuery,
        cancel: &CancelToken,
    ) -> Result<RowSet, DbError>;

    fn add_storage_unit(
        &self,
        _scope: &str,
        _unit: &str,
        _fields: &[UnitField],
    ) -> Result<(), DbError> {
        Err(DbError::unsupported(format!(
            "{} does not support creating storage units",
            self.metadata().display_name
        )))
    }

    fn add_row(&self, _scope: &str, _unit: &str, _cells: &[CellValue]) -> Result<(), DbError> {
        Err(DbError::unsupported(format!(
            "{} does not support inserts",
            self.metadata().display_name
        )))
    }

    /// Key-driven update: `values` carries the full new row, `updated`
    /// names the columns that changed.
    fn update_row(
        &self,
        _scope: &str,
        _unit: &str,
        _values: &[CellValue],
        _updated: &[String],
    ) -> Result<(), DbError> {
        Err(DbError::unsupported(format!(
            "{} does not support updates",
            self.metadata().display_name
        )))
    }

    fn delete_row(&self, _scope: &str, _unit: &str, _values: &[CellValue]) -> Result<(), DbError> {
        Err(DbError::unsupported(format!(
            "{} does not support deletes",
            self.metadata().display_name
        )))
    }

    fn clear_storage_unit(&self, _scope: &str, _unit: &str) -> Result<(), DbError> {
        Err(DbError::unsupported(format!(
            "{} does not support clearing storage units",
            self.metadata().display_name
        )))
    }

    /// Raw statement execution; SQL backends only.
    fn raw_query(&self, _query: &str, _cancel: &CancelToken) -> Result<RowSet, DbError> {
        Err(DbError::unsupported(format!(
            "{} does not support raw query execution",
            self.metadata().display_name
        )))
    }

    /// Storage units plus relationships, derived from foreign keys or
    /// heuristic field matching.
    fn graph(&self, _scope: &str) -> Result<Vec<GraphUnit>, DbError> {
        Err(DbError::unsupported(format!(
            "{} does not support schema graphs",
            self.metadata().display_name
        )))
    }

    /// Stream every row of a unit into the sink. Returns the number of
    /// data rows written (the header is not counted).
    fn export_rows(
        &self,
        scope: &str,
        unit: &str,
        options: &ExportOptions,
        sink: &mut dyn ExportSink,
        cancel: &CancelToken,
    ) -> Result<u64, DbError>;

    /// Plugin-chosen stringification of a typed value.
    fn format_value(&self, value: &Value) -> String {
        value.as_display_string()
    }

    fn ssl_status(&self) -> Result<SslStatus, DbError> {
        Ok(SslStatus::disabled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_operator_minimum_is_present() {
        let metadata = PluginMetadata {
            display_name: "Test",
            description: "",
            category: DatabaseCategory::Relational,
            capabilities: PluginCapabilities::FILTERING,
            operators: SQL_OPERATORS,
        };

        for symbol in [
            "=", "!=", "<", "<=", ">", ">=", "LIKE", "NOT LIKE", "IN", "NOT IN", "IS NULL",
            "IS NOT NULL",
        ] {
            assert!(metadata.supports_operator(symbol), "missing {symbol}");
        }
        assert!(metadata.supports_operator("like"));
        assert!(!metadata.supports_operator("REGEXP"));
    }
}
