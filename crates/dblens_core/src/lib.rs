#![allow(clippy::result_large_err)]

mod cancel;
mod error;
mod export;
mod plugin;
mod pool;
mod profile;
mod profile_store;
mod registry;
mod ssl;
mod types;
mod value;
mod where_tree;

pub use cancel::CancelToken;
pub use error::{DbError, sanitize_secrets};
pub use export::{ExportOptions, ExportSink, escape_cell, escape_row, header_cell};
pub use plugin::{
    Connection, DatabaseCategory, DatabasePlugin, PluginCapabilities, PluginMetadata,
    SQL_OPERATORS,
};
pub use pool::ConnectionPool;
pub use profile::{ConnectionProfile, Credentials, ProfileSource, advanced_keys};
pub use profile_store::ProfileStore;
pub use registry::Engine;
pub use ssl::{SslMode, SslStatus, TlsSettings};
pub use types::{
    BackendKind, CellValue, Column, GraphRelationship, GraphUnit, MAX_PAGE_SIZE,
    RelationshipKind, RowQuery, RowSet, SortCondition, SortDirection, StorageUnit, UnitField,
};
pub use value::Value;
pub use where_tree::WhereCondition;

pub use chrono;
