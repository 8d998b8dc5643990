#![allow(clippy::result_large_err)]

//! Shared relational engine: one SQL core parameterised by dialect.
//!
//! Backend crates implement [`SqlExecutor`] over their driver and supply a
//! [`SqlDialect`]; query assembly, filter translation, mutations, graph
//! derivation and export streaming are shared here.

mod builder;
mod dialect;
mod engine;
mod translate;

pub use builder::{
    Statement, build_clear, build_create_unit, build_delete, build_insert, build_select,
    build_update,
};
pub use dialect::{AnsiDialect, BASE_OPERATORS, PlaceholderStyle, SqlDialect};
pub use engine::{
    ForeignKey, SqlExecutor, build_graph, clear_unit, create_unit, delete_row, export_rows,
    fetch_rows, insert_row, raw_query, reject_multi_statement, update_row,
};
pub use translate::translate_where;
