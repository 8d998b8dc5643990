#![allow(clippy::result_large_err)]

mod dialect;
mod plugin;
mod values;

pub use dialect::PostgresDialect;
pub use plugin::{PostgresConnection, PostgresPlugin};
