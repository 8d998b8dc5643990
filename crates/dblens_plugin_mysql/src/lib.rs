#![allow(clippy::result_large_err)]

mod dialect;
mod plugin;

pub use dialect::MySqlDialect;
pub use plugin::{MySqlConnection, MySqlPlugin};
