#![allow(clippy::result_large_err)]

mod plugin;

pub use plugin::{SqliteConnection, SqlitePlugin};
