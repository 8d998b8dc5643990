#![allow(clippy::result_large_err)]

mod plugin;
mod translate;

pub use plugin::{MongoConnection, MongoPlugin};
pub use translate::translate_where;
