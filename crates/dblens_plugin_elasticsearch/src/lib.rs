#![allow(clippy::result_large_err)]

mod mapping;
mod plugin;
mod translate;

pub use mapping::{es_field_type, flatten_mapping};
pub use plugin::{ElasticSearchConnection, ElasticSearchPlugin};
pub use translate::translate_where;
