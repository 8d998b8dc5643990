#![allow(clippy::result_large_err)]

//! Tabular serialisers consuming the core export contract.
//!
//! Plugins stream already-escaped string rows into an [`ExportSink`];
//! the sinks here decide the physical format. The formula-injection
//! escaping itself lives in `dblens_core` so every plugin shares it.

mod csv_sink;

pub use csv_sink::CsvSink;

use dblens_core::{DbError, ExportSink};

/// In-memory sink for tests and buffering callers.
#[derive(Debug, Default)]
pub struct VecSink {
    pub rows: Vec<Vec<String>>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExportSink for VecSink {
    fn write_row(&mut self, row: &[String]) -> Result<(), DbError> {
        self.rows.push(row.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_sink_collects_rows() {
        let mut sink = VecSink::new();
        sink.write_row(&["a".to_string(), "b".to_string()]).unwrap();
        sink.write_row(&["c".to_string(), "d".to_string()]).unwrap();
        assert_eq!(sink.rows.len(), 2);
        assert_eq!(sink.rows[1], vec!["c", "d"]);
    }
}
