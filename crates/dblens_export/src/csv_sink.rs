use csv::Writer;
use dblens_core::{DbError, ExportSink};
use std::io::Write;

/// CSV sink with a configurable delimiter.
///
/// Quoting and newline handling follow the `csv` crate's RFC 4180
/// behaviour; the rows arriving here are already formula-escaped by the
/// exporting plugin.
pub struct CsvSink<W: Write> {
    writer: Writer<W>,
}

impl<W: Write> CsvSink<W> {
    pub fn new(inner: W) -> Self {
        Self::with_delimiter(inner, b',')
    }

    pub fn with_delimiter(inner: W, delimiter: u8) -> Self {
        Self {
            writer: csv::WriterBuilder::new()
                .delimiter(delimiter)
                .from_writer(inner),
        }
    }

    /// Flush and hand back the underlying writer.
    pub fn into_inner(self) -> Result<W, DbError> {
        self.writer
            .into_inner()
            .map_err(|e| DbError::Io(std::io::Error::other(e.to_string())))
    }
}

impl<W: Write> ExportSink for CsvSink<W> {
    fn write_row(&mut self, row: &[String]) -> Result<(), DbError> {
        self.writer
            .write_record(row)
            .map_err(|e| DbError::Io(std::io::Error::other(e.to_string())))?;
        self.writer
            .flush()
            .map_err(DbError::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dblens_core::escape_row;

    fn collect(sink: CsvSink<Vec<u8>>) -> String {
        String::from_utf8(sink.into_inner().unwrap()).unwrap()
    }

    #[test]
    fn writes_header_and_rows() {
        let mut sink = CsvSink::new(Vec::new());
        sink.write_row(&["id".to_string(), "c".to_string()]).unwrap();
        sink.write_row(&["1".to_string(), "a".to_string()]).unwrap();

        let output = collect(sink);
        assert_eq!(output, "id,c\n1,a\n");
    }

    #[test]
    fn formula_cells_arrive_escaped() {
        let mut sink = CsvSink::new(Vec::new());
        sink.write_row(&["c".to_string()]).unwrap();
        for row in [vec!["=1+1".to_string()], vec!["safe".to_string()]] {
            sink.write_row(&escape_row(&row)).unwrap();
        }

        let output = collect(sink);
        assert!(output.contains("'=1+1"));
        assert!(output.contains("safe"));
    }

    #[test]
    fn quotes_cells_containing_the_delimiter() {
        let mut sink = CsvSink::new(Vec::new());
        sink.write_row(&["a,b".to_string(), "plain".to_string()])
            .unwrap();

        let output = collect(sink);
        assert_eq!(output, "\"a,b\",plain\n");
    }

    #[test]
    fn custom_delimiter() {
        let mut sink = CsvSink::with_delimiter(Vec::new(), b'\t');
        sink.write_row(&["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(collect(sink), "a\tb\n");
    }
}
