use crate::DbError;

/// Row consumer supplied by the caller of `Connection::export_rows`.
///
/// The physical format (CSV delimiter, spreadsheet binary, ...) is the
/// sink's business; plugins only push string rows. A sink error aborts
/// the stream immediately and the plugin frees its backend resources.
pub trait ExportSink {
    fn write_row(&mut self, row: &[String]) -> Result<(), DbError>;
}

impl<F> ExportSink for F
where
    F: FnMut(&[String]) -> Result<(), DbError>,
{
    fn write_row(&mut self, row: &[String]) -> Result<(), DbError> {
        self(row)
    }
}

/// Options controlling an export stream.
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Emit `name:type` header cells instead of bare `name`.
    pub include_types_in_header: bool,
    /// When set, only rows whose primary-key tuple appears here are
    /// emitted. Plugins without a usable key reject the option.
    pub selected_rows: Option<Vec<Vec<String>>>,
}

/// Characters that make a spreadsheet interpret a cell as a formula.
const FORMULA_PREFIXES: [char; 6] = ['=', '+', '-', '@', '\t', '\r'];

/// Formula-injection escape: cells starting with `= + - @ \t \r` get a
/// leading apostrophe so spreadsheet applications treat them as text.
pub fn escape_cell(cell: &str) -> String {
    match cell.chars().next() {
        Some(first) if FORMULA_PREFIXES.contains(&first) => format!("'{cell}"),
        _ => cell.to_string(),
    }
}

/// Header cell per the documented convention: `name` or `name:type`.
pub fn header_cell(name: &str, type_name: &str, include_type: bool) -> String {
    if include_type && !type_name.is_empty() {
        format!("{name}:{type_name}")
    } else {
        name.to_string()
    }
}

/// Escape every cell of a data row. Headers are not escaped; they are
/// engine-controlled, not data.
pub fn escape_row(row: &[String]) -> Vec<String> {
    row.iter().map(|cell| escape_cell(cell)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formula_prefixes_are_escaped() {
        assert_eq!(escape_cell("=1+1"), "'=1+1");
        assert_eq!(escape_cell("+SUM(A1)"), "'+SUM(A1)");
        assert_eq!(escape_cell("-42"), "'-42");
        assert_eq!(escape_cell("@cmd"), "'@cmd");
        assert_eq!(escape_cell("\tpadded"), "'\tpadded");
        assert_eq!(escape_cell("\rreturn"), "'\rreturn");
    }

    #[test]
    fn safe_cells_pass_through() {
        assert_eq!(escape_cell("safe"), "safe");
        assert_eq!(escape_cell(""), "");
        assert_eq!(escape_cell("1+1"), "1+1");
    }

    #[test]
    fn header_cell_convention() {
        assert_eq!(header_cell("id", "int8", true), "id:int8");
        assert_eq!(header_cell("id", "int8", false), "id");
        assert_eq!(header_cell("doc", "", true), "doc");
    }

    #[test]
    fn closures_are_sinks() {
        let mut rows: Vec<Vec<String>> = Vec::new();
        let mut sink = |row: &[String]| -> Result<(), DbError> {
            rows.push(row.to_vec());
            Ok(())
        };
        ExportSink::write_row(&mut sink, &["a".to_string()]).unwrap();
        assert_eq!(rows.len(), 1);
    }
}
