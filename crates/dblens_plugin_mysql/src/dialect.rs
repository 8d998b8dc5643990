use dblens_sql::{PlaceholderStyle, SqlDialect};

/// MySQL/MariaDB syntax: backtick identifiers, `?` placeholders.
pub struct MySqlDialect;

impl SqlDialect for MySqlDialect {
    fn quote_char(&self) -> char {
        '`'
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::QuestionMark
    }

    fn limit_clause(&self, limit: u64, offset: u64) -> String {
        format!("LIMIT {offset}, {limit}")
    }
}
