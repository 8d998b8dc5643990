use dblens_sql::{PlaceholderStyle, SqlDialect};

/// PostgreSQL syntax: double-quoted identifiers, `$n` placeholders,
/// `ILIKE` on top of the base operator set.
pub struct PostgresDialect;

const OPERATORS: &[&str] = &[
    "=",
    "!=",
    "<>",
    "<",
    "<=",
    ">",
    ">=",
    "LIKE",
    "NOT LIKE",
    "ILIKE",
    "NOT ILIKE",
    "IN",
    "NOT IN",
    "IS NULL",
    "IS NOT NULL",
    "BETWEEN",
];

impl SqlDialect for PostgresDialect {
    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::DollarNumber
    }

    fn operators(&self) -> &'static [&'static str] {
        OPERATORS
    }
}
