use dblens_core::Value;

/// Placeholder style for parameterized queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?` placeholders (SQLite, MySQL).
    QuestionMark,
    /// `$1`, `$2`, ... (PostgreSQL).
    DollarNumber,
    /// `{p1:String}` server-side typed placeholders (ClickHouse HTTP).
    BraceTyped,
}

/// Operator symbols every SQL dialect accepts. Individual dialects may
/// extend this (e.g. `ILIKE` on PostgreSQL).
pub const BASE_OPERATORS: &[&str] = &[
    "=", "!=", "<>", "<", "<=", ">", ">=", "LIKE", "NOT LIKE", "IN", "NOT IN", "IS NULL",
    "IS NOT NULL", "BETWEEN",
];

/// Database-specific SQL syntax: quoting, placeholders, pagination,
/// literals, and the operator allow-list for the filter translator.
pub trait SqlDialect: Send + Sync {
    /// Identifier quote character (`"` for PostgreSQL/SQLite/ClickHouse,
    /// backtick for MySQL).
    fn quote_char(&self) -> char {
        '"'
    }

    /// Quote an identifier, doubling embedded quote characters. This is
    /// the only path user-supplied identifiers take into SQL text.
    fn quote_identifier(&self, name: &str) -> String {
        let q = self.quote_char();
        let mut out = String::with_capacity(name.len() + 2);
        out.push(q);
        for ch in name.chars() {
            if ch == q {
                out.push(q);
            }
            out.push(ch);
        }
        out.push(q);
        out
    }

    /// Build a qualified unit reference (`"schema"."table"`).
    fn qualified_unit(&self, scope: Option<&str>, unit: &str) -> String {
        match scope {
            Some(s) if !s.is_empty() => {
                format!("{}.{}", self.quote_identifier(s), self.quote_identifier(unit))
            }
            _ => self.quote_identifier(unit),
        }
    }

    fn placeholder_style(&self) -> PlaceholderStyle;

    /// Render the placeholder for the `index`-th parameter (1-based).
    /// `value` is available for dialects with typed placeholders.
    fn placeholder(&self, index: usize, value: &Value) -> String {
        match self.placeholder_style() {
            PlaceholderStyle::QuestionMark => "?".to_string(),
            PlaceholderStyle::DollarNumber => format!("${index}"),
            PlaceholderStyle::BraceTyped => {
                let type_name = match value {
                    Value::Int(_) => "Int64",
                    Value::Float(_) => "Float64",
                    Value::Bool(_) => "Bool",
                    _ => "String",
                };
                format!("{{p{index}:{type_name}}}")
            }
        }
    }

    fn bool_literal(&self, value: bool) -> &'static str {
        if value { "TRUE" } else { "FALSE" }
    }

    /// Pagination clause appended to a SELECT.
    fn limit_clause(&self, limit: u64, offset: u64) -> String {
        format!("LIMIT {limit} OFFSET {offset}")
    }

    /// Filter operators this dialect accepts. Anything else fails the
    /// whole translation with `invalid-operator`.
    fn operators(&self) -> &'static [&'static str] {
        BASE_OPERATORS
    }

    /// Whether the driver can isolate statements in a raw multi-statement
    /// input. When false, raw execution rejects inputs containing more
    /// than one statement.
    fn allows_multi_statement(&self) -> bool {
        false
    }
}

/// ANSI defaults: double-quoted identifiers, `?` placeholders.
pub struct AnsiDialect;

impl SqlDialect for AnsiDialect {
    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::QuestionMark
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_quotes_are_doubled() {
        let d = AnsiDialect;
        assert_eq!(d.quote_identifier("odd name"), "\"odd name\"");
        assert_eq!(d.quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn qualified_unit_handles_missing_scope() {
        let d = AnsiDialect;
        assert_eq!(d.qualified_unit(Some("public"), "users"), "\"public\".\"users\"");
        assert_eq!(d.qualified_unit(None, "users"), "\"users\"");
        assert_eq!(d.qualified_unit(Some(""), "users"), "\"users\"");
    }

    #[test]
    fn placeholder_styles_render() {
        struct Dollar;
        impl SqlDialect for Dollar {
            fn placeholder_style(&self) -> PlaceholderStyle {
                PlaceholderStyle::DollarNumber
            }
        }
        struct Brace;
        impl SqlDialect for Brace {
            fn placeholder_style(&self) -> PlaceholderStyle {
                PlaceholderStyle::BraceTyped
            }
        }

        assert_eq!(AnsiDialect.placeholder(3, &Value::Int(1)), "?");
        assert_eq!(Dollar.placeholder(3, &Value::Int(1)), "$3");
        assert_eq!(Brace.placeholder(2, &Value::Int(1)), "{p2:Int64}");
        assert_eq!(
            Brace.placeholder(1, &Value::Text("x".into())),
            "{p1:String}"
        );
    }
}
