use crate::SqlDialect;
use dblens_core::{DbError, Value, WhereCondition};

/// Fold a where tree into a SQL fragment plus bound parameters.
///
/// Values always flow into `params`; the fragment only ever contains
/// quoted identifiers, whitelisted operator keywords, and placeholders.
/// `params` may already contain values from an enclosing statement; the
/// placeholder numbering continues from its current length.
pub fn translate_where(
    dialect: &dyn SqlDialect,
    condition: &WhereCondition,
    params: &mut Vec<Value>,
) -> Result<String, DbError> {
    condition.validate()?;
    fold(dialect, condition, params)
}

fn fold(
    dialect: &dyn SqlDialect,
    condition: &WhereCondition,
    params: &mut Vec<Value>,
) -> Result<String, DbError> {
    match condition {
        WhereCondition::Atomic {
            key,
            operator,
            value,
            column_type,
        } => atomic(dialect, key, operator, value, column_type, params),
        WhereCondition::And(children) => compound(dialect, children, " AND ", params),
        WhereCondition::Or(children) => compound(dialect, children, " OR ", params),
    }
}

fn compound(
    dialect: &dyn SqlDialect,
    children: &[WhereCondition],
    joiner: &str,
    params: &mut Vec<Value>,
) -> Result<String, DbError> {
    let mut parts = Vec::with_capacity(children.len());
    for child in children {
        parts.push(fold(dialect, child, params)?);
    }
    Ok(format!("({})", parts.join(joiner)))
}

fn atomic(
    dialect: &dyn SqlDialect,
    key: &str,
    operator: &str,
    value: &str,
    column_type: &str,
    params: &mut Vec<Value>,
) -> Result<String, DbError> {
    let normalized = normalize_operator(operator);

    if !dialect
        .operators()
        .iter()
        .any(|allowed| *allowed == normalized)
    {
        return Err(DbError::InvalidOperator(operator.to_string()));
    }

    let column = dialect.quote_identifier(key);

    match normalized.as_str() {
        "IS NULL" | "IS NOT NULL" => Ok(format!("{column} {normalized}")),

        "IN" | "NOT IN" => {
            let items: Vec<&str> = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect();
            if items.is_empty() {
                return Err(DbError::invalid_argument(format!(
                    "{normalized} requires a comma-separated value list"
                )));
            }

            let mut placeholders = Vec::with_capacity(items.len());
            for item in items {
                let bound = Value::parse_typed(item, column_type);
                params.push(bound);
                let index = params.len();
                placeholders.push(dialect.placeholder(index, &params[index - 1]));
            }
            Ok(format!("{column} {normalized} ({})", placeholders.join(", ")))
        }

        "BETWEEN" => {
            let (low, high) = value.split_once(',').ok_or_else(|| {
                DbError::invalid_argument("BETWEEN requires 'low,high' as its value")
            })?;
            params.push(Value::parse_typed(low.trim(), column_type));
            let low_ph = dialect.placeholder(params.len(), &params[params.len() - 1]);
            params.push(Value::parse_typed(high.trim(), column_type));
            let high_ph = dialect.placeholder(params.len(), &params[params.len() - 1]);
            Ok(format!("{column} BETWEEN {low_ph} AND {high_ph}"))
        }

        _ => {
            // LIKE patterns stay textual regardless of the column type.
            let bound = if normalized.contains("LIKE") {
                Value::Text(value.to_string())
            } else {
                Value::parse_typed(value, column_type)
            };
            params.push(bound);
            let index = params.len();
            let placeholder = dialect.placeholder(index, &params[index - 1]);
            Ok(format!("{column} {normalized} {placeholder}"))
        }
    }
}

fn normalize_operator(operator: &str) -> String {
    operator.trim().split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AnsiDialect;

    fn translate(condition: &WhereCondition) -> Result<(String, Vec<Value>), DbError> {
        let mut params = Vec::new();
        let sql = translate_where(&AnsiDialect, condition, &mut params)?;
        Ok((sql, params))
    }

    #[test]
    fn atomic_binds_one_parameter() {
        let condition = WhereCondition::atomic_typed("age", ">=", "30", "integer");
        let (sql, params) = translate(&condition).unwrap();
        assert_eq!(sql, "\"age\" >= ?");
        assert_eq!(params, vec![Value::Int(30)]);
    }

    #[test]
    fn in_list_binds_one_parameter_per_element() {
        let condition =
            WhereCondition::atomic_typed("status", "IN", "active, pending", "text");
        let (sql, params) = translate(&condition).unwrap();
        assert_eq!(sql, "\"status\" IN (?, ?)");
        assert_eq!(
            params,
            vec![
                Value::Text("active".to_string()),
                Value::Text("pending".to_string())
            ]
        );
    }

    #[test]
    fn null_operators_ignore_the_value() {
        let condition = WhereCondition::atomic("deleted_at", "IS NULL", "whatever");
        let (sql, params) = translate(&condition).unwrap();
        assert_eq!(sql, "\"deleted_at\" IS NULL");
        assert!(params.is_empty());
    }

    #[test]
    fn compound_or_with_in_and_range() {
        // MySQL-shaped seed scenario: one parameter per list element plus
        // one for the range, no literal values in the SQL.
        let condition = WhereCondition::or(vec![
            WhereCondition::atomic_typed("status", "IN", "active,pending", "varchar"),
            WhereCondition::atomic_typed("score", ">", "90", "int"),
        ]);
        let (sql, params) = translate(&condition).unwrap();
        assert_eq!(sql, "(\"status\" IN (?, ?) OR \"score\" > ?)");
        assert_eq!(params.len(), 3);
        assert!(!sql.contains("active"));
        assert!(!sql.contains("90"));
    }

    #[test]
    fn unknown_operator_fails_whole_translation() {
        let condition = WhereCondition::and(vec![
            WhereCondition::atomic("a", "=", "1"),
            WhereCondition::atomic("b", "SOUNDS LIKE", "x"),
        ]);
        assert!(matches!(
            translate(&condition),
            Err(DbError::InvalidOperator(_))
        ));
    }

    #[test]
    fn empty_compound_is_invalid_argument() {
        assert!(matches!(
            translate(&WhereCondition::And(vec![])),
            Err(DbError::InvalidArgument(_))
        ));
    }

    #[test]
    fn quoted_identifier_in_key_is_escaped() {
        let condition = WhereCondition::atomic("odd \"name\"", "=", "1");
        let (sql, _) = translate(&condition).unwrap();
        assert_eq!(sql, "\"odd \"\"name\"\"\" = ?");
    }

    #[test]
    fn operator_case_and_spacing_are_normalized() {
        let condition = WhereCondition::atomic("a", "  not   like ", "%x%");
        let (sql, params) = translate(&condition).unwrap();
        assert_eq!(sql, "\"a\" NOT LIKE ?");
        assert_eq!(params, vec![Value::Text("%x%".to_string())]);
    }

    #[test]
    fn between_binds_two_parameters() {
        let condition = WhereCondition::atomic_typed("age", "BETWEEN", "18, 65", "int");
        let (sql, params) = translate(&condition).unwrap();
        assert_eq!(sql, "\"age\" BETWEEN ? AND ?");
        assert_eq!(params, vec![Value::Int(18), Value::Int(65)]);
    }

    #[test]
    fn nested_structure_is_preserved() {
        let condition = WhereCondition::and(vec![
            WhereCondition::atomic("a", "=", "1"),
            WhereCondition::or(vec![
                WhereCondition::atomic("b", "=", "2"),
                WhereCondition::atomic("c", "=", "3"),
            ]),
        ]);
        let (sql, params) = translate(&condition).unwrap();
        assert_eq!(sql, "(\"a\" = ? AND (\"b\" = ? OR \"c\" = ?))");
        assert_eq!(params.len(), 3);
    }
}
