use crate::{SqlDialect, translate_where};
use dblens_core::{CellValue, DbError, RowQuery, SortCondition, UnitField, Value};

/// A fully assembled statement: SQL text plus bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Build a paged SELECT for `Connection::rows`.
///
/// Sorting is made stable by appending the primary-key columns (when
/// known) as ascending tiebreakers after the caller's sort keys. Returns
/// the statement and whether the ordering is key-stable; callers set
/// `disable_update` when it is not.
pub fn build_select(
    dialect: &dyn SqlDialect,
    scope: Option<&str>,
    unit: &str,
    query: &RowQuery,
    key_columns: &[String],
) -> Result<(Statement, bool), DbError> {
    let page_size = query.effective_page_size()?;
    let table = dialect.qualified_unit(scope, unit);

    let mut params = Vec::new();
    let mut sql = format!("SELECT * FROM {table}");

    if let Some(condition) = &query.where_condition {
        let fragment = translate_where(dialect, condition, &mut params)?;
        sql.push_str(" WHERE ");
        sql.push_str(&fragment);
    }

    let order = order_by_clause(dialect, &query.sort, key_columns);
    if !order.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&order);
    }

    sql.push(' ');
    sql.push_str(&dialect.limit_clause(page_size, query.page_offset));

    Ok((Statement { sql, params }, !key_columns.is_empty()))
}

fn order_by_clause(
    dialect: &dyn SqlDialect,
    sort: &[SortCondition],
    key_columns: &[String],
) -> String {
    let mut terms: Vec<String> = sort
        .iter()
        .map(|s| {
            format!(
                "{} {}",
                dialect.quote_identifier(&s.column),
                s.direction.keyword()
            )
        })
        .collect();

    // Primary-key tiebreaker keeps pagination sound when the caller's
    // sort keys are not unique.
    for key in key_columns {
        if !sort.iter().any(|s| &s.column == key) {
            terms.push(format!("{} ASC", dialect.quote_identifier(key)));
        }
    }

    terms.join(", ")
}

pub fn build_insert(
    dialect: &dyn SqlDialect,
    scope: Option<&str>,
    unit: &str,
    cells: &[CellValue],
) -> Result<Statement, DbError> {
    if cells.is_empty() {
        return Err(DbError::invalid_argument("insert requires at least one cell"));
    }

    let table = dialect.qualified_unit(scope, unit);
    let mut params = Vec::with_capacity(cells.len());
    let mut columns = Vec::with_capacity(cells.len());
    let mut placeholders = Vec::with_capacity(cells.len());

    for cell in cells {
        columns.push(dialect.quote_identifier(&cell.column));
        params.push(Value::parse_typed(&cell.value, &cell.column_type));
        placeholders.push(dialect.placeholder(params.len(), &params[params.len() - 1]));
    }

    Ok(Statement {
        sql: format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        ),
        params,
    })
}

/// Key-driven UPDATE. `values` carries the full row (including the key
/// columns); `updated` names the columns to write. Fails with
/// `missing-key` unless every known key column is present in `values`.
pub fn build_update(
    dialect: &dyn SqlDialect,
    scope: Option<&str>,
    unit: &str,
    values: &[CellValue],
    updated: &[String],
    key_columns: &[String],
) -> Result<Statement, DbError> {
    let key_cells = collect_key_cells(values, key_columns)?;

    let set_cells: Vec<&CellValue> = if updated.is_empty() {
        values
            .iter()
            .filter(|c| !key_columns.contains(&c.column))
            .collect()
    } else {
        values
            .iter()
            .filter(|c| updated.contains(&c.column))
            .collect()
    };
    if set_cells.is_empty() {
        return Err(DbError::invalid_argument("update has no columns to set"));
    }

    let table = dialect.qualified_unit(scope, unit);
    let mut params = Vec::new();
    let mut assignments = Vec::with_capacity(set_cells.len());

    for cell in &set_cells {
        params.push(Value::parse_typed(&cell.value, &cell.column_type));
        assignments.push(format!(
            "{} = {}",
            dialect.quote_identifier(&cell.column),
            dialect.placeholder(params.len(), &params[params.len() - 1])
        ));
    }

    let predicate = key_predicate(dialect, &key_cells, &mut params);

    Ok(Statement {
        sql: format!(
            "UPDATE {table} SET {} WHERE {}",
            assignments.join(", "),
            predicate
        ),
        params,
    })
}

pub fn build_delete(
    dialect: &dyn SqlDialect,
    scope: Option<&str>,
    unit: &str,
    values: &[CellValue],
    key_columns: &[String],
) -> Result<Statement, DbError> {
    let key_cells = collect_key_cells(values, key_columns)?;

    let table = dialect.qualified_unit(scope, unit);
    let mut params = Vec::new();
    let predicate = key_predicate(dialect, &key_cells, &mut params);

    Ok(Statement {
        sql: format!("DELETE FROM {table} WHERE {predicate}"),
        params,
    })
}

fn collect_key_cells<'a>(
    values: &'a [CellValue],
    key_columns: &[String],
) -> Result<Vec<&'a CellValue>, DbError> {
    if key_columns.is_empty() {
        return Err(DbError::missing_key(
            "storage unit has no usable primary key",
        ));
    }

    let mut cells = Vec::with_capacity(key_columns.len());
    for key in key_columns {
        let cell = values.iter().find(|c| &c.column == key).ok_or_else(|| {
            DbError::missing_key(format!("primary key column '{key}' not supplied"))
        })?;
        cells.push(cell);
    }
    Ok(cells)
}

fn key_predicate(
    dialect: &dyn SqlDialect,
    key_cells: &[&CellValue],
    params: &mut Vec<Value>,
) -> String {
    let mut terms = Vec::with_capacity(key_cells.len());
    for cell in key_cells {
        params.push(Value::parse_typed(&cell.value, &cell.column_type));
        terms.push(format!(
            "{} = {}",
            dialect.quote_identifier(&cell.column),
            dialect.placeholder(params.len(), &params[params.len() - 1])
        ));
    }
    terms.join(" AND ")
}

/// `CREATE TABLE` DDL from a field list. Field types are passed through
/// verbatim after a character sanity check; they are backend-native type
/// names, not user data.
pub fn build_create_unit(
    dialect: &dyn SqlDialect,
    scope: Option<&str>,
    unit: &str,
    fields: &[UnitField],
) -> Result<Statement, DbError> {
    if fields.is_empty() {
        return Err(DbError::invalid_argument(
            "storage unit requires at least one field",
        ));
    }

    let mut definitions = Vec::with_capacity(fields.len());
    let mut primary = Vec::new();

    for field in fields {
        validate_type_name(&field.type_name)?;
        let mut definition = format!(
            "{} {}",
            dialect.quote_identifier(&field.name),
            field.type_name
        );
        if !field.nullable && !field.primary {
            definition.push_str(" NOT NULL");
        }
        if let Some(default) = &field.default_value {
            validate_type_name(default)?;
            definition.push_str(" DEFAULT ");
            definition.push_str(default);
        }
        definitions.push(definition);
        if field.primary {
            primary.push(dialect.quote_identifier(&field.name));
        }
    }

    if !primary.is_empty() {
        definitions.push(format!("PRIMARY KEY ({})", primary.join(", ")));
    }

    let table = dialect.qualified_unit(scope, unit);
    Ok(Statement {
        sql: format!("CREATE TABLE {table} ({})", definitions.join(", ")),
        params: Vec::new(),
    })
}

pub fn build_clear(dialect: &dyn SqlDialect, scope: Option<&str>, unit: &str) -> Statement {
    Statement {
        sql: format!("DELETE FROM {}", dialect.qualified_unit(scope, unit)),
        params: Vec::new(),
    }
}

/// Type names and default expressions come from the caller but are not
/// quoted, so refuse anything that could smuggle in a statement break.
fn validate_type_name(raw: &str) -> Result<(), DbError> {
    if raw.is_empty() {
        return Err(DbError::invalid_argument("empty type name"));
    }
    for ch in raw.chars() {
        if !(ch.is_ascii_alphanumeric()
            || matches!(ch, ' ' | '(' | ')' | ',' | '_' | '\'' | '.' | '-' | ':'))
        {
            return Err(DbError::invalid_argument(format!(
                "forbidden character '{ch}' in type or default expression"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AnsiDialect;
    use dblens_core::{SortCondition, WhereCondition};

    fn keyed() -> Vec<String> {
        vec!["id".to_string()]
    }

    #[test]
    fn select_appends_key_tiebreaker() {
        let query = RowQuery::page(25, 50).with_sort(vec![SortCondition::desc("name")]);
        let (stmt, stable) =
            build_select(&AnsiDialect, Some("public"), "users", &query, &keyed()).unwrap();

        assert_eq!(
            stmt.sql,
            "SELECT * FROM \"public\".\"users\" ORDER BY \"name\" DESC, \"id\" ASC LIMIT 25 OFFSET 50"
        );
        assert!(stable);
    }

    #[test]
    fn select_without_key_is_marked_unstable() {
        let query = RowQuery::page(10, 0);
        let (stmt, stable) = build_select(&AnsiDialect, None, "logs", &query, &[]).unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM \"logs\" LIMIT 10 OFFSET 0");
        assert!(!stable);
    }

    #[test]
    fn select_with_where_binds_params() {
        let query = RowQuery::page(10, 0)
            .with_where(WhereCondition::atomic_typed("c", "LIKE", "a", "text"));
        let (stmt, _) = build_select(&AnsiDialect, None, "t", &query, &keyed()).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT * FROM \"t\" WHERE \"c\" LIKE ? ORDER BY \"id\" ASC LIMIT 10 OFFSET 0"
        );
        assert_eq!(stmt.params, vec![Value::Text("a".to_string())]);
    }

    #[test]
    fn sort_on_key_column_is_not_duplicated() {
        let query = RowQuery::page(10, 0).with_sort(vec![SortCondition::asc("id")]);
        let (stmt, _) = build_select(&AnsiDialect, None, "t", &query, &keyed()).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT * FROM \"t\" ORDER BY \"id\" ASC LIMIT 10 OFFSET 0"
        );
    }

    #[test]
    fn insert_binds_typed_params() {
        let cells = vec![
            CellValue::typed("id", "1", "integer"),
            CellValue::typed("name", "a", "text"),
        ];
        let stmt = build_insert(&AnsiDialect, None, "users", &cells).unwrap();
        assert_eq!(stmt.sql, "INSERT INTO \"users\" (\"id\", \"name\") VALUES (?, ?)");
        assert_eq!(
            stmt.params,
            vec![Value::Int(1), Value::Text("a".to_string())]
        );
    }

    #[test]
    fn update_requires_key_columns() {
        let values = vec![CellValue::typed("name", "b", "text")];
        let err = build_update(&AnsiDialect, None, "users", &values, &[], &[]).unwrap_err();
        assert!(matches!(err, DbError::MissingKey(_)));

        let err =
            build_update(&AnsiDialect, None, "users", &values, &[], &keyed()).unwrap_err();
        assert!(matches!(err, DbError::MissingKey(_)));
    }

    #[test]
    fn update_sets_only_updated_columns() {
        let values = vec![
            CellValue::typed("id", "1", "integer"),
            CellValue::typed("name", "b", "text"),
            CellValue::typed("age", "30", "integer"),
        ];
        let stmt = build_update(
            &AnsiDialect,
            None,
            "users",
            &values,
            &["name".to_string()],
            &keyed(),
        )
        .unwrap();
        assert_eq!(stmt.sql, "UPDATE \"users\" SET \"name\" = ? WHERE \"id\" = ?");
        assert_eq!(
            stmt.params,
            vec![Value::Text("b".to_string()), Value::Int(1)]
        );
    }

    #[test]
    fn delete_builds_key_predicate() {
        let values = vec![
            CellValue::typed("id", "42", "integer"),
            CellValue::typed("name", "x", "text"),
        ];
        let stmt = build_delete(&AnsiDialect, Some("s"), "users", &values, &keyed()).unwrap();
        assert_eq!(stmt.sql, "DELETE FROM \"s\".\"users\" WHERE \"id\" = ?");
        assert_eq!(stmt.params, vec![Value::Int(42)]);
    }

    #[test]
    fn create_unit_emits_primary_key_clause() {
        let fields = vec![
            UnitField::new("id", "int").primary(),
            UnitField::new("c", "text"),
        ];
        let stmt = build_create_unit(&AnsiDialect, None, "odd name", &fields).unwrap();
        assert_eq!(
            stmt.sql,
            "CREATE TABLE \"odd name\" (\"id\" int, \"c\" text, PRIMARY KEY (\"id\"))"
        );
    }

    #[test]
    fn create_unit_rejects_hostile_type_names() {
        let fields = vec![UnitField::new("id", "int; DROP TABLE users")];
        assert!(matches!(
            build_create_unit(&AnsiDialect, None, "t", &fields),
            Err(DbError::InvalidArgument(_))
        ));
    }
}
