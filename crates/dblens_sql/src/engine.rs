use crate::{
    SqlDialect, Statement, build_clear, build_create_unit, build_delete, build_insert,
    build_select, build_update,
};
use dblens_core::{
    CancelToken, CellValue, Column, DbError, ExportOptions, ExportSink, GraphRelationship,
    GraphUnit, RelationshipKind, RowQuery, RowSet, StorageUnit, UnitField, escape_row,
    header_cell,
};
use std::collections::{HashMap, HashSet};

/// The surface a relational backend crate implements; everything else in
/// the family is shared code parameterised by the dialect.
pub trait SqlExecutor: Send + Sync {
    fn dialect(&self) -> &dyn SqlDialect;

    /// Run a statement that produces rows.
    fn query(&self, sql: &str, params: &[dblens_core::Value]) -> Result<RowSet, DbError>;

    /// Run a statement for its side effect; returns affected rows when
    /// the driver reports them.
    fn execute(&self, sql: &str, params: &[dblens_core::Value]) -> Result<u64, DbError>;
}

/// Paged, filtered, sorted rows with a key-stable ordering.
pub fn fetch_rows(
    executor: &dyn SqlExecutor,
    scope: Option<&str>,
    unit: &str,
    query: &RowQuery,
    key_columns: &[String],
    cancel: &CancelToken,
) -> Result<RowSet, DbError> {
    cancel.check()?;

    let (statement, stable) =
        build_select(executor.dialect(), scope, unit, query, key_columns)?;
    log_statement(&statement);

    let mut result = executor.query(&statement.sql, &statement.params)?;
    mark_key_columns(&mut result.columns, key_columns);
    result.disable_update = !stable;
    result.check_shape()?;
    Ok(result)
}

pub fn insert_row(
    executor: &dyn SqlExecutor,
    scope: Option<&str>,
    unit: &str,
    cells: &[CellValue],
) -> Result<(), DbError> {
    let statement = build_insert(executor.dialect(), scope, unit, cells)?;
    log_statement(&statement);
    executor.execute(&statement.sql, &statement.params)?;
    Ok(())
}

pub fn update_row(
    executor: &dyn SqlExecutor,
    scope: Option<&str>,
    unit: &str,
    values: &[CellValue],
    updated: &[String],
    key_columns: &[String],
) -> Result<(), DbError> {
    let statement = build_update(executor.dialect(), scope, unit, values, updated, key_columns)?;
    log_statement(&statement);
    executor.execute(&statement.sql, &statement.params)?;
    Ok(())
}

pub fn delete_row(
    executor: &dyn SqlExecutor,
    scope: Option<&str>,
    unit: &str,
    values: &[CellValue],
    key_columns: &[String],
) -> Result<(), DbError> {
    let statement = build_delete(executor.dialect(), scope, unit, values, key_columns)?;
    log_statement(&statement);
    executor.execute(&statement.sql, &statement.params)?;
    Ok(())
}

pub fn clear_unit(
    executor: &dyn SqlExecutor,
    scope: Option<&str>,
    unit: &str,
) -> Result<(), DbError> {
    let statement = build_clear(executor.dialect(), scope, unit);
    log_statement(&statement);
    executor.execute(&statement.sql, &statement.params)?;
    Ok(())
}

pub fn create_unit(
    executor: &dyn SqlExecutor,
    scope: Option<&str>,
    unit: &str,
    fields: &[UnitField],
) -> Result<(), DbError> {
    let statement = build_create_unit(executor.dialect(), scope, unit, fields)?;
    log_statement(&statement);
    executor.execute(&statement.sql, &statement.params)?;
    Ok(())
}

/// Raw statement execution. Inputs containing more than one statement are
/// rejected unless the dialect's driver can isolate them; only the first
/// result set is surfaced either way.
pub fn raw_query(
    executor: &dyn SqlExecutor,
    sql: &str,
    cancel: &CancelToken,
) -> Result<RowSet, DbError> {
    cancel.check()?;

    if !executor.dialect().allows_multi_statement() {
        reject_multi_statement(sql)?;
    }

    let mut result = executor.query(sql, &[])?;
    // Ad-hoc projections cannot be mapped back to a primary key.
    result.disable_update = true;
    Ok(result)
}

/// Detect a statement separator outside string literals, quoted
/// identifiers and comments. A trailing semicolon is fine.
pub fn reject_multi_statement(sql: &str) -> Result<(), DbError> {
    let mut chars = sql.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;
    let mut in_line_comment = false;

    while let Some(ch) = chars.next() {
        if in_line_comment {
            if ch == '\n' {
                in_line_comment = false;
            }
            continue;
        }
        match ch {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '-' if !in_single && !in_double && chars.peek() == Some(&'-') => {
                in_line_comment = true;
            }
            ';' if !in_single && !in_double => {
                let rest: String = chars.clone().collect();
                if !rest.trim().is_empty() {
                    return Err(DbError::invalid_argument(
                        "multi-statement input is not supported here",
                    ));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Export batch size. Pages keep memory bounded and give cancellation a
/// row-granular reaction time.
const EXPORT_BATCH: u64 = 1_000;

/// Stream every row of a unit into the sink: header first, then batches
/// of `EXPORT_BATCH` in key order, every cell formula-escaped. Sink
/// errors and cancellation abort between rows.
pub fn export_rows(
    executor: &dyn SqlExecutor,
    scope: Option<&str>,
    unit: &str,
    columns: &[Column],
    key_columns: &[String],
    options: &ExportOptions,
    sink: &mut dyn ExportSink,
    cancel: &CancelToken,
) -> Result<u64, DbError> {
    let selected = build_selection_index(options, key_columns)?;

    let header: Vec<String> = columns
        .iter()
        .map(|c| header_cell(&c.name, &c.type_name, options.include_types_in_header))
        .collect();
    sink.write_row(&header)?;

    let key_indices: Vec<usize> = key_columns
        .iter()
        .filter_map(|k| columns.iter().position(|c| &c.name == k))
        .collect();

    let mut written = 0u64;
    let mut offset = 0u64;

    loop {
        cancel.check()?;

        let query = RowQuery::page(EXPORT_BATCH, offset);
        let page = fetch_rows(executor, scope, unit, &query, key_columns, cancel)?;
        let fetched = page.rows.len() as u64;

        for row in &page.rows {
            cancel.check()?;

            if let Some(index) = &selected {
                let key: Vec<String> = key_indices.iter().map(|i| row[*i].clone()).collect();
                if !index.contains(&key) {
                    continue;
                }
            }

            sink.write_row(&escape_row(row))?;
            written += 1;
        }

        if fetched < EXPORT_BATCH {
            break;
        }
        offset += EXPORT_BATCH;
    }

    log::debug!("exported {written} row(s) from {unit}");
    Ok(written)
}

fn build_selection_index(
    options: &ExportOptions,
    key_columns: &[String],
) -> Result<Option<HashSet<Vec<String>>>, DbError> {
    match &options.selected_rows {
        None => Ok(None),
        Some(rows) => {
            if key_columns.is_empty() {
                return Err(DbError::unsupported(
                    "selected-row export requires a primary key",
                ));
            }
            Ok(Some(rows.iter().cloned().collect()))
        }
    }
}

fn mark_key_columns(columns: &mut [Column], key_columns: &[String]) {
    for column in columns {
        if key_columns.contains(&column.name) {
            column.is_primary = true;
        }
    }
}

fn log_statement(statement: &Statement) {
    let preview: String = statement.sql.chars().take(120).collect();
    log::debug!(
        "[SQL] {} ({} param(s))",
        preview.replace('\n', " "),
        statement.params.len()
    );
}

/// One foreign-key edge read from the backend's catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub from_unit: String,
    pub from_column: String,
    pub to_unit: String,
    pub to_column: String,
}

/// Derive the relationship graph from catalog metadata.
///
/// A foreign key makes the referencing side `ManyToOne` (or `OneToOne`
/// when the referencing column is the unit's entire primary key) and the
/// referenced side the mirror. A link table whose primary key is exactly
/// the union of two foreign keys, with every other column nullable or
/// defaulted, additionally produces a `ManyToMany` edge between the two
/// referenced units.
pub fn build_graph(
    units: &[StorageUnit],
    columns_by_unit: &HashMap<String, Vec<Column>>,
    foreign_keys: &[ForeignKey],
) -> Vec<GraphUnit> {
    let mut edges: HashMap<String, Vec<GraphRelationship>> = HashMap::new();

    for fk in foreign_keys {
        let from_pk: Vec<&str> = columns_by_unit
            .get(&fk.from_unit)
            .map(|cols| {
                cols.iter()
                    .filter(|c| c.is_primary)
                    .map(|c| c.name.as_str())
                    .collect()
            })
            .unwrap_or_default();

        let one_to_one = from_pk.len() == 1 && from_pk[0] == fk.from_column;
        let (forward, reverse) = if one_to_one {
            (RelationshipKind::OneToOne, RelationshipKind::OneToOne)
        } else {
            (RelationshipKind::ManyToOne, RelationshipKind::OneToMany)
        };

        edges
            .entry(fk.from_unit.clone())
            .or_default()
            .push(GraphRelationship {
                target: fk.to_unit.clone(),
                kind: forward,
            });
        edges
            .entry(fk.to_unit.clone())
            .or_default()
            .push(GraphRelationship {
                target: fk.from_unit.clone(),
                kind: reverse,
            });
    }

    for link in detect_link_tables(columns_by_unit, foreign_keys) {
        edges
            .entry(link.0.clone())
            .or_default()
            .push(GraphRelationship {
                target: link.1.clone(),
                kind: RelationshipKind::ManyToMany,
            });
        edges
            .entry(link.1)
            .or_default()
            .push(GraphRelationship {
                target: link.0,
                kind: RelationshipKind::ManyToMany,
            });
    }

    units
        .iter()
        .map(|unit| {
            let mut relationships = edges.remove(&unit.name).unwrap_or_default();
            relationships.dedup();
            GraphUnit {
                unit: unit.clone(),
                relationships,
            }
        })
        .collect()
}

fn detect_link_tables(
    columns_by_unit: &HashMap<String, Vec<Column>>,
    foreign_keys: &[ForeignKey],
) -> Vec<(String, String)> {
    let mut by_unit: HashMap<&str, Vec<&ForeignKey>> = HashMap::new();
    for fk in foreign_keys {
        by_unit.entry(fk.from_unit.as_str()).or_default().push(fk);
    }

    let mut links = Vec::new();

    for (unit, fks) in by_unit {
        if fks.len() != 2 {
            continue;
        }
        let Some(columns) = columns_by_unit.get(unit) else {
            continue;
        };

        let pk: HashSet<&str> = columns
            .iter()
            .filter(|c| c.is_primary)
            .map(|c| c.name.as_str())
            .collect();
        let fk_columns: HashSet<&str> =
            fks.iter().map(|fk| fk.from_column.as_str()).collect();

        if pk.is_empty() || pk != fk_columns {
            continue;
        }

        let has_payload = columns.iter().any(|c| {
            !pk.contains(c.name.as_str()) && !c.nullable && c.default_value.is_none()
        });
        if has_payload {
            continue;
        }

        if fks[0].to_unit != fks[1].to_unit {
            links.push((fks[0].to_unit.clone(), fks[1].to_unit.clone()));
        }
    }

    links.sort();
    links
}
