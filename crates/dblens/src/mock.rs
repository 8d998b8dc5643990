//! In-memory backend used by the workspace's own tests.
//!
//! Implements enough of the capability contract to exercise the engine,
//! pool, export pipeline and chat loop without a live server: string
//! rows, key-driven mutations, and a structural evaluation of the where
//! tree over cell values.

use dblens_core::{
    BackendKind, CancelToken, CellValue, Column, Connection, ConnectionProfile,
    DatabaseCategory, DatabasePlugin, DbError, ExportOptions, ExportSink, PluginCapabilities,
    PluginMetadata, RowQuery, RowSet, SortDirection, StorageUnit, UnitField, WhereCondition,
    escape_row, header_cell,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

static METADATA: PluginMetadata = PluginMetadata {
    display_name: "Mock",
    description: "In-memory backend for tests",
    category: DatabaseCategory::Relational,
    capabilities: PluginCapabilities::CREATE_UNIT
        .union(PluginCapabilities::INSERT)
        .union(PluginCapabilities::UPDATE)
        .union(PluginCapabilities::DELETE)
        .union(PluginCapabilities::RAW_QUERY)
        .union(PluginCapabilities::FILTERING)
        .union(PluginCapabilities::SORTING),
    operators: dblens_core::SQL_OPERATORS,
};

#[derive(Debug, Clone, Default)]
struct MockTable {
    columns: Vec<Column>,
    rows: Vec<Vec<String>>,
}

type SharedTables = Arc<Mutex<HashMap<String, MockTable>>>;

/// Plugin whose tables are shared across every connection it opens, so a
/// test can observe writes through a second handle.
pub struct MockPlugin {
    tables: SharedTables,
}

impl MockPlugin {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Seed a table before connecting.
    pub fn with_table(
        self,
        name: &str,
        columns: Vec<Column>,
        rows: Vec<Vec<String>>,
    ) -> Self {
        self.tables
            .lock()
            .expect("mock tables lock poisoned")
            .insert(name.to_string(), MockTable { columns, rows });
        self
    }
}

impl Default for MockPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabasePlugin for MockPlugin {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn metadata(&self) -> &'static PluginMetadata {
        &METADATA
    }

    fn connect(
        &self,
        _profile: &ConnectionProfile,
        _database: Option<&str>,
    ) -> Result<Arc<dyn Connection>, DbError> {
        Ok(Arc::new(MockConnection {
            tables: self.tables.clone(),
        }))
    }
}

pub struct MockConnection {
    tables: SharedTables,
}

impl MockConnection {
    fn with_table<T>(
        &self,
        unit: &str,
        f: impl FnOnce(&mut MockTable) -> Result<T, DbError>,
    ) -> Result<T, DbError> {
        let mut tables = self.tables.lock().expect("mock tables lock poisoned");
        let table = tables
            .get_mut(unit)
            .ok_or_else(|| DbError::not_found(format!("table '{unit}'")))?;
        f(table)
    }

    fn key_indices(table: &MockTable) -> Vec<usize> {
        table
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_primary)
            .map(|(i, _)| i)
            .collect()
    }

    fn row_matches(
        table: &MockTable,
        row: &[String],
        condition: &WhereCondition,
    ) -> Result<bool, DbError> {
        match condition {
            WhereCondition::And(children) => {
                for child in children {
                    if !Self::row_matches(table, row, child)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            WhereCondition::Or(children) => {
                for child in children {
                    if Self::row_matches(table, row, child)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            WhereCondition::Atomic {
                key,
                operator,
                value,
                ..
            } => {
                let index = table
                    .columns
                    .iter()
                    .position(|c| &c.name == key)
                    .ok_or_else(|| DbError::not_found(format!("column '{key}'")))?;
                let cell = &row[index];

                let op = operator.trim().to_uppercase();
                if !METADATA.supports_operator(&op) {
                    return Err(DbError::InvalidOperator(operator.clone()));
                }

                Ok(match op.as_str() {
                    "=" => compare(cell, value) == std::cmp::Ordering::Equal,
                    "!=" | "<>" => compare(cell, value) != std::cmp::Ordering::Equal,
                    "<" => compare(cell, value) == std::cmp::Ordering::Less,
                    "<=" => compare(cell, value) != std::cmp::Ordering::Greater,
                    ">" => compare(cell, value) == std::cmp::Ordering::Greater,
                    ">=" => compare(cell, value) != std::cmp::Ordering::Less,
                    "LIKE" => like_matches(cell, value),
                    "NOT LIKE" => !like_matches(cell, value),
                    "IN" => value.split(',').any(|v| v.trim() == cell),
                    "NOT IN" => !value.split(',').any(|v| v.trim() == cell),
                    "IS NULL" => cell.is_empty(),
                    "IS NOT NULL" => !cell.is_empty(),
                    _ => false,
                })
            }
        }
    }
}

fn compare(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.total_cmp(&y),
        _ => a.cmp(b),
    }
}

/// `%` and `_` wildcards, case-insensitive, via a tiny recursive matcher.
fn like_matches(cell: &str, pattern: &str) -> bool {
    fn inner(c: &[char], p: &[char]) -> bool {
        match (c, p) {
            (_, []) => c.is_empty(),
            (_, ['%', rest @ ..]) => {
                (0..=c.len()).any(|skip| inner(&c[skip..], rest))
            }
            ([], _) => false,
            ([ch, c_rest @ ..], [pc, p_rest @ ..]) => {
                (*pc == '_' || ch.eq_ignore_ascii_case(pc)) && inner(c_rest, p_rest)
            }
        }
    }
    let cell: Vec<char> = cell.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    inner(&cell, &pattern)
}

impl Connection for MockConnection {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn metadata(&self) -> &'static PluginMetadata {
        &METADATA
    }

    fn ping(&self) -> Result<(), DbError> {
        Ok(())
    }

    fn close(&self) -> Result<(), DbError> {
        Ok(())
    }

    fn storage_units(&self, _scope: &str) -> Result<Vec<StorageUnit>, DbError> {
        let tables = self.tables.lock().expect("mock tables lock poisoned");
        let mut units: Vec<StorageUnit> = tables
            .iter()
            .map(|(name, table)| {
                StorageUnit::new(name).with_attribute("Count", table.rows.len().to_string())
            })
            .collect();
        units.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(units)
    }

    fn columns(&self, _scope: &str, unit: &str) -> Result<Vec<Column>, DbError> {
        self.with_table(unit, |table| Ok(table.columns.clone()))
    }

    fn rows(
        &self,
        _scope: &str,
        unit: &str,
        query: &RowQuery,
        cancel: &CancelToken,
    ) -> Result<RowSet, DbError> {
        cancel.check()?;
        let page_size = query.effective_page_size()? as usize;

        self.with_table(unit, |table| {
            if let Some(condition) = &query.where_condition {
                condition.validate()?;
            }

            let mut rows = Vec::new();
            for row in &table.rows {
                let keep = match &query.where_condition {
                    Some(condition) => Self::row_matches(table, row, condition)?,
                    None => true,
                };
                if keep {
                    rows.push(row.clone());
                }
            }

            for sort in query.sort.iter().rev() {
                let index = table
                    .columns
                    .iter()
                    .position(|c| c.name == sort.column)
                    .ok_or_else(|| DbError::not_found(format!("column '{}'", sort.column)))?;
                rows.sort_by(|a, b| {
                    let ordering = compare(&a[index], &b[index]);
                    match sort.direction {
                        SortDirection::Asc => ordering,
                        SortDirection::Desc => ordering.reverse(),
                    }
                });
            }

            let keys = Self::key_indices(table);
            let rows: Vec<Vec<String>> = rows
                .into_iter()
                .skip(query.page_offset as usize)
                .take(page_size)
                .collect();

            Ok(RowSet {
                columns: table.columns.clone(),
                rows,
                disable_update: keys.is_empty(),
            })
        })
    }

    fn add_storage_unit(
        &self,
        _scope: &str,
        unit: &str,
        fields: &[UnitField],
    ) -> Result<(), DbError> {
        let mut tables = self.tables.lock().expect("mock tables lock poisoned");
        if tables.contains_key(unit) {
            return Err(DbError::DuplicateId(unit.to_string()));
        }
        tables.insert(
            unit.to_string(),
            MockTable {
                columns: fields
                    .iter()
                    .map(|f| Column {
                        name: f.name.clone(),
                        type_name: f.type_name.clone(),
                        is_primary: f.primary,
                        nullable: f.nullable,
                        default_value: f.default_value.clone(),
                    })
                    .collect(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    fn add_row(&self, _scope: &str, unit: &str, cells: &[CellValue]) -> Result<(), DbError> {
        self.with_table(unit, |table| {
            let mut row = vec![String::new(); table.columns.len()];
            for cell in cells {
                let index = table
                    .columns
                    .iter()
                    .position(|c| c.name == cell.column)
                    .ok_or_else(|| DbError::not_found(format!("column '{}'", cell.column)))?;
                row[index] = cell.value.clone();
            }
            table.rows.push(row);
            Ok(())
        })
    }

    fn update_row(
        &self,
        _scope: &str,
        unit: &str,
        values: &[CellValue],
        updated: &[String],
    ) -> Result<(), DbError> {
        self.with_table(unit, |table| {
            let keys = Self::key_indices(table);
            if keys.is_empty() {
                return Err(DbError::missing_key("table has no primary key"));
            }

            let lookup = |name: &str| values.iter().find(|c| c.column == name);
            let key_values: Vec<(usize, String)> = keys
                .iter()
                .map(|&i| {
                    let name = &table.columns[i].name;
                    lookup(name)
                        .map(|c| (i, c.value.clone()))
                        .ok_or_else(|| DbError::missing_key(format!("missing key '{name}'")))
                })
                .collect::<Result<_, _>>()?;

            let mut touched = false;
            for row in &mut table.rows {
                if key_values.iter().all(|(i, v)| &row[*i] == v) {
                    for cell in values {
                        if !updated.is_empty() && !updated.contains(&cell.column) {
                            continue;
                        }
                        if let Some(index) =
                            table.columns.iter().position(|c| c.name == cell.column)
                        {
                            row[index] = cell.value.clone();
                        }
                    }
                    touched = true;
                }
            }

            if touched {
                Ok(())
            } else {
                Err(DbError::not_found("no row with the given key"))
            }
        })
    }

    fn delete_row(&self, _scope: &str, unit: &str, values: &[CellValue]) -> Result<(), DbError> {
        self.with_table(unit, |table| {
            let keys = Self::key_indices(table);
            if keys.is_empty() {
                return Err(DbError::missing_key("table has no primary key"));
            }

            let key_values: Vec<(usize, String)> = keys
                .iter()
                .map(|&i| {
                    let name = &table.columns[i].name;
                    values
                        .iter()
                        .find(|c| c.column == *name)
                        .map(|c| (i, c.value.clone()))
                        .ok_or_else(|| DbError::missing_key(format!("missing key '{name}'")))
                })
                .collect::<Result<_, _>>()?;

            let before = table.rows.len();
            table
                .rows
                .retain(|row| !key_values.iter().all(|(i, v)| &row[*i] == v));

            if table.rows.len() == before {
                Err(DbError::not_found("no row with the given key"))
            } else {
                Ok(())
            }
        })
    }

    fn clear_storage_unit(&self, _scope: &str, unit: &str) -> Result<(), DbError> {
        self.with_table(unit, |table| {
            table.rows.clear();
            Ok(())
        })
    }

    /// Raw queries return the full contents of the first table the text
    /// names, which is all the chat loop needs from a test double.
    fn raw_query(&self, query: &str, _cancel: &CancelToken) -> Result<RowSet, DbError> {
        let tables = self.tables.lock().expect("mock tables lock poisoned");
        let Some((_, table)) = tables.iter().find(|(name, _)| query.contains(name.as_str()))
        else {
            return Err(DbError::not_found("query names no known table"));
        };

        Ok(RowSet {
            columns: table.columns.clone(),
            rows: table.rows.clone(),
            disable_update: true,
        })
    }

    fn export_rows(
        &self,
        _scope: &str,
        unit: &str,
        options: &ExportOptions,
        sink: &mut dyn ExportSink,
        cancel: &CancelToken,
    ) -> Result<u64, DbError> {
        let (columns, rows, keys) = self.with_table(unit, |table| {
            Ok((
                table.columns.clone(),
                table.rows.clone(),
                Self::key_indices(table),
            ))
        })?;

        if options.selected_rows.is_some() && keys.is_empty() {
            return Err(DbError::unsupported(
                "selected-row export requires a primary key",
            ));
        }
        let selected = options.selected_rows.clone();

        let header: Vec<String> = columns
            .iter()
            .map(|c| header_cell(&c.name, &c.type_name, options.include_types_in_header))
            .collect();
        sink.write_row(&header)?;

        let mut written = 0u64;
        for row in rows {
            cancel.check()?;

            if let Some(selected) = &selected {
                let key: Vec<String> = keys.iter().map(|&i| row[i].clone()).collect();
                if !selected.contains(&key) {
                    continue;
                }
            }

            sink.write_row(&escape_row(&row))?;
            written += 1;
        }
        Ok(written)
    }
}
