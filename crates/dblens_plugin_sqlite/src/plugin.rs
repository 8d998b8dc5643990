use dblens_core::{
    BackendKind, CancelToken, CellValue, Column, Connection, ConnectionProfile, DatabaseCategory,
    DatabasePlugin, DbError, ExportOptions, ExportSink, GraphUnit, PluginCapabilities,
    PluginMetadata, RowQuery, RowSet, StorageUnit, UnitField, Value,
};
use dblens_sql::{AnsiDialect, ForeignKey, SqlDialect, SqlExecutor};
use rusqlite::types::ValueRef;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

static METADATA: PluginMetadata = PluginMetadata {
    display_name: "SQLite",
    description: "Embedded single-file relational database",
    category: DatabaseCategory::Relational,
    capabilities: PluginCapabilities::RAW_QUERY
        .union(PluginCapabilities::CREATE_UNIT)
        .union(PluginCapabilities::INSERT)
        .union(PluginCapabilities::UPDATE)
        .union(PluginCapabilities::DELETE)
        .union(PluginCapabilities::GRAPH)
        .union(PluginCapabilities::FILTERING)
        .union(PluginCapabilities::SORTING),
    operators: dblens_core::SQL_OPERATORS,
};

pub struct SqlitePlugin;

impl SqlitePlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SqlitePlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabasePlugin for SqlitePlugin {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn metadata(&self) -> &'static PluginMetadata {
        &METADATA
    }

    fn connect(
        &self,
        profile: &ConnectionProfile,
        _database: Option<&str>,
    ) -> Result<Arc<dyn Connection>, DbError> {
        let path = profile.credentials.database.clone();
        if path.is_empty() {
            return Err(DbError::invalid_argument(
                "SQLite requires a database file path",
            ));
        }
        if path != ":memory:" && !Path::new(&path).exists() {
            return Err(DbError::not_found(format!("database file '{path}'")));
        }

        log::info!("opening SQLite database at {path}");
        let conn = rusqlite::Connection::open(&path)
            .map_err(|e| DbError::connection_failed(e.to_string()))?;

        Ok(Arc::new(SqliteConnection {
            conn: Mutex::new(conn),
            path,
            dialect: AnsiDialect,
        }))
    }
}

pub struct SqliteConnection {
    conn: Mutex<rusqlite::Connection>,
    path: String,
    dialect: AnsiDialect,
}

impl SqliteConnection {
    fn key_columns(&self, unit: &str) -> Result<Vec<String>, DbError> {
        Ok(self
            .columns("", unit)?
            .into_iter()
            .filter(|c| c.is_primary)
            .map(|c| c.name)
            .collect())
    }

    fn foreign_keys(&self, units: &[StorageUnit]) -> Result<Vec<ForeignKey>, DbError> {
        let mut keys = Vec::new();
        for unit in units {
            let result = self.query(
                "SELECT \"table\", \"from\", \"to\" FROM pragma_foreign_key_list(?)",
                &[Value::Text(unit.name.clone())],
            )?;
            for row in result.rows {
                keys.push(ForeignKey {
                    from_unit: unit.name.clone(),
                    from_column: row[1].clone(),
                    to_unit: row[0].clone(),
                    to_column: row[2].clone(),
                });
            }
        }
        Ok(keys)
    }
}

impl SqlExecutor for SqliteConnection {
    fn dialect(&self) -> &dyn SqlDialect {
        &self.dialect
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<RowSet, DbError> {
        let conn = self.conn.lock().expect("sqlite lock poisoned");
        let mut statement = conn.prepare(sql).map_err(to_db_error)?;

        let columns: Vec<Column> = statement
            .columns()
            .iter()
            .map(|c| Column::new(c.name(), c.decl_type().unwrap_or("")))
            .collect();

        let mut rows_out = Vec::new();
        let mut rows = statement
            .query(rusqlite::params_from_iter(params.iter().map(to_sqlite_value)))
            .map_err(to_db_error)?;

        while let Some(row) = rows.next().map_err(to_db_error)? {
            rows_out.push(
                (0..columns.len())
                    .map(|i| cell_to_string(row.get_ref(i)))
                    .collect::<Result<Vec<String>, DbError>>()?,
            );
        }

        Ok(RowSet {
            columns,
            rows: rows_out,
            disable_update: false,
        })
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, DbError> {
        let conn = self.conn.lock().expect("sqlite lock poisoned");
        let affected = conn
            .execute(
                sql,
                rusqlite::params_from_iter(params.iter().map(to_sqlite_value)),
            )
            .map_err(to_db_error)?;
        Ok(affected as u64)
    }
}

impl Connection for SqliteConnection {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn metadata(&self) -> &'static PluginMetadata {
        &METADATA
    }

    fn ping(&self) -> Result<(), DbError> {
        let conn = self.conn.lock().expect("sqlite lock poisoned");
        conn.query_row("SELECT 1", [], |_| Ok(()))
            .map_err(|e| DbError::connection_failed(e.to_string()))
    }

    fn close(&self) -> Result<(), DbError> {
        Ok(())
    }

    /// A SQLite handle serves exactly one file; the database list is the
    /// file's stem.
    fn databases(&self) -> Result<Vec<String>, DbError> {
        let name = Path::new(&self.path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.clone());
        Ok(vec![name])
    }

    fn storage_units(&self, _scope: &str) -> Result<Vec<StorageUnit>, DbError> {
        let result = self.query(
            "SELECT name, type FROM sqlite_master \
             WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' ORDER BY name",
            &[],
        )?;

        Ok(result
            .rows
            .into_iter()
            .map(|row| StorageUnit::new(&row[0]).with_attribute("Type", &row[1]))
            .collect())
    }

    fn columns(&self, _scope: &str, unit: &str) -> Result<Vec<Column>, DbError> {
        let result = self.query(
            "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?)",
            &[Value::Text(unit.to_string())],
        )?;

        if result.rows.is_empty() {
            return Err(DbError::not_found(format!("table '{unit}'")));
        }

        Ok(result
            .rows
            .into_iter()
            .map(|row| Column {
                name: row[0].clone(),
                type_name: row[1].clone(),
                nullable: row[2] == "0",
                default_value: if row[3].is_empty() {
                    None
                } else {
                    Some(row[3].clone())
                },
                is_primary: row[4] != "0",
            })
            .collect())
    }

    fn rows(
        &self,
        _scope: &str,
        unit: &str,
        query: &RowQuery,
        cancel: &CancelToken,
    ) -> Result<RowSet, DbError> {
        let keys = self.key_columns(unit)?;
        dblens_sql::fetch_rows(self, None, unit, query, &keys, cancel)
    }

    fn add_storage_unit(
        &self,
        _scope: &str,
        unit: &str,
        fields: &[UnitField],
    ) -> Result<(), DbError> {
        dblens_sql::create_unit(self, None, unit, fields)
    }

    fn add_row(&self, _scope: &str, unit: &str, cells: &[CellValue]) -> Result<(), DbError> {
        dblens_sql::insert_row(self, None, unit, cells)
    }

    fn update_row(
        &self,
        _scope: &str,
        unit: &str,
        values: &[CellValue],
        updated: &[String],
    ) -> Result<(), DbError> {
        let keys = self.key_columns(unit)?;
        dblens_sql::update_row(self, None, unit, values, updated, &keys)
    }

    fn delete_row(&self, _scope: &str, unit: &str, values: &[CellValue]) -> Result<(), DbError> {
        let keys = self.key_columns(unit)?;
        dblens_sql::delete_row(self, None, unit, values, &keys)
    }

    fn clear_storage_unit(&self, _scope: &str, unit: &str) -> Result<(), DbError> {
        dblens_sql::clear_unit(self, None, unit)
    }

    fn raw_query(&self, query: &str, cancel: &CancelToken) -> Result<RowSet, DbError> {
        dblens_sql::raw_query(self, query, cancel)
    }

    fn graph(&self, scope: &str) -> Result<Vec<GraphUnit>, DbError> {
        let units = self.storage_units(scope)?;
        let foreign_keys = self.foreign_keys(&units)?;

        let mut columns_by_unit = HashMap::new();
        for unit in &units {
            columns_by_unit.insert(unit.name.clone(), self.columns(scope, &unit.name)?);
        }

        Ok(dblens_sql::build_graph(&units, &columns_by_unit, &foreign_keys))
    }

    fn export_rows(
        &self,
        _scope: &str,
        unit: &str,
        options: &ExportOptions,
        sink: &mut dyn ExportSink,
        cancel: &CancelToken,
    ) -> Result<u64, DbError> {
        let columns = self.columns("", unit)?;
        let keys: Vec<String> = columns
            .iter()
            .filter(|c| c.is_primary)
            .map(|c| c.name.clone())
            .collect();
        dblens_sql::export_rows(self, None, unit, &columns, &keys, options, sink, cancel)
    }
}

fn to_sqlite_value(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(b) => rusqlite::types::Value::Integer(i64::from(*b)),
        Value::Int(i) => rusqlite::types::Value::Integer(*i),
        Value::Float(f) => rusqlite::types::Value::Real(*f),
        Value::Bytes(b) => rusqlite::types::Value::Blob(b.clone()),
        other => rusqlite::types::Value::Text(other.as_display_string()),
    }
}

fn cell_to_string(cell: Result<ValueRef<'_>, rusqlite::Error>) -> Result<String, DbError> {
    match cell.map_err(to_db_error)? {
        ValueRef::Null => Ok(String::new()),
        ValueRef::Integer(i) => Ok(i.to_string()),
        ValueRef::Real(f) => Ok(f.to_string()),
        ValueRef::Text(t) => Ok(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Ok(format!("\\x{}", hex::encode(b))),
    }
}

fn to_db_error(e: rusqlite::Error) -> DbError {
    let message = e.to_string();
    if message.contains("no such table") || message.contains("no such column") {
        DbError::not_found(message)
    } else {
        DbError::driver(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dblens_core::{Credentials, SortCondition, WhereCondition};

    fn open_fixture() -> (tempfile::TempDir, Arc<dyn Connection>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.db");

        let setup = rusqlite::Connection::open(&path).unwrap();
        setup
            .execute_batch(
                r#"
                CREATE TABLE "odd name" (id INTEGER PRIMARY KEY, c TEXT);
                INSERT INTO "odd name" (id, c) VALUES (1, 'a'), (2, 'b');
                CREATE TABLE plain (v TEXT);
                "#,
            )
            .unwrap();
        drop(setup);

        let profile = ConnectionProfile::new(
            "fixture",
            Credentials::new(BackendKind::Sqlite, "")
                .with_database(path.to_string_lossy().into_owned()),
        );
        let conn = SqlitePlugin::new().connect(&profile, None).unwrap();
        (dir, conn)
    }

    #[test]
    fn schemas_are_unsupported_and_databases_is_the_file() {
        let (_dir, conn) = open_fixture();
        assert!(matches!(conn.schemas(), Err(DbError::Unsupported(_))));
        assert_eq!(conn.databases().unwrap(), vec!["fixture.db"]);
    }

    #[test]
    fn rows_filters_with_like_on_quoted_table() {
        let (_dir, conn) = open_fixture();
        let query = RowQuery::page(10, 0)
            .with_where(WhereCondition::atomic_typed("c", "LIKE", "a", "TEXT"));

        let result = conn
            .rows("", "odd name", &query, &CancelToken::new())
            .unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0], vec!["1".to_string(), "a".to_string()]);
        assert!(!result.disable_update);
    }

    #[test]
    fn rows_without_primary_key_disable_update() {
        let (_dir, conn) = open_fixture();
        let result = conn
            .rows("", "plain", &RowQuery::page(10, 0), &CancelToken::new())
            .unwrap();
        assert!(result.disable_update);
    }

    #[test]
    fn insert_update_delete_roundtrip() {
        let (_dir, conn) = open_fixture();

        conn.add_row(
            "",
            "odd name",
            &[
                CellValue::typed("id", "3", "INTEGER"),
                CellValue::typed("c", "x", "TEXT"),
            ],
        )
        .unwrap();

        conn.update_row(
            "",
            "odd name",
            &[
                CellValue::typed("id", "3", "INTEGER"),
                CellValue::typed("c", "y", "TEXT"),
            ],
            &["c".to_string()],
        )
        .unwrap();

        let query = RowQuery::page(10, 0)
            .with_where(WhereCondition::atomic_typed("id", "=", "3", "INTEGER"));
        let result = conn.rows("", "odd name", &query, &CancelToken::new()).unwrap();
        assert_eq!(result.rows, vec![vec!["3".to_string(), "y".to_string()]]);

        conn.delete_row("", "odd name", &[CellValue::typed("id", "3", "INTEGER")])
            .unwrap();
        let result = conn.rows("", "odd name", &query, &CancelToken::new()).unwrap();
        assert!(result.rows.is_empty());
    }

    #[test]
    fn pagination_concatenates_to_full_scan() {
        let (_dir, conn) = open_fixture();
        let sort = vec![SortCondition::asc("id")];

        let mut paged = Vec::new();
        for offset in [0u64, 1] {
            let query = RowQuery::page(1, offset).with_sort(sort.clone());
            paged.extend(
                conn.rows("", "odd name", &query, &CancelToken::new())
                    .unwrap()
                    .rows,
            );
        }

        let full = conn
            .rows(
                "",
                "odd name",
                &RowQuery::page(100, 0).with_sort(sort),
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(paged, full.rows);
    }

    #[test]
    fn raw_query_surfaces_projection_as_read_only() {
        let (_dir, conn) = open_fixture();
        let result = conn
            .raw_query("SELECT c FROM \"odd name\" ORDER BY id", &CancelToken::new())
            .unwrap();
        assert!(result.disable_update);
        assert_eq!(result.rows.len(), 2);
    }

    #[test]
    fn export_escapes_formula_cells() {
        let (_dir, conn) = open_fixture();
        conn.add_row(
            "",
            "odd name",
            &[
                CellValue::typed("id", "9", "INTEGER"),
                CellValue::typed("c", "=1+1", "TEXT"),
            ],
        )
        .unwrap();

        let mut rows: Vec<Vec<String>> = Vec::new();
        let mut sink = |row: &[String]| -> Result<(), DbError> {
            rows.push(row.to_vec());
            Ok(())
        };
        conn.export_rows(
            "",
            "odd name",
            &ExportOptions::default(),
            &mut sink,
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(rows[0], vec!["id", "c"]);
        assert!(rows.iter().any(|r| r.contains(&"'=1+1".to_string())));
    }

    #[test]
    fn graph_reads_foreign_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.db");
        let setup = rusqlite::Connection::open(&path).unwrap();
        setup
            .execute_batch(
                r#"
                CREATE TABLE users (id INTEGER PRIMARY KEY);
                CREATE TABLE orders (
                    id INTEGER PRIMARY KEY,
                    user_id INTEGER REFERENCES users(id)
                );
                "#,
            )
            .unwrap();
        drop(setup);

        let profile = ConnectionProfile::new(
            "graph",
            Credentials::new(BackendKind::Sqlite, "")
                .with_database(path.to_string_lossy().into_owned()),
        );
        let conn = SqlitePlugin::new().connect(&profile, None).unwrap();

        let graph = conn.graph("").unwrap();
        let orders = graph.iter().find(|g| g.unit.name == "orders").unwrap();
        assert_eq!(orders.relationships[0].target, "users");
    }
}
