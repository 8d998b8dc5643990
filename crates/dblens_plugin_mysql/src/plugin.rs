use crate::dialect::MySqlDialect;
use dblens_core::{
    BackendKind, CancelToken, CellValue, Column, Connection, ConnectionProfile, DatabaseCategory,
    DatabasePlugin, DbError, ExportOptions, ExportSink, GraphUnit, PluginCapabilities,
    PluginMetadata, RowQuery, RowSet, SslStatus, StorageUnit, TlsSettings, UnitField, Value,
};
use dblens_sql::{ForeignKey, SqlDialect, SqlExecutor};
use mysql::prelude::Queryable;
use mysql::{Opts, OptsBuilder, Params, Pool, SslOpts, Value as MySqlValue};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

static MYSQL_METADATA: PluginMetadata = PluginMetadata {
    display_name: "MySQL",
    description: "The world's most popular open source database",
    category: DatabaseCategory::Relational,
    capabilities: SQL_CAPABILITIES,
    operators: dblens_core::SQL_OPERATORS,
};

static MARIADB_METADATA: PluginMetadata = PluginMetadata {
    display_name: "MariaDB",
    description: "Community-developed fork of MySQL",
    category: DatabaseCategory::Relational,
    capabilities: SQL_CAPABILITIES,
    operators: dblens_core::SQL_OPERATORS,
};

const SQL_CAPABILITIES: PluginCapabilities = PluginCapabilities::DATABASES
    .union(PluginCapabilities::RAW_QUERY)
    .union(PluginCapabilities::CREATE_UNIT)
    .union(PluginCapabilities::INSERT)
    .union(PluginCapabilities::UPDATE)
    .union(PluginCapabilities::DELETE)
    .union(PluginCapabilities::GRAPH)
    .union(PluginCapabilities::SSL)
    .union(PluginCapabilities::FILTERING)
    .union(PluginCapabilities::SORTING);

/// One plugin serves both MySQL and MariaDB; the wire protocol and
/// catalog layout are shared, only the registered kind differs.
pub struct MySqlPlugin {
    kind: BackendKind,
}

impl MySqlPlugin {
    pub fn mysql() -> Self {
        Self {
            kind: BackendKind::MySql,
        }
    }

    pub fn mariadb() -> Self {
        Self {
            kind: BackendKind::MariaDb,
        }
    }

    fn static_metadata(kind: BackendKind) -> &'static PluginMetadata {
        match kind {
            BackendKind::MariaDb => &MARIADB_METADATA,
            _ => &MYSQL_METADATA,
        }
    }
}

impl DatabasePlugin for MySqlPlugin {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn metadata(&self) -> &'static PluginMetadata {
        Self::static_metadata(self.kind)
    }

    fn connect(
        &self,
        profile: &ConnectionProfile,
        database: Option<&str>,
    ) -> Result<Arc<dyn Connection>, DbError> {
        let credentials = &profile.credentials;
        let tls = TlsSettings::from_credentials(credentials)?;
        let dbname = database.unwrap_or(credentials.database.as_str());

        log::info!(
            "connecting to {} at {}:{} as {} (database: {}, ssl: {})",
            self.metadata().display_name,
            credentials.host,
            credentials.effective_port(),
            credentials.username,
            dbname,
            tls.mode.as_str()
        );

        let mut builder = OptsBuilder::new()
            .ip_or_hostname(Some(credentials.host.clone()))
            .tcp_port(credentials.effective_port())
            .user(Some(credentials.username.clone()))
            .pass(Some(credentials.password.clone()))
            .db_name(if dbname.is_empty() {
                None
            } else {
                Some(dbname.to_string())
            });

        if tls.mode.is_enabled() {
            let mut ssl = SslOpts::default()
                .with_danger_accept_invalid_certs(!tls.mode.verifies_certificate())
                .with_danger_skip_domain_validation(!tls.mode.verifies_hostname());
            if let Some(ca) = &tls.ca_cert_path {
                ssl = ssl.with_root_cert_path(Some(std::path::PathBuf::from(ca)));
            }
            builder = builder.ssl_opts(ssl);
        }

        let pool = Pool::new(Opts::from(builder))
            .map_err(|e| DbError::connection_failed(e.to_string()))?;

        Ok(Arc::new(MySqlConnection {
            kind: self.kind,
            pool,
            dialect: MySqlDialect,
            ssl: tls.status(),
        }))
    }
}

pub struct MySqlConnection {
    kind: BackendKind,
    pool: Pool,
    dialect: MySqlDialect,
    ssl: SslStatus,
}

impl MySqlConnection {
    fn conn(&self) -> Result<mysql::PooledConn, DbError> {
        self.pool
            .get_conn()
            .map_err(|e| DbError::connection_failed(e.to_string()))
    }

    fn key_columns(&self, scope: &str, unit: &str) -> Result<Vec<String>, DbError> {
        Ok(self
            .columns(scope, unit)?
            .into_iter()
            .filter(|c| c.is_primary)
            .map(|c| c.name)
            .collect())
    }

    fn foreign_keys(&self, scope: &str) -> Result<Vec<ForeignKey>, DbError> {
        let result = self.query(
            "SELECT table_name, column_name, referenced_table_name, referenced_column_name \
             FROM information_schema.key_column_usage \
             WHERE table_schema = ? AND referenced_table_name IS NOT NULL \
             ORDER BY table_name, column_name",
            &[Value::Text(scope.to_string())],
        )?;

        Ok(result
            .rows
            .into_iter()
            .map(|row| ForeignKey {
                from_unit: row[0].clone(),
                from_column: row[1].clone(),
                to_unit: row[2].clone(),
                to_column: row[3].clone(),
            })
            .collect())
    }
}

impl SqlExecutor for MySqlConnection {
    fn dialect(&self) -> &dyn SqlDialect {
        &self.dialect
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<RowSet, DbError> {
        let start = Instant::now();
        let mut conn = self.conn()?;

        let result = conn
            .exec_iter(sql, to_mysql_params(params))
            .map_err(to_db_error)?;

        let columns: Vec<Column> = result
            .columns()
            .as_ref()
            .iter()
            .map(|c| Column::new(c.name_str().to_string(), type_name(c.column_type())))
            .collect();

        let mut rows = Vec::new();
        for row in result {
            let row = row.map_err(to_db_error)?;
            rows.push(
                (0..columns.len())
                    .map(|i| cell_to_string(&row, i))
                    .collect(),
            );
        }

        log::debug!(
            "[QUERY] completed in {:.2}ms, {} row(s)",
            start.elapsed().as_secs_f64() * 1000.0,
            rows.len()
        );

        Ok(RowSet {
            columns,
            rows,
            disable_update: false,
        })
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, DbError> {
        let mut conn = self.conn()?;
        conn.exec_drop(sql, to_mysql_params(params))
            .map_err(to_db_error)?;
        Ok(conn.affected_rows())
    }
}

impl Connection for MySqlConnection {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn metadata(&self) -> &'static PluginMetadata {
        MySqlPlugin::static_metadata(self.kind)
    }

    fn ping(&self) -> Result<(), DbError> {
        let mut conn = self.conn()?;
        conn.query_drop("SELECT 1")
            .map_err(|e| DbError::connection_failed(e.to_string()))
    }

    fn close(&self) -> Result<(), DbError> {
        Ok(())
    }

    fn databases(&self) -> Result<Vec<String>, DbError> {
        let result = self.query("SHOW DATABASES", &[])?;
        Ok(result.rows.into_iter().map(|mut r| r.remove(0)).collect())
    }

    fn storage_units(&self, scope: &str) -> Result<Vec<StorageUnit>, DbError> {
        let result = self.query(
            "SELECT table_name, table_type, COALESCE(engine, ''), \
             COALESCE(data_length, 0) + COALESCE(index_length, 0), COALESCE(table_rows, 0) \
             FROM information_schema.tables WHERE table_schema = ? ORDER BY table_name",
            &[Value::Text(scope.to_string())],
        )?;

        Ok(result
            .rows
            .into_iter()
            .map(|row| {
                StorageUnit::new(&row[0])
                    .with_attribute("Type", &row[1])
                    .with_attribute("Engine", &row[2])
                    .with_attribute("Total Size", &row[3])
                    .with_attribute("Estimated Count", &row[4])
            })
            .collect())
    }

    fn columns(&self, scope: &str, unit: &str) -> Result<Vec<Column>, DbError> {
        let result = self.query(
            "SELECT column_name, column_type, is_nullable = 'YES', column_default, \
             column_key = 'PRI' \
             FROM information_schema.columns \
             WHERE table_schema = ? AND table_name = ? ORDER BY ordinal_position",
            &[Value::Text(scope.to_string()), Value::Text(unit.to_string())],
        )?;

        if result.rows.is_empty() {
            return Err(DbError::not_found(format!("table '{scope}.{unit}'")));
        }

        Ok(result
            .rows
            .into_iter()
            .map(|row| Column {
                name: row[0].clone(),
                type_name: row[1].clone(),
                nullable: row[2] == "1",
                default_value: if row[3].is_empty() {
                    None
                } else {
                    Some(row[3].clone())
                },
                is_primary: row[4] == "1",
            })
            .collect())
    }

    fn rows(
        &self,
        scope: &str,
        unit: &str,
        query: &RowQuery,
        cancel: &CancelToken,
    ) -> Result<RowSet, DbError> {
        let keys = self.key_columns(scope, unit)?;
        dblens_sql::fetch_rows(self, Some(scope), unit, query, &keys, cancel)
    }

    fn add_storage_unit(
        &self,
        scope: &str,
        unit: &str,
        fields: &[UnitField],
    ) -> Result<(), DbError> {
        dblens_sql::create_unit(self, Some(scope), unit, fields)
    }

    fn add_row(&self, scope: &str, unit: &str, cells: &[CellValue]) -> Result<(), DbError> {
        dblens_sql::insert_row(self, Some(scope), unit, cells)
    }

    fn update_row(
        &self,
        scope: &str,
        unit: &str,
        values: &[CellValue],
        updated: &[String],
    ) -> Result<(), DbError> {
        let keys = self.key_columns(scope, unit)?;
        dblens_sql::update_row(self, Some(scope), unit, values, updated, &keys)
    }

    fn delete_row(&self, scope: &str, unit: &str, values: &[CellValue]) -> Result<(), DbError> {
        let keys = self.key_columns(scope, unit)?;
        dblens_sql::delete_row(self, Some(scope), unit, values, &keys)
    }

    fn clear_storage_unit(&self, scope: &str, unit: &str) -> Result<(), DbError> {
        dblens_sql::clear_unit(self, Some(scope), unit)
    }

    fn raw_query(&self, query: &str, cancel: &CancelToken) -> Result<RowSet, DbError> {
        dblens_sql::raw_query(self, query, cancel)
    }

    fn graph(&self, scope: &str) -> Result<Vec<GraphUnit>, DbError> {
        let units = self.storage_units(scope)?;
        let foreign_keys = self.foreign_keys(scope)?;

        let mut columns_by_unit = HashMap::new();
        for unit in &units {
            columns_by_unit.insert(unit.name.clone(), self.columns(scope, &unit.name)?);
        }

        Ok(dblens_sql::build_graph(&units, &columns_by_unit, &foreign_keys))
    }

    fn export_rows(
        &self,
        scope: &str,
        unit: &str,
        options: &ExportOptions,
        sink: &mut dyn ExportSink,
        cancel: &CancelToken,
    ) -> Result<u64, DbError> {
        let columns = self.columns(scope, unit)?;
        let keys: Vec<String> = columns
            .iter()
            .filter(|c| c.is_primary)
            .map(|c| c.name.clone())
            .collect();
        dblens_sql::export_rows(
            self,
            Some(scope),
            unit,
            &columns,
            &keys,
            options,
            sink,
            cancel,
        )
    }

    fn ssl_status(&self) -> Result<SslStatus, DbError> {
        Ok(self.ssl)
    }
}

fn to_mysql_params(params: &[Value]) -> Params {
    if params.is_empty() {
        return Params::Empty;
    }
    Params::Positional(params.iter().map(to_mysql_value).collect())
}

fn to_mysql_value(value: &Value) -> MySqlValue {
    match value {
        Value::Null => MySqlValue::NULL,
        Value::Bool(b) => MySqlValue::Int(i64::from(*b)),
        Value::Int(i) => MySqlValue::Int(*i),
        Value::Float(f) => MySqlValue::Double(*f),
        other => MySqlValue::Bytes(other.as_display_string().into_bytes()),
    }
}

fn cell_to_string(row: &mysql::Row, idx: usize) -> String {
    match row.as_ref(idx) {
        None | Some(MySqlValue::NULL) => String::new(),
        Some(MySqlValue::Bytes(bytes)) => String::from_utf8_lossy(bytes).into_owned(),
        Some(MySqlValue::Int(i)) => i.to_string(),
        Some(MySqlValue::UInt(u)) => u.to_string(),
        Some(MySqlValue::Float(f)) => f.to_string(),
        Some(MySqlValue::Double(d)) => d.to_string(),
        Some(MySqlValue::Date(y, m, d, hh, mm, ss, _)) => {
            if *hh == 0 && *mm == 0 && *ss == 0 {
                format!("{y:04}-{m:02}-{d:02}")
            } else {
                format!("{y:04}-{m:02}-{d:02} {hh:02}:{mm:02}:{ss:02}")
            }
        }
        Some(MySqlValue::Time(neg, days, hh, mm, ss, _)) => {
            let sign = if *neg { "-" } else { "" };
            format!("{sign}{:02}:{mm:02}:{ss:02}", u32::from(*hh) + days * 24)
        }
    }
}

fn type_name(column_type: mysql::consts::ColumnType) -> &'static str {
    use mysql::consts::ColumnType::*;
    match column_type {
        MYSQL_TYPE_TINY => "tinyint",
        MYSQL_TYPE_SHORT => "smallint",
        MYSQL_TYPE_LONG => "int",
        MYSQL_TYPE_LONGLONG => "bigint",
        MYSQL_TYPE_INT24 => "mediumint",
        MYSQL_TYPE_FLOAT => "float",
        MYSQL_TYPE_DOUBLE => "double",
        MYSQL_TYPE_NEWDECIMAL | MYSQL_TYPE_DECIMAL => "decimal",
        MYSQL_TYPE_DATE | MYSQL_TYPE_NEWDATE => "date",
        MYSQL_TYPE_TIME | MYSQL_TYPE_TIME2 => "time",
        MYSQL_TYPE_DATETIME | MYSQL_TYPE_DATETIME2 => "datetime",
        MYSQL_TYPE_TIMESTAMP | MYSQL_TYPE_TIMESTAMP2 => "timestamp",
        MYSQL_TYPE_YEAR => "year",
        MYSQL_TYPE_JSON => "json",
        MYSQL_TYPE_BIT => "bit",
        MYSQL_TYPE_BLOB | MYSQL_TYPE_TINY_BLOB | MYSQL_TYPE_MEDIUM_BLOB | MYSQL_TYPE_LONG_BLOB => {
            "blob"
        }
        MYSQL_TYPE_VAR_STRING | MYSQL_TYPE_VARCHAR => "varchar",
        MYSQL_TYPE_STRING => "char",
        MYSQL_TYPE_ENUM => "enum",
        MYSQL_TYPE_SET => "set",
        MYSQL_TYPE_GEOMETRY => "geometry",
        MYSQL_TYPE_NULL => "null",
        _ => "unknown",
    }
}

fn to_db_error(e: mysql::Error) -> DbError {
    let message = e.to_string();
    if message.contains("doesn't exist") {
        DbError::not_found(message)
    } else {
        DbError::driver(message)
    }
}
