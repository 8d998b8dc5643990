use crate::dialect::PostgresDialect;
use crate::values::{bind_param, cell_to_string};
use dblens_core::{
    BackendKind, CancelToken, CellValue, Column, Connection, ConnectionProfile, DatabaseCategory,
    DatabasePlugin, DbError, ExportOptions, ExportSink, GraphUnit, PluginCapabilities,
    PluginMetadata, RowQuery, RowSet, SslStatus, StorageUnit, TlsSettings, UnitField,
    advanced_keys,
};
use dblens_sql::{ForeignKey, SqlDialect, SqlExecutor};
use native_tls::{Certificate, TlsConnector};
use postgres::types::ToSql;
use postgres::{Client, NoTls};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

static METADATA: PluginMetadata = PluginMetadata {
    display_name: "PostgreSQL",
    description: "Advanced open source relational database",
    category: DatabaseCategory::Relational,
    capabilities: PluginCapabilities::DATABASES
        .union(PluginCapabilities::SCHEMAS)
        .union(PluginCapabilities::RAW_QUERY)
        .union(PluginCapabilities::CREATE_UNIT)
        .union(PluginCapabilities::INSERT)
        .union(PluginCapabilities::UPDATE)
        .union(PluginCapabilities::DELETE)
        .union(PluginCapabilities::GRAPH)
        .union(PluginCapabilities::SSL)
        .union(PluginCapabilities::FILTERING)
        .union(PluginCapabilities::SORTING),
    operators: &[
        ("=", "eq"),
        ("!=", "ne"),
        ("<>", "ne"),
        ("<", "lt"),
        ("<=", "le"),
        (">", "gt"),
        (">=", "ge"),
        ("LIKE", "like"),
        ("NOT LIKE", "not_like"),
        ("ILIKE", "ilike"),
        ("NOT ILIKE", "not_ilike"),
        ("IN", "in"),
        ("NOT IN", "not_in"),
        ("IS NULL", "is_null"),
        ("IS NOT NULL", "is_not_null"),
        ("BETWEEN", "between"),
    ],
};

pub struct PostgresPlugin;

impl PostgresPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PostgresPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabasePlugin for PostgresPlugin {
    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }

    fn metadata(&self) -> &'static PluginMetadata {
        &METADATA
    }

    fn connect(
        &self,
        profile: &ConnectionProfile,
        database: Option<&str>,
    ) -> Result<Arc<dyn Connection>, DbError> {
        let credentials = &profile.credentials;
        let tls = TlsSettings::from_credentials(credentials)?;
        let dbname = database.unwrap_or(credentials.database.as_str());

        let mut conn_string = format!(
            "host={} port={} user={} password={} dbname={} connect_timeout=30",
            credentials.host,
            credentials.effective_port(),
            credentials.username,
            credentials.password,
            dbname,
        );
        if let Some(extra) = credentials.advanced_option(advanced_keys::URL_PARAMS) {
            conn_string.push(' ');
            conn_string.push_str(&extra.replace('&', " "));
        }

        log::info!(
            "connecting to PostgreSQL at {}:{} as {} (database: {}, ssl: {})",
            credentials.host,
            credentials.effective_port(),
            credentials.username,
            dbname,
            tls.mode.as_str()
        );

        let client = open_client(&conn_string, &tls, &credentials.host)?;

        Ok(Arc::new(PostgresConnection {
            client: Mutex::new(client),
            dialect: PostgresDialect,
            ssl: tls.status(),
        }))
    }
}

fn open_client(conn_string: &str, tls: &TlsSettings, host: &str) -> Result<Client, DbError> {
    if !tls.mode.is_enabled() {
        return Client::connect(conn_string, NoTls).map_err(|e| humanize_error(&e, host));
    }

    let mut builder = TlsConnector::builder();
    builder.danger_accept_invalid_certs(!tls.mode.verifies_certificate());
    builder.danger_accept_invalid_hostnames(!tls.mode.verifies_hostname());

    if let Some(ca_path) = &tls.ca_cert_path {
        let pem = std::fs::read(ca_path)?;
        let cert = Certificate::from_pem(&pem)
            .map_err(|e| DbError::invalid_argument(format!("invalid CA certificate: {e}")))?;
        builder.add_root_certificate(cert);
    }

    let connector = builder
        .build()
        .map_err(|e| DbError::connection_failed(format!("TLS setup failed: {e}")))?;

    Client::connect(
        conn_string,
        postgres_native_tls::MakeTlsConnector::new(connector),
    )
    .map_err(|e| humanize_error(&e, host))
}

pub struct PostgresConnection {
    client: Mutex<Client>,
    dialect: PostgresDialect,
    ssl: SslStatus,
}

impl PostgresConnection {
    fn key_columns(&self, scope: &str, unit: &str) -> Result<Vec<String>, DbError> {
        Ok(self
            .columns(scope, unit)?
            .into_iter()
            .filter(|c| c.is_primary)
            .map(|c| c.name)
            .collect())
    }

    fn foreign_keys(&self, scope: &str) -> Result<Vec<ForeignKey>, DbError> {
        let result = self.query_typed(
            r#"
            SELECT
                tc.table_name,
                kcu.column_name,
                ccu.table_name AS foreign_table,
                ccu.column_name AS foreign_column
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
              ON tc.constraint_name = kcu.constraint_name
             AND tc.table_schema = kcu.table_schema
            JOIN information_schema.constraint_column_usage ccu
              ON ccu.constraint_name = tc.constraint_name
             AND ccu.table_schema = tc.table_schema
            WHERE tc.constraint_type = 'FOREIGN KEY'
              AND tc.table_schema = $1
            ORDER BY tc.table_name, kcu.column_name
            "#,
            &[&scope],
        )?;

        Ok(result
            .into_iter()
            .map(|row| ForeignKey {
                from_unit: row[0].clone(),
                from_column: row[1].clone(),
                to_unit: row[2].clone(),
                to_column: row[3].clone(),
            })
            .collect())
    }

    /// Run a catalog query with driver-native params and string rows.
    fn query_typed(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Vec<String>>, DbError> {
        let mut client = self.client.lock().expect("postgres client lock poisoned");
        let rows = client.query(sql, params).map_err(|e| to_db_error(&e))?;
        Ok(rows
            .iter()
            .map(|row| (0..row.len()).map(|i| cell_to_string(row, i)).collect())
            .collect())
    }
}

impl SqlExecutor for PostgresConnection {
    fn dialect(&self) -> &dyn SqlDialect {
        &self.dialect
    }

    fn query(&self, sql: &str, params: &[dblens_core::Value]) -> Result<RowSet, DbError> {
        let start = Instant::now();
        let mut client = self.client.lock().expect("postgres client lock poisoned");

        let statement = client.prepare(sql).map_err(|e| to_db_error(&e))?;
        let bound = bind_params(&statement, params)?;
        let refs: Vec<&(dyn ToSql + Sync)> = bound.iter().map(|b| b.as_ref()).collect();

        let rows = client.query(&statement, &refs).map_err(|e| to_db_error(&e))?;

        let columns: Vec<Column> = statement
            .columns()
            .iter()
            .map(|c| Column::new(c.name(), c.type_().name()))
            .collect();

        let data: Vec<Vec<String>> = rows
            .iter()
            .map(|row| (0..columns.len()).map(|i| cell_to_string(row, i)).collect())
            .collect();

        log::debug!(
            "[QUERY] completed in {:.2}ms, {} row(s)",
            start.elapsed().as_secs_f64() * 1000.0,
            data.len()
        );

        Ok(RowSet {
            columns,
            rows: data,
            disable_update: false,
        })
    }

    fn execute(&self, sql: &str, params: &[dblens_core::Value]) -> Result<u64, DbError> {
        let mut client = self.client.lock().expect("postgres client lock poisoned");
        let statement = client.prepare(sql).map_err(|e| to_db_error(&e))?;
        let bound = bind_params(&statement, params)?;
        let refs: Vec<&(dyn ToSql + Sync)> = bound.iter().map(|b| b.as_ref()).collect();
        client.execute(&statement, &refs).map_err(|e| to_db_error(&e))
    }
}

fn bind_params(
    statement: &postgres::Statement,
    params: &[dblens_core::Value],
) -> Result<Vec<Box<dyn ToSql + Sync>>, DbError> {
    let types = statement.params();
    params
        .iter()
        .enumerate()
        .map(|(i, value)| {
            let ty = types
                .get(i)
                .ok_or_else(|| DbError::invalid_argument("parameter count mismatch"))?;
            bind_param(value, ty)
        })
        .collect()
}

impl Connection for PostgresConnection {
    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }

    fn metadata(&self) -> &'static PluginMetadata {
        &METADATA
    }

    fn ping(&self) -> Result<(), DbError> {
        let mut client = self.client.lock().expect("postgres client lock poisoned");
        client
            .simple_query("SELECT 1")
            .map_err(|e| DbError::connection_failed(e.to_string()))?;
        Ok(())
    }

    fn close(&self) -> Result<(), DbError> {
        Ok(())
    }

    fn databases(&self) -> Result<Vec<String>, DbError> {
        let rows = self.query_typed(
            "SELECT datname FROM pg_database WHERE datistemplate = false ORDER BY datname",
            &[],
        )?;
        Ok(rows.into_iter().map(|mut r| r.remove(0)).collect())
    }

    fn schemas(&self) -> Result<Vec<String>, DbError> {
        let rows = self.query_typed(
            r#"
            SELECT schema_name
            FROM information_schema.schemata
            WHERE schema_name NOT IN ('pg_catalog', 'information_schema', 'pg_toast')
            ORDER BY schema_name
            "#,
            &[],
        )?;
        Ok(rows.into_iter().map(|mut r| r.remove(0)).collect())
    }

    fn storage_units(&self, scope: &str) -> Result<Vec<StorageUnit>, DbError> {
        let rows = self.query_typed(
            r#"
            SELECT
                t.table_name,
                t.table_type,
                pg_total_relation_size(c.oid),
                GREATEST(c.reltuples::bigint, 0)
            FROM information_schema.tables t
            JOIN pg_class c ON c.relname = t.table_name
            JOIN pg_namespace n ON n.oid = c.relnamespace AND n.nspname = t.table_schema
            WHERE t.table_schema = $1
            ORDER BY t.table_name
            "#,
            &[&scope],
        )?;

        Ok(rows
            .into_iter()
            .map(|row| {
                StorageUnit::new(&row[0])
                    .with_attribute("Type", &row[1])
                    .with_attribute("Total Size", &row[2])
                    .with_attribute("Estimated Count", &row[3])
            })
            .collect())
    }

    fn columns(&self, scope: &str, unit: &str) -> Result<Vec<Column>, DbError> {
        let rows = self.query_typed(
            r#"
            SELECT
                c.column_name,
                c.data_type,
                c.is_nullable = 'YES',
                c.column_default,
                COALESCE(
                    (SELECT true FROM information_schema.table_constraints tc
                     JOIN information_schema.key_column_usage kcu
                       ON tc.constraint_name = kcu.constraint_name
                      AND tc.table_schema = kcu.table_schema
                     WHERE tc.constraint_type = 'PRIMARY KEY'
                       AND tc.table_schema = c.table_schema
                       AND tc.table_name = c.table_name
                       AND kcu.column_name = c.column_name),
                    false
                )
            FROM information_schema.columns c
            WHERE c.table_schema = $1 AND c.table_name = $2
            ORDER BY c.ordinal_position
            "#,
            &[&scope, &unit],
        )?;

        if rows.is_empty() {
            return Err(DbError::not_found(format!("table '{scope}.{unit}'")));
        }

        Ok(rows
            .into_iter()
            .map(|row| Column {
                name: row[0].clone(),
                type_name: row[1].clone(),
                nullable: row[2] == "true",
                default_value: if row[3].is_empty() {
                    None
                } else {
                    Some(row[3].clone())
                },
                is_primary: row[4] == "true",
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

fn to_db_error(e: &postgres::Error) -> DbError {
    let message = e.to_string();
    if message.contains("does not exist") {
        DbError::not_found(message)
    } else {
        DbError::driver(message)
    }
}

fn humanize_error(e: &postgres::Error, host: &str) -> DbError {
    let source = e.to_string();

    let message = if source.contains("timed out") {
        format!("Connection to {host} timed out. Check that the host is reachable.")
    } else if source.contains("Connection refused") {
        format!("Connection refused at {host}. Verify PostgreSQL is running and accepting connections.")
    } else if source.contains("password authentication failed") {
        "Authentication failed. Check your username and password.".to_string()
    } else if source.contains("no pg_hba.conf entry") {
        format!("Server rejected connection from this host. Check pg_hba.conf on {host}.")
    } else if source.contains("Name or service not known")
        || source.contains("nodename nor servname")
    {
        format!("Could not resolve hostname: {host}")
    } else {
        format!("Connection error: {source}")
    };

    log::error!("PostgreSQL connection failed: {message}");
    DbError::connection_failed(message)
}
