use dblens_core::{
    BackendKind, CancelToken, CellValue, Column, Connection, ConnectionProfile, DatabaseCategory,
    DatabasePlugin, DbError, ExportOptions, ExportSink, GraphRelationship, GraphUnit,
    PluginCapabilities, PluginMetadata, RowQuery, RowSet, SslStatus, StorageUnit, TlsSettings,
    UnitField, Value, advanced_keys,
};
use dblens_sql::{PlaceholderStyle, SqlDialect, SqlExecutor};
use std::sync::Arc;
use std::time::Duration;

static METADATA: PluginMetadata = PluginMetadata {
    display_name: "ClickHouse",
    description: "Column-oriented OLAP database",
    category: DatabaseCategory::Relational,
    capabilities: PluginCapabilities::DATABASES
        .union(PluginCapabilities::RAW_QUERY)
        .union(PluginCapabilities::CREATE_UNIT)
        .union(PluginCapabilities::INSERT)
        .union(PluginCapabilities::UPDATE)
        .union(PluginCapabilities::DELETE)
        .union(PluginCapabilities::GRAPH)
        .union(PluginCapabilities::SSL)
        .union(PluginCapabilities::FILTERING)
        .union(PluginCapabilities::SORTING),
    operators: dblens_core::SQL_OPERATORS,
};

/// ClickHouse syntax: double-quoted identifiers and server-side typed
/// `{pN:Type}` placeholders carried as `param_pN` HTTP form values.
pub struct ClickHouseDialect;

impl SqlDialect for ClickHouseDialect {
    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::BraceTyped
    }
}

pub struct ClickHousePlugin;

impl ClickHousePlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ClickHousePlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabasePlugin for ClickHousePlugin {
    fn kind(&self) -> BackendKind {
        BackendKind::ClickHouse
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

        let protocol = match credentials.advanced_option(advanced_keys::HTTP_PROTOCOL) {
            Some(p) => p.to_ascii_lowercase(),
            None if tls.mode.is_enabled() => "https".to_string(),
            None => "http".to_string(),
        };
        let base_url = format!(
            "{protocol}://{}:{}",
            credentials.host,
            credentials.effective_port()
        );

        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .danger_accept_invalid_certs(
                tls.mode.is_enabled() && !tls.mode.verifies_certificate(),
            )
            .build()
            .map_err(|e| DbError::connection_failed(e.to_string()))?;

        log::info!(
            "connecting to ClickHouse at {base_url} as {} (database: {})",
            credentials.username,
            database.unwrap_or(&credentials.database)
        );

        Ok(Arc::new(ClickHouseConnection {
            http,
            base_url,
            user: credentials.username.clone(),
            password: credentials.password.clone(),
            database: database.unwrap_or(&credentials.database).to_string(),
            dialect: ClickHouseDialect,
            ssl: tls.status(),
        }))
    }
}

pub struct ClickHouseConnection {
    http: reqwest::blocking::Client,
    base_url: String,
    user: String,
    password: String,
    database: String,
    dialect: ClickHouseDialect,
    ssl: SslStatus,
}

impl ClickHouseConnection {
    /// POST one statement over the HTTP interface. Bound parameters ride
    /// as `param_pN` query-string values matching the `{pN:Type}`
    /// placeholders in the statement text.
    fn request(&self, sql: &str, params: &[Value], format: Option<&str>) -> Result<String, DbError> {
        let mut url = format!(
            "{}/?database={}",
            self.base_url,
            urlencoding::encode(&self.database)
        );
        if let Some(format) = format {
            url.push_str(&format!("&default_format={format}"));
        }
        for (i, value) in params.iter().enumerate() {
            url.push_str(&format!(
                "&param_p{}={}",
                i + 1,
                urlencoding::encode(&value.as_display_string())
            ));
        }

        let response = self
            .http
            .post(&url)
            .header("X-ClickHouse-User", &self.user)
            .header("X-ClickHouse-Key", &self.password)
            .body(sql.to_string())
            .send()
            .map_err(|e| DbError::connection_failed(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| DbError::driver(e.to_string()))?;

        if !status.is_success() {
            if body.contains("UNKNOWN_TABLE") || body.contains("UNKNOWN_DATABASE") {
                return Err(DbError::not_found(body));
            }
            return Err(DbError::driver(body));
        }
        Ok(body)
    }

    fn key_columns(&self, scope: &str, unit: &str) -> Result<Vec<String>, DbError> {
        Ok(self
            .columns(scope, unit)?
            .into_iter()
            .filter(|c| c.is_primary)
            .map(|c| c.name)
            .collect())
    }
}

impl SqlExecutor for ClickHouseConnection {
    fn dialect(&self) -> &dyn SqlDialect {
        &self.dialect
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<RowSet, DbError> {
        let body = self.request(sql, params, Some("JSONCompact"))?;
        if body.trim().is_empty() {
            return Ok(RowSet::empty());
        }

        let parsed: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| DbError::driver(format!("malformed JSONCompact response: {e}")))?;

        let columns: Vec<Column> = parsed["meta"]
            .as_array()
            .map(|meta| {
                meta.iter()
                    .map(|m| {
                        Column::new(
                            m["name"].as_str().unwrap_or_default(),
                            m["type"].as_str().unwrap_or_default(),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        let rows: Vec<Vec<String>> = parsed["data"]
            .as_array()
            .map(|data| {
                data.iter()
                    .map(|row| {
                        row.as_array()
                            .map(|cells| cells.iter().map(json_cell_to_string).collect())
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(RowSet {
            columns,
            rows,
            disable_update: false,
        })
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, DbError> {
        self.request(sql, params, None)?;
        // The HTTP interface does not report affected rows; mutations are
        // asynchronous server-side anyway.
        Ok(0)
    }
}

impl Connection for ClickHouseConnection {
    fn kind(&self) -> BackendKind {
        BackendKind::ClickHouse
    }

    fn metadata(&self) -> &'static PluginMetadata {
        &METADATA
    }

    fn ping(&self) -> Result<(), DbError> {
        let response = self
            .http
            .get(format!("{}/ping", self.base_url))
            .send()
            .map_err(|e| DbError::connection_failed(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(DbError::connection_failed(format!(
                "ping returned HTTP {}",
                response.status()
            )))
        }
    }

    fn close(&self) -> Result<(), DbError> {
        Ok(())
    }

    fn databases(&self) -> Result<Vec<String>, DbError> {
        let result = self.query(
            "SELECT name FROM system.databases WHERE name NOT IN ('system', 'INFORMATION_SCHEMA', 'information_schema') ORDER BY name",
            &[],
        )?;
        Ok(result.rows.into_iter().map(|mut r| r.remove(0)).collect())
    }

    fn storage_units(&self, scope: &str) -> Result<Vec<StorageUnit>, DbError> {
        let result = self.query(
            "SELECT name, engine, toString(total_rows), toString(total_bytes) \
             FROM system.tables WHERE database = {p1:String} ORDER BY name",
            &[Value::Text(scope.to_string())],
        )?;

        Ok(result
            .rows
            .into_iter()
            .map(|row| {
                StorageUnit::new(&row[0])
                    .with_attribute("Engine", &row[1])
                    .with_attribute("Count", &row[2])
                    .with_attribute("Total Size", &row[3])
            })
            .collect())
    }

    fn columns(&self, scope: &str, unit: &str) -> Result<Vec<Column>, DbError> {
        let result = self.query(
            "SELECT name, type, is_in_primary_key, default_expression \
             FROM system.columns WHERE database = {p1:String} AND table = {p2:String} \
             ORDER BY position",
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
                nullable: row[1].starts_with("Nullable("),
                default_value: if row[3].is_empty() {
                    None
                } else {
                    Some(row[3].clone())
                },
                is_primary: row[2] == "1",
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
        // MergeTree needs an ORDER BY; use the declared primary key, or
        // tuple() for keyless tables.
        let statement = dblens_sql::build_create_unit(&self.dialect, Some(scope), unit, fields)?;
        let order_by: Vec<String> = fields
            .iter()
            .filter(|f| f.primary)
            .map(|f| self.dialect.quote_identifier(&f.name))
            .collect();
        let order_clause = if order_by.is_empty() {
            "tuple()".to_string()
        } else {
            format!("({})", order_by.join(", "))
        };

        let sql = format!(
            "{} ENGINE = MergeTree() ORDER BY {}",
            statement.sql, order_clause
        );
        self.execute(&sql, &statement.params)?;
        Ok(())
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
        // Mutations use ALTER TABLE ... UPDATE; the standard UPDATE
        // statement does not exist in ClickHouse.
        let statement =
            dblens_sql::build_update(&self.dialect, Some(scope), unit, values, updated, &keys)?;
        let table = self.dialect.qualified_unit(Some(scope), unit);
        let rewritten = statement
            .sql
            .strip_prefix(&format!("UPDATE {table} SET "))
            .map(|rest| format!("ALTER TABLE {table} UPDATE {rest}"))
            .ok_or_else(|| DbError::driver("unexpected update statement shape"))?;
        self.execute(&rewritten, &statement.params)?;
        Ok(())
    }

    fn delete_row(&self, scope: &str, unit: &str, values: &[CellValue]) -> Result<(), DbError> {
        let keys = self.key_columns(scope, unit)?;
        dblens_sql::delete_row(self, Some(scope), unit, values, &keys)
    }

    fn clear_storage_unit(&self, scope: &str, unit: &str) -> Result<(), DbError> {
        let sql = format!(
            "TRUNCATE TABLE {}",
            self.dialect.qualified_unit(Some(scope), unit)
        );
        self.execute(&sql, &[])?;
        Ok(())
    }

    fn raw_query(&self, query: &str, cancel: &CancelToken) -> Result<RowSet, DbError> {
        dblens_sql::raw_query(self, query, cancel)
    }

    /// ClickHouse has no foreign keys; the graph is the unit list with no
    /// relationships.
    fn graph(&self, scope: &str) -> Result<Vec<GraphUnit>, DbError> {
        let units = self.storage_units(scope)?;
        Ok(units
            .into_iter()
            .map(|unit| GraphUnit {
                unit,
                relationships: Vec::<GraphRelationship>::new(),
            })
            .collect())
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

fn json_cell_to_string(cell: &serde_json::Value) -> String {
    match cell {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brace_placeholders_carry_types() {
        let d = ClickHouseDialect;
        assert_eq!(d.placeholder(1, &Value::Int(5)), "{p1:Int64}");
        assert_eq!(d.placeholder(2, &Value::Text("x".into())), "{p2:String}");
        assert_eq!(d.placeholder(3, &Value::Float(0.5)), "{p3:Float64}");
    }

    #[test]
    fn json_cells_render_unquoted_strings() {
        assert_eq!(json_cell_to_string(&serde_json::json!("abc")), "abc");
        assert_eq!(json_cell_to_string(&serde_json::json!(42)), "42");
        assert_eq!(json_cell_to_string(&serde_json::Value::Null), "");
        assert_eq!(
            json_cell_to_string(&serde_json::json!({"a": 1})),
            "{\"a\":1}"
        );
    }
}
