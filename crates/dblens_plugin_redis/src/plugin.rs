use dblens_core::{
    BackendKind, CancelToken, CellValue, Column, Connection, ConnectionProfile, DatabaseCategory,
    DatabasePlugin, DbError, ExportOptions, ExportSink, PluginCapabilities, PluginMetadata,
    RowQuery, RowSet, SslStatus, StorageUnit, TlsSettings, UnitField, WhereCondition,
    advanced_keys, escape_row, header_cell,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

static METADATA: PluginMetadata = PluginMetadata {
    display_name: "Redis",
    description: "In-memory key-value data store",
    category: DatabaseCategory::KeyValue,
    capabilities: PluginCapabilities::DATABASES
        .union(PluginCapabilities::INSERT)
        .union(PluginCapabilities::UPDATE)
        .union(PluginCapabilities::DELETE)
        .union(PluginCapabilities::SSL)
        .union(PluginCapabilities::FILTERING),
    operators: &[("=", "eq"), ("LIKE", "match")],
};

/// Key types a keyspace is grouped by.
const KEY_TYPES: &[&str] = &["string", "list", "hash", "set", "zset", "stream"];

/// Keys with a value longer than this get a truncated preview in row
/// listings; exports always materialise the full value.
const PREVIEW_LIMIT: usize = 256;

pub struct RedisPlugin;

impl RedisPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RedisPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabasePlugin for RedisPlugin {
    fn kind(&self) -> BackendKind {
        BackendKind::Redis
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

        let use_tls = tls.mode.is_enabled()
            || credentials
                .advanced_option(advanced_keys::TLS)
                .is_some_and(|v| v.eq_ignore_ascii_case("true"));
        let scheme = if use_tls { "rediss" } else { "redis" };

        let auth = if credentials.password.is_empty() {
            String::new()
        } else {
            let user = if credentials.username.is_empty() {
                "default"
            } else {
                credentials.username.as_str()
            };
            format!(
                "{}:{}@",
                urlencoding::encode(user),
                urlencoding::encode(&credentials.password)
            )
        };

        let db_index = database
            .map(str::to_string)
            .or_else(|| {
                if credentials.database.is_empty() {
                    None
                } else {
                    Some(credentials.database.clone())
                }
            })
            .unwrap_or_else(|| "0".to_string());

        let url = format!(
            "{scheme}://{auth}{}:{}/{db_index}",
            credentials.host,
            credentials.effective_port()
        );

        log::info!(
            "connecting to Redis at {}:{} (db {db_index}, tls: {use_tls})",
            credentials.host,
            credentials.effective_port()
        );

        let client = redis::Client::open(url.as_str())
            .map_err(|e| DbError::connection_failed(e.to_string()))?;
        let conn = client
            .get_connection()
            .map_err(|e| DbError::connection_failed(e.to_string()))?;

        Ok(Arc::new(RedisConnection {
            conn: Mutex::new(conn),
            ssl: tls.status(),
        }))
    }
}

pub struct RedisConnection {
    conn: Mutex<redis::Connection>,
    ssl: SslStatus,
}

impl RedisConnection {
    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut redis::Connection) -> redis::RedisResult<T>,
    ) -> Result<T, DbError> {
        let mut conn = self.conn.lock().expect("redis lock poisoned");
        f(&mut conn).map_err(to_db_error)
    }

    fn select(&self, scope: &str) -> Result<(), DbError> {
        if scope.is_empty() {
            return Ok(());
        }
        let index: u32 = scope
            .parse()
            .map_err(|_| DbError::invalid_argument(format!("'{scope}' is not a keyspace index")))?;
        self.with_conn(|conn| redis::cmd("SELECT").arg(index).query::<()>(conn))
    }

    /// Cursor-driven SCAN over the whole keyspace.
    fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, DbError> {
        let mut keys = Vec::new();
        let mut cursor = 0u64;
        loop {
            let (next, batch): (u64, Vec<String>) = self.with_conn(|conn| {
                redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(pattern)
                    .arg("COUNT")
                    .arg(500)
                    .query(conn)
            })?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        Ok(keys)
    }

    fn key_type(&self, key: &str) -> Result<String, DbError> {
        self.with_conn(|conn| redis::cmd("TYPE").arg(key).query(conn))
    }

    /// Materialise a typed read of one key, JSON-encoding composites.
    fn read_value(&self, key: &str, key_type: &str) -> Result<String, DbError> {
        match key_type {
            "string" => self.with_conn(|conn| redis::cmd("GET").arg(key).query(conn)),
            "list" => {
                let items: Vec<String> = self.with_conn(|conn| {
                    redis::cmd("LRANGE").arg(key).arg(0).arg(-1).query(conn)
                })?;
                Ok(serde_json::to_string(&items).unwrap_or_default())
            }
            "hash" => {
                let pairs: BTreeMap<String, String> =
                    self.with_conn(|conn| redis::cmd("HGETALL").arg(key).query(conn))?;
                Ok(serde_json::to_string(&pairs).unwrap_or_default())
            }
            "set" => {
                let mut members: Vec<String> =
                    self.with_conn(|conn| redis::cmd("SMEMBERS").arg(key).query(conn))?;
                members.sort();
                Ok(serde_json::to_string(&members).unwrap_or_default())
            }
            "zset" => {
                let entries: Vec<(String, f64)> = self.with_conn(|conn| {
                    redis::cmd("ZRANGE")
                        .arg(key)
                        .arg(0)
                        .arg(-1)
                        .arg("WITHSCORES")
                        .query(conn)
                })?;
                Ok(serde_json::to_string(&entries).unwrap_or_default())
            }
            "stream" => {
                let length: u64 =
                    self.with_conn(|conn| redis::cmd("XLEN").arg(key).query(conn))?;
                Ok(format!("{{\"entries\":{length}}}"))
            }
            other => Err(DbError::unsupported(format!("key type '{other}'"))),
        }
    }

    /// The only filters a keyspace understands are on the key name:
    /// `=` for an exact key and `LIKE` translated to a SCAN glob.
    fn key_pattern(where_condition: Option<&WhereCondition>) -> Result<String, DbError> {
        let Some(condition) = where_condition else {
            return Ok("*".to_string());
        };
        condition.validate()?;

        match condition {
            WhereCondition::Atomic {
                key,
                operator,
                value,
                ..
            } if key == "key" => match operator.trim().to_uppercase().as_str() {
                "=" => Ok(value
                    .replace('\\', "\\\\")
                    .replace('*', "\\*")
                    .replace('?', "\\?")
                    .replace('[', "\\[")),
                "LIKE" => Ok(value.replace('%', "*").replace('_', "?")),
                other => Err(DbError::InvalidOperator(other.to_string())),
            },
            WhereCondition::Atomic { key, .. } => Err(DbError::invalid_argument(format!(
                "Redis filters apply to 'key', not '{key}'"
            ))),
            _ => Err(DbError::invalid_argument(
                "Redis does not support compound filters",
            )),
        }
    }

    fn keys_of_type(&self, pattern: &str, unit: &str) -> Result<Vec<String>, DbError> {
        if !KEY_TYPES.contains(&unit) {
            return Err(DbError::not_found(format!("key type group '{unit}'")));
        }
        let keys = self.scan_keys(pattern)?;
        let mut matching = Vec::new();
        for key in keys {
            if self.key_type(&key)? == unit {
                matching.push(key);
            }
        }
        Ok(matching)
    }

    fn cell<'a>(cells: &'a [CellValue], name: &str) -> Result<&'a str, DbError> {
        cells
            .iter()
            .find(|c| c.column == name)
            .map(|c| c.value.as_str())
            .ok_or_else(|| DbError::missing_key(format!("'{name}' cell is required")))
    }
}

impl Connection for RedisConnection {
    fn kind(&self) -> BackendKind {
        BackendKind::Redis
    }

    fn metadata(&self) -> &'static PluginMetadata {
        &METADATA
    }

    fn ping(&self) -> Result<(), DbError> {
        let pong: String = self.with_conn(|conn| redis::cmd("PING").query(conn))?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(DbError::connection_failed(format!(
                "unexpected PING reply: {pong}"
            )))
        }
    }

    fn close(&self) -> Result<(), DbError> {
        Ok(())
    }

    /// Numeric keyspaces, per the server's `databases` config (16 when
    /// the server refuses CONFIG).
    fn databases(&self) -> Result<Vec<String>, DbError> {
        let count = self
            .with_conn(|conn| {
                redis::cmd("CONFIG")
                    .arg("GET")
                    .arg("databases")
                    .query::<Vec<String>>(conn)
            })
            .ok()
            .and_then(|reply| reply.get(1).and_then(|v| v.parse::<u32>().ok()))
            .unwrap_or(16);

        Ok((0..count).map(|i| i.to_string()).collect())
    }

    /// Storage units are key-type groups within the selected keyspace.
    fn storage_units(&self, scope: &str) -> Result<Vec<StorageUnit>, DbError> {
        self.select(scope)?;
        let keys = self.scan_keys("*")?;

        let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
        for key in &keys {
            let key_type = self.key_type(key)?;
            if let Some(entry) = KEY_TYPES.iter().find(|t| **t == key_type) {
                *counts.entry(entry).or_insert(0) += 1;
            }
        }

        Ok(KEY_TYPES
            .iter()
            .map(|t| {
                StorageUnit::new(*t)
                    .with_attribute("Count", counts.get(t).copied().unwrap_or(0).to_string())
            })
            .collect())
    }

    fn columns(&self, _scope: &str, _unit: &str) -> Result<Vec<Column>, DbError> {
        Ok(vec![
            Column::new("key", "string").primary(),
            Column::new("type", "string"),
            Column::new("value", "string"),
        ])
    }

    fn rows(
        &self,
        scope: &str,
        unit: &str,
        query: &RowQuery,
        cancel: &CancelToken,
    ) -> Result<RowSet, DbError> {
        cancel.check()?;
        let page_size = query.effective_page_size()? as usize;
        self.select(scope)?;

        let pattern = Self::key_pattern(query.where_condition.as_ref())?;
        let keys = self.keys_of_type(&pattern, unit)?;

        let mut rows = Vec::new();
        for key in keys
            .into_iter()
            .skip(query.page_offset as usize)
            .take(page_size)
        {
            cancel.check()?;
            let mut value = self.read_value(&key, unit)?;
            if value.len() > PREVIEW_LIMIT {
                let cut = value
                    .char_indices()
                    .take_while(|(i, _)| *i <= PREVIEW_LIMIT)
                    .last()
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                value.truncate(cut);
                value.push_str("...");
            }
            rows.push(vec![key, unit.to_string(), value]);
        }

        Ok(RowSet {
            columns: self.columns(scope, unit)?,
            // Scans over non-string types cannot be written back as rows.
            disable_update: unit != "string",
            rows,
        })
    }

    fn add_row(&self, scope: &str, unit: &str, cells: &[CellValue]) -> Result<(), DbError> {
        if unit != "string" {
            return Err(DbError::unsupported(format!(
                "only string keys can be written as rows, not '{unit}'"
            )));
        }
        self.select(scope)?;
        let key = Self::cell(cells, "key")?;
        let value = Self::cell(cells, "value")?;
        self.with_conn(|conn| redis::cmd("SET").arg(key).arg(value).query::<()>(conn))
    }

    fn update_row(
        &self,
        scope: &str,
        unit: &str,
        values: &[CellValue],
        _updated: &[String],
    ) -> Result<(), DbError> {
        self.add_row(scope, unit, values)
    }

    fn delete_row(&self, scope: &str, _unit: &str, values: &[CellValue]) -> Result<(), DbError> {
        self.select(scope)?;
        let key = Self::cell(values, "key")?;
        let removed: u64 = self.with_conn(|conn| redis::cmd("DEL").arg(key).query(conn))?;
        if removed == 0 {
            return Err(DbError::not_found(format!("key '{key}'")));
        }
        Ok(())
    }

    fn clear_storage_unit(&self, scope: &str, unit: &str) -> Result<(), DbError> {
        self.select(scope)?;
        let keys = self.keys_of_type("*", unit)?;
        for key in keys {
            let _: u64 = self.with_conn(|conn| redis::cmd("DEL").arg(&key).query(conn))?;
        }
        Ok(())
    }

    fn export_rows(
        &self,
        scope: &str,
        unit: &str,
        options: &ExportOptions,
        sink: &mut dyn ExportSink,
        cancel: &CancelToken,
    ) -> Result<u64, DbError> {
        self.select(scope)?;

        let selected: Option<Vec<String>> = options.selected_rows.as_ref().map(|rows| {
            rows.iter()
                .filter_map(|tuple| tuple.first().cloned())
                .collect()
        });

        sink.write_row(&[
            header_cell("key", "string", options.include_types_in_header),
            header_cell("type", "string", options.include_types_in_header),
            header_cell("value", "string", options.include_types_in_header),
        ])?;

        let keys = self.keys_of_type("*", unit)?;
        let mut written = 0u64;
        for key in keys {
            cancel.check()?;

            if let Some(selected) = &selected
                && !selected.contains(&key)
            {
                continue;
            }

            let value = self.read_value(&key, unit)?;
            sink.write_row(&escape_row(&[key, unit.to_string(), value]))?;
            written += 1;
        }

        log::debug!("exported {written} key(s) of type {unit}");
        Ok(written)
    }

    fn ssl_status(&self) -> Result<SslStatus, DbError> {
        Ok(self.ssl)
    }

    fn add_storage_unit(
        &self,
        _scope: &str,
        _unit: &str,
        _fields: &[UnitField],
    ) -> Result<(), DbError> {
        Err(DbError::unsupported(
            "Redis key-type groups exist implicitly; create keys instead",
        ))
    }
}

fn to_db_error(e: redis::RedisError) -> DbError {
    if e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout() {
        DbError::connection_failed(e.to_string())
    } else {
        DbError::driver(e.to_string())
    }
}
