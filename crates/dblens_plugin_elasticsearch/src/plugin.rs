use crate::mapping::{es_field_type, flatten_mapping};
use crate::translate::translate_where;
use base64::Engine as _;
use dblens_core::{
    BackendKind, CancelToken, CellValue, Column, Connection, ConnectionProfile, DatabaseCategory,
    DatabasePlugin, DbError, ExportOptions, ExportSink, GraphRelationship, GraphUnit,
    PluginCapabilities, PluginMetadata, RowQuery, RowSet, SslStatus, StorageUnit, TlsSettings,
    UnitField, advanced_keys, escape_row, header_cell,
};
use reqwest::Method;
use serde_json::{Value as Json, json};
use std::sync::Arc;
use std::time::Duration;

static METADATA: PluginMetadata = PluginMetadata {
    display_name: "ElasticSearch",
    description: "Distributed search and analytics engine",
    category: DatabaseCategory::Search,
    capabilities: PluginCapabilities::CREATE_UNIT
        .union(PluginCapabilities::INSERT)
        .union(PluginCapabilities::UPDATE)
        .union(PluginCapabilities::DELETE)
        .union(PluginCapabilities::SSL)
        .union(PluginCapabilities::FILTERING)
        .union(PluginCapabilities::SORTING),
    operators: &[
        ("=", "term"),
        ("!=", "must_not_term"),
        ("<>", "must_not_term"),
        ("<", "range_lt"),
        ("<=", "range_lte"),
        (">", "range_gt"),
        (">=", "range_gte"),
        ("LIKE", "wildcard"),
        ("NOT LIKE", "must_not_wildcard"),
        ("contains", "wildcard"),
        ("match", "match"),
        ("IN", "terms"),
        ("NOT IN", "must_not_terms"),
        ("exists", "exists"),
        ("not exists", "must_not_exists"),
        ("IS NULL", "must_not_exists"),
        ("IS NOT NULL", "exists"),
    ],
};

const SCROLL_KEEPALIVE: &str = "5m";
const SCROLL_BATCH: u64 = 1_000;

pub struct ElasticSearchPlugin;

impl ElasticSearchPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ElasticSearchPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabasePlugin for ElasticSearchPlugin {
    fn kind(&self) -> BackendKind {
        BackendKind::ElasticSearch
    }

    fn metadata(&self) -> &'static PluginMetadata {
        &METADATA
    }

    fn connect(
        &self,
        profile: &ConnectionProfile,
        _database: Option<&str>,
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

        let auth_header = if credentials.username.is_empty() {
            None
        } else {
            let raw = format!("{}:{}", credentials.username, credentials.password);
            Some(format!(
                "Basic {}",
                base64::engine::general_purpose::STANDARD.encode(raw)
            ))
        };

        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .danger_accept_invalid_certs(
                tls.mode.is_enabled() && !tls.mode.verifies_certificate(),
            )
            .build()
            .map_err(|e| DbError::connection_failed(e.to_string()))?;

        log::info!("connecting to ElasticSearch at {base_url}");

        Ok(Arc::new(ElasticSearchConnection {
            http,
            base_url,
            auth_header,
            ssl: tls.status(),
        }))
    }
}

pub struct ElasticSearchConnection {
    http: reqwest::blocking::Client,
    base_url: String,
    auth_header: Option<String>,
    ssl: SslStatus,
}

impl ElasticSearchConnection {
    fn request(&self, method: Method, path: &str, body: Option<&Json>) -> Result<Json, DbError> {
        let mut builder = self.http.request(method, format!("{}{path}", self.base_url));
        if let Some(auth) = &self.auth_header {
            builder = builder.header("Authorization", auth);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .map_err(|e| DbError::connection_failed(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .map_err(|e| DbError::driver(e.to_string()))?;

        if status.as_u16() == 404 {
            return Err(DbError::not_found(text));
        }
        if !status.is_success() {
            return Err(DbError::driver(format!("HTTP {status}: {text}")));
        }

        if text.is_empty() {
            Ok(Json::Null)
        } else {
            serde_json::from_str(&text)
                .map_err(|e| DbError::driver(format!("malformed response: {e}")))
        }
    }

    /// Merge `_id` into the source and render the whole document as one
    /// JSON cell.
    fn hit_to_row(hit: &Json) -> Vec<String> {
        let mut doc = hit["_source"].clone();
        if let Some(obj) = doc.as_object_mut()
            && let Some(id) = hit["_id"].as_str()
        {
            obj.insert("_id".to_string(), json!(id));
        }
        vec![doc.to_string()]
    }

    fn document_from_cells(cells: &[CellValue]) -> Result<Json, DbError> {
        // A single "document" cell carries the whole document; otherwise
        // each cell becomes one field, parsed as JSON where possible.
        if cells.len() == 1 && cells[0].column == "document" {
            return serde_json::from_str(&cells[0].value)
                .map_err(|e| DbError::invalid_argument(format!("invalid document JSON: {e}")));
        }

        let mut doc = serde_json::Map::new();
        for cell in cells {
            let value = serde_json::from_str(&cell.value)
                .unwrap_or_else(|_| Json::String(cell.value.clone()));
            doc.insert(cell.column.clone(), value);
        }
        Ok(Json::Object(doc))
    }

    /// `_id` is required for targeted writes; it is part of the submitted
    /// document, not a separate argument.
    fn take_id(doc: &mut Json) -> Result<String, DbError> {
        let id = doc
            .as_object_mut()
            .and_then(|obj| obj.remove("_id"))
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| DbError::missing_key("document is missing '_id'"))?;
        if id.is_empty() {
            return Err(DbError::missing_key("document '_id' is empty"));
        }
        Ok(id)
    }

    fn clear_scroll(&self, scroll_id: &str) {
        let body = json!({ "scroll_id": scroll_id });
        if let Err(e) = self.request(Method::DELETE, "/_search/scroll", Some(&body)) {
            log::warn!("failed to clear scroll: {e}");
        }
    }

    fn mapped_columns(&self, unit: &str) -> Result<Vec<(String, String)>, DbError> {
        let response = self.request(
            Method::GET,
            &format!("/{}/_mapping", urlencoding::encode(unit)),
            None,
        )?;
        let properties = &response[unit]["mappings"]["properties"];
        Ok(flatten_mapping(properties))
    }
}

impl Connection for ElasticSearchConnection {
    fn kind(&self) -> BackendKind {
        BackendKind::ElasticSearch
    }

    fn metadata(&self) -> &'static PluginMetadata {
        &METADATA
    }

    fn ping(&self) -> Result<(), DbError> {
        self.request(Method::GET, "/", None).map(|_| ())
    }

    fn close(&self) -> Result<(), DbError> {
        Ok(())
    }

    /// One unit per index, with doc count and size attributes from
    /// `_stats`. Internal dot-prefixed indices are skipped.
    fn storage_units(&self, _scope: &str) -> Result<Vec<StorageUnit>, DbError> {
        let stats = self.request(Method::GET, "/_stats", None)?;
        let Some(indices) = stats["indices"].as_object() else {
            return Ok(Vec::new());
        };

        let mut units: Vec<StorageUnit> = indices
            .iter()
            .filter(|(name, _)| !name.starts_with('.'))
            .map(|(name, stats)| {
                let count = stats["primaries"]["docs"]["count"].as_u64().unwrap_or(0);
                let size = stats["primaries"]["store"]["size_in_bytes"]
                    .as_u64()
                    .unwrap_or(0);
                StorageUnit::new(name)
                    .with_attribute("Count", count.to_string())
                    .with_attribute("Size in Bytes", size.to_string())
            })
            .collect();
        units.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(units)
    }

    fn columns(&self, _scope: &str, _unit: &str) -> Result<Vec<Column>, DbError> {
        Ok(vec![Column::new("document", "Document")])
    }

    fn rows(
        &self,
        _scope: &str,
        unit: &str,
        query: &RowQuery,
        cancel: &CancelToken,
    ) -> Result<RowSet, DbError> {
        cancel.check()?;
        let size = query.effective_page_size()?;

        let dsl = match &query.where_condition {
            Some(condition) => json!({ "bool": { "must": [translate_where(condition)?] } }),
            None => json!({ "match_all": {} }),
        };

        let sort: Vec<Json> = query
            .sort
            .iter()
            .map(|s| {
                json!({ s.column.clone(): { "order": match s.direction {
                    dblens_core::SortDirection::Asc => "asc",
                    dblens_core::SortDirection::Desc => "desc",
                } } })
            })
            .collect();

        let mut body = json!({
            "from": query.page_offset,
            "size": size,
            "query": dsl,
        });
        if !sort.is_empty() {
            body["sort"] = Json::Array(sort);
        }

        let response = self.request(
            Method::POST,
            &format!("/{}/_search", urlencoding::encode(unit)),
            Some(&body),
        )?;

        let rows: Vec<Vec<String>> = response["hits"]["hits"]
            .as_array()
            .map(|hits| hits.iter().map(Self::hit_to_row).collect())
            .unwrap_or_default();

        Ok(RowSet {
            columns: vec![Column::new("document", "Document")],
            rows,
            disable_update: false,
        })
    }

    fn add_storage_unit(
        &self,
        _scope: &str,
        unit: &str,
        fields: &[UnitField],
    ) -> Result<(), DbError> {
        let body = if fields.is_empty() {
            json!({})
        } else {
            let mut properties = serde_json::Map::new();
            for field in fields {
                properties.insert(
                    field.name.clone(),
                    json!({ "type": es_field_type(&field.type_name) }),
                );
            }
            json!({ "mappings": { "properties": properties } })
        };

        self.request(
            Method::PUT,
            &format!("/{}", urlencoding::encode(unit)),
            Some(&body),
        )?;
        Ok(())
    }

    fn add_row(&self, _scope: &str, unit: &str, cells: &[CellValue]) -> Result<(), DbError> {
        let mut doc = Self::document_from_cells(cells)?;

        // An explicit _id makes the write idempotent; otherwise the
        // server assigns one.
        let path = match Self::take_id(&mut doc) {
            Ok(id) => format!(
                "/{}/_doc/{}?refresh=true",
                urlencoding::encode(unit),
                urlencoding::encode(&id)
            ),
            Err(_) => format!("/{}/_doc?refresh=true", urlencoding::encode(unit)),
        };

        let method = if path.contains("/_doc/") {
            Method::PUT
        } else {
            Method::POST
        };
        self.request(method, &path, Some(&doc))?;
        Ok(())
    }

    /// Replace the stored source with the submitted field set; keys absent
    /// from the new set are removed. Falls back to an upsert when the
    /// document does not exist.
    fn update_row(
        &self,
        _scope: &str,
        unit: &str,
        values: &[CellValue],
        _updated: &[String],
    ) -> Result<(), DbError> {
        let mut doc = Self::document_from_cells(values)?;
        let id = Self::take_id(&mut doc)?;

        let body = json!({
            "script": {
                "source": "ctx._source = params.doc",
                "lang": "painless",
                "params": { "doc": doc }
            },
            "upsert": doc
        });

        self.request(
            Method::POST,
            &format!(
                "/{}/_update/{}?refresh=true",
                urlencoding::encode(unit),
                urlencoding::encode(&id)
            ),
            Some(&body),
        )?;
        Ok(())
    }

    fn delete_row(&self, _scope: &str, unit: &str, values: &[CellValue]) -> Result<(), DbError> {
        let mut doc = Self::document_from_cells(values)?;
        let id = Self::take_id(&mut doc)?;

        self.request(
            Method::DELETE,
            &format!(
                "/{}/_doc/{}?refresh=true",
                urlencoding::encode(unit),
                urlencoding::encode(&id)
            ),
            None,
        )?;
        Ok(())
    }

    fn clear_storage_unit(&self, _scope: &str, unit: &str) -> Result<(), DbError> {
        let body = json!({ "query": { "match_all": {} } });
        self.request(
            Method::POST,
            &format!(
                "/{}/_delete_by_query?refresh=true",
                urlencoding::encode(unit)
            ),
            Some(&body),
        )?;
        Ok(())
    }

    /// Indices have no catalog-level relationships.
    fn graph(&self, scope: &str) -> Result<Vec<GraphUnit>, DbError> {
        Ok(self
            .storage_units(scope)?
            .into_iter()
            .map(|unit| GraphUnit {
                unit,
                relationships: Vec::<GraphRelationship>::new(),
            })
            .collect())
    }

    /// Scroll-based export. The column set comes from the index mapping,
    /// nested properties flattened with dot notation, `_id` first.
    fn export_rows(
        &self,
        _scope: &str,
        unit: &str,
        options: &ExportOptions,
        sink: &mut dyn ExportSink,
        cancel: &CancelToken,
    ) -> Result<u64, DbError> {
        if options.selected_rows.is_some() {
            return Err(DbError::unsupported(
                "selected-row export requires a primary key",
            ));
        }

        let fields = self.mapped_columns(unit)?;

        let mut header = vec![header_cell("_id", "keyword", options.include_types_in_header)];
        header.extend(
            fields
                .iter()
                .map(|(name, ty)| header_cell(name, ty, options.include_types_in_header)),
        );
        sink.write_row(&header)?;

        let body = json!({
            "size": SCROLL_BATCH,
            "query": { "match_all": {} },
        });
        let mut response = self.request(
            Method::POST,
            &format!(
                "/{}/_search?scroll={SCROLL_KEEPALIVE}",
                urlencoding::encode(unit)
            ),
            Some(&body),
        )?;

        let mut written = 0u64;

        loop {
            let scroll_id = response["_scroll_id"].as_str().unwrap_or_default().to_string();
            let hits = response["hits"]["hits"].as_array().cloned().unwrap_or_default();
            if hits.is_empty() {
                if !scroll_id.is_empty() {
                    self.clear_scroll(&scroll_id);
                }
                break;
            }

            for hit in &hits {
                if cancel.is_cancelled() {
                    self.clear_scroll(&scroll_id);
                    return Err(DbError::Cancelled);
                }

                let mut row =
                    vec![hit["_id"].as_str().unwrap_or_default().to_string()];
                for (path, _) in &fields {
                    row.push(extract_path(&hit["_source"], path));
                }

                if let Err(e) = sink.write_row(&escape_row(&row)) {
                    self.clear_scroll(&scroll_id);
                    return Err(e);
                }
                written += 1;
            }

            let next = json!({ "scroll": SCROLL_KEEPALIVE, "scroll_id": scroll_id });
            response = match self.request(Method::POST, "/_search/scroll", Some(&next)) {
                Ok(r) => r,
                Err(e) => {
                    self.clear_scroll(&scroll_id);
                    return Err(e);
                }
            };
        }

        log::debug!("exported {written} document(s) from index {unit}");
        Ok(written)
    }

    fn ssl_status(&self) -> Result<SslStatus, DbError> {
        Ok(self.ssl)
    }
}

/// Resolve a dotted path inside a source document, rendering scalars
/// bare and composites as JSON.
fn extract_path(source: &Json, path: &str) -> String {
    let mut current = source;
    for segment in path.split('.') {
        current = &current[segment];
    }
    match current {
        Json::Null => String::new(),
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rows_merge_id_into_document() {
        let hit = json!({
            "_id": "u1",
            "_source": { "name": "Alice", "age": 30 }
        });
        let row = ElasticSearchConnection::hit_to_row(&hit);
        assert_eq!(row.len(), 1);

        let doc: Json = serde_json::from_str(&row[0]).unwrap();
        assert_eq!(doc["_id"], json!("u1"));
        assert_eq!(doc["name"], json!("Alice"));
        assert_eq!(doc["age"], json!(30));
    }

    #[test]
    fn document_from_cells_parses_json_fields() {
        let cells = vec![
            CellValue::new("name", "Alice"),
            CellValue::new("age", "30"),
            CellValue::new("tags", "[\"a\",\"b\"]"),
        ];
        let doc = ElasticSearchConnection::document_from_cells(&cells).unwrap();
        assert_eq!(doc["name"], json!("Alice"));
        assert_eq!(doc["age"], json!(30));
        assert_eq!(doc["tags"], json!(["a", "b"]));
    }

    #[test]
    fn single_document_cell_is_the_document() {
        let cells = vec![CellValue::new("document", r#"{"_id":"x","v":1}"#)];
        let mut doc = ElasticSearchConnection::document_from_cells(&cells).unwrap();
        let id = ElasticSearchConnection::take_id(&mut doc).unwrap();
        assert_eq!(id, "x");
        assert_eq!(doc, json!({"v": 1}));
    }

    #[test]
    fn missing_id_is_missing_key() {
        let mut doc = json!({"v": 1});
        assert!(matches!(
            ElasticSearchConnection::take_id(&mut doc),
            Err(DbError::MissingKey(_))
        ));
    }

    #[test]
    fn extract_path_walks_nested_objects() {
        let source = json!({ "a": { "b": { "c": "deep" } }, "n": 5 });
        assert_eq!(extract_path(&source, "a.b.c"), "deep");
        assert_eq!(extract_path(&source, "n"), "5");
        assert_eq!(extract_path(&source, "missing"), "");
        assert_eq!(extract_path(&source, "a.b"), "{\"c\":\"deep\"}");
    }
}
