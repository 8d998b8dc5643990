use crate::translate::translate_where;
use bson::oid::ObjectId;
use bson::{Bson, Document, doc};
use dblens_core::{
    BackendKind, CancelToken, CellValue, Column, Connection, ConnectionProfile, DatabaseCategory,
    DatabasePlugin, DbError, ExportOptions, ExportSink, GraphRelationship, GraphUnit,
    PluginCapabilities, PluginMetadata, RelationshipKind, RowQuery, RowSet, SslStatus,
    StorageUnit, TlsSettings, UnitField, advanced_keys, escape_row, header_cell,
};
use mongodb::sync::Client;
use std::collections::HashSet;
use std::sync::Arc;

static METADATA: PluginMetadata = PluginMetadata {
    display_name: "MongoDB",
    description: "Document database for modern applications",
    category: DatabaseCategory::Document,
    capabilities: PluginCapabilities::DATABASES
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
        ("<=", "lte"),
        (">", "gt"),
        (">=", "gte"),
        ("LIKE", "regex"),
        ("NOT LIKE", "not_regex"),
        ("IN", "in"),
        ("NOT IN", "nin"),
        ("IS NULL", "null"),
        ("IS NOT NULL", "not_null"),
    ],
};

/// Documents sampled per collection for graph discovery.
const GRAPH_SAMPLE_SIZE: i64 = 50;

pub struct MongoPlugin;

impl MongoPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MongoPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabasePlugin for MongoPlugin {
    fn kind(&self) -> BackendKind {
        BackendKind::MongoDb
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

        let auth = if credentials.username.is_empty() {
            String::new()
        } else {
            format!(
                "{}:{}@",
                urlencoding::encode(&credentials.username),
                urlencoding::encode(&credentials.password)
            )
        };

        let mut params: Vec<String> = Vec::new();
        if !credentials.username.is_empty() {
            params.push("authSource=admin".to_string());
        }
        if tls.mode.is_enabled()
            || credentials
                .advanced_option(advanced_keys::TLS)
                .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        {
            params.push("tls=true".to_string());
            if !tls.mode.verifies_certificate() {
                params.push("tlsAllowInvalidCertificates=true".to_string());
            }
        }
        if let Some(extra) = credentials.advanced_option(advanced_keys::URL_PARAMS) {
            params.push(extra.trim_start_matches(['?', '&']).to_string());
        }

        let query = if params.is_empty() {
            String::new()
        } else {
            format!("?{}", params.join("&"))
        };
        let uri = format!(
            "mongodb://{auth}{}:{}/{query}",
            credentials.host,
            credentials.effective_port()
        );

        log::info!(
            "connecting to MongoDB at {}:{}",
            credentials.host,
            credentials.effective_port()
        );

        let client =
            Client::with_uri_str(&uri).map_err(|e| DbError::connection_failed(e.to_string()))?;

        let default_database = database
            .map(str::to_string)
            .unwrap_or_else(|| credentials.database.clone());

        Ok(Arc::new(MongoConnection {
            client,
            default_database,
            ssl: tls.status(),
        }))
    }
}

pub struct MongoConnection {
    client: Client,
    default_database: String,
    ssl: SslStatus,
}

impl MongoConnection {
    fn database(&self, scope: &str) -> mongodb::sync::Database {
        let name = if scope.is_empty() {
            self.default_database.as_str()
        } else {
            scope
        };
        self.client.database(name)
    }

    fn collection(&self, scope: &str, unit: &str) -> mongodb::sync::Collection<Document> {
        self.database(scope).collection::<Document>(unit)
    }

    fn document_from_cells(cells: &[CellValue]) -> Result<Document, DbError> {
        if cells.len() == 1 && cells[0].column == "document" {
            let value: serde_json::Value = serde_json::from_str(&cells[0].value)
                .map_err(|e| DbError::invalid_argument(format!("invalid document JSON: {e}")))?;
            return bson::to_document(&value)
                .map_err(|e| DbError::invalid_argument(format!("invalid document: {e}")));
        }

        let mut doc = Document::new();
        for cell in cells {
            let bson = match serde_json::from_str::<serde_json::Value>(&cell.value) {
                Ok(json) => Bson::try_from(json)
                    .map_err(|e| DbError::invalid_argument(format!("invalid value: {e}")))?,
                Err(_) => Bson::String(cell.value.clone()),
            };
            doc.insert(cell.column.clone(), bson);
        }
        Ok(doc)
    }

    /// Pull `_id` out of the document and build the lookup filter. Hex
    /// strings resolve to ObjectIds, anything else matches as-is.
    fn id_filter(doc: &mut Document) -> Result<Document, DbError> {
        let id = doc
            .remove("_id")
            .ok_or_else(|| DbError::missing_key("document is missing '_id'"))?;

        let id = match &id {
            Bson::String(raw) => match ObjectId::parse_str(raw) {
                Ok(oid) => Bson::ObjectId(oid),
                Err(_) => id,
            },
            _ => id,
        };
        Ok(doc! { "_id": id })
    }

    fn doc_to_cell(doc: &Document) -> String {
        Bson::Document(doc.clone()).into_relaxed_extjson().to_string()
    }
}

impl Connection for MongoConnection {
    fn kind(&self) -> BackendKind {
        BackendKind::MongoDb
    }

    fn metadata(&self) -> &'static PluginMetadata {
        &METADATA
    }

    fn ping(&self) -> Result<(), DbError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .run()
            .map_err(|e| DbError::connection_failed(e.to_string()))?;
        Ok(())
    }

    fn close(&self) -> Result<(), DbError> {
        Ok(())
    }

    fn databases(&self) -> Result<Vec<String>, DbError> {
        let mut names = self
            .client
            .list_database_names()
            .run()
            .map_err(to_db_error)?;
        names.retain(|n| n != "admin" && n != "config" && n != "local");
        names.sort();
        Ok(names)
    }

    fn storage_units(&self, scope: &str) -> Result<Vec<StorageUnit>, DbError> {
        let db = self.database(scope);
        let mut names = db.list_collection_names().run().map_err(to_db_error)?;
        names.sort();

        names
            .into_iter()
            .map(|name| {
                let count = db
                    .collection::<Document>(&name)
                    .estimated_document_count()
                    .run()
                    .unwrap_or(0);
                Ok(StorageUnit::new(name).with_attribute("Count", count.to_string()))
            })
            .collect()
    }

    fn columns(&self, _scope: &str, _unit: &str) -> Result<Vec<Column>, DbError> {
        Ok(vec![Column::new("document", "Document")])
    }

    fn rows(
        &self,
        scope: &str,
        unit: &str,
        query: &RowQuery,
        cancel: &CancelToken,
    ) -> Result<RowSet, DbError> {
        cancel.check()?;
        let limit = query.effective_page_size()?;

        let filter = match &query.where_condition {
            Some(condition) => translate_where(condition)?,
            None => Document::new(),
        };

        let collection = self.collection(scope, unit);
        let mut find = collection
            .find(filter)
            .skip(query.page_offset)
            .limit(limit as i64);

        if !query.sort.is_empty() {
            let mut sort = Document::new();
            for s in &query.sort {
                sort.insert(
                    s.column.clone(),
                    match s.direction {
                        dblens_core::SortDirection::Asc => 1,
                        dblens_core::SortDirection::Desc => -1,
                    },
                );
            }
            find = find.sort(sort);
        }

        let cursor = find.run().map_err(to_db_error)?;
        let mut rows = Vec::new();
        for doc in cursor {
            cancel.check()?;
            let doc = doc.map_err(to_db_error)?;
            rows.push(vec![Self::doc_to_cell(&doc)]);
        }

        Ok(RowSet {
            columns: vec![Column::new("document", "Document")],
            rows,
            disable_update: false,
        })
    }

    fn add_storage_unit(
        &self,
        scope: &str,
        unit: &str,
        _fields: &[UnitField],
    ) -> Result<(), DbError> {
        self.database(scope)
            .create_collection(unit)
            .run()
            .map_err(to_db_error)
    }

    fn add_row(&self, scope: &str, unit: &str, cells: &[CellValue]) -> Result<(), DbError> {
        let doc = Self::document_from_cells(cells)?;
        self.collection(scope, unit)
            .insert_one(doc)
            .run()
            .map_err(to_db_error)?;
        Ok(())
    }

    /// Replace the document identified by `_id` with the submitted field
    /// set; fields absent from the new set are removed.
    fn update_row(
        &self,
        scope: &str,
        unit: &str,
        values: &[CellValue],
        _updated: &[String],
    ) -> Result<(), DbError> {
        let mut doc = Self::document_from_cells(values)?;
        let filter = Self::id_filter(&mut doc)?;

        let result = self
            .collection(scope, unit)
            .replace_one(filter, doc)
            .run()
            .map_err(to_db_error)?;
        if result.matched_count == 0 {
            return Err(DbError::not_found("no document with the given '_id'"));
        }
        Ok(())
    }

    fn delete_row(&self, scope: &str, unit: &str, values: &[CellValue]) -> Result<(), DbError> {
        let mut doc = Self::document_from_cells(values)?;
        let filter = Self::id_filter(&mut doc)?;

        let result = self
            .collection(scope, unit)
            .delete_one(filter)
            .run()
            .map_err(to_db_error)?;
        if result.deleted_count == 0 {
            return Err(DbError::not_found("no document with the given '_id'"));
        }
        Ok(())
    }

    fn clear_storage_unit(&self, scope: &str, unit: &str) -> Result<(), DbError> {
        self.collection(scope, unit)
            .delete_many(Document::new())
            .run()
            .map_err(to_db_error)?;
        Ok(())
    }

    /// Heuristic graph discovery: sample documents per collection and
    /// propose a relationship for every top-level `<other>_id` /
    /// `<other>Id` field naming another collection. Best effort only.
    fn graph(&self, scope: &str) -> Result<Vec<GraphUnit>, DbError> {
        let units = self.storage_units(scope)?;
        let known: HashSet<String> = units.iter().map(|u| u.name.clone()).collect();

        let mut graph = Vec::with_capacity(units.len());
        for unit in units {
            let cursor = self
                .collection(scope, &unit.name)
                .find(Document::new())
                .limit(GRAPH_SAMPLE_SIZE)
                .run()
                .map_err(to_db_error)?;

            let mut targets: HashSet<String> = HashSet::new();
            for doc in cursor {
                let doc = doc.map_err(to_db_error)?;
                for key in doc.keys() {
                    if let Some(target) = reference_target(key, &known) {
                        targets.insert(target);
                    }
                }
            }

            let mut relationships: Vec<GraphRelationship> = targets
                .into_iter()
                .map(|target| GraphRelationship {
                    target,
                    kind: RelationshipKind::ManyToOne,
                })
                .collect();
            relationships.sort_by(|a, b| a.target.cmp(&b.target));

            graph.push(GraphUnit {
                unit,
                relationships,
            });
        }
        Ok(graph)
    }

    fn export_rows(
        &self,
        scope: &str,
        unit: &str,
        options: &ExportOptions,
        sink: &mut dyn ExportSink,
        cancel: &CancelToken,
    ) -> Result<u64, DbError> {
        let selected: Option<HashSet<String>> = options.selected_rows.as_ref().map(|rows| {
            rows.iter()
                .filter_map(|tuple| tuple.first().cloned())
                .collect()
        });

        sink.write_row(&[header_cell(
            "document",
            "Document",
            options.include_types_in_header,
        )])?;

        let cursor = self
            .collection(scope, unit)
            .find(Document::new())
            .run()
            .map_err(to_db_error)?;

        let mut written = 0u64;
        for doc in cursor {
            cancel.check()?;
            let doc = doc.map_err(to_db_error)?;

            if let Some(selected) = &selected {
                let id = doc
                    .get("_id")
                    .map(|id| match id {
                        Bson::ObjectId(oid) => oid.to_hex(),
                        Bson::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .unwrap_or_default();
                if !selected.contains(&id) {
                    continue;
                }
            }

            sink.write_row(&escape_row(&[Self::doc_to_cell(&doc)]))?;
            written += 1;
        }

        log::debug!("exported {written} document(s) from {unit}");
        Ok(written)
    }

    fn ssl_status(&self) -> Result<SslStatus, DbError> {
        Ok(self.ssl)
    }
}

/// `user_id` / `userId` -> `user` (or the plural `users`) when such a
/// collection exists.
fn reference_target(field: &str, collections: &HashSet<String>) -> Option<String> {
    let base = field
        .strip_suffix("_id")
        .or_else(|| field.strip_suffix("Id"))?;
    if base.is_empty() {
        return None;
    }

    let plural = format!("{base}s");
    if collections.contains(base) {
        Some(base.to_string())
    } else if collections.contains(&plural) {
        Some(plural)
    } else {
        None
    }
}

fn to_db_error(e: mongodb::error::Error) -> DbError {
    let message = e.to_string();
    if message.contains("NamespaceNotFound") || message.contains("ns not found") {
        DbError::not_found(message)
    } else {
        DbError::driver(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_targets_resolve_singular_and_plural() {
        let collections: HashSet<String> =
            ["users", "account", "orders"].iter().map(|s| s.to_string()).collect();

        assert_eq!(
            reference_target("user_id", &collections),
            Some("users".to_string())
        );
        assert_eq!(
            reference_target("accountId", &collections),
            Some("account".to_string())
        );
        assert_eq!(reference_target("order_id", &collections), Some("orders".to_string()));
        assert_eq!(reference_target("unknown_id", &collections), None);
        assert_eq!(reference_target("name", &collections), None);
        assert_eq!(reference_target("_id", &collections), None);
    }

    #[test]
    fn id_filter_parses_object_ids() {
        let mut doc = doc! { "_id": "507f1f77bcf86cd799439011", "v": 1 };
        let filter = MongoConnection::id_filter(&mut doc).unwrap();
        assert!(matches!(filter.get("_id"), Some(Bson::ObjectId(_))));
        assert!(!doc.contains_key("_id"));

        let mut doc = doc! { "_id": "plain-key", "v": 1 };
        let filter = MongoConnection::id_filter(&mut doc).unwrap();
        assert_eq!(filter.get("_id"), Some(&Bson::String("plain-key".into())));
    }

    #[test]
    fn missing_id_is_missing_key() {
        let mut doc = doc! { "v": 1 };
        assert!(matches!(
            MongoConnection::id_filter(&mut doc),
            Err(DbError::MissingKey(_))
        ));
    }

    #[test]
    fn cells_build_typed_documents() {
        let cells = vec![
            CellValue::new("name", "Alice"),
            CellValue::new("age", "30"),
            CellValue::new("tags", "[\"a\", \"b\"]"),
        ];
        let doc = MongoConnection::document_from_cells(&cells).unwrap();
        assert_eq!(doc.get_str("name").unwrap(), "Alice");
        let age = doc.get("age").unwrap();
        assert!(matches!(age, Bson::Int32(30) | Bson::Int64(30)));
        assert!(doc.get_array("tags").is_ok());
    }
}
