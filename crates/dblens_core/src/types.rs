use crate::{DbError, WhereCondition};
use serde::{Deserialize, Serialize};

/// Supported backend types.
///
/// The set is closed here but extensible at runtime: registering a plugin
/// for a kind is all the engine needs to dispatch to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    Postgres,
    MySql,
    MariaDb,
    Sqlite,
    ClickHouse,
    MongoDb,
    Redis,
    ElasticSearch,
}

impl BackendKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            BackendKind::Postgres => "PostgreSQL",
            BackendKind::MySql => "MySQL",
            BackendKind::MariaDb => "MariaDB",
            BackendKind::Sqlite => "SQLite",
            BackendKind::ClickHouse => "ClickHouse",
            BackendKind::MongoDb => "MongoDB",
            BackendKind::Redis => "Redis",
            BackendKind::ElasticSearch => "ElasticSearch",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            BackendKind::Postgres => 5432,
            BackendKind::MySql | BackendKind::MariaDb => 3306,
            BackendKind::Sqlite => 0,
            BackendKind::ClickHouse => 8123,
            BackendKind::MongoDb => 27017,
            BackendKind::Redis => 6379,
            BackendKind::ElasticSearch => 9200,
        }
    }

    /// Environment variable holding this backend's connection documents.
    pub fn env_var(&self) -> &'static str {
        match self {
            BackendKind::Postgres => "DBLENS_POSTGRES",
            BackendKind::MySql => "DBLENS_MYSQL",
            BackendKind::MariaDb => "DBLENS_MARIADB",
            BackendKind::Sqlite => "DBLENS_SQLITE",
            BackendKind::ClickHouse => "DBLENS_CLICKHOUSE",
            BackendKind::MongoDb => "DBLENS_MONGODB",
            BackendKind::Redis => "DBLENS_REDIS",
            BackendKind::ElasticSearch => "DBLENS_ELASTICSEARCH",
        }
    }

    pub fn all() -> &'static [BackendKind] {
        &[
            BackendKind::Postgres,
            BackendKind::MySql,
            BackendKind::MariaDb,
            BackendKind::Sqlite,
            BackendKind::ClickHouse,
            BackendKind::MongoDb,
            BackendKind::Redis,
            BackendKind::ElasticSearch,
        ]
    }
}

/// Column metadata carried on every row set.
///
/// `type_name` is the backend-native type string, passed through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub type_name: String,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub default_value: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Column {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            is_primary: false,
            nullable: true,
            default_value: None,
        }
    }

    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self.nullable = false;
        self
    }
}

/// Backend-agnostic row container: table, collection, index, or keyspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageUnit {
    pub name: String,
    /// Ordered attribute pairs the plugin chooses to expose
    /// (row count, size in bytes, engine kind, ...).
    pub attributes: Vec<(String, String)>,
}

impl StorageUnit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Uniform query result. Every cell is a string; binary, JSON and array
/// values are JSON-encoded. `disable_update` is set when the plugin cannot
/// safely map rows back to a primary key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<String>>,
    #[serde(default)]
    pub disable_update: bool,
}

impl RowSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Every row must be as wide as the column list.
    pub fn check_shape(&self) -> Result<(), DbError> {
        for (i, row) in self.rows.iter().enumerate() {
            if row.len() != self.columns.len() {
                return Err(DbError::invalid_argument(format!(
                    "row {} has {} cells, expected {}",
                    i,
                    row.len(),
                    self.columns.len()
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// One sort key; lists apply in order as a stable multi-key sort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortCondition {
    pub column: String,
    pub direction: SortDirection,
}

impl SortCondition {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Page sizes above this are clamped with a warning.
pub const MAX_PAGE_SIZE: u64 = 10_000;

/// Paged row request consumed by `Connection::rows`.
#[derive(Debug, Clone, Default)]
pub struct RowQuery {
    pub where_condition: Option<WhereCondition>,
    pub sort: Vec<SortCondition>,
    pub page_size: u64,
    pub page_offset: u64,
}

impl RowQuery {
    pub fn page(page_size: u64, page_offset: u64) -> Self {
        Self {
            where_condition: None,
            sort: Vec::new(),
            page_size,
            page_offset,
        }
    }

    pub fn with_where(mut self, condition: WhereCondition) -> Self {
        self.where_condition = Some(condition);
        self
    }

    pub fn with_sort(mut self, sort: Vec<SortCondition>) -> Self {
        self.sort = sort;
        self
    }

    /// Validates the page window and returns the effective (possibly
    /// clamped) page size.
    pub fn effective_page_size(&self) -> Result<u64, DbError> {
        if self.page_size == 0 {
            return Err(DbError::invalid_argument("pageSize must be greater than 0"));
        }
        if self.page_size > MAX_PAGE_SIZE {
            log::warn!(
                "pageSize {} exceeds the maximum, clamping to {}",
                self.page_size,
                MAX_PAGE_SIZE
            );
            return Ok(MAX_PAGE_SIZE);
        }
        Ok(self.page_size)
    }
}

/// Direction-aware relationship kind between two storage units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationshipKind {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
    Unknown,
}

impl RelationshipKind {
    pub fn label(&self) -> &'static str {
        match self {
            RelationshipKind::OneToOne => "OneToOne",
            RelationshipKind::OneToMany => "OneToMany",
            RelationshipKind::ManyToOne => "ManyToOne",
            RelationshipKind::ManyToMany => "ManyToMany",
            RelationshipKind::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphRelationship {
    pub target: String,
    pub kind: RelationshipKind,
}

/// One node of the schema graph: a storage unit plus its outgoing edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphUnit {
    pub unit: StorageUnit,
    pub relationships: Vec<GraphRelationship>,
}

/// Field description used when creating a storage unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitField {
    pub name: String,
    pub type_name: String,
    #[serde(default)]
    pub primary: bool,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub default_value: Option<String>,
}

impl UnitField {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            primary: false,
            nullable: true,
            default_value: None,
        }
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self.nullable = false;
        self
    }
}

/// One cell on the mutation path: the raw string plus the column's
/// backend-native type so plugins can bind a typed parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellValue {
    pub column: String,
    pub value: String,
    #[serde(default)]
    pub column_type: String,
}

impl CellValue {
    pub fn new(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
            column_type: String::new(),
        }
    }

    pub fn typed(
        column: impl Into<String>,
        value: impl Into<String>,
        column_type: impl Into<String>,
    ) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
            column_type: column_type.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_set_shape_check() {
        let ok = RowSet {
            columns: vec![Column::new("id", "int"), Column::new("name", "text")],
            rows: vec![vec!["1".into(), "a".into()]],
            disable_update: false,
        };
        assert!(ok.check_shape().is_ok());

        let bad = RowSet {
            columns: vec![Column::new("id", "int")],
            rows: vec![vec!["1".into(), "extra".into()]],
            disable_update: false,
        };
        assert!(matches!(
            bad.check_shape(),
            Err(DbError::InvalidArgument(_))
        ));
    }

    #[test]
    fn page_size_zero_is_rejected() {
        let query = RowQuery::page(0, 0);
        assert!(matches!(
            query.effective_page_size(),
            Err(DbError::InvalidArgument(_))
        ));
    }

    #[test]
    fn page_size_is_clamped() {
        let query = RowQuery::page(1_000_000, 0);
        assert_eq!(query.effective_page_size().unwrap(), MAX_PAGE_SIZE);
    }

    #[test]
    fn default_ports_match_backends() {
        assert_eq!(BackendKind::Postgres.default_port(), 5432);
        assert_eq!(BackendKind::ElasticSearch.default_port(), 9200);
        assert_eq!(BackendKind::Sqlite.default_port(), 0);
    }
}
