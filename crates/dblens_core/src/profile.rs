use crate::{BackendKind, DbError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Advanced option keys the core itself understands. Everything else in
/// the advanced map is opaque and passed through to the plugin.
pub mod advanced_keys {
    pub const SSL_MODE: &str = "SSL Mode";
    pub const PORT: &str = "Port";
    pub const URL_PARAMS: &str = "URL Params";
    pub const TLS: &str = "TLS";
    pub const HTTP_PROTOCOL: &str = "HTTP Protocol";
    pub const CA_CERT: &str = "CA Cert";
    pub const CLIENT_CERT: &str = "Client Cert";
    pub const CLIENT_KEY: &str = "Client Key";
    pub const CONNECTION_TIMEOUT: &str = "Connection Timeout";
    pub const DEBUG: &str = "Debug";
}

/// Connection credentials for one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub kind: BackendKind,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Default database / keyspace / index namespace. For SQLite this is
    /// the database file path.
    #[serde(default)]
    pub database: String,
    /// Ordered advanced options (string key -> string value).
    #[serde(default)]
    pub advanced: IndexMap<String, String>,
}

impl Credentials {
    pub fn new(kind: BackendKind, host: impl Into<String>) -> Self {
        Self {
            kind,
            host: host.into(),
            port: kind.default_port(),
            username: String::new(),
            password: String::new(),
            database: String::new(),
            advanced: IndexMap::new(),
        }
    }

    pub fn with_login(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn advanced_option(&self, key: &str) -> Option<&str> {
        self.advanced.get(key).map(String::as_str)
    }

    pub fn set_advanced_option(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.advanced.insert(key.into(), value.into());
    }

    /// Effective port: an explicit `"Port"` advanced option overrides the
    /// structured field, which itself defaults per backend.
    pub fn effective_port(&self) -> u16 {
        self.advanced_option(advanced_keys::PORT)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(self.port)
    }

    /// Per-backend required-field validation.
    pub fn validate(&self) -> Result<(), DbError> {
        match self.kind {
            BackendKind::Sqlite => {
                if self.database.is_empty() {
                    return Err(DbError::invalid_argument(
                        "SQLite credentials require a database file path",
                    ));
                }
            }
            BackendKind::Postgres
            | BackendKind::MySql
            | BackendKind::MariaDb
            | BackendKind::ClickHouse => {
                if self.host.is_empty() {
                    return Err(DbError::invalid_argument("hostname is required"));
                }
                if self.username.is_empty() {
                    return Err(DbError::invalid_argument("username is required"));
                }
                if self.database.is_empty() {
                    return Err(DbError::invalid_argument("database is required"));
                }
            }
            BackendKind::MongoDb | BackendKind::Redis | BackendKind::ElasticSearch => {
                if self.host.is_empty() {
                    return Err(DbError::invalid_argument("hostname is required"));
                }
            }
        }
        Ok(())
    }
}

/// Where a profile came from. Environment-sourced profiles are immutable;
/// session-inline profiles live only as long as the caller's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfileSource {
    Environment,
    UserSaved,
    SessionInline,
}

impl ProfileSource {
    pub fn is_protected(&self) -> bool {
        matches!(self, ProfileSource::Environment)
    }
}

/// A named, typed set of credentials used to open a connection.
///
/// Multiple profiles may point at identical credentials; they remain
/// distinct entities with distinct ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    /// Unique, process-wide stable identifier.
    pub id: String,
    /// Displayable alias.
    pub alias: String,
    pub source: ProfileSource,
    pub credentials: Credentials,
    /// Distinguishes saved profiles from ad-hoc session credentials.
    pub is_profile: bool,
}

impl ConnectionProfile {
    pub fn new(alias: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            alias: alias.into(),
            source: ProfileSource::UserSaved,
            credentials,
            is_profile: true,
        }
    }

    pub fn environment(
        id: impl Into<String>,
        alias: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        Self {
            id: id.into(),
            alias: alias.into(),
            source: ProfileSource::Environment,
            credentials,
            is_profile: true,
        }
    }

    pub fn session_inline(credentials: Credentials) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            alias: credentials.host.clone(),
            source: ProfileSource::SessionInline,
            credentials,
            is_profile: false,
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.credentials.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_requires_a_path() {
        let credentials = Credentials::new(BackendKind::Sqlite, "");
        assert!(credentials.validate().is_err());

        let credentials =
            Credentials::new(BackendKind::Sqlite, "").with_database("/tmp/app.sqlite");
        assert!(credentials.validate().is_ok());
    }

    #[test]
    fn network_sql_requires_host_user_database() {
        let credentials = Credentials::new(BackendKind::Postgres, "localhost");
        assert!(credentials.validate().is_err());

        let credentials = Credentials::new(BackendKind::Postgres, "localhost")
            .with_login("postgres", "postgres")
            .with_database("postgres");
        assert!(credentials.validate().is_ok());
    }

    #[test]
    fn advanced_port_overrides_structured_port() {
        let mut credentials = Credentials::new(BackendKind::Redis, "localhost");
        assert_eq!(credentials.effective_port(), 6379);

        credentials.set_advanced_option(advanced_keys::PORT, "6380");
        assert_eq!(credentials.effective_port(), 6380);
    }

    #[test]
    fn profiles_with_identical_credentials_are_distinct() {
        let credentials = Credentials::new(BackendKind::Redis, "localhost");
        let a = ConnectionProfile::new("a", credentials.clone());
        let b = ConnectionProfile::new("b", credentials);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn environment_source_is_protected() {
        assert!(ProfileSource::Environment.is_protected());
        assert!(!ProfileSource::UserSaved.is_protected());
        assert!(!ProfileSource::SessionInline.is_protected());
    }
}
