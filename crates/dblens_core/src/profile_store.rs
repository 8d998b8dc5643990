use crate::{BackendKind, ConnectionProfile, Credentials, DbError};
use indexmap::IndexMap;
use serde::Deserialize;
use std::sync::RwLock;
use uuid::Uuid;

/// One entry of a backend's environment connection document.
///
/// `DBLENS_<BACKEND>` holds a JSON array of these.
#[derive(Debug, Deserialize)]
struct EnvConnection {
    alias: Option<String>,
    host: String,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    user: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    database: String,
    /// Ordered advanced options.
    #[serde(default)]
    config: Vec<EnvConfigPair>,
}

#[derive(Debug, Deserialize)]
struct EnvConfigPair {
    key: String,
    value: String,
}

/// Authoritative in-memory registry of all known profiles, keyed by id.
///
/// Reads are concurrent, mutations exclusive. Secrets never appear in
/// log output; listing clones the profiles as-is because callers need
/// the credentials to connect.
pub struct ProfileStore {
    profiles: RwLock<IndexMap<String, ConnectionProfile>>,
}

impl Default for ProfileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileStore {
    pub fn new() -> Self {
        Self {
            profiles: RwLock::new(IndexMap::new()),
        }
    }

    pub fn list(&self) -> Vec<ConnectionProfile> {
        self.profiles
            .read()
            .expect("profile store lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Result<ConnectionProfile, DbError> {
        self.profiles
            .read()
            .expect("profile store lock poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| DbError::not_found(format!("profile '{id}'")))
    }

    /// Insert a new profile. Assigns an id when absent; validates the
    /// credentials per backend; rejects duplicate ids.
    pub fn create(&self, mut profile: ConnectionProfile) -> Result<ConnectionProfile, DbError> {
        profile.credentials.validate()?;

        if profile.id.is_empty() {
            profile.id = Uuid::new_v4().to_string();
        }

        let mut profiles = self.profiles.write().expect("profile store lock poisoned");
        if profiles.contains_key(&profile.id) {
            return Err(DbError::DuplicateId(profile.id));
        }

        log::info!(
            "registered {} profile '{}' ({})",
            profile.kind().display_name(),
            profile.alias,
            profile.id
        );
        profiles.insert(profile.id.clone(), profile.clone());
        Ok(profile)
    }

    /// Replace a profile's alias and credentials. Environment-defined
    /// profiles are immutable.
    pub fn update(&self, id: &str, profile: ConnectionProfile) -> Result<(), DbError> {
        profile.credentials.validate()?;

        let mut profiles = self.profiles.write().expect("profile store lock poisoned");
        let existing = profiles
            .get_mut(id)
            .ok_or_else(|| DbError::not_found(format!("profile '{id}'")))?;

        if existing.source.is_protected() {
            return Err(DbError::ProtectedSource(format!(
                "profile '{id}' is environment-defined"
            )));
        }

        existing.alias = profile.alias;
        existing.credentials = profile.credentials;
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<(), DbError> {
        let mut profiles = self.profiles.write().expect("profile store lock poisoned");
        let existing = profiles
            .get(id)
            .ok_or_else(|| DbError::not_found(format!("profile '{id}'")))?;

        if existing.source.is_protected() {
            return Err(DbError::ProtectedSource(format!(
                "profile '{id}' is environment-defined"
            )));
        }

        profiles.shift_remove(id);
        log::info!("removed profile '{id}'");
        Ok(())
    }

    /// Sweep the process environment for backend connection documents and
    /// insert one environment-sourced profile per entry.
    ///
    /// Invalid JSON aborts startup: a half-configured environment is a
    /// deployment error, not something to limp past.
    pub fn seed_from_env(&self) -> Result<usize, DbError> {
        let mut seeded = 0;

        for kind in BackendKind::all() {
            let Ok(raw) = std::env::var(kind.env_var()) else {
                continue;
            };
            if raw.trim().is_empty() {
                continue;
            }

            let entries: Vec<EnvConnection> = serde_json::from_str(&raw).map_err(|e| {
                DbError::invalid_argument(format!(
                    "{} contains invalid JSON: {e}",
                    kind.env_var()
                ))
            })?;

            for (index, entry) in entries.into_iter().enumerate() {
                let profile = env_entry_to_profile(*kind, index, entry)?;
                self.create(profile)?;
                seeded += 1;
            }
        }

        if seeded > 0 {
            log::info!("seeded {seeded} profile(s) from the environment");
        }
        Ok(seeded)
    }
}

fn env_entry_to_profile(
    kind: BackendKind,
    index: usize,
    entry: EnvConnection,
) -> Result<ConnectionProfile, DbError> {
    let mut credentials = Credentials::new(kind, entry.host);
    credentials.username = entry.user;
    credentials.password = entry.password;
    credentials.database = entry.database;
    if let Some(port) = entry.port {
        credentials.port = port;
    }
    for pair in entry.config {
        credentials.set_advanced_option(pair.key, pair.value);
    }

    // Honour a port tucked into the advanced options.
    credentials.port = credentials.effective_port();

    let alias = entry
        .alias
        .unwrap_or_else(|| format!("{} #{}", kind.display_name(), index + 1));
    let id = format!("env-{}-{}", kind.env_var().to_ascii_lowercase(), index);

    Ok(ConnectionProfile::environment(id, alias, credentials))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redis_profile(alias: &str) -> ConnectionProfile {
        ConnectionProfile::new(alias, Credentials::new(BackendKind::Redis, "localhost"))
    }

    #[test]
    fn create_get_delete_roundtrip() {
        let store = ProfileStore::new();
        let created = store.create(redis_profile("cache")).unwrap();

        let fetched = store.get(&created.id).unwrap();
        assert_eq!(fetched.alias, "cache");

        store.delete(&created.id).unwrap();
        assert!(matches!(store.get(&created.id), Err(DbError::NotFound(_))));
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let store = ProfileStore::new();
        let mut profile = redis_profile("one");
        profile.id = "fixed".to_string();
        store.create(profile.clone()).unwrap();

        profile.alias = "two".to_string();
        assert!(matches!(
            store.create(profile),
            Err(DbError::DuplicateId(_))
        ));
    }

    #[test]
    fn environment_profiles_are_immutable() {
        let store = ProfileStore::new();
        let profile = ConnectionProfile::environment(
            "env-redis-0",
            "cache",
            Credentials::new(BackendKind::Redis, "localhost"),
        );
        store.create(profile.clone()).unwrap();

        assert!(matches!(
            store.update("env-redis-0", profile),
            Err(DbError::ProtectedSource(_))
        ));
        assert!(matches!(
            store.delete("env-redis-0"),
            Err(DbError::ProtectedSource(_))
        ));
    }

    #[test]
    fn invalid_credentials_fail_create() {
        let store = ProfileStore::new();
        let profile = ConnectionProfile::new(
            "bad",
            Credentials::new(BackendKind::Postgres, "localhost"),
        );
        assert!(matches!(
            store.create(profile),
            Err(DbError::InvalidArgument(_))
        ));
    }

    #[test]
    fn listing_preserves_insertion_order() {
        let store = ProfileStore::new();
        store.create(redis_profile("a")).unwrap();
        store.create(redis_profile("b")).unwrap();
        store.create(redis_profile("c")).unwrap();

        let aliases: Vec<String> = store.list().into_iter().map(|p| p.alias).collect();
        assert_eq!(aliases, vec!["a", "b", "c"]);
    }
}
