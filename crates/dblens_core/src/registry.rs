use crate::{
    BackendKind, Connection, ConnectionPool, ConnectionProfile, DatabasePlugin, DbError,
    PluginMetadata,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// The plugin registry and dispatch point for every uniform operation.
///
/// Maps backend kind to plugin, owns the connection pool, and resolves
/// `(profile, database)` pairs to live handles. Registration happens once
/// at startup; duplicate registration is a programming error and fatal.
pub struct Engine {
    plugins: RwLock<HashMap<BackendKind, Arc<dyn DatabasePlugin>>>,
    pool: ConnectionPool,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            plugins: RwLock::new(HashMap::new()),
            pool: ConnectionPool::new(),
        }
    }

    /// Register a plugin under its own kind.
    ///
    /// Panics on duplicate registration: two plugins claiming the same
    /// backend is unrecoverable misconfiguration at startup.
    pub fn register(&self, plugin: Arc<dyn DatabasePlugin>) {
        let kind = plugin.kind();
        let mut plugins = self.plugins.write().expect("registry lock poisoned");
        if plugins.insert(kind, plugin).is_some() {
            panic!("duplicate plugin registration for {}", kind.display_name());
        }
        log::debug!("registered plugin for {}", kind.display_name());
    }

    pub fn plugin(&self, kind: BackendKind) -> Result<Arc<dyn DatabasePlugin>, DbError> {
        self.plugins
            .read()
            .expect("registry lock poisoned")
            .get(&kind)
            .cloned()
            .ok_or_else(|| {
                DbError::unsupported(format!(
                    "no plugin registered for {}",
                    kind.display_name()
                ))
            })
    }

    pub fn registered_kinds(&self) -> Vec<BackendKind> {
        self.plugins
            .read()
            .expect("registry lock poisoned")
            .keys()
            .copied()
            .collect()
    }

    pub fn metadata(&self, kind: BackendKind) -> Result<&'static PluginMetadata, DbError> {
        Ok(self.plugin(kind)?.metadata())
    }

    /// Resolve the plugin for a profile and acquire a pooled connection.
    /// This is the single entry point callers use before invoking any
    /// capability-contract method.
    pub fn acquire(
        &self,
        profile: &ConnectionProfile,
        database: Option<&str>,
    ) -> Result<Arc<dyn Connection>, DbError> {
        let plugin = self.plugin(profile.kind())?;
        self.pool.acquire(plugin.as_ref(), profile, database)
    }

    /// Fast availability probe: can a connection be opened and pinged?
    pub fn is_available(&self, profile: &ConnectionProfile) -> bool {
        self.acquire(profile, None).is_ok()
    }

    /// Drop any cached handles for a profile. Must be called whenever the
    /// profile's credentials change.
    pub fn invalidate(&self, profile_id: &str) {
        self.pool.invalidate(profile_id);
    }

    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        CancelToken, CellValue, Column, Credentials, DatabaseCategory, ExportOptions,
        ExportSink, PluginCapabilities, RowQuery, RowSet, StorageUnit,
    };

    static FAKE_METADATA: PluginMetadata = PluginMetadata {
        display_name: "Fake",
        description: "",
        category: DatabaseCategory::Relational,
        capabilities: PluginCapabilities::empty(),
        operators: &[],
    };

    struct NullConnection;

    impl Connection for NullConnection {
        fn kind(&self) -> BackendKind {
            BackendKind::Sqlite
        }
        fn metadata(&self) -> &'static PluginMetadata {
            &FAKE_METADATA
        }
        fn ping(&self) -> Result<(), DbError> {
            Ok(())
        }
        fn close(&self) -> Result<(), DbError> {
            Ok(())
        }
        fn storage_units(&self, _scope: &str) -> Result<Vec<StorageUnit>, DbError> {
            Ok(vec![StorageUnit::new("t")])
        }
        fn columns(&self, _scope: &str, _unit: &str) -> Result<Vec<Column>, DbError> {
            Ok(Vec::new())
        }
        fn rows(
            &self,
            _scope: &str,
            _unit: &str,
            _query: &RowQuery,
            _cancel: &CancelToken,
        ) -> Result<RowSet, DbError> {
            Ok(RowSet::empty())
        }
        fn export_rows(
            &self,
            _scope: &str,
            _unit: &str,
            _options: &ExportOptions,
            _sink: &mut dyn ExportSink,
            _cancel: &CancelToken,
        ) -> Result<u64, DbError> {
            Ok(0)
        }
    }

    struct NullPlugin;

    impl DatabasePlugin for NullPlugin {
        fn kind(&self) -> BackendKind {
            BackendKind::Sqlite
        }
        fn metadata(&self) -> &'static PluginMetadata {
            &FAKE_METADATA
        }
        fn connect(
            &self,
            _profile: &ConnectionProfile,
            _database: Option<&str>,
        ) -> Result<Arc<dyn Connection>, DbError> {
            Ok(Arc::new(NullConnection))
        }
    }

    fn sqlite_profile() -> ConnectionProfile {
        ConnectionProfile::new(
            "fake",
            Credentials::new(BackendKind::Sqlite, "").with_database(":memory:"),
        )
    }

    #[test]
    fn dispatch_reaches_the_registered_plugin() {
        let engine = Engine::new();
        engine.register(Arc::new(NullPlugin));

        let profile = sqlite_profile();
        let conn = engine.acquire(&profile, None).unwrap();
        let units = conn.storage_units("main").unwrap();
        assert_eq!(units[0].name, "t");
    }

    #[test]
    fn unknown_kind_is_unsupported() {
        let engine = Engine::new();
        assert!(matches!(
            engine.plugin(BackendKind::MongoDb),
            Err(DbError::Unsupported(_))
        ));
    }

    #[test]
    #[should_panic(expected = "duplicate plugin registration")]
    fn duplicate_registration_panics() {
        let engine = Engine::new();
        engine.register(Arc::new(NullPlugin));
        engine.register(Arc::new(NullPlugin));
    }

    #[test]
    fn defaulted_contract_methods_report_unsupported() {
        let conn = NullConnection;
        let cancel = CancelToken::new();
        assert!(matches!(conn.databases(), Err(DbError::Unsupported(_))));
        assert!(matches!(conn.schemas(), Err(DbError::Unsupported(_))));
        assert!(matches!(
            conn.raw_query("SELECT 1", &cancel),
            Err(DbError::Unsupported(_))
        ));
        assert!(matches!(
            conn.add_row("s", "t", &[CellValue::new("a", "1")]),
            Err(DbError::Unsupported(_))
        ));
    }
}
