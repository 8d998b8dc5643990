#![allow(clippy::result_large_err)]

//! Engine assembly: one-shot global registries, builtin plugin
//! registration, environment bootstrap, and the engine-level chat
//! dispatch that ties the plugin contract to the LLM adapter.

pub mod mock;

use dblens_core::{CancelToken, ConnectionProfile, DbError, Engine, ProfileStore};
use dblens_llm::{ChatMessage, ChatTurn, ProviderRegistry, provider_for};
use std::sync::{Arc, OnceLock};

static ENGINE: OnceLock<Engine> = OnceLock::new();
static PROFILES: OnceLock<ProfileStore> = OnceLock::new();
static PROVIDERS: OnceLock<ProviderRegistry> = OnceLock::new();

/// The process-wide engine, with every builtin plugin registered exactly
/// once. Safe under concurrent first use.
pub fn engine() -> &'static Engine {
    ENGINE.get_or_init(|| {
        let engine = Engine::new();
        engine.register(Arc::new(dblens_plugin_postgres::PostgresPlugin::new()));
        engine.register(Arc::new(dblens_plugin_mysql::MySqlPlugin::mysql()));
        engine.register(Arc::new(dblens_plugin_mysql::MySqlPlugin::mariadb()));
        engine.register(Arc::new(dblens_plugin_sqlite::SqlitePlugin::new()));
        engine.register(Arc::new(dblens_plugin_clickhouse::ClickHousePlugin::new()));
        engine.register(Arc::new(
            dblens_plugin_elasticsearch::ElasticSearchPlugin::new(),
        ));
        engine.register(Arc::new(dblens_plugin_mongodb::MongoPlugin::new()));
        engine.register(Arc::new(dblens_plugin_redis::RedisPlugin::new()));
        log::info!(
            "engine initialised with {} builtin plugin(s)",
            engine.registered_kinds().len()
        );
        engine
    })
}

/// The process-wide profile store.
pub fn profiles() -> &'static ProfileStore {
    PROFILES.get_or_init(ProfileStore::new)
}

/// The process-wide LLM provider registry.
pub fn providers() -> &'static ProviderRegistry {
    PROVIDERS.get_or_init(ProviderRegistry::new)
}

/// Bootstrap from the environment: connection documents into the profile
/// store, provider documents into the provider registry. Invalid JSON in
/// any recognised variable aborts startup.
pub fn init_from_env() -> Result<(), DbError> {
    profiles().seed_from_env()?;
    providers().seed_from_env()?;
    Ok(())
}

/// Update a profile and drop its cached connections; a credential change
/// must never leave a stale handle behind.
pub fn update_profile(id: &str, profile: ConnectionProfile) -> Result<(), DbError> {
    profiles().update(id, profile)?;
    engine().invalidate(id);
    Ok(())
}

/// Remove a profile and its cached connections.
pub fn delete_profile(id: &str) -> Result<(), DbError> {
    profiles().delete(id)?;
    engine().invalidate(id);
    Ok(())
}

/// Export a storage unit as CSV into the given writer, streaming through
/// the plugin's export pipeline.
pub fn export_csv<W: std::io::Write>(
    profile: &ConnectionProfile,
    scope: &str,
    unit: &str,
    options: &dblens_core::ExportOptions,
    writer: W,
    cancel: &CancelToken,
) -> Result<u64, DbError> {
    let conn = engine().acquire(profile, None)?;
    let mut sink = dblens_export::CsvSink::new(writer);
    conn.export_rows(scope, unit, options, &mut sink, cancel)
}

/// The uniform `Chat` operation: resolve the profile's connection and the
/// provider, then run the natural-language query loop against them.
pub fn chat(
    profile: &ConnectionProfile,
    scope: &str,
    provider_id: &str,
    model: &str,
    history: &[ChatTurn],
    prompt: &str,
    cancel: &CancelToken,
) -> Result<Vec<ChatMessage>, DbError> {
    let conn = engine().acquire(profile, None)?;
    let config = providers().get(provider_id)?;
    let provider = provider_for(&config);
    dblens_llm::chat(
        conn.as_ref(),
        provider.as_ref(),
        model,
        scope,
        history,
        prompt,
        cancel,
    )
}
