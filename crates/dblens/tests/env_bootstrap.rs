use dblens_core::{DbError, ProfileStore, ProfileSource};
use dblens_llm::ProviderRegistry;

/// Environment mutation is process-global, so every seeding scenario
/// runs inside this one test body.
#[test]
fn environment_seeding_end_to_end() {
    // SAFETY: single-threaded within this test; no other test in this
    // binary reads these variables.
    unsafe {
        std::env::set_var(
            "DBLENS_POSTGRES",
            r#"[{"alias":"main db","host":"db.internal","user":"app","password":"secret","database":"app","config":[{"key":"SSL Mode","value":"require"}]}]"#,
        );
        std::env::set_var(
            "DBLENS_REDIS",
            r#"[{"host":"cache.internal","port":6380}]"#,
        );
        std::env::set_var(
            "DBLENS_OLLAMA",
            r#"{"base_url":"http://llm.internal:11434","models":["llama3"]}"#,
        );
        std::env::set_var("DBLENS_CUSTOM_MODELS", "1");
    }

    let store = ProfileStore::new();
    let seeded = store.seed_from_env().unwrap();
    assert_eq!(seeded, 2);

    let profiles = store.list();
    let pg = profiles
        .iter()
        .find(|p| p.alias == "main db")
        .expect("postgres profile seeded");
    assert_eq!(pg.source, ProfileSource::Environment);
    assert_eq!(pg.credentials.host, "db.internal");
    assert_eq!(
        pg.credentials.advanced_option("SSL Mode"),
        Some("require")
    );

    let redis = profiles
        .iter()
        .find(|p| p.credentials.host == "cache.internal")
        .expect("redis profile seeded");
    assert_eq!(redis.credentials.port, 6380);

    // Environment profiles reject mutation.
    assert!(matches!(
        store.delete(&pg.id),
        Err(DbError::ProtectedSource(_))
    ));

    let registry = ProviderRegistry::new();
    assert_eq!(registry.seed_from_env().unwrap(), 1);
    let provider = &registry.list()[0];
    assert_eq!(provider.base_url, "http://llm.internal:11434");
    assert_eq!(provider.models, vec!["llama3"]);
    assert!(provider.custom_models);
    assert!(provider.is_environment_defined);

    // Invalid JSON aborts seeding with a diagnostic naming the variable.
    unsafe {
        std::env::set_var("DBLENS_MYSQL", "not json");
    }
    let failing = ProfileStore::new();
    match failing.seed_from_env() {
        Err(DbError::InvalidArgument(message)) => {
            assert!(message.contains("DBLENS_MYSQL"));
        }
        other => panic!("expected invalid-argument, got {other:?}"),
    }

    unsafe {
        std::env::remove_var("DBLENS_POSTGRES");
        std::env::remove_var("DBLENS_REDIS");
        std::env::remove_var("DBLENS_MYSQL");
        std::env::remove_var("DBLENS_OLLAMA");
        std::env::remove_var("DBLENS_CUSTOM_MODELS");
    }
}
