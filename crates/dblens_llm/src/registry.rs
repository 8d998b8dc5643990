use crate::config::{LlmProviderConfig, LlmProviderKind};
use dblens_core::DbError;
use indexmap::IndexMap;
use serde::Deserialize;
use std::sync::RwLock;

/// Environment document for one provider kind.
#[derive(Debug, Deserialize)]
struct EnvProvider {
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    api_key: String,
    #[serde(default)]
    models: Vec<String>,
}

/// Flag that makes env-supplied model lists authoritative, skipping the
/// provider's model-listing endpoint.
const CUSTOM_MODELS_VAR: &str = "DBLENS_CUSTOM_MODELS";

/// Registry of configured LLM providers: environment-seeded entries plus
/// user additions. Same access discipline as the profile store.
pub struct ProviderRegistry {
    providers: RwLock<IndexMap<String, LlmProviderConfig>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(IndexMap::new()),
        }
    }

    pub fn list(&self) -> Vec<LlmProviderConfig> {
        self.providers
            .read()
            .expect("provider registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Result<LlmProviderConfig, DbError> {
        self.providers
            .read()
            .expect("provider registry lock poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| DbError::not_found(format!("provider '{id}'")))
    }

    pub fn create(&self, config: LlmProviderConfig) -> Result<LlmProviderConfig, DbError> {
        let mut providers = self
            .providers
            .write()
            .expect("provider registry lock poisoned");
        if providers.contains_key(&config.id) {
            return Err(DbError::DuplicateId(config.id));
        }
        log::info!(
            "registered {} provider '{}'",
            config.kind.display_name(),
            config.id
        );
        providers.insert(config.id.clone(), config.clone());
        Ok(config)
    }

    pub fn update(&self, id: &str, config: LlmProviderConfig) -> Result<(), DbError> {
        let mut providers = self
            .providers
            .write()
            .expect("provider registry lock poisoned");
        let existing = providers
            .get_mut(id)
            .ok_or_else(|| DbError::not_found(format!("provider '{id}'")))?;

        if existing.is_environment_defined {
            return Err(DbError::ProtectedSource(format!(
                "provider '{id}' is environment-defined"
            )));
        }

        *existing = LlmProviderConfig {
            id: id.to_string(),
            is_environment_defined: false,
            is_user_defined: true,
            ..config
        };
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<(), DbError> {
        let mut providers = self
            .providers
            .write()
            .expect("provider registry lock poisoned");
        let existing = providers
            .get(id)
            .ok_or_else(|| DbError::not_found(format!("provider '{id}'")))?;

        if existing.is_environment_defined {
            return Err(DbError::ProtectedSource(format!(
                "provider '{id}' is environment-defined"
            )));
        }

        providers.shift_remove(id);
        Ok(())
    }

    /// Seed one provider per configured `DBLENS_<PROVIDER>` variable.
    /// Invalid JSON aborts startup with a diagnostic naming the variable.
    pub fn seed_from_env(&self) -> Result<usize, DbError> {
        let custom_models = std::env::var(CUSTOM_MODELS_VAR)
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let mut seeded = 0;
        for kind in LlmProviderKind::all() {
            let Ok(raw) = std::env::var(kind.env_var()) else {
                continue;
            };
            if raw.trim().is_empty() {
                continue;
            }

            let entry: EnvProvider = serde_json::from_str(&raw).map_err(|e| {
                DbError::invalid_argument(format!("{} contains invalid JSON: {e}", kind.env_var()))
            })?;

            let mut config = LlmProviderConfig::new(
                *kind,
                entry
                    .base_url
                    .unwrap_or_else(|| kind.default_base_url().to_string()),
            );
            config.id = format!("env-{}", kind.env_var().to_ascii_lowercase());
            config.api_key = entry.api_key;
            config.models = entry.models;
            config.custom_models = custom_models;
            config.is_environment_defined = true;
            config.is_user_defined = false;

            self.create(config)?;
            seeded += 1;
        }

        if seeded > 0 {
            log::info!("seeded {seeded} LLM provider(s) from the environment");
        }
        Ok(seeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_provider() -> LlmProviderConfig {
        LlmProviderConfig::new(LlmProviderKind::Ollama, "http://localhost:11434")
    }

    #[test]
    fn create_get_update_delete_roundtrip() {
        let registry = ProviderRegistry::new();
        let created = registry.create(user_provider()).unwrap();

        let mut updated = created.clone();
        updated.display_name = "Local Ollama".to_string();
        registry.update(&created.id, updated).unwrap();

        assert_eq!(registry.get(&created.id).unwrap().display_name, "Local Ollama");
        registry.delete(&created.id).unwrap();
        assert!(matches!(
            registry.get(&created.id),
            Err(DbError::NotFound(_))
        ));
    }

    #[test]
    fn environment_providers_are_immutable() {
        let registry = ProviderRegistry::new();
        let mut config = user_provider();
        config.id = "env-dblens_ollama".to_string();
        config.is_environment_defined = true;
        config.is_user_defined = false;
        registry.create(config.clone()).unwrap();

        assert!(matches!(
            registry.update(&config.id, config.clone()),
            Err(DbError::ProtectedSource(_))
        ));
        assert!(matches!(
            registry.delete(&config.id),
            Err(DbError::ProtectedSource(_))
        ));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let registry = ProviderRegistry::new();
        let config = registry.create(user_provider()).unwrap();
        assert!(matches!(
            registry.create(config),
            Err(DbError::DuplicateId(_))
        ));
    }
}
