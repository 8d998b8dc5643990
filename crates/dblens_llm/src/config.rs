use serde::{Deserialize, Serialize};

/// Supported LLM provider families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LlmProviderKind {
    Ollama,
    OpenAi,
    Anthropic,
    OpenAiCompatible,
}

impl LlmProviderKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            LlmProviderKind::Ollama => "Ollama",
            LlmProviderKind::OpenAi => "OpenAI",
            LlmProviderKind::Anthropic => "Anthropic",
            LlmProviderKind::OpenAiCompatible => "OpenAI-compatible",
        }
    }

    /// Environment variable holding this provider's configuration.
    pub fn env_var(&self) -> &'static str {
        match self {
            LlmProviderKind::Ollama => "DBLENS_OLLAMA",
            LlmProviderKind::OpenAi => "DBLENS_OPENAI",
            LlmProviderKind::Anthropic => "DBLENS_ANTHROPIC",
            LlmProviderKind::OpenAiCompatible => "DBLENS_OPENAI_COMPATIBLE",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmProviderKind::Ollama => "http://localhost:11434",
            LlmProviderKind::OpenAi => "https://api.openai.com/v1",
            LlmProviderKind::Anthropic => "https://api.anthropic.com/v1",
            LlmProviderKind::OpenAiCompatible => "http://localhost:8000/v1",
        }
    }

    pub fn all() -> &'static [LlmProviderKind] {
        &[
            LlmProviderKind::Ollama,
            LlmProviderKind::OpenAi,
            LlmProviderKind::Anthropic,
            LlmProviderKind::OpenAiCompatible,
        ]
    }
}

/// Sampling settings forwarded to the provider. Unset fields are left to
/// the provider's own defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_penalty: Option<f64>,
}

/// One configured provider instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmProviderConfig {
    pub id: String,
    pub display_name: String,
    pub kind: LlmProviderKind,
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub settings: LlmSettings,
    /// Environment-supplied model list. Authoritative for
    /// `supported_models` when `custom_models` is set.
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub custom_models: bool,
    #[serde(default)]
    pub is_environment_defined: bool,
    #[serde(default)]
    pub is_user_defined: bool,
}

impl LlmProviderConfig {
    pub fn new(kind: LlmProviderKind, base_url: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            display_name: kind.display_name().to_string(),
            kind,
            base_url: base_url.into(),
            api_key: String::new(),
            settings: LlmSettings::default(),
            models: Vec::new(),
            custom_models: false,
            is_environment_defined: false,
            is_user_defined: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&LlmProviderKind::OpenAiCompatible).unwrap(),
            "\"open-ai-compatible\""
        );
    }

    #[test]
    fn settings_skip_unset_fields() {
        let settings = LlmSettings {
            temperature: Some(0.2),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_string(&settings).unwrap(),
            "{\"temperature\":0.2}"
        );
    }
}
