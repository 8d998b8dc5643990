use crate::config::{LlmProviderConfig, LlmProviderKind};
use crate::stream::{aggregate_anthropic_sse, aggregate_ndjson, aggregate_openai_sse};
use dblens_core::{CancelToken, DbError};
use serde_json::{Value as Json, json};
use std::io::BufReader;
use std::time::Duration;

/// Receives incremental completion fragments as they arrive.
pub trait ChunkSink {
    fn push(&mut self, chunk: &str);
}

impl<F: FnMut(&str)> ChunkSink for F {
    fn push(&mut self, chunk: &str) {
        self(chunk)
    }
}

/// One LLM provider instance.
///
/// The aggregated return value is byte-identical to the concatenation of
/// the chunks pushed into the sink.
pub trait LlmProvider: Send + Sync {
    fn kind(&self) -> LlmProviderKind;

    fn complete(
        &self,
        prompt: &str,
        model: &str,
        sink: Option<&mut dyn ChunkSink>,
        cancel: &CancelToken,
    ) -> Result<String, DbError>;

    fn supported_models(&self) -> Result<Vec<String>, DbError>;
}

/// Build the provider implementation for a configuration entry.
pub fn provider_for(config: &LlmProviderConfig) -> Box<dyn LlmProvider> {
    Box::new(HttpProvider::new(config.clone()))
}

/// All four provider families over one blocking HTTP client; only the
/// request shaping and stream framing differ per kind.
pub struct HttpProvider {
    config: LlmProviderConfig,
    http: reqwest::blocking::Client,
}

impl HttpProvider {
    pub fn new(config: LlmProviderConfig) -> Self {
        Self {
            config,
            http: reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(300))
                .build()
                .unwrap_or_default(),
        }
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn post(&self, url: &str, body: &Json) -> Result<reqwest::blocking::Response, DbError> {
        let mut builder = self.http.post(url).json(body);

        match self.config.kind {
            LlmProviderKind::Anthropic => {
                builder = builder
                    .header("x-api-key", &self.config.api_key)
                    .header("anthropic-version", "2023-06-01");
            }
            LlmProviderKind::OpenAi | LlmProviderKind::OpenAiCompatible => {
                if !self.config.api_key.is_empty() {
                    builder =
                        builder.header("Authorization", format!("Bearer {}", self.config.api_key));
                }
            }
            LlmProviderKind::Ollama => {}
        }

        let response = builder
            .send()
            .map_err(|e| DbError::connection_failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(DbError::upstream(status.as_u16(), body));
        }
        Ok(response)
    }

    fn ollama_options(&self) -> Json {
        let settings = &self.config.settings;
        let mut options = serde_json::Map::new();
        if let Some(v) = settings.temperature {
            options.insert("temperature".into(), json!(v));
        }
        if let Some(v) = settings.top_p {
            options.insert("top_p".into(), json!(v));
        }
        if let Some(v) = settings.top_k {
            options.insert("top_k".into(), json!(v));
        }
        if let Some(v) = settings.repeat_penalty {
            options.insert("repeat_penalty".into(), json!(v));
        }
        Json::Object(options)
    }

    fn complete_ollama(
        &self,
        prompt: &str,
        model: &str,
        sink: Option<&mut dyn ChunkSink>,
        cancel: &CancelToken,
    ) -> Result<String, DbError> {
        let stream = sink.is_some();
        let body = json!({
            "model": model,
            "prompt": prompt,
            "stream": stream,
            "options": self.ollama_options(),
        });

        let response = self.post(&format!("{}/api/generate", self.base()), &body)?;
        if stream {
            return aggregate_ndjson(BufReader::new(response), sink, cancel);
        }

        let parsed: Json = response
            .json()
            .map_err(|e| DbError::driver(e.to_string()))?;
        parsed["response"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| DbError::driver("missing 'response' field in completion"))
    }

    fn complete_openai(
        &self,
        prompt: &str,
        model: &str,
        sink: Option<&mut dyn ChunkSink>,
        cancel: &CancelToken,
    ) -> Result<String, DbError> {
        let settings = &self.config.settings;
        let stream = sink.is_some();
        let mut body = json!({
            "model": model,
            "messages": [{ "role": "user", "content": prompt }],
            "stream": stream,
        });
        if let Some(v) = settings.temperature {
            body["temperature"] = json!(v);
        }
        if let Some(v) = settings.max_tokens {
            body["max_tokens"] = json!(v);
        }
        if let Some(v) = settings.top_p {
            body["top_p"] = json!(v);
        }
        if let Some(v) = settings.frequency_penalty {
            body["frequency_penalty"] = json!(v);
        }
        if let Some(v) = settings.presence_penalty {
            body["presence_penalty"] = json!(v);
        }

        let response = self.post(&format!("{}/chat/completions", self.base()), &body)?;
        if stream {
            return aggregate_openai_sse(BufReader::new(response), sink, cancel);
        }

        let parsed: Json = response
            .json()
            .map_err(|e| DbError::driver(e.to_string()))?;
        parsed["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| DbError::driver("missing completion content"))
    }

    fn complete_anthropic(
        &self,
        prompt: &str,
        model: &str,
        sink: Option<&mut dyn ChunkSink>,
        cancel: &CancelToken,
    ) -> Result<String, DbError> {
        let settings = &self.config.settings;
        let stream = sink.is_some();
        let max_tokens = settings
            .max_tokens
            .unwrap_or_else(|| default_anthropic_max_tokens(model));

        let mut body = json!({
            "model": model,
            "max_tokens": max_tokens,
            "messages": [{ "role": "user", "content": prompt }],
            "stream": stream,
        });
        if let Some(v) = settings.temperature {
            body["temperature"] = json!(v);
        }
        if let Some(v) = settings.top_p {
            body["top_p"] = json!(v);
        }
        if let Some(v) = settings.top_k {
            body["top_k"] = json!(v);
        }

        let response = self.post(&format!("{}/messages", self.base()), &body)?;
        if stream {
            return aggregate_anthropic_sse(BufReader::new(response), sink, cancel);
        }

        let parsed: Json = response
            .json()
            .map_err(|e| DbError::driver(e.to_string()))?;
        parsed["content"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| DbError::driver("missing completion content"))
    }

    fn get_json(&self, url: &str) -> Result<Json, DbError> {
        let mut builder = self.http.get(url);
        if !self.config.api_key.is_empty() {
            builder = match self.config.kind {
                LlmProviderKind::Anthropic => builder
                    .header("x-api-key", &self.config.api_key)
                    .header("anthropic-version", "2023-06-01"),
                _ => builder.header("Authorization", format!("Bearer {}", self.config.api_key)),
            };
        }

        let response = builder
            .send()
            .map_err(|e| DbError::connection_failed(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(DbError::upstream(status.as_u16(), body));
        }
        response.json().map_err(|e| DbError::driver(e.to_string()))
    }
}

impl LlmProvider for HttpProvider {
    fn kind(&self) -> LlmProviderKind {
        self.config.kind
    }

    fn complete(
        &self,
        prompt: &str,
        model: &str,
        sink: Option<&mut dyn ChunkSink>,
        cancel: &CancelToken,
    ) -> Result<String, DbError> {
        cancel.check()?;
        log::debug!(
            "[LLM] {} completion with model {model} ({} prompt chars)",
            self.config.kind.display_name(),
            prompt.len()
        );

        match self.config.kind {
            LlmProviderKind::Ollama => self.complete_ollama(prompt, model, sink, cancel),
            LlmProviderKind::OpenAi | LlmProviderKind::OpenAiCompatible => {
                self.complete_openai(prompt, model, sink, cancel)
            }
            LlmProviderKind::Anthropic => self.complete_anthropic(prompt, model, sink, cancel),
        }
    }

    /// The env-supplied list is authoritative in custom-models mode;
    /// otherwise the provider is asked.
    fn supported_models(&self) -> Result<Vec<String>, DbError> {
        if self.config.custom_models && !self.config.models.is_empty() {
            return Ok(self.config.models.clone());
        }

        match self.config.kind {
            LlmProviderKind::Ollama => {
                let parsed = self.get_json(&format!("{}/api/tags", self.base()))?;
                Ok(parsed["models"]
                    .as_array()
                    .map(|models| {
                        models
                            .iter()
                            .filter_map(|m| m["name"].as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default())
            }
            LlmProviderKind::OpenAi | LlmProviderKind::OpenAiCompatible => {
                let parsed = self.get_json(&format!("{}/models", self.base()))?;
                Ok(parsed["data"]
                    .as_array()
                    .map(|models| {
                        models
                            .iter()
                            .filter_map(|m| m["id"].as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default())
            }
            LlmProviderKind::Anthropic => {
                let parsed = self.get_json(&format!("{}/models", self.base()))?;
                Ok(parsed["data"]
                    .as_array()
                    .map(|models| {
                        models
                            .iter()
                            .filter_map(|m| m["id"].as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default())
            }
        }
    }
}

/// Conservative output budgets per known model family.
fn default_anthropic_max_tokens(model: &str) -> u64 {
    if model.contains("haiku") {
        4096
    } else if model.contains("sonnet") {
        8192
    } else if model.contains("opus") {
        4096
    } else {
        1024
    }
}
