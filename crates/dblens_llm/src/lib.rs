#![allow(clippy::result_large_err)]

//! LLM chat adapter: provider registry, request shaping, streaming
//! response aggregation, and the natural-language query loop.

mod chat;
mod config;
mod provider;
mod registry;
mod stream;

pub use chat::{ChatMessage, ChatMessageKind, ChatTurn, build_schema_prompt, chat, extract_queries};
pub use config::{LlmProviderConfig, LlmProviderKind, LlmSettings};
pub use provider::{ChunkSink, HttpProvider, LlmProvider, provider_for};
pub use registry::ProviderRegistry;
pub use stream::{aggregate_anthropic_sse, aggregate_ndjson, aggregate_openai_sse};
