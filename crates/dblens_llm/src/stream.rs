use dblens_core::{CancelToken, DbError};
use std::io::BufRead;

use crate::provider::ChunkSink;

/// Aggregate an Ollama newline-delimited JSON stream.
///
/// Each line is `{"response": "...", "done": bool}`; the terminal chunk
/// has `done = true`. Every non-empty `response` fragment is pushed to
/// the sink and appended to the buffer; the returned string is exactly
/// the concatenation of the pushed chunks.
pub fn aggregate_ndjson(
    reader: impl BufRead,
    mut sink: Option<&mut dyn ChunkSink>,
    cancel: &CancelToken,
) -> Result<String, DbError> {
    let mut aggregated = String::new();

    for line in reader.lines() {
        cancel.check()?;
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let parsed: serde_json::Value = serde_json::from_str(&line)
            .map_err(|e| DbError::driver(format!("malformed stream chunk: {e}")))?;

        if let Some(chunk) = parsed["response"].as_str()
            && !chunk.is_empty()
        {
            if let Some(sink) = sink.as_mut() {
                sink.push(chunk);
            }
            aggregated.push_str(chunk);
        }

        if parsed["done"].as_bool() == Some(true) {
            break;
        }
    }

    Ok(aggregated)
}

/// Aggregate an OpenAI-style SSE stream.
///
/// The body is `data: {...}` lines terminated by `data: [DONE]`; each
/// event carries `choices[0].delta.content`. Events without content
/// (role primers, finish markers) produce no chunk, so the sink never
/// sees an empty trailing fragment.
pub fn aggregate_openai_sse(
    reader: impl BufRead,
    mut sink: Option<&mut dyn ChunkSink>,
    cancel: &CancelToken,
) -> Result<String, DbError> {
    let mut aggregated = String::new();

    for line in reader.lines() {
        cancel.check()?;
        let line = line?;
        let Some(data) = line.strip_prefix("data:").map(str::trim) else {
            continue;
        };

        if data == "[DONE]" {
            break;
        }

        let parsed: serde_json::Value = serde_json::from_str(data)
            .map_err(|e| DbError::driver(format!("malformed stream chunk: {e}")))?;

        if let Some(chunk) = parsed["choices"][0]["delta"]["content"].as_str()
            && !chunk.is_empty()
        {
            if let Some(sink) = sink.as_mut() {
                sink.push(chunk);
            }
            aggregated.push_str(chunk);
        }
    }

    Ok(aggregated)
}

/// Aggregate an Anthropic SSE stream.
///
/// Text arrives in `content_block_delta` events as `delta.text`; the
/// stream ends with a `message_stop` event.
pub fn aggregate_anthropic_sse(
    reader: impl BufRead,
    mut sink: Option<&mut dyn ChunkSink>,
    cancel: &CancelToken,
) -> Result<String, DbError> {
    let mut aggregated = String::new();

    for line in reader.lines() {
        cancel.check()?;
        let line = line?;
        let Some(data) = line.strip_prefix("data:").map(str::trim) else {
            continue;
        };

        let parsed: serde_json::Value = serde_json::from_str(data)
            .map_err(|e| DbError::driver(format!("malformed stream chunk: {e}")))?;

        match parsed["type"].as_str() {
            Some("content_block_delta") => {
                if let Some(chunk) = parsed["delta"]["text"].as_str()
                    && !chunk.is_empty()
                {
                    if let Some(sink) = sink.as_mut() {
                        sink.push(chunk);
                    }
                    aggregated.push_str(chunk);
                }
            }
            Some("message_stop") => break,
            _ => {}
        }
    }

    Ok(aggregated)
}
