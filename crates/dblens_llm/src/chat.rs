use crate::provider::LlmProvider;
use dblens_core::{CancelToken, Connection, DbError, RowQuery, RowSet};
use serde::{Deserialize, Serialize};

/// What a chat message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatMessageKind {
    /// Assistant prose.
    Text,
    /// A query extracted from the assistant's response.
    Query,
    /// Rows produced by executing an extracted query.
    Rows,
}

/// One entry of the message list returned by [`chat`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub kind: ChatMessageKind,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<RowSet>,
}

impl ChatMessage {
    fn text(text: impl Into<String>) -> Self {
        Self {
            kind: ChatMessageKind::Text,
            text: text.into(),
            result: None,
        }
    }

    fn query(text: impl Into<String>) -> Self {
        Self {
            kind: ChatMessageKind::Query,
            text: text.into(),
            result: None,
        }
    }

    fn rows(result: RowSet) -> Self {
        Self {
            kind: ChatMessageKind::Rows,
            text: String::new(),
            result: Some(result),
        }
    }
}

/// One prior turn of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

/// Units described per schema prompt; larger scopes are truncated so the
/// prompt stays within sane token budgets.
const SCHEMA_PROMPT_UNIT_LIMIT: usize = 50;

/// Describe the scope's storage units and columns for the system prompt.
pub fn build_schema_prompt(conn: &dyn Connection, scope: &str) -> Result<String, DbError> {
    let units = conn.storage_units(scope)?;
    let mut description = String::new();

    for unit in units.iter().take(SCHEMA_PROMPT_UNIT_LIMIT) {
        let columns = conn.columns(scope, &unit.name)?;
        let rendered: Vec<String> = columns
            .iter()
            .map(|c| {
                if c.is_primary {
                    format!("{} {} [primary key]", c.name, c.type_name)
                } else {
                    format!("{} {}", c.name, c.type_name)
                }
            })
            .collect();
        description.push_str(&format!("- {} ({})\n", unit.name, rendered.join(", ")));
    }

    if units.len() > SCHEMA_PROMPT_UNIT_LIMIT {
        description.push_str(&format!(
            "... and {} more\n",
            units.len() - SCHEMA_PROMPT_UNIT_LIMIT
        ));
    }

    Ok(format!(
        "You are a database assistant for a {} backend. The current scope is '{}'. \
         Available storage units:\n{}\
         When the user asks for data, answer with a single query in a fenced code block.",
        conn.metadata().display_name,
        scope,
        description
    ))
}

/// Split a response into prose and fenced code blocks, preserving order.
/// The language tag on the opening fence is dropped.
pub fn extract_queries(response: &str) -> Vec<(bool, String)> {
    let mut segments = Vec::new();
    let mut prose = String::new();
    let mut block = String::new();
    let mut in_block = false;

    for line in response.lines() {
        if line.trim_start().starts_with("```") {
            if in_block {
                let query = block.trim().to_string();
                if !query.is_empty() {
                    segments.push((true, query));
                }
                block.clear();
            } else {
                let text = prose.trim().to_string();
                if !text.is_empty() {
                    segments.push((false, text));
                }
                prose.clear();
            }
            in_block = !in_block;
            continue;
        }

        if in_block {
            block.push_str(line);
            block.push('\n');
        } else {
            prose.push_str(line);
            prose.push('\n');
        }
    }

    // An unterminated fence still counts as a query.
    let tail = if in_block { block } else { prose };
    let tail = tail.trim().to_string();
    if !tail.is_empty() {
        segments.push((in_block, tail));
    }

    segments
}

/// The natural-language query loop: describe the schema, call the
/// provider, extract candidate queries, execute them, and interleave the
/// results with the assistant's prose.
pub fn chat(
    conn: &dyn Connection,
    provider: &dyn LlmProvider,
    model: &str,
    scope: &str,
    history: &[ChatTurn],
    prompt: &str,
    cancel: &CancelToken,
) -> Result<Vec<ChatMessage>, DbError> {
    let system = build_schema_prompt(conn, scope)?;

    let mut full_prompt = String::from(&system);
    full_prompt.push_str("\n\n");
    for turn in history {
        full_prompt.push_str(&format!("{}: {}\n", turn.role, turn.content));
    }
    full_prompt.push_str(&format!("user: {prompt}\nassistant:"));

    let response = provider.complete(&full_prompt, model, None, cancel)?;

    let mut messages = Vec::new();
    for (is_query, segment) in extract_queries(&response) {
        if !is_query {
            messages.push(ChatMessage::text(segment));
            continue;
        }

        messages.push(ChatMessage::query(segment.clone()));
        cancel.check()?;

        match conn.raw_query(&segment, cancel) {
            Ok(result) => messages.push(ChatMessage::rows(result)),
            Err(DbError::Unsupported(_)) => {
                // Document and key-value backends have no raw surface;
                // fall back to a plain first-page listing of the unit the
                // query names, when it names one.
                if let Some(result) = structured_fallback(conn, scope, &segment, cancel)? {
                    messages.push(ChatMessage::rows(result));
                }
            }
            Err(e) => {
                log::warn!("generated query failed: {e}");
                messages.push(ChatMessage::text(format!("query failed: {e}")));
            }
        }
    }

    Ok(messages)
}

fn structured_fallback(
    conn: &dyn Connection,
    scope: &str,
    query: &str,
    cancel: &CancelToken,
) -> Result<Option<RowSet>, DbError> {
    let units = conn.storage_units(scope)?;
    let Some(unit) = units.iter().find(|u| query.contains(&u.name)) else {
        return Ok(None);
    };

    match conn.rows(scope, &unit.name, &RowQuery::page(100, 0), cancel) {
        Ok(result) => Ok(Some(result)),
        Err(e) => {
            log::warn!("structured fallback failed: {e}");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_blocks_are_extracted_in_order() {
        let response = "Here is the query you need:\n\
                        ```sql\nSELECT * FROM users;\n```\n\
                        And a second one:\n\
                        ```\nSELECT 1;\n```\n";

        let segments = extract_queries(response);
        assert_eq!(
            segments,
            vec![
                (false, "Here is the query you need:".to_string()),
                (true, "SELECT * FROM users;".to_string()),
                (false, "And a second one:".to_string()),
                (true, "SELECT 1;".to_string()),
            ]
        );
    }

    #[test]
    fn plain_prose_has_no_queries() {
        let segments = extract_queries("No data needed here.");
        assert_eq!(segments, vec![(false, "No data needed here.".to_string())]);
    }

    #[test]
    fn unterminated_fence_is_still_a_query() {
        let segments = extract_queries("```sql\nSELECT 2;");
        assert_eq!(segments, vec![(true, "SELECT 2;".to_string())]);
    }

    #[test]
    fn empty_blocks_are_dropped() {
        let segments = extract_queries("```\n```\ntext");
        assert_eq!(segments, vec![(false, "text".to_string())]);
    }
}
