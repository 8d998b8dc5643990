use dblens::mock::MockPlugin;
use dblens_core::{
    BackendKind, CancelToken, Column, ConnectionProfile, Credentials, DatabasePlugin, DbError,
};
use dblens_llm::{ChatMessageKind, ChatTurn, ChunkSink, LlmProvider, LlmProviderKind, chat};

/// Provider that replays a canned response and records the prompt.
struct ScriptedProvider {
    response: String,
    prompts: std::sync::Mutex<Vec<String>>,
}

impl ScriptedProvider {
    fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            prompts: std::sync::Mutex::new(Vec::new()),
        }
    }
}

impl LlmProvider for ScriptedProvider {
    fn kind(&self) -> LlmProviderKind {
        LlmProviderKind::OpenAiCompatible
    }

    fn complete(
        &self,
        prompt: &str,
        _model: &str,
        mut sink: Option<&mut dyn ChunkSink>,
        cancel: &CancelToken,
    ) -> Result<String, DbError> {
        cancel.check()?;
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(sink) = sink.as_mut() {
            sink.push(&self.response);
        }
        Ok(self.response.clone())
    }

    fn supported_models(&self) -> Result<Vec<String>, DbError> {
        Ok(vec!["scripted".to_string()])
    }
}

fn mock_connection() -> std::sync::Arc<dyn dblens_core::Connection> {
    let plugin = MockPlugin::new().with_table(
        "users",
        vec![
            Column::new("id", "int").primary(),
            Column::new("name", "text"),
        ],
        vec![
            vec!["1".into(), "alice".into()],
            vec!["2".into(), "bob".into()],
        ],
    );
    let profile = ConnectionProfile::new(
        "mock",
        Credentials::new(BackendKind::Sqlite, "").with_database(":memory:"),
    );
    plugin.connect(&profile, None).unwrap()
}

#[test]
fn chat_interleaves_text_query_and_rows() {
    let conn = mock_connection();
    let provider = ScriptedProvider::new(
        "Here are all users:\n```sql\nSELECT * FROM users;\n```\nDone.",
    );

    let messages = chat(
        conn.as_ref(),
        &provider,
        "scripted",
        "main",
        &[],
        "show me every user",
        &CancelToken::new(),
    )
    .unwrap();

    let kinds: Vec<ChatMessageKind> = messages.iter().map(|m| m.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ChatMessageKind::Text,
            ChatMessageKind::Query,
            ChatMessageKind::Rows,
            ChatMessageKind::Text,
        ]
    );

    assert_eq!(messages[1].text, "SELECT * FROM users;");
    let rows = messages[2].result.as_ref().unwrap();
    assert_eq!(rows.rows.len(), 2);
}

#[test]
fn chat_prompt_includes_schema_and_history() {
    let conn = mock_connection();
    let provider = ScriptedProvider::new("No query needed.");

    let history = vec![ChatTurn {
        role: "user".to_string(),
        content: "earlier question".to_string(),
    }];
    chat(
        conn.as_ref(),
        &provider,
        "scripted",
        "main",
        &history,
        "follow-up",
        &CancelToken::new(),
    )
    .unwrap();

    let prompts = provider.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("users"));
    assert!(prompts[0].contains("id int [primary key]"));
    assert!(prompts[0].contains("earlier question"));
    assert!(prompts[0].contains("follow-up"));
}

#[test]
fn cancelled_chat_returns_cancelled() {
    let conn = mock_connection();
    let provider = ScriptedProvider::new("ignored");
    let cancel = CancelToken::new();
    cancel.cancel();

    assert!(matches!(
        chat(
            conn.as_ref(),
            &provider,
            "scripted",
            "main",
            &[],
            "anything",
            &cancel
        ),
        Err(DbError::Cancelled)
    ));
}

#[test]
fn failed_query_becomes_an_error_message() {
    let conn = mock_connection();
    let provider =
        ScriptedProvider::new("```sql\nSELECT * FROM missing_table_name;\n```");

    let messages = chat(
        conn.as_ref(),
        &provider,
        "scripted",
        "main",
        &[],
        "query a missing table",
        &CancelToken::new(),
    )
    .unwrap();

    assert_eq!(messages[0].kind, ChatMessageKind::Query);
    assert_eq!(messages[1].kind, ChatMessageKind::Text);
    assert!(messages[1].text.contains("query failed"));
}
