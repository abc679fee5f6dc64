//! Streaming relay between the model gateway and the chat client.
//!
//! Upstream bytes are split into lines as they arrive and every line is
//! re-emitted in order, except tool-call deltas, which are held back and
//! accumulated. When the `[DONE]` record arrives a completed `create_task`
//! call is executed against the caller's task store and a synthesized
//! confirmation chunk is written just before `[DONE]` is forwarded.

use std::sync::Arc;

use axum::body::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;

use flowboard_common::chunk::{ChatChunk, Delta, ToolCallDelta, task_confirmation};
use flowboard_common::models::{ChatMessage, Role, TaskSummary};
use flowboard_common::sse::{LineBuffer, SseLine, classify};

use super::gateway::{ByteStream, UpstreamRequest};
use super::prompt::system_prompt;
use super::store::TaskStore;
use super::tools::{CREATE_TASK, CreateTaskArgs, create_task_tool};

/// Build the upstream request: system prompt first, then the conversation.
pub fn build_upstream_request(
    model: &str,
    conversation: Vec<ChatMessage>,
    tasks: &[TaskSummary],
) -> UpstreamRequest {
    let mut messages = Vec::with_capacity(conversation.len() + 1);
    messages.push(ChatMessage::system(system_prompt(tasks)));
    messages.extend(
        conversation
            .into_iter()
            .filter(|m| m.role != Role::System),
    );
    UpstreamRequest {
        model: model.to_string(),
        messages,
        stream: true,
        tools: vec![create_task_tool()],
    }
}

/// A tool call whose fragments have all arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedToolCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub enum ToolCallState {
    #[default]
    Idle,
    Accumulating {
        index: Option<u32>,
        name: Option<String>,
        arguments: String,
    },
    Completed,
}

/// What to do with one upstream line.
#[derive(Debug, PartialEq, Eq)]
pub enum LineAction {
    Forward,
    Suppress,
    /// `[DONE]` arrived. Carries the tool call to run before forwarding it,
    /// at most once per stream.
    Done(Option<CompletedToolCall>),
}

#[derive(Debug, Default)]
pub struct ToolCallInterceptor {
    state: ToolCallState,
}

impl ToolCallInterceptor {
    pub fn state(&self) -> &ToolCallState {
        &self.state
    }

    pub fn observe(&mut self, line: &str) -> LineAction {
        let payload = match classify(line) {
            SseLine::Blank | SseLine::Comment | SseLine::Other => return LineAction::Forward,
            SseLine::Done => return LineAction::Done(self.complete()),
            SseLine::Data(payload) => payload,
        };

        let record: Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Forwarding malformed stream record: {}", e);
                return LineAction::Forward;
            }
        };

        let delta = Delta::from_record(&record);
        match delta.tool_calls {
            Some(calls) => {
                for call in calls {
                    self.accumulate(call);
                }
                LineAction::Suppress
            }
            None => LineAction::Forward,
        }
    }

    fn accumulate(&mut self, call: ToolCallDelta) {
        let (name, fragment) = match call.function {
            Some(f) => (f.name.filter(|n| !n.is_empty()), f.arguments),
            None => (None, None),
        };

        match &mut self.state {
            ToolCallState::Idle => {
                self.state = ToolCallState::Accumulating {
                    index: call.index,
                    name,
                    arguments: fragment.unwrap_or_default(),
                };
            }
            ToolCallState::Accumulating {
                index,
                name: current,
                arguments,
            } => {
                if let (Some(tracked), Some(got)) = (*index, call.index) {
                    if tracked != got {
                        tracing::warn!(index = got, "Dropping fragment of a second tool call");
                        return;
                    }
                }
                if index.is_none() {
                    *index = call.index;
                }
                if current.is_none() {
                    *current = name;
                }
                if let Some(fragment) = fragment {
                    arguments.push_str(&fragment);
                }
            }
            ToolCallState::Completed => {
                tracing::warn!("Ignoring tool call delta after stream completion");
            }
        }
    }

    fn complete(&mut self) -> Option<CompletedToolCall> {
        match std::mem::replace(&mut self.state, ToolCallState::Completed) {
            ToolCallState::Accumulating {
                name: Some(name),
                arguments,
                ..
            } => Some(CompletedToolCall { name, arguments }),
            ToolCallState::Accumulating { name: None, .. } => {
                tracing::warn!("Dropping tool call without a function name");
                None
            }
            ToolCallState::Idle | ToolCallState::Completed => None,
        }
    }

    /// The stream ended without `[DONE]`. Returns whatever was half-built so
    /// the caller can report it; it is never executed.
    pub fn abandon(&mut self) -> Option<(Option<String>, String)> {
        match std::mem::replace(&mut self.state, ToolCallState::Completed) {
            ToolCallState::Accumulating {
                name, arguments, ..
            } => Some((name, arguments)),
            _ => None,
        }
    }
}

/// Re-stream `upstream`, executing tool calls through `tasks`.
///
/// The output is produced incrementally. A read error ends the stream after
/// it is logged; the client sees whatever was already forwarded.
pub fn relay_stream(
    mut upstream: ByteStream,
    tasks: Arc<dyn TaskStore>,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    async_stream::stream! {
        let mut lines = LineBuffer::default();
        let mut interceptor = ToolCallInterceptor::default();

        while let Some(chunk) = upstream.next().await {
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!("AI gateway stream read failed: {:#}", e);
                    break;
                }
            };
            lines.push(&bytes);
            while let Some(line) = lines.next_line() {
                for out in handle_line(&mut interceptor, &line, tasks.as_ref()).await {
                    yield Ok(out);
                }
            }
        }

        if let Some(rest) = lines.finish() {
            for out in handle_line(&mut interceptor, &rest, tasks.as_ref()).await {
                yield Ok(out);
            }
        }

        if let Some((name, arguments)) = interceptor.abandon() {
            tracing::warn!(
                tool = name.as_deref().unwrap_or(""),
                arguments_len = arguments.len(),
                "Stream ended without [DONE]; discarding tool call"
            );
        }
    }
}

async fn handle_line(
    interceptor: &mut ToolCallInterceptor,
    line: &str,
    tasks: &dyn TaskStore,
) -> Vec<Bytes> {
    let forwarded = || Bytes::from(format!("{}\n", line));
    match interceptor.observe(line) {
        LineAction::Forward => vec![forwarded()],
        LineAction::Suppress => Vec::new(),
        LineAction::Done(call) => {
            let mut out = Vec::with_capacity(2);
            if let Some(call) = call {
                if let Some(confirmation) = execute_tool_call(call, tasks).await {
                    out.push(confirmation);
                }
            }
            out.push(forwarded());
            out
        }
    }
}

/// Run a completed call. Returns the confirmation chunk to emit, if any.
async fn execute_tool_call(call: CompletedToolCall, tasks: &dyn TaskStore) -> Option<Bytes> {
    if call.name != CREATE_TASK {
        tracing::warn!(tool = %call.name, "Ignoring call to unknown tool");
        return None;
    }

    let new_task = match CreateTaskArgs::parse(&call.arguments).and_then(|a| a.into_new_task()) {
        Ok(task) => task,
        Err(e) => {
            tracing::warn!("Failed to parse tool call: {}", e);
            return None;
        }
    };

    let title = new_task.title.clone();
    match tasks.insert(new_task).await {
        Ok(task) => tracing::info!(task_id = %task.id, title = %task.title, "Task created from chat"),
        // The assistant still confirms; the board simply will not show it.
        Err(e) => tracing::warn!(title = %title, "Failed to create task: {}", e),
    }
    Some(Bytes::from(ChatChunk::content(task_confirmation(&title)).to_sse_line()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StoreError;
    use async_trait::async_trait;
    use flowboard_common::models::{Category, NewTask, Priority, Task, TaskPatch, TaskStatus};
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingStore {
        inserted: Mutex<Vec<NewTask>>,
        fail: bool,
    }

    #[async_trait]
    impl TaskStore for RecordingStore {
        async fn list(&self) -> Result<Vec<Task>, StoreError> {
            Ok(Vec::new())
        }

        async fn insert(&self, task: NewTask) -> Result<Task, StoreError> {
            self.inserted.lock().unwrap().push(task.clone());
            if self.fail {
                return Err(StoreError::Database(anyhow::anyhow!("disk full")));
            }
            Ok(Task {
                id: Uuid::new_v4(),
                user_id: "user-1".into(),
                title: task.title,
                description: task.description,
                status: task.status,
                priority: task.priority,
                category: task.category,
                due_date: task.due_date,
                position: task.position,
                created_at: String::new(),
                updated_at: String::new(),
            })
        }

        async fn update(&self, id: Uuid, _patch: TaskPatch) -> Result<Task, StoreError> {
            Err(StoreError::TaskNotFound { id })
        }

        async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
            Err(StoreError::TaskNotFound { id })
        }
    }

    fn content_line(text: &str) -> String {
        ChatChunk::content(text).to_sse_line()
    }

    fn tool_line(index: u32, name: Option<&str>, args: &str) -> String {
        let mut function = serde_json::json!({ "arguments": args });
        if let Some(name) = name {
            function["name"] = name.into();
        }
        format!(
            "data: {}\n",
            serde_json::json!({"choices":[{"delta":{"tool_calls":[{"index":index,"function":function}]}}]})
        )
    }

    async fn run_relay(chunks: Vec<Vec<u8>>, store: Arc<RecordingStore>) -> String {
        let upstream: ByteStream = futures::stream::iter(
            chunks.into_iter().map(|c| Ok::<_, anyhow::Error>(Bytes::from(c))),
        )
        .boxed();
        let out: Vec<Bytes> = relay_stream(upstream, store)
            .map(|r| r.unwrap())
            .collect()
            .await;
        String::from_utf8(out.concat()).unwrap()
    }

    fn split_every(body: &str, n: usize) -> Vec<Vec<u8>> {
        body.as_bytes().chunks(n).map(|c| c.to_vec()).collect()
    }

    #[test]
    fn test_upstream_request_puts_system_prompt_first() {
        let req = build_upstream_request(
            "m",
            vec![ChatMessage::system("ignore me"), ChatMessage::user("hi")],
            &[],
        );
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0].role, Role::System);
        assert!(req.messages[0].content.contains("no tasks"));
        assert_eq!(req.messages[1], ChatMessage::user("hi"));
        assert!(req.stream);
        assert_eq!(req.tools.len(), 1);
    }

    #[test]
    fn test_interceptor_state_transitions() {
        let mut interceptor = ToolCallInterceptor::default();
        assert_eq!(interceptor.observe(&content_line("hi")), LineAction::Forward);
        assert_eq!(*interceptor.state(), ToolCallState::Idle);

        let first = tool_line(0, Some("create_task"), "{\"title\":");
        assert_eq!(interceptor.observe(first.trim_end()), LineAction::Suppress);
        let second = tool_line(0, None, "\"A\"}");
        assert_eq!(interceptor.observe(second.trim_end()), LineAction::Suppress);
        assert!(matches!(
            interceptor.state(),
            ToolCallState::Accumulating { arguments, .. } if arguments == "{\"title\":\"A\"}"
        ));

        assert_eq!(
            interceptor.observe("data: [DONE]"),
            LineAction::Done(Some(CompletedToolCall {
                name: "create_task".into(),
                arguments: "{\"title\":\"A\"}".into(),
            }))
        );
        assert_eq!(*interceptor.state(), ToolCallState::Completed);
        // Fires at most once.
        assert_eq!(interceptor.observe("data: [DONE]"), LineAction::Done(None));
    }

    #[test]
    fn test_interceptor_first_name_wins_and_other_indices_dropped() {
        let mut interceptor = ToolCallInterceptor::default();
        interceptor.observe(tool_line(0, Some("create_task"), "{\"ti").trim_end());
        interceptor.observe(tool_line(0, Some("other_name"), "tle\":\"X\"}").trim_end());
        interceptor.observe(tool_line(1, Some("create_task"), "{\"title\":\"Y\"}").trim_end());
        match interceptor.observe("data: [DONE]") {
            LineAction::Done(Some(call)) => {
                assert_eq!(call.name, "create_task");
                assert_eq!(call.arguments, "{\"title\":\"X\"}");
            }
            other => panic!("Expected completed call, got {:?}", other),
        }
    }

    #[test]
    fn test_interceptor_suppresses_irregular_tool_call_records() {
        let mut interceptor = ToolCallInterceptor::default();
        let object_arguments = r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"name":"create_task","arguments":{"title":"X"}}}]}}]}"#;
        assert_eq!(interceptor.observe(object_arguments), LineAction::Suppress);
        assert_eq!(
            interceptor.state(),
            &ToolCallState::Accumulating {
                index: Some(0),
                name: Some("create_task".into()),
                arguments: String::new(),
            }
        );

        let string_index = r#"data: {"choices":[{"delta":{"tool_calls":[{"index":"0","function":{"arguments":"{\"title\":\"X\"}"}}]}}]}"#;
        assert_eq!(interceptor.observe(string_index), LineAction::Suppress);
        for line in [
            r#"data: {"choices":[{"delta":{"tool_calls":[42]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":{"index":0}}}]}"#,
        ] {
            assert_eq!(interceptor.observe(line), LineAction::Suppress, "line {:?}", line);
        }

        match interceptor.observe("data: [DONE]") {
            LineAction::Done(Some(call)) => {
                assert_eq!(call.name, "create_task");
                assert_eq!(call.arguments, "{\"title\":\"X\"}");
            }
            other => panic!("Expected completed call, got {:?}", other),
        }
    }

    #[test]
    fn test_interceptor_forwards_non_tool_lines() {
        let mut interceptor = ToolCallInterceptor::default();
        for line in [
            "",
            ": keep-alive",
            "event: message",
            "data: {not json",
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}",
        ] {
            assert_eq!(interceptor.observe(line), LineAction::Forward, "line {:?}", line);
        }
    }

    #[tokio::test]
    async fn test_fix_logo_tool_call_creates_task_and_confirms() {
        let store = Arc::new(RecordingStore::default());
        let args = r#"{"title":"Fix logo","priority":"high","status":"todo","category":"Design"}"#;
        let body = format!(
            "{}{}{}data: [DONE]\n",
            tool_line(0, Some("create_task"), &args[..12]),
            tool_line(0, None, &args[12..40]),
            tool_line(0, None, &args[40..]),
        );

        let out = run_relay(vec![body.into_bytes()], store.clone()).await;

        let expected = format!(
            "{}data: [DONE]\n",
            content_line("\u{2705} Task \"Fix logo\" created!")
        );
        assert_eq!(out, expected);
        let inserted = store.inserted.lock().unwrap();
        assert_eq!(inserted.len(), 1);
        assert_eq!(inserted[0].title, "Fix logo");
        assert_eq!(inserted[0].priority, Priority::High);
        assert_eq!(inserted[0].status, TaskStatus::Todo);
        assert_eq!(inserted[0].category, Some(Category::Design));
        assert_eq!(inserted[0].due_date, None);
    }

    #[tokio::test]
    async fn test_content_only_stream_is_forwarded_verbatim() {
        let store = Arc::new(RecordingStore::default());
        let body = format!(
            ": ping\r\n{}{}\ndata: [DONE]\n",
            content_line("Hel"),
            content_line("lo!")
        );
        let out = run_relay(split_every(&body, 7), store.clone()).await;
        assert_eq!(out, body.replace("\r\n", "\n"));
        assert!(store.inserted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_output_is_independent_of_chunking() {
        let args = r#"{"title":"Café ☕ menu","priority":"low","status":"in_progress"}"#;
        let body = format!(
            "{}{}{}data: [DONE]\n",
            content_line("Sure, adding ☕"),
            tool_line(0, Some("create_task"), &args[..20]),
            tool_line(0, None, &args[20..]),
        );

        let whole = run_relay(vec![body.clone().into_bytes()], Arc::new(RecordingStore::default())).await;
        for n in [1, 2, 3, 5, 64] {
            let store = Arc::new(RecordingStore::default());
            let out = run_relay(split_every(&body, n), store.clone()).await;
            assert_eq!(out, whole, "chunk size {}", n);
            assert_eq!(store.inserted.lock().unwrap()[0].title, "Café ☕ menu");
        }
    }

    #[tokio::test]
    async fn test_insert_failure_still_confirms() {
        let store = Arc::new(RecordingStore {
            fail: true,
            ..Default::default()
        });
        let body = format!(
            "{}data: [DONE]\n",
            tool_line(0, Some("create_task"), r#"{"title":"Doomed"}"#)
        );
        let out = run_relay(vec![body.into_bytes()], store.clone()).await;
        assert!(out.contains("\u{2705} Task \\\"Doomed\\\" created!"));
        assert!(out.ends_with("data: [DONE]\n"));
        assert_eq!(store.inserted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_arguments_produce_no_chunk() {
        let store = Arc::new(RecordingStore::default());
        let body = format!(
            "{}data: [DONE]\n",
            tool_line(0, Some("create_task"), r#"{"title": oops"#)
        );
        let out = run_relay(vec![body.into_bytes()], store.clone()).await;
        assert_eq!(out, "data: [DONE]\n");
        assert!(store.inserted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tool_is_dropped() {
        let store = Arc::new(RecordingStore::default());
        let body = format!(
            "{}data: [DONE]\n",
            tool_line(0, Some("delete_everything"), "{}")
        );
        let out = run_relay(vec![body.into_bytes()], store.clone()).await;
        assert_eq!(out, "data: [DONE]\n");
        assert!(store.inserted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_line_does_not_halt_stream() {
        let store = Arc::new(RecordingStore::default());
        let body = format!(
            "{}data: {{\"choices\": [oops\n{}data: [DONE]\n",
            content_line("a"),
            content_line("b")
        );
        let out = run_relay(vec![body.clone().into_bytes()], store).await;
        assert_eq!(out, body);
    }

    #[tokio::test]
    async fn test_trailing_line_without_newline_is_flushed() {
        let store = Arc::new(RecordingStore::default());
        let out = run_relay(vec![b"data: [DONE]".to_vec()], store).await;
        assert_eq!(out, "data: [DONE]\n");
    }

    #[tokio::test]
    async fn test_tool_call_without_done_is_discarded() {
        let store = Arc::new(RecordingStore::default());
        let body = format!(
            "{}{}",
            content_line("thinking"),
            tool_line(0, Some("create_task"), r#"{"title":"Half"}"#)
        );
        let out = run_relay(vec![body.into_bytes()], store.clone()).await;
        assert_eq!(out, content_line("thinking"));
        assert!(store.inserted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_error_ends_stream_after_forwarded_lines() {
        let store: Arc<dyn TaskStore> = Arc::new(RecordingStore::default());
        let upstream: ByteStream = futures::stream::iter(vec![
            Ok(Bytes::from(content_line("partial"))),
            Err(anyhow::anyhow!("connection reset")),
            Ok(Bytes::from_static(b"data: [DONE]\n")),
        ])
        .boxed();
        let out: Vec<Bytes> = relay_stream(upstream, store)
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(String::from_utf8(out.concat()).unwrap(), content_line("partial"));
    }
}
