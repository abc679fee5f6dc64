use std::time::Duration;

use futures::StreamExt;

use flowboard_common::models::{ChatRequest, TaskSummary};

use super::consumer::{ConsumerEvent, StreamConsumer};
use super::transcript::Transcript;
use crate::errors::ChatError;

/// Delay before refetching tasks after an exchange that involved a tool
/// call, so the relay's insert has landed.
pub const TOOL_REFRESH_DELAY: Duration = Duration::from_secs(1);

/// Result of one completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeOutcome {
    pub assistant_text: String,
    /// The task list may have changed; schedule a refresh.
    pub tool_activity: bool,
}

/// One user's conversation with the board assistant.
pub struct ChatSession {
    http: reqwest::Client,
    endpoint: String,
    token: String,
    transcript: Transcript,
}

impl ChatSession {
    /// `server_url` is the board server root; the chat route is appended.
    pub fn new(server_url: &str, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: format!("{}/api/chat", server_url.trim_end_matches('/')),
            token: token.into(),
            transcript: Transcript::default(),
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Send `text` with the whole conversation and the current board, and
    /// stream the reply into the transcript. `on_update` sees every event
    /// together with the transcript as it stands after the event.
    pub async fn send<F>(
        &mut self,
        text: &str,
        tasks: &[TaskSummary],
        mut on_update: F,
    ) -> Result<ExchangeOutcome, ChatError>
    where
        F: FnMut(&ConsumerEvent, &Transcript),
    {
        self.transcript.push_user(text);
        let body = ChatRequest {
            messages: self.transcript.messages().to_vec(),
            tasks: tasks.to_vec(),
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Failed {
                detail: e.to_string(),
            })?;

        let status = resp.status();
        match status.as_u16() {
            429 => return Err(ChatError::RateLimited),
            402 => return Err(ChatError::QuotaExhausted),
            _ if !status.is_success() => {
                let detail = resp.text().await.unwrap_or_default();
                tracing::debug!(status = status.as_u16(), body = %detail, "chat request failed");
                return Err(ChatError::Failed {
                    detail: format!("{}: {}", status, detail),
                });
            }
            _ => {}
        }

        let mut consumer = StreamConsumer::default();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => {
                    for event in consumer.feed(&bytes) {
                        self.apply(&consumer, &event, &mut on_update);
                    }
                }
                Err(e) => {
                    tracing::warn!("Chat stream read failed: {}", e);
                    break;
                }
            }
            if consumer.is_done() {
                break;
            }
        }
        for event in consumer.finish() {
            self.apply(&consumer, &event, &mut on_update);
        }

        Ok(ExchangeOutcome {
            assistant_text: consumer.assistant_text().to_string(),
            tool_activity: consumer.saw_tool_call(),
        })
    }

    fn apply<F>(&mut self, consumer: &StreamConsumer, event: &ConsumerEvent, on_update: &mut F)
    where
        F: FnMut(&ConsumerEvent, &Transcript),
    {
        if let ConsumerEvent::Content(_) = event {
            self.transcript.apply_assistant(consumer.assistant_text());
        }
        on_update(event, &self.transcript);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        body::{Body, Bytes},
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Response},
        routing::post,
    };
    use flowboard_common::chunk::{ChatChunk, task_confirmation};
    use flowboard_common::models::{ChatMessage, Role};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Seen {
        requests: Arc<Mutex<Vec<(Option<String>, ChatRequest)>>>,
    }

    async fn fake_relay(status: StatusCode, chunks: Vec<String>) -> (String, Seen) {
        let seen = Seen::default();
        let recorder = seen.clone();
        let app = Router::new().route(
            "/api/chat",
            post(move |headers: HeaderMap, Json(req): Json<ChatRequest>| {
                let recorder = recorder.clone();
                let chunks = chunks.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    recorder.requests.lock().unwrap().push((auth, req));
                    if status != StatusCode::OK {
                        return (status, "{\"error\":\"nope\"}").into_response();
                    }
                    let stream = futures::stream::iter(
                        chunks
                            .into_iter()
                            .map(|c| Ok::<_, std::io::Error>(Bytes::from(c))),
                    );
                    Response::builder()
                        .header("content-type", "text/event-stream")
                        .body(Body::from_stream(stream))
                        .unwrap()
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), seen)
    }

    #[tokio::test]
    async fn test_streamed_reply_becomes_one_assistant_message() {
        let hel = ChatChunk::content("Hel").to_sse_line();
        let lo = ChatChunk::content("lo!").to_sse_line();
        // Split the second record mid-JSON across two network writes.
        let (lo_a, lo_b) = lo.split_at(15);
        let (url, seen) = fake_relay(
            StatusCode::OK,
            vec![hel, lo_a.to_string(), format!("{}data: [DONE]\n", lo_b)],
        )
        .await;

        let mut session = ChatSession::new(&url, "tok");
        let mut updates = Vec::new();
        let outcome = session
            .send("Say hello", &[], |event, transcript| {
                if let ConsumerEvent::Content(_) = event {
                    updates.push(transcript.last_assistant().unwrap_or("").to_string());
                }
            })
            .await
            .unwrap();

        assert_eq!(outcome.assistant_text, "Hello!");
        assert!(!outcome.tool_activity);
        assert_eq!(updates, vec!["Hel", "Hello!"]);
        assert_eq!(
            session.transcript().messages(),
            &[ChatMessage::user("Say hello"), ChatMessage::assistant("Hello!")]
        );

        let requests = seen.requests.lock().unwrap();
        assert_eq!(requests[0].0.as_deref(), Some("Bearer tok"));
        assert_eq!(requests[0].1.messages, vec![ChatMessage::user("Say hello")]);
    }

    #[tokio::test]
    async fn test_second_turn_sends_whole_conversation() {
        let (url, seen) = fake_relay(
            StatusCode::OK,
            vec![format!(
                "{}data: [DONE]\n",
                ChatChunk::content(task_confirmation("Fix logo")).to_sse_line()
            )],
        )
        .await;

        let mut session = ChatSession::new(&format!("{}/", url), "tok");
        session.send("first", &[], |_, _| {}).await.unwrap();
        let outcome = session
            .send(
                "second",
                &[TaskSummary {
                    title: "Fix logo".into(),
                    status: "todo".into(),
                    priority: "high".into(),
                    category: None,
                    due_date: None,
                }],
                |_, _| {},
            )
            .await
            .unwrap();
        assert!(outcome.tool_activity);

        let requests = seen.requests.lock().unwrap();
        let roles: Vec<Role> = requests[1].1.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
        assert_eq!(requests[1].1.tasks.len(), 1);
    }

    #[tokio::test]
    async fn test_error_statuses_become_notices() {
        for (status, expected) in [
            (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded, please try again later."),
            (StatusCode::PAYMENT_REQUIRED, "AI credits exhausted. Please add funds."),
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to send message"),
            (StatusCode::UNAUTHORIZED, "Failed to send message"),
        ] {
            let (url, _) = fake_relay(status, vec![]).await;
            let mut session = ChatSession::new(&url, "tok");
            let err = session.send("hi", &[], |_, _| {}).await.unwrap_err();
            assert_eq!(err.to_string(), expected);
        }
    }

    #[tokio::test]
    async fn test_unreachable_server_fails() {
        let mut session = ChatSession::new("http://127.0.0.1:1", "tok");
        let err = session.send("hi", &[], |_, _| {}).await.unwrap_err();
        assert!(matches!(err, ChatError::Failed { .. }));
    }
}
