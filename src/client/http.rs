use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use flowboard_common::models::{NewTask, Task, TaskChange, TaskPatch, TaskStatus};
use flowboard_common::sse::{LineBuffer, SseLine, classify};

use crate::board::store::TaskStore;
use crate::errors::StoreError;

pub type ChangeStream = BoxStream<'static, Result<TaskChange, StoreError>>;

/// The board server's task routes, acting as the token's owner.
#[derive(Clone)]
pub struct HttpTaskStore {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpTaskStore {
    pub fn new(base_url: &str, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
    }

    /// Drag-and-drop column change.
    pub async fn move_to(&self, id: Uuid, status: TaskStatus) -> Result<Task, StoreError> {
        let resp = self
            .request(Method::PATCH, &format!("/api/tasks/{}/move", id))
            .json(&serde_json::json!({ "status": status }))
            .send()
            .await?;
        json_or_error(resp, Some(id)).await
    }

    /// Follow the caller's change notifications until the server closes the
    /// feed.
    pub async fn changes(&self) -> Result<ChangeStream, StoreError> {
        let resp = self.request(Method::GET, "/api/tasks/changes").send().await?;
        let resp = check_status(resp, None).await?;
        let mut body = resp.bytes_stream();

        let stream = async_stream::stream! {
            let mut lines = LineBuffer::default();
            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(bytes) => lines.push(&bytes),
                    Err(e) => {
                        yield Err(StoreError::Transport(e));
                        break;
                    }
                }
                while let Some(line) = lines.next_line() {
                    if let SseLine::Data(payload) = classify(&line) {
                        match serde_json::from_str::<TaskChange>(payload) {
                            Ok(change) => yield Ok(change),
                            Err(e) => tracing::warn!("Skipping unreadable change notification: {}", e),
                        }
                    }
                }
            }
        };
        Ok(stream.boxed())
    }
}

#[async_trait]
impl TaskStore for HttpTaskStore {
    async fn list(&self) -> Result<Vec<Task>, StoreError> {
        let resp = self.request(Method::GET, "/api/tasks").send().await?;
        json_or_error(resp, None).await
    }

    async fn insert(&self, task: NewTask) -> Result<Task, StoreError> {
        let resp = self
            .request(Method::POST, "/api/tasks")
            .json(&task)
            .send()
            .await?;
        json_or_error(resp, None).await
    }

    async fn update(&self, id: Uuid, patch: TaskPatch) -> Result<Task, StoreError> {
        let resp = self
            .request(Method::PATCH, &format!("/api/tasks/{}", id))
            .json(&patch)
            .send()
            .await?;
        json_or_error(resp, Some(id)).await
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let resp = self
            .request(Method::DELETE, &format!("/api/tasks/{}", id))
            .send()
            .await?;
        check_status(resp, Some(id)).await?;
        Ok(())
    }
}

async fn json_or_error<T: DeserializeOwned>(
    resp: Response,
    id: Option<Uuid>,
) -> Result<T, StoreError> {
    Ok(check_status(resp, id).await?.json().await?)
}

async fn check_status(resp: Response, id: Option<Uuid>) -> Result<Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or(body);

    Err(match (status, id) {
        (StatusCode::NOT_FOUND, Some(id)) => StoreError::TaskNotFound { id },
        (StatusCode::BAD_REQUEST, _) => StoreError::Invalid(message),
        _ => StoreError::Service {
            status: status.as_u16(),
            message,
        },
    })
}
