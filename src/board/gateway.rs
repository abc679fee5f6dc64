use async_trait::async_trait;
use axum::body::Bytes;
use futures::{StreamExt, TryStreamExt, stream::BoxStream};
use serde::Serialize;
use serde_json::Value;

use flowboard_common::models::ChatMessage;

use crate::errors::RelayError;

pub const DEFAULT_GATEWAY_URL: &str = "https://ai.gateway.lovable.dev/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "google/gemini-3-flash-preview";

/// Raw upstream body, chunked however the network delivered it.
pub type ByteStream = BoxStream<'static, Result<Bytes, anyhow::Error>>;

/// Chat-completions request body.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub tools: Vec<Value>,
}

/// The language-model API the relay proxies.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// Open a streaming completion. Non-success statuses are mapped to
    /// [`RelayError`] before any body byte is handed out.
    async fn open_stream(&self, request: &UpstreamRequest) -> Result<ByteStream, RelayError>;
}

pub struct HttpGateway {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpGateway {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl ChatGateway for HttpGateway {
    async fn open_stream(&self, request: &UpstreamRequest) -> Result<ByteStream, RelayError> {
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("AI gateway request failed: {}", e);
                RelayError::Upstream {
                    status: None,
                    detail: e.to_string(),
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let code = status.as_u16();
            // Rate-limit and quota answers are mapped without reading the body.
            if code == 429 || code == 402 {
                tracing::warn!(status = code, "AI gateway refused request");
                return Err(RelayError::from_upstream_status(code, ""));
            }
            let detail = resp.text().await.unwrap_or_default();
            tracing::error!(status = code, body = %detail, "AI gateway error");
            return Err(RelayError::from_upstream_status(code, detail));
        }

        tracing::debug!(model = %request.model, "AI gateway stream opened");
        Ok(resp.bytes_stream().map_err(anyhow::Error::from).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, http::StatusCode, routing::post};

    async fn fake_gateway(status: StatusCode, body: &'static str) -> String {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move || async move { (status, body) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/v1/chat/completions", addr)
    }

    fn request() -> UpstreamRequest {
        UpstreamRequest {
            model: DEFAULT_MODEL.into(),
            messages: vec![ChatMessage::user("hi")],
            stream: true,
            tools: vec![],
        }
    }

    #[tokio::test]
    async fn test_status_mapping() {
        for (status, expected) in [
            (StatusCode::TOO_MANY_REQUESTS, 429),
            (StatusCode::PAYMENT_REQUIRED, 402),
            (StatusCode::SERVICE_UNAVAILABLE, 500),
        ] {
            let gateway = HttpGateway::new(fake_gateway(status, "nope").await, "key");
            match gateway.open_stream(&request()).await {
                Err(err) => assert_eq!(err.status_code(), expected),
                Ok(_) => panic!("Expected error for {}", status),
            }
        }
    }

    #[tokio::test]
    async fn test_success_yields_body_bytes() {
        let url = fake_gateway(StatusCode::OK, "data: [DONE]\n").await;
        let gateway = HttpGateway::new(url, "key");
        let mut stream = gateway.open_stream(&request()).await.unwrap();
        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(body, b"data: [DONE]\n");
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_upstream_error() {
        let gateway = HttpGateway::new("http://127.0.0.1:1/v1/chat/completions", "key");
        let err = gateway.open_stream(&request()).await.err().unwrap();
        assert!(matches!(err, RelayError::Upstream { status: None, .. }));
    }

    #[test]
    fn test_request_serializes_openai_shape() {
        let json = serde_json::to_value(request()).unwrap();
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["role"], "user");
    }
}
