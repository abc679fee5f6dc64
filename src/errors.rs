//! Typed error hierarchy for FlowBoard.
//!
//! - `RelayError`: chat relay and model gateway failures
//! - `StoreError`: task store failures (local database or board service)
//! - `AuthError`: auth service failures
//! - `ChatError`: a client chat exchange that produced no stream

use thiserror::Error;
use uuid::Uuid;

/// Errors from the chat relay. The `Display` text is what the client sees in
/// the `{"error": ...}` body, so upstream details stay out of it.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Rate limits exceeded")]
    RateLimited,

    #[error("Payment required")]
    QuotaExhausted,

    #[error("AI_GATEWAY_API_KEY is not configured")]
    NotConfigured,

    #[error("AI gateway error")]
    Upstream {
        status: Option<u16>,
        detail: String,
    },
}

impl RelayError {
    /// Map a non-success upstream status onto the relay taxonomy.
    pub fn from_upstream_status(status: u16, detail: impl Into<String>) -> Self {
        match status {
            429 => Self::RateLimited,
            402 => Self::QuotaExhausted,
            _ => Self::Upstream {
                status: Some(status),
                detail: detail.into(),
            },
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::RateLimited => 429,
            Self::QuotaExhausted => 402,
            Self::NotConfigured | Self::Upstream { .. } => 500,
        }
    }
}

/// Errors from a task store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Task {id} not found")]
    TaskNotFound { id: Uuid },

    #[error("Invalid task: {0}")]
    Invalid(String),

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Board service returned {status}: {message}")]
    Service { status: u16, message: String },

    #[error("Board service request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Errors from the external auth service.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing or invalid credentials")]
    Unauthorized,

    #[error("Auth service returned {status}: {message}")]
    Service { status: u16, message: String },

    #[error("Auth service request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Why a chat exchange failed, as shown to the user.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Rate limit exceeded, please try again later.")]
    RateLimited,

    #[error("AI credits exhausted. Please add funds.")]
    QuotaExhausted,

    #[error("Failed to send message")]
    Failed { detail: String },
}
