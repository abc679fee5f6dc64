use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::board::gateway::{DEFAULT_GATEWAY_URL, DEFAULT_MODEL};
use crate::board::server::ServerConfig;

pub const DEFAULT_DB_PATH: &str = ".flowboard/board.db";
pub const DEFAULT_PORT: u16 = 3141;
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3141";

/// Runtime configuration for FlowBoard, read from the environment.
///
/// A `.env` file in the working directory is loaded first when present;
/// variables already set in the process win over it.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardConfig {
    pub auth_url: Option<String>,
    pub public_key: String,
    pub gateway_key: Option<String>,
    pub gateway_url: String,
    pub model: String,
    pub db_path: PathBuf,
    pub port: u16,
    /// Board server the client commands talk to.
    pub server_url: String,
    /// Bearer token for client commands.
    pub token: Option<String>,
}

impl BoardConfig {
    pub fn from_env() -> Result<Self> {
        // A missing .env is normal.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get("FLOWBOARD_PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .with_context(|| format!("Invalid FLOWBOARD_PORT: {}", raw))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            auth_url: get("FLOWBOARD_AUTH_URL"),
            public_key: get("FLOWBOARD_PUBLIC_KEY").unwrap_or_default(),
            gateway_key: get("AI_GATEWAY_API_KEY"),
            gateway_url: get("AI_GATEWAY_URL").unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string()),
            model: get("AI_GATEWAY_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            db_path: get("FLOWBOARD_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            port,
            server_url: get("FLOWBOARD_URL").unwrap_or_else(|| DEFAULT_SERVER_URL.to_string()),
            token: get("FLOWBOARD_TOKEN"),
        })
    }

    /// The auth service URL, required by `serve` and the account commands.
    pub fn require_auth_url(&self) -> Result<&str> {
        self.auth_url
            .as_deref()
            .context("FLOWBOARD_AUTH_URL is not set")
    }

    /// The bearer token, required by the client commands.
    pub fn require_token(&self) -> Result<&str> {
        self.token
            .as_deref()
            .context("FLOWBOARD_TOKEN is not set; run `flowboard login` and export the token")
    }

    pub fn server_config(&self, dev_mode: bool) -> Result<ServerConfig> {
        Ok(ServerConfig {
            port: self.port,
            db_path: self.db_path.clone(),
            dev_mode,
            auth_url: self.require_auth_url()?.to_string(),
            public_key: self.public_key.clone(),
            gateway_url: self.gateway_url.clone(),
            gateway_key: self.gateway_key.clone(),
            model: self.model.clone(),
        })
    }
}
