//! Client for the external GoTrue-compatible auth service.
//!
//! FlowBoard never stores credentials. Sign-up, sign-in and sign-out are
//! forwarded to the auth service, and bearer tokens presented to the board
//! are resolved by asking that service who they belong to.

use async_trait::async_trait;
use axum::http::{HeaderMap, header::AUTHORIZATION};
use serde::{Deserialize, Serialize};

use crate::errors::AuthError;

const BEARER_PREFIX: &str = "Bearer ";

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

/// Resolves a bearer token to the user it was issued to.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn resolve_bearer(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Token from an `Authorization: Bearer <token>` header. Any other scheme,
/// or an empty token, yields `None`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix(BEARER_PREFIX)?.trim();
    if token.is_empty() { None } else { Some(token) }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: UserMetadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserMetadata {
    #[serde(default)]
    pub display_name: Option<String>,
}

impl From<UserRecord> for Identity {
    fn from(user: UserRecord) -> Self {
        Self {
            user_id: user.id,
            email: user.email,
            display_name: user.user_metadata.display_name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    pub user: UserRecord,
}

/// Sign-up answers with a session when email confirmation is off, and with
/// the bare user record while confirmation is pending.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SignUpOutcome {
    Session(Session),
    PendingConfirmation(UserRecord),
}

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct SignUpRequest<'a> {
    email: &'a str,
    password: &'a str,
    data: SignUpData<'a>,
}

#[derive(Serialize)]
struct SignUpData<'a> {
    display_name: &'a str,
}

#[derive(Clone)]
pub struct AuthClient {
    http: reqwest::Client,
    base_url: String,
    public_key: String,
}

impl AuthClient {
    pub fn new(base_url: impl Into<String>, public_key: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, public_key)
    }

    pub fn with_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        public_key: impl Into<String>,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            public_key: public_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<SignUpOutcome, AuthError> {
        let body = SignUpRequest {
            email,
            password,
            data: SignUpData { display_name },
        };
        let resp = self
            .http
            .post(self.url("signup"))
            .header("apikey", &self.public_key)
            .json(&body)
            .send()
            .await?;
        Ok(expect_success(resp).await?.json().await?)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let resp = self
            .http
            .post(self.url("token"))
            .query(&[("grant_type", "password")])
            .header("apikey", &self.public_key)
            .json(&Credentials { email, password })
            .send()
            .await?;
        Ok(expect_success(resp).await?.json().await?)
    }

    pub async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        let resp = self
            .http
            .post(self.url("logout"))
            .header("apikey", &self.public_key)
            .bearer_auth(access_token)
            .send()
            .await?;
        expect_success(resp).await?;
        Ok(())
    }

    pub async fn current_user(&self, access_token: &str) -> Result<UserRecord, AuthError> {
        let resp = self
            .http
            .get(self.url("user"))
            .header("apikey", &self.public_key)
            .bearer_auth(access_token)
            .send()
            .await?;
        Ok(expect_success(resp).await?.json().await?)
    }
}

#[async_trait]
impl Authenticator for AuthClient {
    async fn resolve_bearer(&self, token: &str) -> Result<Identity, AuthError> {
        self.current_user(token).await.map(Identity::from)
    }
}

/// Pass 2xx responses through; map 401/403 to `Unauthorized` and anything
/// else to `Service` with the service's own message.
async fn expect_success(resp: reqwest::Response) -> Result<reqwest::Response, AuthError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(AuthError::Unauthorized);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(AuthError::Service {
        status: status.as_u16(),
        message: service_message(&body),
    })
}

/// GoTrue reports errors under several keys depending on the endpoint.
fn service_message(body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    parsed
        .as_ref()
        .and_then(|v| {
            ["error_description", "msg", "message", "error"]
                .iter()
                .find_map(|key| v.get(*key).and_then(|m| m.as_str()))
        })
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string())
}
