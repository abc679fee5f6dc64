//! FlowBoard server: task board REST API and the streaming chat relay.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │          │ <─────── │    ├─ api.rs   (handlers, AppState, AuthUser)    │
//! └──────────┘ SSE / WS │    └─ ws.rs    (change socket, ping/pong)        │
//!                       │         │                                        │
//!                       │         │ POST /api/chat                         │
//!                       │         v                                        │
//!                       │  relay.rs  (ToolCallInterceptor, relay_stream)   │
//!                       │         │                 │                      │
//!                       │         │ open_stream()   │ TaskStore::insert()  │
//!                       │         v                 v                      │
//!                       │  gateway.rs          store.rs ── db.rs (SQLite)  │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module    | Responsibility                                             |
//! |-----------|------------------------------------------------------------|
//! | `auth`    | GoTrue-compatible auth client, `Authenticator` trait       |
//! | `tools`   | `create_task` tool declaration and argument defaults       |
//! | `prompt`  | System prompt with the caller's board summary              |
//!
//! ## Chat Request Flow
//!
//! 1. `AuthUser` resolves the bearer token through the auth service; a
//!    missing or rejected token is a 401 and nothing else happens.
//! 2. `relay::build_upstream_request()` prepends the system prompt and
//!    declares `create_task`.
//! 3. `ChatGateway::open_stream()` maps 429/402/other failures to
//!    `RelayError` before any byte is streamed.
//! 4. `relay_stream()` re-emits upstream lines as they arrive, suppressing
//!    tool-call deltas. On `[DONE]` it inserts the task for the caller and
//!    writes the confirmation chunk ahead of `[DONE]`.
//! 5. The insert broadcasts a `TaskChange`, which reaches the caller's
//!    `/api/tasks/changes` feed and `/ws` socket.

pub mod api;
pub mod auth;
pub mod db;
pub mod gateway;
pub mod prompt;
pub mod relay;
pub mod server;
pub mod store;
pub mod tools;
pub mod ws;
