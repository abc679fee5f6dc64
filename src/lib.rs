//! FlowBoard: a per-user Kanban board with a streaming AI assistant that can
//! create tasks through tool calls.
//!
//! - [`board`]: the server side (store, auth, chat relay, HTTP routes).
//! - [`client`]: the consumer side (stream decoding, transcript, task cache).

pub mod board;
pub mod client;
pub mod config;
pub mod errors;
