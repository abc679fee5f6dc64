//! Client side of FlowBoard: what a board front end does over the network.
//!
//! | Module       | Responsibility                                          |
//! |--------------|---------------------------------------------------------|
//! | `consumer`   | Incremental event-stream consumer with record push-back |
//! | `transcript` | Conversation reducer (replace-last-if-assistant)        |
//! | `session`    | One chat exchange: request, notices, streamed reply     |
//! | `http`       | `TaskStore` over the board's REST routes + change feed  |
//! | `cache`      | In-memory task list, columns, delayed refresh           |

pub mod cache;
pub mod consumer;
pub mod http;
pub mod session;
pub mod transcript;
