//! Shared types for the FlowBoard relay and its clients.
//!
//! | Module   | Responsibility                                              |
//! |----------|-------------------------------------------------------------|
//! | `models` | `Task`, `NewTask`, `TaskPatch`, chat messages, change events |
//! | `chunk`  | Chat-completion delta records and the confirmation chunk    |
//! | `sse`    | Incremental UTF-8 decoding, line splitting, record classes  |

pub mod chunk;
pub mod models;
pub mod sse;
