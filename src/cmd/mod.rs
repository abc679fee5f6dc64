//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled                               |
//! |-----------|------------------------------------------------|
//! | `serve`   | `Serve`, `InitDb`                              |
//! | `account` | `Signup`, `Login`, `Logout`, `Whoami`          |
//! | `board`   | `Board`, `Watch`, `Add`, `Move`, `Rm`          |
//! | `chat`    | `Chat`                                         |

pub mod account;
pub mod board;
pub mod chat;
pub mod serve;

pub use account::{cmd_login, cmd_logout, cmd_signup, cmd_whoami};
pub use board::{cmd_add, cmd_board, cmd_move, cmd_rm, cmd_watch};
pub use chat::cmd_chat;
pub use serve::{cmd_init_db, cmd_serve};
