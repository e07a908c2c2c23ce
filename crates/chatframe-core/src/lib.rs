//! Sans-IO core of the chatframe service.
//!
//! Everything here is deterministic and runtime-agnostic: the engines consume
//! events (`Accepted`, `Frame`, `Body`, `Closed`, ...) and return actions for
//! the caller to execute, without ever touching a socket themselves. The one
//! deliberately IO-shaped piece is [`io`], whose progress trackers wrap any
//! `Read`/`Write` and survive partial transfers across readiness cycles.
//!
//! # Layout
//!
//! - [`io`]: resumable frame receive/send state ([`io::FrameRecv`],
//!   [`io::FrameSend`])
//! - [`table`]: stable-ID connection table with dense iteration
//! - [`store`]: account and file storage traits plus in-memory test doubles
//! - [`session`]: username↔connection registry and credential rules
//! - [`router`]: reply/broadcast formatting for the chat verbs
//! - [`transfer`]: per-connection file-relay state machine
//! - [`server`]: the server engine ([`server::ServerEngine`])
//! - [`client`]: the scripted client engine ([`client::ClientEngine`])

#![forbid(unsafe_code)]

pub mod client;
pub mod io;
pub mod router;
pub mod server;
pub mod session;
pub mod store;
pub mod table;
pub mod transfer;

pub use table::{ConnId, ConnTable};
