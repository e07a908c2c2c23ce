//! Chatframe server runtime.
//!
//! Pairs the sans-IO engine from `chatframe-core` with a single-threaded
//! `mio` reactor: one poll loop multiplexing the listener, every control
//! connection, and every auxiliary transfer leg. See [`reactor::Server`].

#![forbid(unsafe_code)]

pub mod error;
pub mod reactor;

pub use error::ServerError;
pub use reactor::Server;
