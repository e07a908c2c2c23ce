//! Chatframe wire format.
//!
//! Every control message on the wire is a fixed-length ASCII frame of
//! [`FRAME_LEN`] bytes carrying `VERB` or `VERB ARGS`, right-padded with NUL
//! bytes. File payloads are the only exception: a `RECVF`/`RECVF4`/`RECV`
//! header frame is followed on the same connection by exactly `size` raw
//! bytes with no additional framing.
//!
//! # Components
//!
//! - [`Verb`]: the enumerated command vocabulary with exact-match lookup
//! - [`Message`]: typed parse/format of each verb's argument string
//! - [`ProtocolError`]: decode/encode failures (all fatal for the offending
//!   connection)
//!
//! Decoding strips trailing NUL padding and ASCII whitespace before matching
//! the verb, so `LOGOUT`, `LOGOUT\n` and a padded frame all decode the same
//! way. Encoders always emit the bare verb with no trailing whitespace.

#![forbid(unsafe_code)]

mod errors;
mod message;
mod verb;

pub use errors::ProtocolError;
pub use message::{ANON_MARKER, FRAME_LEN, Message};
pub use verb::Verb;
