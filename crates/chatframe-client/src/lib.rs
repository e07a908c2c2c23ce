//! Chatframe scripted client runtime.
//!
//! Parses a line-oriented command script and replays it against a chatframe
//! server through a single-threaded `mio` reactor, handling the auxiliary
//! upload/download legs of the file relay along the way. See
//! [`reactor::ClientReactor`].

#![forbid(unsafe_code)]

pub mod error;
pub mod reactor;
pub mod script;

pub use error::ClientError;
pub use reactor::ClientReactor;
pub use script::{ScriptCommand, parse_script};
