//! Wire-format error types.
//!
//! Every decode failure here is a protocol violation: the connection that
//! produced it is torn down, never retried. Encode failures only occur when
//! a formatted message cannot fit the fixed frame.

use thiserror::Error;

/// Errors produced while encoding or decoding a command frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame bytes before the NUL padding are not valid UTF-8.
    #[error("frame is not valid text")]
    NotText,

    /// The verb token did not match any known verb.
    #[error("unknown verb {0:?}")]
    UnknownVerb(String),

    /// The verb was recognized but its argument string is unusable.
    #[error("malformed {verb} frame: {reason}")]
    Malformed {
        /// Verb whose arguments failed to parse.
        verb: &'static str,
        /// What was wrong with them.
        reason: &'static str,
    },

    /// A transfer size field is not a decimal integer.
    #[error("invalid transfer size {0:?}")]
    InvalidSize(String),

    /// The formatted message does not fit in one frame.
    #[error("message too long for frame: {len} > {max} bytes")]
    Overflow {
        /// Formatted length.
        len: usize,
        /// The frame capacity.
        max: usize,
    },
}
