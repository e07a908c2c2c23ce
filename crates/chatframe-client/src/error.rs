//! Client runtime errors.

use thiserror::Error;

use crate::script::ScriptError;

/// Fatal errors from the client runtime.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Socket or poll failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The input script could not be parsed.
    #[error("script error: {0}")]
    Script(#[from] ScriptError),

    /// Local storage could not be prepared.
    #[error("storage error: {0}")]
    Store(#[from] chatframe_core::store::StoreError),
}
