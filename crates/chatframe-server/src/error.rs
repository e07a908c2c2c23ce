//! Server runtime errors.

use thiserror::Error;

/// Fatal errors from the server runtime.
///
/// Per-connection failures never surface here; they tear down one connection
/// and the reactor keeps running. These are the errors that stop the process.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Listener or poll failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage could not be prepared at startup.
    #[error("storage error: {0}")]
    Store(#[from] chatframe_core::store::StoreError),
}
