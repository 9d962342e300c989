//! Runtime error types.

use crate::server_error::DriverError;

/// Errors that can occur in the production runtime.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Invalid bind address or unreadable TLS files. Prevents startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Bind failure or stream I/O.
    ///
    /// May be transient for a single connection or fatal for the endpoint.
    #[error("transport error: {0}")]
    Transport(String),

    /// Undecodable frame header. Fatal for that stream only.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Panicked driver or unexpected state.
    #[error("internal error: {0}")]
    Internal(String),

    /// Wraps errors from the engine driver.
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),
}

impl From<parlor_proto::ProtocolError> for ServerError {
    fn from(err: parlor_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}
