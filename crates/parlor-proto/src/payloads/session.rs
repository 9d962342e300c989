//! Session management payloads.

use serde::{Deserialize, Serialize};

/// Connection handshake.
///
/// `credential` is an opaque identity claim. The server accepts it without
/// verification; see the identity resolver for the accepted shape.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Hello {
    /// Raw credential bytes, usually a JSON `{"userId", "username"}` object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<Vec<u8>>,
}

impl Hello {
    /// Handshake carrying a credential.
    pub fn with_credential(credential: impl Into<Vec<u8>>) -> Self {
        Self { credential: Some(credential.into()) }
    }

    /// Anonymous handshake.
    #[must_use]
    pub fn anonymous() -> Self {
        Self { credential: None }
    }
}

/// Graceful disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goodbye {
    /// Free-form reason, logged by the server
    pub reason: String,
}
