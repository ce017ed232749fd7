use std::fmt;

use thiserror::Error;

/// Which part of a registry record failed to decode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    /// Raw create/update request payload
    Payload,
    NonSecret,
    Secret,
    Extras,
}

impl fmt::Display for BlobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BlobKind::Payload => "payload",
            BlobKind::NonSecret => "non_secret",
            BlobKind::Secret => "secret",
            BlobKind::Extras => "extras",
        };
        f.write_str(s)
    }
}

/// Errors raised while constructing or operating on a registry handle
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The type tag does not name a known provider
    #[error("registry type: {0}, not supported")]
    UnsupportedType(String),

    /// The payload declares a different registry type than the one requested
    #[error("registry type mismatch: payload declares '{declared}', expected '{expected}'")]
    TypeMismatch { declared: String, expected: String },

    /// A payload or stored blob could not be decoded
    #[error("failed to decode registry {part}: {source}")]
    Decode {
        part: BlobKind,
        #[source]
        source: serde_json::Error,
    },

    /// Required fields are missing or malformed
    #[error("invalid registry configuration: {0}")]
    Validation(String),

    /// The cipher failed; the handle is left untouched
    #[error("encryption failed: {0:#}")]
    Encryption(anyhow::Error),

    /// The registry rejected the credentials
    #[error("authentication failed for {registry}: {message}")]
    Auth { registry: String, message: String },

    /// The registry could not be reached
    #[error("network error talking to {registry}: {message}")]
    Network { registry: String, message: String },

    /// The registry answered with something we could not use
    #[error("unexpected response from {registry}: {message}")]
    Response { registry: String, message: String },

    /// The operation is not available for this registry configuration
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl RegistryError {
    pub(crate) fn decode(part: BlobKind, source: serde_json::Error) -> Self {
        Self::Decode { part, source }
    }

    pub(crate) fn network(registry: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::Network {
            registry: registry.into(),
            message: err.to_string(),
        }
    }

    pub(crate) fn auth(registry: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Auth {
            registry: registry.into(),
            message: message.into(),
        }
    }

    pub(crate) fn response(registry: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Response {
            registry: registry.into(),
            message: message.into(),
        }
    }
}

pub type Result<T, E = RegistryError> = std::result::Result<T, E>;
