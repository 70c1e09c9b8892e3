//! Error types and handling for protected viewing sessions
//!
//! The top-level [`Error`] carries the session taxonomy (`AUTH_EXPIRED`,
//! `TRANSPORT_ERROR`, `CORRUPT_DOCUMENT`, `POLICY_DEGRADED`, `THREAT_CONFIRMED`);
//! the sub-categories describe failures reported by external collaborators.

use std::{io, result::Result as StdResult};

use thiserror::Error;

/// Custom result type for viewing-session operations
pub type Result<T> = StdResult<T, Error>;

/// Core error type for viewing-session operations
#[derive(Error, Debug)]
#[non_exhaustive]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    #[error("Session expired: {0}")]
    SessionExpired(String),

    #[error("Not authenticated: no access token available")]
    NotAuthenticated,

    #[error("Login rejected: {0}")]
    LoginRejected(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Corrupt document: {0}")]
    CorruptDocument(String),

    #[error("Policy degraded: {0}")]
    PolicyDegraded(String),

    #[error("Threat confirmed: {0}")]
    ThreatConfirmed(String),

    #[error("Render error: {0}")]
    RenderError(#[from] RenderError),

    #[error("Surface error: {0}")]
    SurfaceError(String),

    #[error("Surface closed")]
    SurfaceClosed,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    #[error("Timeout error: {0}")]
    TimeoutError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl Error {
    /// Stable taxonomy code for display and audit
    pub fn code(&self) -> &'static str {
        match self {
            Error::SessionExpired(_) | Error::NotAuthenticated => "AUTH_EXPIRED",
            Error::LoginRejected(_) => "LOGIN_REJECTED",
            Error::TransportError(_) | Error::TimeoutError(_) => "TRANSPORT_ERROR",
            Error::CorruptDocument(_) => "CORRUPT_DOCUMENT",
            Error::RenderError(_) => "RENDER_FAILED",
            Error::PolicyDegraded(_) => "POLICY_DEGRADED",
            Error::ThreatConfirmed(_) => "THREAT_CONFIRMED",
            Error::SurfaceError(_) | Error::SurfaceClosed => "SURFACE_ERROR",
            Error::ConfigError(_) | Error::InvalidConfiguration(_) => "CONFIG_ERROR",
            Error::StorageError(_) | Error::IoError(_) | Error::SerializationError(_) => {
                "STORAGE_ERROR"
            }
            Error::CryptoError(_) => "CRYPTO_ERROR",
        }
    }

    /// True when the error ends the authenticated session
    pub fn forces_logout(&self) -> bool {
        matches!(self, Error::SessionExpired(_))
    }
}

impl From<ServiceError> for Error {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unauthorized => {
                Error::SessionExpired("request rejected with 401".into())
            }
            ServiceError::Transport(msg) => Error::TransportError(msg),
            ServiceError::Rejected { status, message } => {
                Error::TransportError(format!("server returned {}: {}", status, message))
            }
            ServiceError::Malformed(msg) => {
                Error::TransportError(format!("malformed response: {}", msg))
            }
        }
    }
}

// -------------------- Sub-Error Categories --------------------

/// Failures reported by the auth and document services
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ServiceError {
    #[error("unauthorized (401)")]
    Unauthorized,

    #[error("network failure: {0}")]
    Transport(String),

    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Failures reported by the PDF renderer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RenderError {
    #[error("malformed input: {0}")]
    Malformed(String),

    #[error("unsupported feature: {0}")]
    Unsupported(String),

    #[error("page {0} out of range")]
    PageOutOfRange(u32),

    #[error("no document loaded")]
    NotLoaded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_codes() {
        assert_eq!(Error::SessionExpired("x".into()).code(), "AUTH_EXPIRED");
        assert_eq!(Error::TransportError("x".into()).code(), "TRANSPORT_ERROR");
        assert_eq!(Error::CorruptDocument("x".into()).code(), "CORRUPT_DOCUMENT");
        assert_eq!(Error::PolicyDegraded("x".into()).code(), "POLICY_DEGRADED");
        assert_eq!(Error::ThreatConfirmed("x".into()).code(), "THREAT_CONFIRMED");
    }

    #[test]
    fn test_service_error_mapping() {
        let err: Error = ServiceError::Transport("connection refused".into()).into();
        assert!(matches!(err, Error::TransportError(_)));

        let err: Error = ServiceError::Unauthorized.into();
        assert!(err.forces_logout());

        let err: Error = ServiceError::Rejected { status: 500, message: "boom".into() }.into();
        assert_eq!(err.code(), "TRANSPORT_ERROR");
    }
}
