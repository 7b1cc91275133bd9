//! Error handling for the GameStream protocol client
//!
//! This module provides a single error type for all protocol operations.
//! Errors from underlying libraries are converted automatically using
//! `thiserror`; domain errors carry the classification a caller needs to
//! decide between retrying, re-pairing and surfacing the failure.
//!
//! ## Error Categories
//!
//! - Transport: connection, DNS and timeout failures on any plane
//! - Protocol: non-success status lines and malformed response documents
//! - Authentication: a pairing-phase signature or status check failed
//!   against a foreign or misbehaving host
//! - WrongPin: the handshake completed but the shared PIN did not match
//! - Capability: the host does not advertise a required feature
//! - State: the operation is invalid in the current lifecycle state

use thiserror::Error;

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur during protocol operations
///
/// Most library errors convert automatically via the `From` trait:
/// - `std::io::Error` → `ClientError::Io`
/// - `quick_xml::DeError` → `ClientError::Xml`
/// - `hex::FromHexError` → `ClientError::Hex`
/// - `openssl::error::ErrorStack` → `ClientError::Crypto`
/// - `reqwest::Error` → `ClientError::Timeout` or `ClientError::Transport`
#[derive(Error, Debug)]
pub enum ClientError {
    /// I/O error (file system, sockets)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection-level failure talking to the host
    #[error("transport error: {0}")]
    Transport(String),

    /// A bounded network round did not complete in time
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Non-success status or otherwise malformed exchange
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Response document could not be deserialized
    #[error("malformed response document: {0}")]
    Xml(#[from] quick_xml::DeError),

    /// A hex-encoded wire field did not decode
    #[error("invalid hex payload: {0}")]
    Hex(#[from] hex::FromHexError),

    /// OpenSSL failure (key generation, AES, signatures)
    #[error("crypto error: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),

    /// A pairing-phase response or signature failed verification
    ///
    /// This indicates a corrupt or foreign host, not a mistyped PIN.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// The handshake ran to the PIN check and the PIN did not match
    #[error("wrong PIN")]
    WrongPin,

    /// The host does not support a requested stream feature
    #[error("host capability missing: {0}")]
    Capability(String),

    /// Operation invalid in the current lifecycle state
    #[error("invalid state: {0}")]
    State(String),

    /// Operation requires a paired host
    #[error("not paired with host")]
    NotPaired,

    /// No client identity exists at the given location
    #[error("client identity not found in {0}")]
    IdentityNotFound(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            ClientError::Timeout(error.to_string())
        } else {
            ClientError::Transport(error.to_string())
        }
    }
}

impl ClientError {
    /// Check if this error is transient and worth retrying
    ///
    /// `WrongPin` is deliberately not listed: retrying requires a new PIN
    /// from the user, not an automatic retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ClientError::Timeout(_) | ClientError::Transport(_) | ClientError::Io(_)
        )
    }

    /// Check if this error requires user action before another attempt
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            ClientError::WrongPin
                | ClientError::NotPaired
                | ClientError::Authentication(_)
                | ClientError::IdentityNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ClientError::Capability("HDR streaming".to_string());
        assert_eq!(error.to_string(), "host capability missing: HDR streaming");

        let error = ClientError::WrongPin;
        assert_eq!(error.to_string(), "wrong PIN");

        let error = ClientError::NotPaired;
        assert_eq!(error.to_string(), "not paired with host");
    }

    #[test]
    fn test_io_error_conversion() {
        use std::io::{Error, ErrorKind};

        let io_error = Error::new(ErrorKind::NotFound, "file not found");
        let error: ClientError = io_error.into();

        assert!(matches!(error, ClientError::Io(_)));
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_recoverability_classification() {
        assert!(ClientError::Timeout("5s elapsed".into()).is_recoverable());
        assert!(ClientError::Transport("connection refused".into()).is_recoverable());
        assert!(!ClientError::WrongPin.is_recoverable());
        assert!(ClientError::WrongPin.requires_user_action());
        assert!(ClientError::NotPaired.requires_user_action());
        assert!(!ClientError::Protocol("bad status".into()).requires_user_action());
    }
}
