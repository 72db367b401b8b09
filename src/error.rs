//! LIME error types.

use thiserror::Error;

use crate::envelope::{reason_codes, Reason};

/// LIME protocol errors
#[derive(Error, Debug)]
pub enum LimeError {
    // === Protocol Errors ===
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Session failed: {0}")]
    SessionFailed(Reason),

    // === Transport Errors ===
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Channel closed")]
    Closed,

    #[error("Transport is not connected")]
    NotConnected,

    #[error("Connection reset by peer")]
    PeerReset,

    // === Operation Errors ===
    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Channel is disposed")]
    Disposed,

    // === Credential Errors ===
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    // === Storage Errors ===
    #[error("Storage error: {0}")]
    Storage(String),

    // === Configuration Errors ===
    #[error("Config error: {0}")]
    Config(String),

    // === Standard Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for LIME operations
pub type Result<T> = std::result::Result<T, LimeError>;

impl LimeError {
    /// Reason carried by a session `failed` envelope for this error.
    pub fn to_reason(&self) -> Reason {
        match self {
            LimeError::SessionFailed(reason) => reason.clone(),
            LimeError::Protocol(_) => {
                Reason::new(reason_codes::VALIDATION_INVALID_ENVELOPE, self.to_string())
            }
            LimeError::Timeout(_) => {
                Reason::new(reason_codes::SESSION_NEGOTIATION_TIMEOUT, self.to_string())
            }
            LimeError::Authentication(_) => {
                Reason::new(reason_codes::SESSION_AUTHENTICATION_FAILED, self.to_string())
            }
            LimeError::Authorization(_) => {
                Reason::new(reason_codes::AUTHORIZATION_UNSUPPORTED_OPTION, self.to_string())
            }
            _ => Reason::new(reason_codes::GENERAL_ERROR, self.to_string()),
        }
    }

    /// True when retrying the operation on a fresh channel cannot help.
    ///
    /// Caller cancellation and timeouts are surfaced as-is; the on-demand
    /// channel retry loop only consults listeners for the remaining kinds.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LimeError::Cancelled | LimeError::Timeout(_) | LimeError::Disposed
        )
    }
}
