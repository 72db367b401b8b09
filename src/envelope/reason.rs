//! Structured failure reasons.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A structured error carried by `failed` sessions, failed notifications and
/// failure command responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reason {
    /// Numeric code; ranges carry meaning (see [`reason_codes`])
    pub code: i32,
    /// Human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Reason {
    /// Create a reason with a description
    pub fn new(code: i32, description: impl Into<String>) -> Self {
        Self {
            code,
            description: Some(description.into()),
        }
    }

    /// Create a reason carrying only a code
    pub fn from_code(code: i32) -> Self {
        Self {
            code,
            description: None,
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{} (code {})", description, self.code),
            None => write!(f, "code {}", self.code),
        }
    }
}

/// Reason codes emitted by the core.
///
/// Ranges: 10-19 session errors, 20-29 validation errors, 30-39
/// authorization errors; everything else is a generic failure.
pub mod reason_codes {
    /// Unspecified failure
    pub const GENERAL_ERROR: i32 = 1;
    /// A negotiation step exceeded its deadline
    pub const SESSION_NEGOTIATION_TIMEOUT: i32 = 12;
    /// Presented credentials were rejected
    pub const SESSION_AUTHENTICATION_FAILED: i32 = 13;
    /// An inbound envelope violated the protocol
    pub const VALIDATION_INVALID_ENVELOPE: i32 = 22;
    /// No mutually supported negotiation option
    pub const AUTHORIZATION_UNSUPPORTED_OPTION: i32 = 31;
}
