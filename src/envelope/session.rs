//! Session envelopes and negotiation options.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::node::Node;
use super::reason::Reason;

/// States of the session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    /// Client opened the transport and introduced itself
    New,
    /// Peers are agreeing on encryption and compression
    Negotiating,
    /// Client is presenting credentials
    Authenticating,
    /// Envelopes flow
    Established,
    /// Graceful termination requested
    Finishing,
    /// Terminated gracefully (terminal)
    Finished,
    /// Terminated with an error (terminal)
    Failed,
}

impl SessionState {
    /// True for `Finished` and `Failed`
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Finished | SessionState::Failed)
    }
}

/// Transport encryption modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionEncryption {
    None,
    Tls,
}

/// Transport compression modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionCompression {
    None,
    Gzip,
}

/// Authentication schemes offered during negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthenticationScheme {
    Guest,
    Plain,
    Key,
    Transport,
    External,
}

/// Credentials presented during the `authenticating` round.
///
/// `Guest` and `Transport` serialize to an empty object; the sibling
/// `scheme` field disambiguates them on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Authentication {
    Plain {
        password: String,
    },
    Key {
        key: String,
    },
    External {
        token: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        issuer: Option<String>,
    },
    Guest {},
    Transport {},
}

impl Authentication {
    /// The scheme this credential belongs to
    pub fn scheme(&self) -> AuthenticationScheme {
        match self {
            Authentication::Plain { .. } => AuthenticationScheme::Plain,
            Authentication::Key { .. } => AuthenticationScheme::Key,
            Authentication::External { .. } => AuthenticationScheme::External,
            Authentication::Guest {} => AuthenticationScheme::Guest,
            Authentication::Transport {} => AuthenticationScheme::Transport,
        }
    }

    fn from_wire(scheme: Option<AuthenticationScheme>, value: Value) -> Option<Self> {
        match scheme {
            Some(AuthenticationScheme::Guest) => Some(Authentication::Guest {}),
            Some(AuthenticationScheme::Transport) => Some(Authentication::Transport {}),
            _ => serde_json::from_value(value).ok(),
        }
    }
}

/// Drives the session state machine between two peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "SessionWire")]
pub struct Session {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Node>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Node>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pp: Option<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption_options: Option<Vec<SessionEncryption>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption: Option<SessionEncryption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_options: Option<Vec<SessionCompression>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<SessionCompression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme_options: Option<Vec<AuthenticationScheme>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme: Option<AuthenticationScheme>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication: Option<Authentication>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
}

// Deserialization detour: `authentication` arrives as raw JSON and is
// resolved against `scheme`, since guest and transport credentials are both
// empty objects on the wire.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionWire {
    id: Option<Uuid>,
    from: Option<Node>,
    to: Option<Node>,
    pp: Option<Node>,
    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
    state: SessionState,
    encryption_options: Option<Vec<SessionEncryption>>,
    encryption: Option<SessionEncryption>,
    compression_options: Option<Vec<SessionCompression>>,
    compression: Option<SessionCompression>,
    scheme_options: Option<Vec<AuthenticationScheme>>,
    scheme: Option<AuthenticationScheme>,
    authentication: Option<Value>,
    reason: Option<Reason>,
}

impl From<SessionWire> for Session {
    fn from(wire: SessionWire) -> Self {
        let authentication = wire
            .authentication
            .and_then(|value| Authentication::from_wire(wire.scheme, value));
        Self {
            id: wire.id,
            from: wire.from,
            to: wire.to,
            pp: wire.pp,
            metadata: wire.metadata,
            state: wire.state,
            encryption_options: wire.encryption_options,
            encryption: wire.encryption,
            compression_options: wire.compression_options,
            compression: wire.compression,
            scheme_options: wire.scheme_options,
            scheme: wire.scheme,
            authentication,
            reason: wire.reason,
        }
    }
}

impl Session {
    /// A bare session envelope in the given state
    pub fn new(state: SessionState) -> Self {
        Self {
            id: None,
            from: None,
            to: None,
            pp: None,
            metadata: None,
            state,
            encryption_options: None,
            encryption: None,
            compression_options: None,
            compression: None,
            scheme_options: None,
            scheme: None,
            authentication: None,
            reason: None,
        }
    }

    /// A `failed` envelope with the given reason
    pub fn failed(reason: Reason) -> Self {
        Self {
            reason: Some(reason),
            ..Self::new(SessionState::Failed)
        }
    }

    /// Set the session id
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    /// Set the originating node
    pub fn from_node(mut self, from: Node) -> Self {
        self.from = Some(from);
        self
    }

    /// Set the credentials and matching scheme
    pub fn with_authentication(mut self, authentication: Authentication) -> Self {
        self.scheme = Some(authentication.scheme());
        self.authentication = Some(authentication);
        self
    }
}
