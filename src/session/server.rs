//! Server side of the session state machine.

use uuid::Uuid;

use super::{first_supported, unexpected_session};
use crate::envelope::{
    reason_codes, Authentication, AuthenticationScheme, Identity, Node, Reason, Session,
    SessionCompression, SessionEncryption, SessionState,
};
use crate::error::{LimeError, Result};

/// Credentials extracted from an `authenticating` envelope, awaiting a
/// verdict from the host's [`Authenticator`](super::Authenticator).
#[derive(Debug)]
pub struct AuthenticationRequest {
    pub identity: Identity,
    pub authentication: Authentication,
}

/// Drives a session from the server's perspective.
///
/// Each `process_*` method consumes the client's envelope for one
/// negotiation step and returns the reply to send. A reply in the `failed`
/// state means the machine has reached its terminal state; sending it is
/// the last act on the transport.
pub struct ServerSession {
    id: Uuid,
    state: SessionState,
    node: Node,
    encryption_options: Vec<SessionEncryption>,
    compression_options: Vec<SessionCompression>,
    scheme_options: Vec<AuthenticationScheme>,
    encryption: Option<SessionEncryption>,
    compression: Option<SessionCompression>,
    remote_node: Option<Node>,
}

impl ServerSession {
    /// Create a machine for one inbound transport, identified as `node`.
    pub fn new(node: Node) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::New,
            node,
            encryption_options: vec![SessionEncryption::None],
            compression_options: vec![SessionCompression::None],
            scheme_options: vec![AuthenticationScheme::Guest],
            encryption: None,
            compression: None,
            remote_node: None,
        }
    }

    /// Advertise encryption options, in preference order.
    pub fn with_encryption_options(mut self, options: Vec<SessionEncryption>) -> Self {
        self.encryption_options = options;
        self
    }

    /// Advertise compression options, in preference order.
    pub fn with_compression_options(mut self, options: Vec<SessionCompression>) -> Self {
        self.compression_options = options;
        self
    }

    /// Advertise authentication schemes, in preference order.
    pub fn with_scheme_options(mut self, options: Vec<AuthenticationScheme>) -> Self {
        self.scheme_options = options;
        self
    }

    /// Session id assigned to the client on establishment.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current machine state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The node assigned to the remote peer, after establishment.
    pub fn remote_node(&self) -> Option<&Node> {
        self.remote_node.as_ref()
    }

    /// Encryption agreed during negotiation.
    pub fn negotiated_encryption(&self) -> Option<SessionEncryption> {
        self.encryption
    }

    /// Compression agreed during negotiation.
    pub fn negotiated_compression(&self) -> Option<SessionCompression> {
        self.compression
    }

    /// Process the client's `new` envelope; replies with the negotiation
    /// options.
    pub fn process_new(&mut self, session: &Session) -> Result<Session> {
        if self.state != SessionState::New {
            return Err(LimeError::Session(format!(
                "Cannot process a new session in state {:?}",
                self.state
            )));
        }
        if session.state != SessionState::New {
            return Err(unexpected_session("new", session));
        }

        self.remote_node = session.from.clone();
        self.state = SessionState::Negotiating;

        let mut reply = Session::new(SessionState::Negotiating).with_id(self.id);
        reply.encryption_options = Some(self.encryption_options.clone());
        reply.compression_options = Some(self.compression_options.clone());
        Ok(reply)
    }

    /// Process the client's negotiation choice; replies with the
    /// authentication scheme options, or `failed` (code 31) when the choice
    /// is not among the advertised options.
    pub fn process_negotiation(&mut self, session: &Session) -> Result<Session> {
        if self.state != SessionState::Negotiating {
            return Err(LimeError::Session(format!(
                "Cannot negotiate in state {:?}",
                self.state
            )));
        }
        if session.state != SessionState::Negotiating {
            return Err(unexpected_session("negotiating", session));
        }

        let encryption = session.encryption.unwrap_or(SessionEncryption::None);
        let compression = session.compression.unwrap_or(SessionCompression::None);

        if !self.encryption_options.contains(&encryption)
            || !self.compression_options.contains(&compression)
        {
            return Ok(self.fail(Reason::new(
                reason_codes::AUTHORIZATION_UNSUPPORTED_OPTION,
                "The selected session options are not supported",
            )));
        }

        self.encryption = Some(encryption);
        self.compression = Some(compression);
        self.state = SessionState::Authenticating;

        let mut reply = Session::new(SessionState::Authenticating).with_id(self.id);
        reply.scheme_options = Some(self.scheme_options.clone());
        Ok(reply)
    }

    /// Extract the credentials from the client's `authenticating` envelope.
    ///
    /// The caller validates them (asynchronously) and settles the machine
    /// with [`accept`](Self::accept) or [`reject`](Self::reject).
    pub fn process_authentication(&mut self, session: &Session) -> Result<AuthenticationRequest> {
        if self.state != SessionState::Authenticating {
            return Err(LimeError::Session(format!(
                "Cannot authenticate in state {:?}",
                self.state
            )));
        }
        if session.state != SessionState::Authenticating {
            return Err(unexpected_session("authenticating", session));
        }

        let scheme = session.scheme.ok_or_else(|| {
            LimeError::Protocol("Authenticating session without a scheme".to_string())
        })?;
        if first_supported(&self.scheme_options, &[scheme]).is_none() {
            return Err(LimeError::Authentication(format!(
                "Scheme {scheme:?} is not among the advertised options"
            )));
        }

        let authentication = session.authentication.clone().ok_or_else(|| {
            LimeError::Protocol("Authenticating session without credentials".to_string())
        })?;
        let identity = session
            .from
            .as_ref()
            .map(|node| node.identity())
            .ok_or_else(|| {
                LimeError::Protocol("Authenticating session without an identity".to_string())
            })?;

        Ok(AuthenticationRequest {
            identity,
            authentication,
        })
    }

    /// Accept the credentials; replies `established` with the session id
    /// and the server node, recording the node assigned to the client.
    pub fn accept(&mut self, remote_node: Node) -> Session {
        self.state = SessionState::Established;
        let mut reply = Session::new(SessionState::Established)
            .with_id(self.id)
            .from_node(self.node.clone());
        reply.to = Some(remote_node.clone());
        self.remote_node = Some(remote_node);
        reply
    }

    /// Reject the credentials; the machine fails.
    pub fn reject(&mut self, reason: Reason) -> Session {
        self.fail(reason)
    }

    /// Process the client's `finishing` envelope; replies `finished`.
    pub fn process_finishing(&mut self, session: &Session) -> Result<Session> {
        if self.state != SessionState::Established {
            return Err(LimeError::Session(format!(
                "Cannot finish in state {:?}",
                self.state
            )));
        }
        if session.state != SessionState::Finishing {
            return Err(unexpected_session("finishing", session));
        }

        self.state = SessionState::Finished;
        Ok(Session::new(SessionState::Finished).with_id(self.id))
    }

    /// Fail the session with the given reason; returns the envelope to send.
    pub fn fail(&mut self, reason: Reason) -> Session {
        self.state = SessionState::Failed;
        Session::failed(reason).with_id(self.id)
    }
}
