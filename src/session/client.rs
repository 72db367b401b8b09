//! Client side of the session state machine.

use uuid::Uuid;

use super::{first_supported, unexpected_session};
use crate::envelope::{
    reason_codes, Authentication, Node, Reason, Session, SessionCompression, SessionEncryption,
    SessionState,
};
use crate::error::{LimeError, Result};

/// Drives a session from the client's perspective.
///
/// The client initiates with `new`, echoes the first advertised negotiation
/// option it supports, presents its credentials and waits for the verdict.
pub struct ClientSession {
    state: SessionState,
    id: Option<Uuid>,
    from: Option<Node>,
    local_node: Option<Node>,
    remote_node: Option<Node>,
    supported_encryption: Vec<SessionEncryption>,
    supported_compression: Vec<SessionCompression>,
    encryption: Option<SessionEncryption>,
    compression: Option<SessionCompression>,
    authentication: Authentication,
}

impl ClientSession {
    /// Create a machine presenting the given credentials.
    pub fn new(authentication: Authentication) -> Self {
        Self {
            state: SessionState::New,
            id: None,
            from: None,
            local_node: None,
            remote_node: None,
            supported_encryption: vec![SessionEncryption::None],
            supported_compression: vec![SessionCompression::None],
            encryption: None,
            compression: None,
            authentication,
        }
    }

    /// Announce the client node in the `new` envelope.
    pub fn with_from(mut self, node: Node) -> Self {
        self.from = Some(node);
        self
    }

    /// Encryption modes this client's transport can apply.
    pub fn with_supported_encryption(mut self, options: Vec<SessionEncryption>) -> Self {
        self.supported_encryption = options;
        self
    }

    /// Compression modes this client's transport can apply.
    pub fn with_supported_compression(mut self, options: Vec<SessionCompression>) -> Self {
        self.supported_compression = options;
        self
    }

    /// Current machine state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Session id assigned by the server.
    pub fn id(&self) -> Option<Uuid> {
        self.id
    }

    /// Node assigned to this client on establishment.
    pub fn local_node(&self) -> Option<&Node> {
        self.local_node.as_ref()
    }

    /// The server node, after establishment.
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

    /// The opening `new` envelope.
    pub fn start(&mut self) -> Result<Session> {
        if self.state != SessionState::New {
            return Err(LimeError::Session(format!(
                "Cannot start a session in state {:?}",
                self.state
            )));
        }
        let mut session = Session::new(SessionState::New);
        session.from = self.from.clone();
        Ok(session)
    }

    /// Process the server's negotiation options; replies with the first
    /// advertised option this client supports, or `failed` (code 31) when
    /// there is no intersection.
    pub fn process_negotiating(&mut self, session: &Session) -> Result<Session> {
        if self.state != SessionState::New {
            return Err(LimeError::Session(format!(
                "Cannot negotiate in state {:?}",
                self.state
            )));
        }
        if session.state != SessionState::Negotiating {
            return Err(unexpected_session("negotiating", session));
        }

        self.id = session.id;

        let encryption_options = session
            .encryption_options
            .as_deref()
            .unwrap_or(&[SessionEncryption::None]);
        let compression_options = session
            .compression_options
            .as_deref()
            .unwrap_or(&[SessionCompression::None]);

        let encryption = first_supported(encryption_options, &self.supported_encryption);
        let compression = first_supported(compression_options, &self.supported_compression);
        let (Some(encryption), Some(compression)) = (encryption, compression) else {
            self.state = SessionState::Failed;
            return Ok(Session::failed(Reason::new(
                reason_codes::AUTHORIZATION_UNSUPPORTED_OPTION,
                "No mutually supported session option",
            )));
        };

        self.encryption = Some(encryption);
        self.compression = Some(compression);
        self.state = SessionState::Negotiating;

        let mut reply = Session::new(SessionState::Negotiating);
        reply.id = self.id;
        reply.encryption = Some(encryption);
        reply.compression = Some(compression);
        Ok(reply)
    }

    /// Process the server's scheme options; replies with the credentials.
    pub fn process_authenticating(&mut self, session: &Session) -> Result<Session> {
        if self.state != SessionState::Negotiating {
            return Err(LimeError::Session(format!(
                "Cannot authenticate in state {:?}",
                self.state
            )));
        }
        if session.state != SessionState::Authenticating {
            return Err(unexpected_session("authenticating", session));
        }

        let scheme = self.authentication.scheme();
        let offered = session.scheme_options.as_deref().unwrap_or_default();
        if !offered.contains(&scheme) {
            self.state = SessionState::Failed;
            return Ok(Session::failed(Reason::new(
                reason_codes::AUTHORIZATION_UNSUPPORTED_OPTION,
                format!("Scheme {scheme:?} is not offered by the server"),
            )));
        }

        self.state = SessionState::Authenticating;
        let mut reply = Session::new(SessionState::Authenticating)
            .with_authentication(self.authentication.clone());
        reply.id = self.id;
        reply.from = self.from.clone();
        Ok(reply)
    }

    /// Process the server's verdict.
    pub fn process_established(&mut self, session: &Session) -> Result<()> {
        if self.state != SessionState::Authenticating {
            return Err(LimeError::Session(format!(
                "Cannot establish in state {:?}",
                self.state
            )));
        }
        match session.state {
            SessionState::Established => {
                self.id = session.id;
                self.remote_node = session.from.clone();
                self.local_node = session.to.clone();
                self.state = SessionState::Established;
                Ok(())
            }
            SessionState::Failed => {
                self.state = SessionState::Failed;
                Err(LimeError::SessionFailed(
                    session
                        .reason
                        .clone()
                        .unwrap_or_else(|| Reason::from_code(reason_codes::GENERAL_ERROR)),
                ))
            }
            _ => Err(unexpected_session("established", session)),
        }
    }

    /// The `finishing` envelope requesting graceful termination.
    pub fn finish(&mut self) -> Result<Session> {
        if self.state != SessionState::Established {
            return Err(LimeError::Session(format!(
                "Cannot finish in state {:?}",
                self.state
            )));
        }
        self.state = SessionState::Finishing;
        let mut session = Session::new(SessionState::Finishing);
        session.id = self.id;
        Ok(session)
    }

    /// Process the server's `finished` acknowledgment.
    pub fn process_finished(&mut self, session: &Session) -> Result<()> {
        match session.state {
            SessionState::Finished => {
                self.state = SessionState::Finished;
                Ok(())
            }
            SessionState::Failed => {
                self.state = SessionState::Failed;
                Err(LimeError::SessionFailed(
                    session
                        .reason
                        .clone()
                        .unwrap_or_else(|| Reason::from_code(reason_codes::GENERAL_ERROR)),
                ))
            }
            _ => Err(unexpected_session("finished", session)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::AuthenticationScheme;

    fn negotiating_offer() -> Session {
        let mut offer = Session::new(SessionState::Negotiating).with_id(Uuid::new_v4());
        offer.encryption_options = Some(vec![SessionEncryption::None, SessionEncryption::Tls]);
        offer.compression_options = Some(vec![SessionCompression::None]);
        offer
    }

    #[test]
    fn test_start_announces_client_node() {
        let mut machine = ClientSession::new(Authentication::Guest {})
            .with_from("alice@example.org/home".parse().unwrap());
        let session = machine.start().unwrap();
        assert_eq!(session.state, SessionState::New);
        assert_eq!(
            session.from,
            Some("alice@example.org/home".parse().unwrap())
        );
    }

    #[test]
    fn test_negotiating_echoes_first_supported() {
        let mut machine = ClientSession::new(Authentication::Guest {});
        machine.start().unwrap();

        let offer = negotiating_offer();
        let reply = machine.process_negotiating(&offer).unwrap();
        assert_eq!(reply.state, SessionState::Negotiating);
        assert_eq!(reply.encryption, Some(SessionEncryption::None));
        assert_eq!(reply.compression, Some(SessionCompression::None));
        assert_eq!(machine.id(), offer.id);
    }

    #[test]
    fn test_negotiating_fails_without_intersection() {
        let mut machine = ClientSession::new(Authentication::Guest {});
        machine.start().unwrap();

        let mut offer = Session::new(SessionState::Negotiating);
        offer.encryption_options = Some(vec![SessionEncryption::Tls]);
        offer.compression_options = Some(vec![SessionCompression::None]);

        let reply = machine.process_negotiating(&offer).unwrap();
        assert_eq!(reply.state, SessionState::Failed);
        assert_eq!(
            reply.reason.as_ref().unwrap().code,
            reason_codes::AUTHORIZATION_UNSUPPORTED_OPTION
        );
        assert_eq!(machine.state(), SessionState::Failed);
    }

    #[test]
    fn test_authenticating_presents_credentials() {
        let mut machine = ClientSession::new(Authentication::Plain {
            password: "cGFzcw==".to_string(),
        })
        .with_from("alice@example.org/home".parse().unwrap());
        machine.start().unwrap();
        machine.process_negotiating(&negotiating_offer()).unwrap();

        let mut offer = Session::new(SessionState::Authenticating);
        offer.scheme_options = Some(vec![
            AuthenticationScheme::Guest,
            AuthenticationScheme::Plain,
        ]);

        let reply = machine.process_authenticating(&offer).unwrap();
        assert_eq!(reply.state, SessionState::Authenticating);
        assert_eq!(reply.scheme, Some(AuthenticationScheme::Plain));
        assert!(reply.authentication.is_some());
    }

    #[test]
    fn test_authenticating_fails_when_scheme_not_offered() {
        let mut machine = ClientSession::new(Authentication::Plain {
            password: "cGFzcw==".to_string(),
        });
        machine.start().unwrap();
        machine.process_negotiating(&negotiating_offer()).unwrap();

        let mut offer = Session::new(SessionState::Authenticating);
        offer.scheme_options = Some(vec![AuthenticationScheme::Key]);

        let reply = machine.process_authenticating(&offer).unwrap();
        assert_eq!(reply.state, SessionState::Failed);
    }

    #[test]
    fn test_established_records_assignment() {
        let mut machine = ClientSession::new(Authentication::Guest {});
        machine.start().unwrap();
        machine.process_negotiating(&negotiating_offer()).unwrap();
        let mut offer = Session::new(SessionState::Authenticating);
        offer.scheme_options = Some(vec![AuthenticationScheme::Guest]);
        machine.process_authenticating(&offer).unwrap();

        let id = Uuid::new_v4();
        let mut verdict = Session::new(SessionState::Established).with_id(id);
        verdict.from = Some("server@example.org/inst".parse().unwrap());
        verdict.to = Some("alice@example.org/1".parse().unwrap());

        machine.process_established(&verdict).unwrap();
        assert_eq!(machine.state(), SessionState::Established);
        assert_eq!(machine.id(), Some(id));
        assert_eq!(
            machine.local_node(),
            Some(&"alice@example.org/1".parse().unwrap())
        );
    }

    #[test]
    fn test_failed_verdict_surfaces_reason() {
        let mut machine = ClientSession::new(Authentication::Guest {});
        machine.start().unwrap();
        machine.process_negotiating(&negotiating_offer()).unwrap();
        let mut offer = Session::new(SessionState::Authenticating);
        offer.scheme_options = Some(vec![AuthenticationScheme::Guest]);
        machine.process_authenticating(&offer).unwrap();

        let verdict = Session::failed(Reason::new(13, "invalid credentials"));
        let result = machine.process_established(&verdict);
        match result {
            Err(LimeError::SessionFailed(reason)) => assert_eq!(reason.code, 13),
            other => panic!("expected SessionFailed, got {other:?}"),
        }
        assert_eq!(machine.state(), SessionState::Failed);
    }

    #[test]
    fn test_finish_round() {
        let mut machine = ClientSession::new(Authentication::Guest {});
        machine.start().unwrap();
        machine.process_negotiating(&negotiating_offer()).unwrap();
        let mut offer = Session::new(SessionState::Authenticating);
        offer.scheme_options = Some(vec![AuthenticationScheme::Guest]);
        machine.process_authenticating(&offer).unwrap();
        machine
            .process_established(&Session::new(SessionState::Established).with_id(Uuid::new_v4()))
            .unwrap();

        let finishing = machine.finish().unwrap();
        assert_eq!(finishing.state, SessionState::Finishing);

        machine
            .process_finished(&Session::new(SessionState::Finished))
            .unwrap();
        assert_eq!(machine.state(), SessionState::Finished);
    }
}
