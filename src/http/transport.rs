//! Queue-backed transport bridging HTTP requests to a server channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio::sync::{mpsc, watch, Mutex};
use uuid::Uuid;

use super::auth::HttpCredentials;
use crate::envelope::{
    reason_codes, Authentication, AuthenticationScheme, Envelope, Node, Reason, Session,
    SessionState,
};
use crate::error::{LimeError, Result};
use crate::transport::Transport;

const QUEUE_CAPACITY: usize = 32;

/// Server-side transport for one authenticated HTTP client.
///
/// HTTP handlers feed the input queue; the hosting server channel reads it
/// through [`Transport::receive`] and writes through [`Transport::send`],
/// which routes application envelopes to the output queue consumed by the
/// listener's output pump.
///
/// While the session is not yet established the transport emulates the
/// client side of the handshake: it opens with `new`, echoes the first
/// advertised negotiation options, and presents the HTTP Basic credentials
/// with the `plain` scheme (or `guest` when `plain` is not offered). A
/// standard `ServerChannel::establish` therefore completes over it without
/// special-casing.
pub struct ServerHttpTransport {
    node: Node,
    password: String,
    input_tx: mpsc::Sender<Envelope>,
    input_rx: Mutex<mpsc::Receiver<Envelope>>,
    output_rx: Mutex<mpsc::Receiver<Envelope>>,
    output_tx: mpsc::Sender<Envelope>,
    session_state: watch::Sender<SessionState>,
    session_id: std::sync::Mutex<Option<Uuid>>,
    failure: std::sync::Mutex<Option<Reason>>,
    closing: watch::Sender<bool>,
    connected: AtomicBool,
}

impl ServerHttpTransport {
    pub(crate) fn new(credentials: &HttpCredentials, domain: &str) -> Self {
        let node = credentials.node(domain);
        let (input_tx, input_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (output_tx, output_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (session_state, _) = watch::channel(SessionState::New);
        let (closing, _) = watch::channel(false);

        let opening = Session::new(SessionState::New).from_node(node.clone());
        input_tx
            .try_send(opening.into())
            .expect("fresh input queue accepts the opening session");

        Self {
            node,
            password: credentials.password.clone(),
            input_tx,
            input_rx: Mutex::new(input_rx),
            output_rx: Mutex::new(output_rx),
            output_tx,
            session_state,
            session_id: std::sync::Mutex::new(None),
            failure: std::sync::Mutex::new(None),
            closing,
            connected: AtomicBool::new(true),
        }
    }

    /// The emulated client node.
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Id of the established session, when available.
    pub fn session_id(&self) -> Option<Uuid> {
        *self.session_id.lock().expect("session_id lock")
    }

    /// Current session state as observed by the transport.
    pub fn session_state(&self) -> SessionState {
        *self.session_state.borrow()
    }

    /// Wait until the hosting server settles the session.
    pub(crate) async fn wait_established(&self, deadline: Duration) -> Result<Uuid> {
        let mut state = self.session_state.subscribe();
        let settled = tokio::time::timeout(
            deadline,
            state.wait_for(|state| *state == SessionState::Established || state.is_terminal()),
        )
        .await
        .map_err(|_| LimeError::Timeout("session establishment".to_string()))?
        .map_err(|_| LimeError::Closed)?;

        match *settled {
            SessionState::Established => self
                .session_id()
                .ok_or_else(|| LimeError::Protocol("Established session without an id".to_string())),
            _ => {
                let reason = self
                    .failure
                    .lock()
                    .expect("failure lock")
                    .clone()
                    .unwrap_or_else(|| Reason::from_code(reason_codes::GENERAL_ERROR));
                Err(LimeError::SessionFailed(reason))
            }
        }
    }

    /// Push an envelope from an HTTP handler toward the server channel.
    pub(crate) async fn submit(&self, envelope: Envelope) -> Result<()> {
        if !self.is_connected() {
            return Err(LimeError::Closed);
        }
        self.input_tx.send(envelope).await.map_err(|_| LimeError::Closed)
    }

    /// Next envelope produced by the server channel, for the output pump.
    pub(crate) async fn next_output(&self) -> Option<Envelope> {
        let mut output = self.output_rx.lock().await;
        output.recv().await
    }

    /// Watch that flips to `true` when the transport closes.
    pub(crate) fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closing.subscribe()
    }

    async fn enqueue_input(&self, envelope: Envelope) -> Result<()> {
        self.input_tx.send(envelope).await.map_err(|_| LimeError::Closed)
    }

    /// Emulate the client side of the handshake for a session envelope the
    /// server channel sent us.
    async fn handle_session(&self, session: Session) -> Result<()> {
        match session.state {
            SessionState::Negotiating => {
                let mut reply = Session::new(SessionState::Negotiating);
                reply.id = session.id;
                reply.encryption = session
                    .encryption_options
                    .as_ref()
                    .and_then(|options| options.first().copied());
                reply.compression = session
                    .compression_options
                    .as_ref()
                    .and_then(|options| options.first().copied());
                self.enqueue_input(reply.into()).await
            }
            SessionState::Authenticating => {
                let schemes = session.scheme_options.as_deref().unwrap_or_default();
                let authentication = if schemes.contains(&AuthenticationScheme::Plain) {
                    Authentication::Plain {
                        password: BASE64.encode(&self.password),
                    }
                } else if schemes.contains(&AuthenticationScheme::Guest) {
                    Authentication::Guest {}
                } else {
                    tracing::warn!(?schemes, "No emulatable authentication scheme offered");
                    let failed = Session::failed(Reason::new(
                        reason_codes::AUTHORIZATION_UNSUPPORTED_OPTION,
                        "No emulatable authentication scheme",
                    ));
                    return self.enqueue_input(failed.into()).await;
                };
                let mut reply =
                    Session::new(SessionState::Authenticating).with_authentication(authentication);
                reply.id = session.id;
                reply.from = Some(self.node.clone());
                self.enqueue_input(reply.into()).await
            }
            SessionState::Established => {
                if let Some(id) = session.id {
                    *self.session_id.lock().expect("session_id lock") = Some(id);
                }
                self.session_state.send_replace(SessionState::Established);
                Ok(())
            }
            SessionState::Failed => {
                *self.failure.lock().expect("failure lock") = session.reason.clone();
                self.settle(SessionState::Failed);
                Ok(())
            }
            SessionState::Finished => {
                self.settle(SessionState::Finished);
                Ok(())
            }
            state => {
                tracing::warn!(?state, "Unexpected session envelope from the server channel");
                Ok(())
            }
        }
    }

    fn settle(&self, state: SessionState) {
        self.session_state.send_if_modified(|current| {
            if current.is_terminal() {
                false
            } else {
                *current = state;
                true
            }
        });
        self.connected.store(false, Ordering::SeqCst);
        self.closing.send_replace(true);
    }
}

#[async_trait]
impl Transport for ServerHttpTransport {
    async fn open(&self, _uri: &str) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.session_state.send_if_modified(|current| {
                if current.is_terminal() {
                    false
                } else {
                    *current = SessionState::Failed;
                    true
                }
            });
            self.closing.send_replace(true);
        }
        Ok(())
    }

    async fn send(&self, envelope: Envelope) -> Result<()> {
        match envelope {
            Envelope::Session(session) => self.handle_session(session).await,
            envelope => {
                if !self.is_connected() {
                    return Err(LimeError::Closed);
                }
                self.output_tx
                    .send(envelope)
                    .await
                    .map_err(|_| LimeError::Closed)
            }
        }
    }

    async fn receive(&self) -> Result<Envelope> {
        if !self.is_connected() {
            return Err(LimeError::NotConnected);
        }
        let mut closing = self.closing.subscribe();
        let mut input = self.input_rx.lock().await;
        tokio::select! {
            envelope = input.recv() => envelope.ok_or(LimeError::Closed),
            _ = closing.wait_for(|closed| *closed) => Err(LimeError::Closed),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{SessionCompression, SessionEncryption};

    fn transport() -> ServerHttpTransport {
        let credentials = HttpCredentials {
            name: "alice".to_string(),
            password: "secret".to_string(),
        };
        ServerHttpTransport::new(&credentials, "example.org")
    }

    #[tokio::test]
    async fn test_opens_with_new_session() {
        let transport = transport();
        let envelope = transport.receive().await.unwrap();
        match envelope {
            Envelope::Session(session) => {
                assert_eq!(session.state, SessionState::New);
                assert_eq!(session.from.as_ref().unwrap().name(), "alice");
            }
            other => panic!("expected a session envelope, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_answers_negotiation_with_first_options() {
        let transport = transport();
        let _ = transport.receive().await.unwrap();

        let mut offer = Session::new(SessionState::Negotiating).with_id(Uuid::new_v4());
        offer.encryption_options = Some(vec![SessionEncryption::None, SessionEncryption::Tls]);
        offer.compression_options = Some(vec![SessionCompression::None]);
        transport.send(offer.into()).await.unwrap();

        match transport.receive().await.unwrap() {
            Envelope::Session(reply) => {
                assert_eq!(reply.state, SessionState::Negotiating);
                assert_eq!(reply.encryption, Some(SessionEncryption::None));
                assert_eq!(reply.compression, Some(SessionCompression::None));
            }
            other => panic!("expected a session envelope, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_presents_plain_credentials() {
        let transport = transport();
        let _ = transport.receive().await.unwrap();

        let mut offer = Session::new(SessionState::Authenticating);
        offer.scheme_options = Some(vec![
            AuthenticationScheme::Guest,
            AuthenticationScheme::Plain,
        ]);
        transport.send(offer.into()).await.unwrap();

        match transport.receive().await.unwrap() {
            Envelope::Session(reply) => {
                assert_eq!(reply.scheme, Some(AuthenticationScheme::Plain));
                match reply.authentication {
                    Some(Authentication::Plain { password }) => {
                        assert_eq!(BASE64.decode(password).unwrap(), b"secret");
                    }
                    other => panic!("expected plain credentials, got {other:?}"),
                }
            }
            other => panic!("expected a session envelope, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_established_resolves_waiters() {
        let transport = std::sync::Arc::new(transport());
        let waiter = {
            let transport = transport.clone();
            tokio::spawn(async move {
                transport
                    .wait_established(Duration::from_secs(1))
                    .await
            })
        };

        let id = Uuid::new_v4();
        transport
            .send(Session::new(SessionState::Established).with_id(id).into())
            .await
            .unwrap();

        assert_eq!(waiter.await.unwrap().unwrap(), id);
        assert_eq!(transport.session_id(), Some(id));
    }

    #[tokio::test]
    async fn test_failed_session_closes_transport() {
        let transport = transport();
        transport
            .send(Session::failed(Reason::new(13, "bad password")).into())
            .await
            .unwrap();

        assert!(!transport.is_connected());
        let result = transport.wait_established(Duration::from_millis(100)).await;
        match result {
            Err(LimeError::SessionFailed(reason)) => assert_eq!(reason.code, 13),
            other => panic!("expected SessionFailed, got {other:?}"),
        }
        assert!(*transport.closed_signal().borrow());
    }

    #[tokio::test]
    async fn test_application_envelopes_reach_output() {
        let transport = transport();
        transport
            .send(Session::new(SessionState::Established).with_id(Uuid::new_v4()).into())
            .await
            .unwrap();

        let notification = crate::envelope::Notification::new(
            Uuid::new_v4(),
            crate::envelope::NotificationEvent::Dispatched,
        );
        transport
            .send(Envelope::from(notification.clone()))
            .await
            .unwrap();

        assert_eq!(
            transport.next_output().await,
            Some(Envelope::from(notification))
        );
    }
}
