//! Client-side channel establishment.

use std::sync::Arc;

use tokio::time::timeout;
use uuid::Uuid;

use super::base::Channel;
use super::next_handshake_session;
use crate::config::ChannelConfig;
use crate::envelope::{
    Command, Message, Notification, Node, Session, SessionState,
};
use crate::error::{LimeError, Result};
use crate::session::ClientSession;
use crate::transport::Transport;

/// A channel established from the client side.
pub struct ClientChannel {
    channel: Channel,
}

impl std::fmt::Debug for ClientChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientChannel").finish_non_exhaustive()
    }
}

impl ClientChannel {
    /// Drive the client session machine over the transport until the
    /// session is established.
    ///
    /// Each negotiation step is bounded by the configured deadline; expiry
    /// fails the session with reason code 12 and tears the transport down.
    pub async fn establish(
        transport: Arc<dyn Transport>,
        mut machine: ClientSession,
        config: &ChannelConfig,
    ) -> Result<Self> {
        let step = config.negotiation_timeout();

        let opening = machine.start()?;
        transport.send(opening.into()).await?;

        // Negotiation round
        let offer = next_handshake_session(transport.as_ref(), step).await?;
        let choice = machine.process_negotiating(&offer)?;
        let failed = choice.state == SessionState::Failed;
        transport.send(choice.into()).await?;
        if failed {
            let _ = transport.close().await;
            return Err(LimeError::Session(
                "No mutually supported session option".to_string(),
            ));
        }
        if let Some(encryption) = machine.negotiated_encryption() {
            transport.set_encryption(encryption).await?;
        }
        if let Some(compression) = machine.negotiated_compression() {
            transport.set_compression(compression).await?;
        }

        // Authentication round
        let offer = next_handshake_session(transport.as_ref(), step).await?;
        let credentials = machine.process_authenticating(&offer)?;
        let failed = credentials.state == SessionState::Failed;
        transport.send(credentials.into()).await?;
        if failed {
            let _ = transport.close().await;
            return Err(LimeError::Session(
                "Authentication scheme not offered by the server".to_string(),
            ));
        }

        // Verdict
        let verdict = next_handshake_session(transport.as_ref(), step).await?;
        if let Err(error) = machine.process_established(&verdict) {
            let _ = transport.close().await;
            return Err(error);
        }

        let session_id = machine
            .id()
            .ok_or_else(|| LimeError::Protocol("Established session without an id".to_string()))?;
        let channel = Channel::start(
            transport,
            config,
            session_id,
            machine.local_node().cloned(),
            machine.remote_node().cloned(),
        );
        Ok(Self { channel })
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.channel.state()
    }

    /// Id assigned to the session by the server.
    pub fn session_id(&self) -> Uuid {
        self.channel.session_id()
    }

    /// Node assigned to this client.
    pub fn local_node(&self) -> Option<&Node> {
        self.channel.local_node()
    }

    /// The server node.
    pub fn remote_node(&self) -> Option<&Node> {
        self.channel.remote_node()
    }

    /// Send a message envelope.
    pub async fn send_message(&self, message: Message) -> Result<()> {
        self.channel.send_message(message).await
    }

    /// Send a notification envelope.
    pub async fn send_notification(&self, notification: Notification) -> Result<()> {
        self.channel.send_notification(notification).await
    }

    /// Send a command envelope.
    pub async fn send_command(&self, command: Command) -> Result<()> {
        self.channel.send_command(command).await
    }

    /// Receive the next message envelope.
    pub async fn receive_message(&self) -> Result<Message> {
        self.channel.receive_message().await
    }

    /// Receive the next notification envelope.
    pub async fn receive_notification(&self) -> Result<Notification> {
        self.channel.receive_notification().await
    }

    /// Receive the next command envelope.
    pub async fn receive_command(&self) -> Result<Command> {
        self.channel.receive_command().await
    }

    /// Gracefully terminate the session: send `finishing` and await the
    /// server's `finished` acknowledgment.
    ///
    /// Pending `receive_*` calls complete with `Closed`, and no further
    /// `send_*` succeeds.
    pub async fn finish(&self) -> Result<()> {
        if self.channel.state() != SessionState::Established {
            return Err(LimeError::Closed);
        }

        let mut finishing = Session::new(SessionState::Finishing);
        finishing.id = Some(self.channel.session_id());
        self.channel
            .shared
            .state
            .send_replace(SessionState::Finishing);
        self.channel.shared.send_raw(finishing.into()).await?;

        let acknowledgment = timeout(
            self.channel.negotiation_timeout,
            self.receive_finished_session(),
        )
        .await
        .map_err(|_| LimeError::Timeout("session finishing".to_string()))??;

        let result = match acknowledgment.state {
            SessionState::Finished => Ok(()),
            SessionState::Failed => Err(LimeError::SessionFailed(
                acknowledgment
                    .reason
                    .unwrap_or_else(|| crate::envelope::Reason::from_code(1)),
            )),
            state => Err(LimeError::Protocol(format!(
                "Expected a finished session, received {state:?}"
            ))),
        };
        let _ = self.channel.shared.transport.close().await;
        result
    }

    /// Receive the terminal session envelope sent by the server.
    pub async fn receive_finished_session(&self) -> Result<Session> {
        self.channel.receive_session().await
    }

    /// Close the channel and its transport.
    pub async fn close(&self) -> Result<()> {
        self.channel.close().await
    }
}
