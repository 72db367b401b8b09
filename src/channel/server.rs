//! Server-side channel establishment.

use std::sync::Arc;

use uuid::Uuid;

use super::base::Channel;
use super::next_handshake_session;
use crate::config::ChannelConfig;
use crate::envelope::{
    Command, Message, Notification, Node, Session, SessionState,
};
use crate::error::{LimeError, Result};
use crate::session::{Authenticator, ServerSession};
use crate::transport::Transport;

/// A channel established from the server side over an accepted transport.
pub struct ServerChannel {
    channel: Channel,
}

impl std::fmt::Debug for ServerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerChannel").finish_non_exhaustive()
    }
}

impl ServerChannel {
    /// Drive the server session machine over the transport until the
    /// session is established, consulting `authenticator` for the
    /// credential verdict.
    pub async fn establish(
        transport: Arc<dyn Transport>,
        mut machine: ServerSession,
        authenticator: &dyn Authenticator,
        config: &ChannelConfig,
    ) -> Result<Self> {
        let step = config.negotiation_timeout();

        // Introduction
        let opening = next_handshake_session(transport.as_ref(), step).await?;
        let offer = machine.process_new(&opening)?;
        transport.send(offer.into()).await?;

        // Negotiation round
        let choice = next_handshake_session(transport.as_ref(), step).await?;
        let reply = machine.process_negotiation(&choice)?;
        if reply.state == SessionState::Failed {
            let reason = reply.reason.clone();
            transport.send(reply.into()).await?;
            let _ = transport.close().await;
            return Err(LimeError::SessionFailed(
                reason.unwrap_or_else(|| crate::envelope::Reason::from_code(1)),
            ));
        }
        if let Some(encryption) = machine.negotiated_encryption() {
            transport.set_encryption(encryption).await?;
        }
        if let Some(compression) = machine.negotiated_compression() {
            transport.set_compression(compression).await?;
        }
        transport.send(reply.into()).await?;

        // Authentication round
        let credentials = next_handshake_session(transport.as_ref(), step).await?;
        let request = match machine.process_authentication(&credentials) {
            Ok(request) => request,
            Err(error) => {
                let reply = machine.reject(error.to_reason());
                let _ = transport.send(reply.into()).await;
                let _ = transport.close().await;
                return Err(error);
            }
        };

        match authenticator
            .authenticate(&request.identity, &request.authentication)
            .await
        {
            Ok(node) => {
                let reply = machine.accept(node);
                transport.send(reply.into()).await?;
            }
            Err(error) => {
                let reply = machine.reject(error.to_reason());
                let _ = transport.send(reply.into()).await;
                let _ = transport.close().await;
                return Err(error);
            }
        }

        let channel = Channel::start(
            transport,
            config,
            machine.id(),
            None,
            machine.remote_node().cloned(),
        );
        Ok(Self { channel })
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.channel.state()
    }

    /// Id assigned to the session.
    pub fn session_id(&self) -> Uuid {
        self.channel.session_id()
    }

    /// The node assigned to the remote client.
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

    /// Await the client's `finishing` envelope.
    pub async fn receive_finishing_session(&self) -> Result<Session> {
        let session = self.channel.receive_session().await?;
        match session.state {
            SessionState::Finishing => Ok(session),
            SessionState::Failed => Err(LimeError::SessionFailed(
                session
                    .reason
                    .unwrap_or_else(|| crate::envelope::Reason::from_code(1)),
            )),
            state => Err(LimeError::Protocol(format!(
                "Expected a finishing session, received {state:?}"
            ))),
        }
    }

    /// Acknowledge the client's `finishing` with `finished` and close the
    /// transport.
    pub async fn send_finished_session(&self) -> Result<()> {
        if self.channel.state() != SessionState::Finishing {
            return Err(LimeError::Session(format!(
                "Cannot send finished in state {:?}",
                self.channel.state()
            )));
        }
        let mut finished = Session::new(SessionState::Finished);
        finished.id = Some(self.channel.session_id());
        self.channel.shared.send_raw(finished.into()).await?;
        self.channel
            .shared
            .state
            .send_replace(SessionState::Finished);
        self.channel.shared.transport.close().await
    }

    /// Close the channel and its transport.
    pub async fn close(&self) -> Result<()> {
        self.channel.close().await
    }
}
