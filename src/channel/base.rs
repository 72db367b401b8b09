//! Channel core: typed queues and the demultiplexer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::ChannelConfig;
use crate::envelope::{
    reason_codes, Command, Document, Envelope, Message, Node, Notification, Reason, Session,
    SessionState,
};
use crate::error::{LimeError, Result};
use crate::transport::Transport;

/// State shared between the channel handle and its background tasks.
pub(crate) struct ChannelShared {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) state: watch::Sender<SessionState>,
    send_lock: Mutex<()>,
    last_inbound: std::sync::Mutex<Instant>,
    pending_ping: std::sync::Mutex<Option<Uuid>>,
}

impl ChannelShared {
    /// Send an envelope on the transport, serializing concurrent senders.
    pub(crate) async fn send_raw(&self, envelope: Envelope) -> Result<()> {
        let _guard = self.send_lock.lock().await;
        self.transport.send(envelope).await
    }

    fn transition(&self, state: SessionState) {
        self.state.send_if_modified(|current| {
            if current.is_terminal() || *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

struct QueueSenders {
    messages: mpsc::Sender<Message>,
    notifications: mpsc::Sender<Notification>,
    commands: mpsc::Sender<Command>,
    sessions: mpsc::Sender<Session>,
}

/// A session-scoped, typed envelope exchange over a transport.
///
/// Obtained through [`ClientChannel`](super::ClientChannel) or
/// [`ServerChannel`](super::ServerChannel) once the session is established.
pub struct Channel {
    pub(crate) shared: Arc<ChannelShared>,
    session_id: Uuid,
    local_node: Option<Node>,
    remote_node: Option<Node>,
    pub(crate) negotiation_timeout: Duration,
    messages: Mutex<mpsc::Receiver<Message>>,
    notifications: Mutex<mpsc::Receiver<Notification>>,
    commands: Mutex<mpsc::Receiver<Command>>,
    sessions: Mutex<mpsc::Receiver<Session>>,
    demux: JoinHandle<()>,
    watchdog: Option<JoinHandle<()>>,
}

impl Channel {
    /// Bind an established session to the transport and start the
    /// demultiplexer.
    pub(crate) fn start(
        transport: Arc<dyn Transport>,
        config: &ChannelConfig,
        session_id: Uuid,
        local_node: Option<Node>,
        remote_node: Option<Node>,
    ) -> Self {
        let capacity = config.queue_capacity.max(1);
        let (msg_tx, msg_rx) = mpsc::channel(capacity);
        let (not_tx, not_rx) = mpsc::channel(capacity);
        let (cmd_tx, cmd_rx) = mpsc::channel(capacity);
        let (ses_tx, ses_rx) = mpsc::channel(capacity);

        let (state, _) = watch::channel(SessionState::Established);
        let shared = Arc::new(ChannelShared {
            transport,
            state,
            send_lock: Mutex::new(()),
            last_inbound: std::sync::Mutex::new(Instant::now()),
            pending_ping: std::sync::Mutex::new(None),
        });

        let senders = QueueSenders {
            messages: msg_tx,
            notifications: not_tx,
            commands: cmd_tx,
            sessions: ses_tx,
        };
        let demux = tokio::spawn(demultiplex(shared.clone(), senders));

        let watchdog = config.remote_idle_timeout().map(|idle| {
            tokio::spawn(liveness(shared.clone(), idle, config.ping_timeout()))
        });

        Self {
            shared,
            session_id,
            local_node,
            remote_node,
            negotiation_timeout: config.negotiation_timeout(),
            messages: Mutex::new(msg_rx),
            notifications: Mutex::new(not_rx),
            commands: Mutex::new(cmd_rx),
            sessions: Mutex::new(ses_rx),
            demux,
            watchdog,
        }
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Id assigned to the session on establishment.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Node this end of the session is bound to.
    pub fn local_node(&self) -> Option<&Node> {
        self.local_node.as_ref()
    }

    /// Node on the other end of the session.
    pub fn remote_node(&self) -> Option<&Node> {
        self.remote_node.as_ref()
    }

    /// Send a message envelope.
    pub async fn send_message(&self, message: Message) -> Result<()> {
        self.send_envelope(message.into()).await
    }

    /// Send a notification envelope.
    pub async fn send_notification(&self, notification: Notification) -> Result<()> {
        self.send_envelope(notification.into()).await
    }

    /// Send a command envelope.
    pub async fn send_command(&self, command: Command) -> Result<()> {
        self.send_envelope(command.into()).await
    }

    /// Receive the next message envelope.
    pub async fn receive_message(&self) -> Result<Message> {
        let mut queue = self.messages.lock().await;
        queue.recv().await.ok_or(LimeError::Closed)
    }

    /// Receive the next notification envelope.
    pub async fn receive_notification(&self) -> Result<Notification> {
        let mut queue = self.notifications.lock().await;
        queue.recv().await.ok_or(LimeError::Closed)
    }

    /// Receive the next command envelope.
    pub async fn receive_command(&self) -> Result<Command> {
        let mut queue = self.commands.lock().await;
        queue.recv().await.ok_or(LimeError::Closed)
    }

    /// Receive the terminal session envelope.
    pub(crate) async fn receive_session(&self) -> Result<Session> {
        let mut queue = self.sessions.lock().await;
        queue.recv().await.ok_or(LimeError::Closed)
    }

    /// Close the channel and its transport.
    pub async fn close(&self) -> Result<()> {
        self.shared.transition(SessionState::Finished);
        self.shared.transport.close().await
    }

    async fn send_envelope(&self, envelope: Envelope) -> Result<()> {
        if self.state() != SessionState::Established {
            return Err(LimeError::Closed);
        }
        self.shared.send_raw(envelope).await
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.demux.abort();
        if let Some(watchdog) = &self.watchdog {
            watchdog.abort();
        }
        // The transport is torn down with the channel.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let transport = self.shared.transport.clone();
            handle.spawn(async move {
                let _ = transport.close().await;
            });
        }
    }
}

/// Routes inbound envelopes into the typed queues until the session ends.
async fn demultiplex(shared: Arc<ChannelShared>, senders: QueueSenders) {
    loop {
        let envelope = match shared.transport.receive().await {
            Ok(envelope) => envelope,
            Err(error) => {
                if !shared.state.borrow().is_terminal() {
                    tracing::debug!("Transport receive failed: {error}");
                    shared.transition(SessionState::Failed);
                }
                let _ = shared.transport.close().await;
                break;
            }
        };

        *shared.last_inbound.lock().expect("last_inbound lock") = Instant::now();

        match envelope {
            Envelope::Message(message) => {
                if senders.messages.send(message).await.is_err() {
                    break;
                }
            }
            Envelope::Notification(notification) => {
                if senders.notifications.send(notification).await.is_err() {
                    break;
                }
            }
            Envelope::Command(command) => {
                if command.is_ping_request() {
                    let response = command.success_response(Some(Document::ping()));
                    let _ = shared.send_raw(response.into()).await;
                    continue;
                }
                if command.status.is_some() && is_pending_ping(&shared, &command) {
                    continue;
                }
                if senders.commands.send(command).await.is_err() {
                    break;
                }
            }
            Envelope::Session(session) => match session.state {
                SessionState::Finishing | SessionState::Finished | SessionState::Failed => {
                    let close = session.state != SessionState::Finishing;
                    shared.transition(session.state);
                    let _ = senders.sessions.send(session).await;
                    if close {
                        let _ = shared.transport.close().await;
                    }
                    break;
                }
                state => {
                    tracing::warn!(?state, "Unexpected session envelope on established channel");
                    let reason = Reason::new(
                        reason_codes::VALIDATION_INVALID_ENVELOPE,
                        format!("Unexpected session state {state:?}"),
                    );
                    let _ = shared.send_raw(Session::failed(reason).into()).await;
                    shared.transition(SessionState::Failed);
                    let _ = shared.transport.close().await;
                    break;
                }
            },
        }
    }
    // Queue senders drop here; blocked receivers observe Closed.
}

fn is_pending_ping(shared: &ChannelShared, command: &Command) -> bool {
    let mut pending = shared.pending_ping.lock().expect("pending_ping lock");
    if pending.is_some() && *pending == command.id {
        *pending = None;
        true
    } else {
        false
    }
}

/// Probes an idle peer with `/ping` and closes the channel when the probe
/// goes unanswered.
async fn liveness(shared: Arc<ChannelShared>, idle: Duration, ping_timeout: Duration) {
    loop {
        let last = *shared.last_inbound.lock().expect("last_inbound lock");
        let deadline = last + idle;
        if Instant::now() < deadline {
            tokio::time::sleep_until(deadline).await;
            continue;
        }

        if *shared.state.borrow() != SessionState::Established {
            break;
        }

        let ping = Command::ping();
        *shared.pending_ping.lock().expect("pending_ping lock") = ping.id;
        if shared.send_raw(ping.into()).await.is_err() {
            break;
        }

        tokio::time::sleep(ping_timeout).await;
        let unanswered = shared
            .pending_ping
            .lock()
            .expect("pending_ping lock")
            .take()
            .is_some();
        if unanswered {
            tracing::warn!("Liveness probe unanswered, closing channel");
            shared.transition(SessionState::Failed);
            let _ = shared.transport.close().await;
            break;
        }
    }
}
