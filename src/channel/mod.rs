//! Session-bound envelope channels.
//!
//! A channel binds a session to a transport and multiplexes the four
//! envelope kinds over it:
//!
//! ```text
//!                      ┌──────────────────────────────┐
//!   transport.receive  │          demultiplexer        │
//!  ────────────────────┤  message ──► bounded queue    │──► receive_message
//!                      │  notification ─► bounded queue│──► receive_notification
//!                      │  command ──► bounded queue    │──► receive_command
//!                      │  session ──► state transition │──► receive_*_session
//!                      └──────────────────────────────┘
//! ```
//!
//! Each queue preserves FIFO order for its kind; there is no ordering
//! across kinds. Queues are bounded (capacity 1 by default), so a slow
//! consumer back-pressures the demultiplexer and, through it, the
//! transport.
//!
//! [`ClientChannel::establish`] and [`ServerChannel::establish`] drive the
//! session state machines over the transport; the demultiplexer only starts
//! once the session is established. Terminal session envelopes
//! (`finishing`, `finished`, `failed`) stop the demultiplexer and unblock
//! every receiver with `Closed`.

mod base;
mod client;
mod ondemand;
mod server;

pub use base::Channel;
pub use client::ClientChannel;
pub use ondemand::{ChannelBuilder, ChannelListener, OnDemandClientChannel};
pub use server::ServerChannel;

use std::time::Duration;

use crate::envelope::{Envelope, Reason, Session};
use crate::error::{LimeError, Result};
use crate::transport::Transport;

/// Receive the next envelope of a negotiation step, which must be a session
/// envelope, within the step deadline.
pub(crate) async fn receive_session_step(
    transport: &dyn Transport,
    deadline: Duration,
) -> Result<Session> {
    let envelope = tokio::time::timeout(deadline, transport.receive())
        .await
        .map_err(|_| LimeError::Timeout("session negotiation".to_string()))??;
    match envelope {
        Envelope::Session(session) => Ok(session),
        other => Err(LimeError::Protocol(format!(
            "Expected a session envelope, received a {}",
            other.kind()
        ))),
    }
}

/// Best-effort `failed` reply before tearing the transport down.
pub(crate) async fn abort_session(transport: &dyn Transport, reason: Reason) {
    let _ = transport.send(Session::failed(reason).into()).await;
    let _ = transport.close().await;
}

/// Receive one handshake step: a session envelope within the deadline,
/// with a received `failed` envelope surfaced as the session failure it
/// reports. On timeout or protocol violation the peer gets a best-effort
/// `failed` reply and the transport is torn down.
pub(crate) async fn next_handshake_session(
    transport: &dyn Transport,
    deadline: Duration,
) -> Result<Session> {
    use crate::envelope::{reason_codes, SessionState};
    match receive_session_step(transport, deadline).await {
        Ok(session) if session.state == SessionState::Failed => {
            let _ = transport.close().await;
            Err(LimeError::SessionFailed(session.reason.unwrap_or_else(
                || Reason::from_code(reason_codes::GENERAL_ERROR),
            )))
        }
        Ok(session) => Ok(session),
        Err(error) => {
            abort_session(transport, error.to_reason()).await;
            Err(error)
        }
    }
}
