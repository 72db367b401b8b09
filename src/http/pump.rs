//! Output pump: correlates envelopes produced by server transports with
//! pending HTTP responses, falling back to storage.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::oneshot;
use uuid::Uuid;

use super::transport::ServerHttpTransport;
use crate::envelope::Envelope;
use crate::storage::EnvelopeStorage;

/// Correlation map from envelope id to the HTTP response awaiting it.
///
/// At most one pending response is associated with an id at any moment;
/// insertions after the first fail silently (callers must generate fresh
/// ids). Entries are removed by the first closing writer; late duplicates
/// are dropped.
#[derive(Default)]
pub(crate) struct PendingResponses {
    map: std::sync::Mutex<HashMap<Uuid, oneshot::Sender<Envelope>>>,
}

impl PendingResponses {
    /// Register a pending response for `id`. Returns `None` when another
    /// response is already pending for it.
    pub fn insert(&self, id: Uuid) -> Option<oneshot::Receiver<Envelope>> {
        let mut map = self.map.lock().expect("pending lock");
        if map.contains_key(&id) {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        map.insert(id, tx);
        Some(rx)
    }

    /// Whether a response is pending for `id`.
    pub fn contains(&self, id: Uuid) -> bool {
        self.map.lock().expect("pending lock").contains_key(&id)
    }

    /// Close the pending response for `id` with `envelope`. Returns whether
    /// a response was pending.
    pub fn complete(&self, id: Uuid, envelope: Envelope) -> bool {
        let sender = self.map.lock().expect("pending lock").remove(&id);
        match sender {
            Some(sender) => sender.send(envelope).is_ok(),
            None => false,
        }
    }

    /// Drop the pending response for `id`, if any (request timed out).
    pub fn remove(&self, id: Uuid) {
        self.map.lock().expect("pending lock").remove(&id);
    }
}

/// Process envelopes produced by one server transport until it closes.
///
/// - Messages are stored keyed by `to` identity.
/// - Notifications close a matching pending response on a final event
///   (`dispatched`/`failed`); intermediate events keep it pending. With no
///   match they are stored.
/// - Command responses close a matching pending response unless still
///   `pending`. Unmatched command responses are dropped.
pub(crate) async fn run_output_pump(
    transport: Arc<ServerHttpTransport>,
    pending: Arc<PendingResponses>,
    message_storage: Arc<dyn EnvelopeStorage>,
    notification_storage: Arc<dyn EnvelopeStorage>,
) {
    let mut closed = transport.closed_signal();
    loop {
        let envelope = tokio::select! {
            _ = closed.wait_for(|closed| *closed) => break,
            envelope = transport.next_output() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
        };

        match envelope {
            Envelope::Message(mut message) => {
                let Some(identity) = message.to.as_ref().map(|to| to.identity()) else {
                    tracing::warn!("Dropping a message without a destination");
                    continue;
                };
                if message.id.is_none() {
                    message.id = Some(Uuid::new_v4());
                }
                if let Err(error) = message_storage
                    .store(&identity, Envelope::Message(message))
                    .await
                {
                    tracing::warn!(%identity, "Failed to store message: {error}");
                }
            }
            Envelope::Notification(notification) => {
                let Some(id) = notification.id else {
                    tracing::warn!("Dropping a notification without an id");
                    continue;
                };
                if super::notification_status(&notification).is_some() {
                    if pending.complete(id, Envelope::Notification(notification.clone())) {
                        continue;
                    }
                } else if pending.contains(id) {
                    // An intermediate event keeps the response pending.
                    tracing::debug!(%id, event = ?notification.event, "Intermediate notification");
                    continue;
                }
                let identity = notification
                    .to
                    .as_ref()
                    .map(|to| to.identity())
                    .or_else(|| Some(transport.node().identity()));
                if let Some(identity) = identity {
                    if let Err(error) = notification_storage
                        .store(&identity, Envelope::Notification(notification))
                        .await
                    {
                        tracing::warn!(%identity, "Failed to store notification: {error}");
                    }
                }
            }
            Envelope::Command(command) => {
                let Some(id) = command.id else {
                    tracing::warn!("Dropping a command response without an id");
                    continue;
                };
                if super::command_status(&command).is_none() {
                    // Still pending on the remote side; keep waiting.
                    continue;
                }
                if !pending.complete(id, Envelope::Command(command)) {
                    tracing::warn!(%id, "Dropping an unmatched command response");
                }
            }
            Envelope::Session(session) => {
                tracing::warn!(state = ?session.state, "Session envelope reached the output pump");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Notification, NotificationEvent};

    #[test]
    fn test_single_pending_response_per_id() {
        let pending = PendingResponses::default();
        let id = Uuid::new_v4();

        let first = pending.insert(id);
        assert!(first.is_some());
        // Invariant: the second insertion fails silently.
        assert!(pending.insert(id).is_none());
        assert!(pending.contains(id));
    }

    #[test]
    fn test_complete_removes_entry_and_drops_duplicates() {
        let pending = PendingResponses::default();
        let id = Uuid::new_v4();
        let rx = pending.insert(id).unwrap();

        let envelope = Envelope::from(Notification::new(id, NotificationEvent::Dispatched));
        assert!(pending.complete(id, envelope.clone()));
        assert!(!pending.contains(id));
        // Late duplicate is dropped.
        assert!(!pending.complete(id, envelope.clone()));

        assert_eq!(rx.blocking_recv().unwrap(), envelope);
    }

    #[test]
    fn test_remove_discards_receiver() {
        let pending = PendingResponses::default();
        let id = Uuid::new_v4();
        let _rx = pending.insert(id).unwrap();

        pending.remove(id);
        assert!(!pending.contains(id));
        let envelope = Envelope::from(Notification::new(id, NotificationEvent::Dispatched));
        assert!(!pending.complete(id, envelope));
    }
}
