//! Notification envelopes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::node::Node;
use super::reason::Reason;

/// Events in the lifetime of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationEvent {
    /// Accepted by the next hop
    Accepted,
    /// Content validated
    Validated,
    /// Sender authorized for the destination
    Authorized,
    /// Handed to the destination node
    Dispatched,
    /// Received by the destination application
    Received,
    /// Consumed by the destination user
    Consumed,
    /// Processing failed; `reason` carries the cause
    Failed,
}

impl NotificationEvent {
    /// True for events that end the message lifecycle on the sender side
    pub fn is_final(&self) -> bool {
        matches!(self, NotificationEvent::Dispatched | NotificationEvent::Failed)
    }
}

/// Reports an event for a previously sent message, referenced by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
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
    /// The reported event
    pub event: NotificationEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
}

impl Notification {
    /// Report an event for the message with the given id
    pub fn new(id: Uuid, event: NotificationEvent) -> Self {
        Self {
            id: Some(id),
            from: None,
            to: None,
            pp: None,
            metadata: None,
            event,
            reason: None,
        }
    }

    /// Report a failure with its reason
    pub fn failed(id: Uuid, reason: Reason) -> Self {
        Self {
            reason: Some(reason),
            ..Self::new(id, NotificationEvent::Failed)
        }
    }

    /// Set the recipient
    pub fn to_node(mut self, to: Node) -> Self {
        self.to = Some(to);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_names() {
        let json = serde_json::to_string(&NotificationEvent::Dispatched).unwrap();
        assert_eq!(json, r#""dispatched""#);
        let event: NotificationEvent = serde_json::from_str(r#""consumed""#).unwrap();
        assert_eq!(event, NotificationEvent::Consumed);
    }

    #[test]
    fn test_final_events() {
        assert!(NotificationEvent::Dispatched.is_final());
        assert!(NotificationEvent::Failed.is_final());
        assert!(!NotificationEvent::Accepted.is_final());
        assert!(!NotificationEvent::Received.is_final());
    }

    #[test]
    fn test_failed_notification_carries_reason() {
        let id = Uuid::new_v4();
        let notification = Notification::failed(id, Reason::new(13, "rejected"));
        assert_eq!(notification.event, NotificationEvent::Failed);
        assert_eq!(notification.reason.as_ref().unwrap().code, 13);

        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["event"], "failed");
        assert_eq!(json["reason"]["code"], 13);
    }
}
