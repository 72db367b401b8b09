//! Message envelopes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::document::{Document, MediaType};
use super::node::Node;

/// A content-carrying envelope.
///
/// Messages without an `id` are fire-and-forget: the sender gets no
/// notification about their fate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Node>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Node>,
    /// Originator, when distinct from the sender
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pp: Option<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
    /// Media type of the content
    #[serde(rename = "type")]
    pub media_type: MediaType,
    /// The content payload
    pub content: Value,
}

impl Message {
    /// Create a fire-and-forget message
    pub fn new(to: Node, content: Document) -> Self {
        Self {
            id: None,
            from: None,
            to: Some(to),
            pp: None,
            metadata: None,
            media_type: content.media_type,
            content: content.data,
        }
    }

    /// Create a message with a fresh id, requesting delivery notifications
    pub fn with_id(to: Node, content: Document) -> Self {
        Self {
            id: Some(Uuid::new_v4()),
            ..Self::new(to, content)
        }
    }

    /// Set the sender
    pub fn from_node(mut self, from: Node) -> Self {
        self.from = Some(from);
        self
    }

    /// The content as a document
    pub fn document(&self) -> Document {
        Document::new(self.media_type.clone(), self.content.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fire_and_forget_has_no_id() {
        let to: Node = "bob@example.org".parse().unwrap();
        let msg = Message::new(to, Document::text("hi"));
        assert!(msg.id.is_none());
    }

    #[test]
    fn test_with_id_generates_fresh_ids() {
        let to: Node = "bob@example.org".parse().unwrap();
        let a = Message::with_id(to.clone(), Document::text("hi"));
        let b = Message::with_id(to, Document::text("hi"));
        assert!(a.id.is_some());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_message_wire_format() {
        let msg = Message::new("bob@example.org".parse().unwrap(), Document::text("hi"))
            .from_node("alice@example.org/home".parse().unwrap());
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["to"], "bob@example.org");
        assert_eq!(json["from"], "alice@example.org/home");
        assert_eq!(json["type"], "text/plain");
        assert_eq!(json["content"], "hi");
        assert!(json.get("id").is_none());
    }
}
