//! LIME envelope model.
//!
//! Everything exchanged between two LIME nodes is an envelope: one of
//! *message*, *notification*, *command* or *session*. Envelopes are JSON
//! documents with camelCase identifiers; the kind is implied by structure
//! rather than an explicit tag:
//!
//! | Field     | Kind         | Purpose                              |
//! |-----------|--------------|--------------------------------------|
//! | `content` | Message      | Deliver a document to a node         |
//! | `event`   | Notification | Report the fate of a sent message    |
//! | `method`  | Command      | CRUD-style resource operation        |
//! | `state`   | Session      | Drive negotiation and termination    |
//!
//! Common fields across all kinds: `id` (optional on fire-and-forget
//! messages), `from`, `to`, `pp` (originator) and `metadata`.

mod command;
mod document;
mod message;
mod node;
mod notification;
mod reason;
mod session;

pub use command::{Command, CommandMethod, CommandStatus, PING_URI};
pub use document::{
    Document, DocumentFactory, DocumentRegistry, MediaType, APPLICATION_JSON, PING_MEDIA_TYPE,
    TEXT_PLAIN,
};
pub use message::Message;
pub use node::{Identity, Node};
pub use notification::{Notification, NotificationEvent};
pub use reason::{reason_codes, Reason};
pub use session::{
    Authentication, AuthenticationScheme, Session, SessionCompression, SessionEncryption,
    SessionState,
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The unit of exchange between two LIME nodes.
///
/// Variant order matters: serde resolves the untagged union by the first
/// variant whose required structural field is present, and the four fields
/// (`state`, `event`, `method`, `content`) are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
    Session(Session),
    Notification(Notification),
    Command(Command),
    Message(Message),
}

impl Envelope {
    /// The envelope id, when present
    pub fn id(&self) -> Option<Uuid> {
        match self {
            Envelope::Session(session) => session.id,
            Envelope::Notification(notification) => notification.id,
            Envelope::Command(command) => command.id,
            Envelope::Message(message) => message.id,
        }
    }

    /// The destination node, when present
    pub fn to(&self) -> Option<&Node> {
        match self {
            Envelope::Session(session) => session.to.as_ref(),
            Envelope::Notification(notification) => notification.to.as_ref(),
            Envelope::Command(command) => command.to.as_ref(),
            Envelope::Message(message) => message.to.as_ref(),
        }
    }

    /// Short kind name for log lines
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Session(_) => "session",
            Envelope::Notification(_) => "notification",
            Envelope::Command(_) => "command",
            Envelope::Message(_) => "message",
        }
    }
}

impl From<Message> for Envelope {
    fn from(message: Message) -> Self {
        Envelope::Message(message)
    }
}

impl From<Notification> for Envelope {
    fn from(notification: Notification) -> Self {
        Envelope::Notification(notification)
    }
}

impl From<Command> for Envelope {
    fn from(command: Command) -> Self {
        Envelope::Command(command)
    }
}

impl From<Session> for Envelope {
    fn from(session: Session) -> Self {
        Envelope::Session(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn roundtrip(envelope: &Envelope) -> Envelope {
        let json = serde_json::to_string(envelope).unwrap();
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn test_structural_discrimination() {
        let message: Envelope = serde_json::from_value(json!({
            "to": "bob@dom",
            "type": "text/plain",
            "content": "hi"
        }))
        .unwrap();
        assert!(matches!(message, Envelope::Message(_)));

        let notification: Envelope = serde_json::from_value(json!({
            "id": "a9173c7d-038c-4101-b547-939c25d8053e",
            "event": "dispatched"
        }))
        .unwrap();
        assert!(matches!(notification, Envelope::Notification(_)));

        let command: Envelope = serde_json::from_value(json!({
            "id": "a9173c7d-038c-4101-b547-939c25d8053e",
            "method": "get",
            "uri": "/ping"
        }))
        .unwrap();
        assert!(matches!(command, Envelope::Command(_)));

        let session: Envelope = serde_json::from_value(json!({
            "state": "new"
        }))
        .unwrap();
        assert!(matches!(session, Envelope::Session(_)));
    }

    #[test]
    fn test_command_with_resource_stays_command() {
        // Commands may carry `type` and `resource`, which must not be
        // mistaken for message content.
        let envelope: Envelope = serde_json::from_value(json!({
            "id": "a9173c7d-038c-4101-b547-939c25d8053e",
            "method": "set",
            "uri": "/presence",
            "type": "application/json",
            "resource": {"status": "available"}
        }))
        .unwrap();
        assert!(matches!(envelope, Envelope::Command(_)));
    }

    #[test]
    fn test_roundtrip_message() {
        let message = Message::with_id("bob@dom/work".parse().unwrap(), Document::text("hi"))
            .from_node("alice@dom/home".parse().unwrap());
        let envelope = Envelope::from(message);
        assert_eq!(roundtrip(&envelope), envelope);
    }

    #[test]
    fn test_roundtrip_notification() {
        let notification = Notification::failed(Uuid::new_v4(), Reason::new(42, "boom"))
            .to_node("alice@dom".parse().unwrap());
        let envelope = Envelope::from(notification);
        assert_eq!(roundtrip(&envelope), envelope);
    }

    #[test]
    fn test_roundtrip_command() {
        let command = Command::new(CommandMethod::Subscribe, "/presence")
            .with_resource(Document::new(MediaType::json(), json!({"interval": 30})));
        let envelope = Envelope::from(command);
        assert_eq!(roundtrip(&envelope), envelope);

        let response = Command::ping().success_response(Some(Document::ping()));
        let envelope = Envelope::from(response);
        assert_eq!(roundtrip(&envelope), envelope);
    }

    #[test]
    fn test_roundtrip_session_all_field_combinations() {
        let mut negotiating = Session::new(SessionState::Negotiating);
        negotiating.encryption_options =
            Some(vec![SessionEncryption::None, SessionEncryption::Tls]);
        negotiating.compression_options = Some(vec![SessionCompression::None]);
        negotiating.encryption = Some(SessionEncryption::None);
        negotiating.compression = Some(SessionCompression::None);

        let mut authenticating = Session::new(SessionState::Authenticating);
        authenticating.scheme_options = Some(vec![
            AuthenticationScheme::Guest,
            AuthenticationScheme::Plain,
            AuthenticationScheme::Transport,
        ]);

        let credentials = [
            Authentication::Guest {},
            Authentication::Plain {
                password: "cGFzcw==".to_string(),
            },
            Authentication::Key {
                key: "a2V5".to_string(),
            },
            Authentication::Transport {},
            Authentication::External {
                token: "dG9rZW4=".to_string(),
                issuer: Some("issuer.dom".to_string()),
            },
        ];

        let mut sessions = vec![
            Session::new(SessionState::New).from_node("alice@dom/home".parse().unwrap()),
            negotiating,
            authenticating,
            Session::new(SessionState::Established)
                .with_id(Uuid::new_v4())
                .from_node("server@dom/inst".parse().unwrap()),
            Session::new(SessionState::Finishing),
            Session::new(SessionState::Finished),
            Session::failed(Reason::new(31, "no common option")),
        ];
        for credential in credentials {
            sessions
                .push(Session::new(SessionState::Authenticating).with_authentication(credential));
        }

        for session in sessions {
            let envelope = Envelope::from(session);
            assert_eq!(roundtrip(&envelope), envelope);
        }
    }

    #[test]
    fn test_envelope_accessors() {
        let id = Uuid::new_v4();
        let envelope = Envelope::from(Notification::new(id, NotificationEvent::Received));
        assert_eq!(envelope.id(), Some(id));
        assert_eq!(envelope.kind(), "notification");
        assert!(envelope.to().is_none());
    }
}
