//! Command envelopes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::document::{Document, MediaType};
use super::node::Node;
use super::reason::Reason;

/// Resource path of the liveness command
pub const PING_URI: &str = "/ping";

/// CRUD-style resource operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommandMethod {
    Get,
    Set,
    Delete,
    Subscribe,
    Unsubscribe,
    Observe,
    Merge,
}

/// Outcome of a command request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommandStatus {
    Success,
    Failure,
    /// The request is still being processed; a later response follows
    Pending,
}

/// A resource operation request or response.
///
/// Requests carry a fresh `id`; the response reuses it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
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
    /// Resource path, present on requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    pub method: CommandMethod,
    /// Media type of the resource
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<Value>,
    /// Absent on requests, present on responses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CommandStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
}

impl Command {
    /// Create a request with a fresh id
    pub fn new(method: CommandMethod, uri: impl Into<String>) -> Self {
        Self {
            id: Some(Uuid::new_v4()),
            from: None,
            to: None,
            pp: None,
            metadata: None,
            uri: Some(uri.into()),
            method,
            media_type: None,
            resource: None,
            status: None,
            reason: None,
        }
    }

    /// Attach a resource document to a request
    pub fn with_resource(mut self, resource: Document) -> Self {
        self.media_type = Some(resource.media_type);
        self.resource = Some(resource.data);
        self
    }

    /// The `/ping` liveness request
    pub fn ping() -> Self {
        Self::new(CommandMethod::Get, PING_URI)
    }

    /// Build a success response to this request, optionally with a resource
    pub fn success_response(&self, resource: Option<Document>) -> Self {
        Self {
            id: self.id,
            from: self.to.clone(),
            to: self.from.clone(),
            pp: None,
            metadata: None,
            uri: None,
            method: self.method,
            media_type: resource.as_ref().map(|r| r.media_type.clone()),
            resource: resource.map(|r| r.data),
            status: Some(CommandStatus::Success),
            reason: None,
        }
    }

    /// Build a failure response to this request
    pub fn failure_response(&self, reason: Reason) -> Self {
        Self {
            id: self.id,
            from: self.to.clone(),
            to: self.from.clone(),
            pp: None,
            metadata: None,
            uri: None,
            method: self.method,
            media_type: None,
            resource: None,
            status: Some(CommandStatus::Failure),
            reason: Some(reason),
        }
    }

    /// True for the `/ping` liveness request
    pub fn is_ping_request(&self) -> bool {
        self.status.is_none()
            && self.method == CommandMethod::Get
            && self.uri.as_deref() == Some(PING_URI)
    }

    /// The resource as a document, when present
    pub fn resource_document(&self) -> Option<Document> {
        match (&self.media_type, &self.resource) {
            (Some(media_type), Some(resource)) => {
                Some(Document::new(media_type.clone(), resource.clone()))
            }
            _ => None,
        }
    }
}
