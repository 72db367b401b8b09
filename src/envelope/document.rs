//! Documents and the media type registry.
//!
//! A document is the payload of a message or command resource: a media type
//! plus arbitrary structured data. The registry maps media types to factory
//! functions so hosts register their document schemas explicitly at startup;
//! there is no assembly scanning.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{LimeError, Result};

/// Media type of the `/ping` liveness document
pub const PING_MEDIA_TYPE: &str = "application/vnd.lime.ping+json";
/// Plain text content
pub const TEXT_PLAIN: &str = "text/plain";
/// Generic JSON content
pub const APPLICATION_JSON: &str = "application/json";

/// A MIME media type: `type/subtype` with an optional `+suffix`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaType {
    /// Top-level type (e.g. `application`)
    pub type_: String,
    /// Subtype (e.g. `vnd.lime.ping`)
    pub subtype: String,
    /// Structural suffix (e.g. `json`)
    pub suffix: Option<String>,
}

impl MediaType {
    /// Create a media type from components
    pub fn new(type_: impl Into<String>, subtype: impl Into<String>) -> Self {
        Self {
            type_: type_.into().to_ascii_lowercase(),
            subtype: subtype.into().to_ascii_lowercase(),
            suffix: None,
        }
    }

    /// Add a structural suffix
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into().to_ascii_lowercase());
        self
    }

    /// `text/plain`
    pub fn text_plain() -> Self {
        TEXT_PLAIN.parse().expect("constant media type")
    }

    /// `application/vnd.lime.ping+json`
    pub fn ping() -> Self {
        PING_MEDIA_TYPE.parse().expect("constant media type")
    }

    /// `application/json`
    pub fn json() -> Self {
        APPLICATION_JSON.parse().expect("constant media type")
    }

    /// True when the suffix or subtype indicates a JSON document
    pub fn is_json(&self) -> bool {
        self.suffix.as_deref() == Some("json") || self.subtype == "json"
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.suffix {
            Some(suffix) => write!(f, "{}/{}+{}", self.type_, self.subtype, suffix),
            None => write!(f, "{}/{}", self.type_, self.subtype),
        }
    }
}

impl FromStr for MediaType {
    type Err = LimeError;

    fn from_str(s: &str) -> Result<Self> {
        let (type_, rest) = s
            .split_once('/')
            .ok_or_else(|| LimeError::Protocol(format!("Invalid media type: {s}")))?;
        if type_.is_empty() || rest.is_empty() {
            return Err(LimeError::Protocol(format!("Invalid media type: {s}")));
        }
        let media_type = match rest.rsplit_once('+') {
            Some((subtype, suffix)) if !subtype.is_empty() && !suffix.is_empty() => {
                MediaType::new(type_, subtype).with_suffix(suffix)
            }
            _ => MediaType::new(type_, rest),
        };
        Ok(media_type)
    }
}

impl Serialize for MediaType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MediaType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A typed content payload
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Media type identifying the schema
    pub media_type: MediaType,
    /// Structured payload; plain strings for non-JSON types
    pub data: Value,
}

impl Document {
    /// Create a document
    pub fn new(media_type: MediaType, data: Value) -> Self {
        Self { media_type, data }
    }

    /// A `text/plain` document
    pub fn text(content: impl Into<String>) -> Self {
        Self::new(MediaType::text_plain(), Value::String(content.into()))
    }

    /// An empty `/ping` document
    pub fn ping() -> Self {
        Self::new(MediaType::ping(), Value::Object(Default::default()))
    }
}

/// Factory producing a validated document from raw wire data
pub type DocumentFactory = Arc<dyn Fn(Value) -> Result<Document> + Send + Sync>;

/// Maps media types to document factories.
///
/// Hosts register `(media_type, factory)` pairs at startup; `create` is
/// consulted when typed content is materialized from the wire. Unknown media
/// types fall back to an untyped document so unknown content still flows.
pub struct DocumentRegistry {
    factories: HashMap<MediaType, DocumentFactory>,
}

impl DocumentRegistry {
    /// Create a registry with the built-in document types
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register(MediaType::text_plain(), |data| match data {
            Value::String(_) => Ok(Document::new(MediaType::text_plain(), data)),
            other => Err(LimeError::Protocol(format!(
                "text/plain content must be a string, got {other}"
            ))),
        });
        registry.register(MediaType::ping(), |data| match data {
            Value::Object(_) | Value::Null => Ok(Document::ping()),
            other => Err(LimeError::Protocol(format!(
                "ping content must be an object, got {other}"
            ))),
        });
        registry.register(MediaType::json(), |data| {
            Ok(Document::new(MediaType::json(), data))
        });
        registry
    }

    /// Register a factory for a media type, replacing any previous entry
    pub fn register<F>(&mut self, media_type: MediaType, factory: F)
    where
        F: Fn(Value) -> Result<Document> + Send + Sync + 'static,
    {
        self.factories.insert(media_type, Arc::new(factory));
    }

    /// True when a factory is registered for the media type
    pub fn contains(&self, media_type: &MediaType) -> bool {
        self.factories.contains_key(media_type)
    }

    /// Materialize a document from wire data
    pub fn create(&self, media_type: &MediaType, data: Value) -> Result<Document> {
        match self.factories.get(media_type) {
            Some(factory) => factory(data),
            None => Ok(Document::new(media_type.clone(), data)),
        }
    }
}

impl Default for DocumentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DocumentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentRegistry")
            .field("media_types", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}
