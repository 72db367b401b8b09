//! Node and identity addressing.
//!
//! A node address has the form `name@domain/instance`; the identity is the
//! instance-less `name@domain` projection used for storage and
//! authentication. Equality and hashing are case-insensitive.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::LimeError;

/// An addressing identity: `name@domain`
#[derive(Debug, Clone, Eq)]
pub struct Identity {
    /// Account name
    pub name: String,
    /// Domain authority
    pub domain: String,
}

impl Identity {
    /// Create a new identity
    pub fn new(name: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain: domain.into(),
        }
    }

    /// Qualify this identity with an instance
    pub fn with_instance(self, instance: impl Into<String>) -> Node {
        Node {
            identity: self,
            instance: Some(instance.into()),
        }
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
            && self.domain.eq_ignore_ascii_case(&other.domain)
    }
}

impl Hash for Identity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.to_ascii_lowercase().hash(state);
        self.domain.to_ascii_lowercase().hash(state);
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.domain)
    }
}

impl FromStr for Identity {
    type Err = LimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, domain) = s
            .split_once('@')
            .ok_or_else(|| LimeError::Protocol(format!("Invalid identity: {s}")))?;
        if name.is_empty() || domain.is_empty() {
            return Err(LimeError::Protocol(format!("Invalid identity: {s}")));
        }
        Ok(Self::new(name, domain))
    }
}

/// A fully qualified endpoint address: `name@domain/instance`
#[derive(Debug, Clone, Eq)]
pub struct Node {
    /// The instance-less identity
    pub identity: Identity,
    /// Endpoint instance, absent for identity-level addressing
    pub instance: Option<String>,
}

impl Node {
    /// Create a node without an instance
    pub fn new(name: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            identity: Identity::new(name, domain),
            instance: None,
        }
    }

    /// Account name
    pub fn name(&self) -> &str {
        &self.identity.name
    }

    /// Domain authority
    pub fn domain(&self) -> &str {
        &self.identity.domain
    }

    /// The instance-less projection of this node
    pub fn identity(&self) -> Identity {
        self.identity.clone()
    }
}

impl From<Identity> for Node {
    fn from(identity: Identity) -> Self {
        Self {
            identity,
            instance: None,
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        let instance_eq = match (&self.instance, &other.instance) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            (None, None) => true,
            _ => false,
        };
        self.identity == other.identity && instance_eq
    }
}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity.hash(state);
        self.instance
            .as_ref()
            .map(|i| i.to_ascii_lowercase())
            .hash(state);
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.instance {
            Some(instance) => write!(f, "{}/{}", self.identity, instance),
            None => write!(f, "{}", self.identity),
        }
    }
}

impl FromStr for Node {
    type Err = LimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((identity, instance)) if !instance.is_empty() => Ok(Self {
                identity: identity.parse()?,
                instance: Some(instance.to_string()),
            }),
            Some((identity, _)) => Ok(Self {
                identity: identity.parse()?,
                instance: None,
            }),
            None => Ok(Self {
                identity: s.parse()?,
                instance: None,
            }),
        }
    }
}

// Both types travel as plain strings on the wire.

impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_parse_and_display() {
        let identity: Identity = "alice@example.org".parse().unwrap();
        assert_eq!(identity.name, "alice");
        assert_eq!(identity.domain, "example.org");
        assert_eq!(identity.to_string(), "alice@example.org");
    }

    #[test]
    fn test_identity_rejects_malformed() {
        assert!("alice".parse::<Identity>().is_err());
        assert!("@example.org".parse::<Identity>().is_err());
        assert!("alice@".parse::<Identity>().is_err());
    }

    #[test]
    fn test_identity_case_insensitive_equality() {
        let a: Identity = "Alice@Example.org".parse().unwrap();
        let b: Identity = "alice@example.ORG".parse().unwrap();
        assert_eq!(a, b);

        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(a, 1);
        assert!(map.contains_key(&b));
    }

    #[test]
    fn test_node_parse_with_instance() {
        let node: Node = "alice@example.org/home".parse().unwrap();
        assert_eq!(node.name(), "alice");
        assert_eq!(node.instance.as_deref(), Some("home"));
        assert_eq!(node.to_string(), "alice@example.org/home");
    }

    #[test]
    fn test_node_identity_projection() {
        let node: Node = "alice@example.org/home".parse().unwrap();
        let identity = node.identity();
        assert_eq!(identity.to_string(), "alice@example.org");
    }

    #[test]
    fn test_node_trailing_slash_drops_instance() {
        let node: Node = "alice@example.org/".parse().unwrap();
        assert!(node.instance.is_none());
    }

    #[test]
    fn test_node_serde_as_string() {
        let node: Node = "alice@example.org/home".parse().unwrap();
        let json = serde_json::to_string(&node).unwrap();
        assert_eq!(json, r#""alice@example.org/home""#);
        let parsed: Node = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, node);
    }
}
