//! HTTP Basic credential handling.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::envelope::{Identity, Node};
use crate::error::{LimeError, Result};

/// Credentials extracted from an `Authorization: Basic` header.
#[derive(Debug, Clone)]
pub(crate) struct HttpCredentials {
    pub name: String,
    pub password: String,
}

impl HttpCredentials {
    /// Parse the value of an `Authorization` header.
    pub fn from_header(value: &str) -> Result<Self> {
        let encoded = value
            .strip_prefix("Basic ")
            .ok_or_else(|| LimeError::Authentication("Basic authorization required".to_string()))?;
        let decoded = BASE64
            .decode(encoded.trim())
            .map_err(|_| LimeError::Authentication("Malformed Basic credentials".to_string()))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|_| LimeError::Authentication("Malformed Basic credentials".to_string()))?;
        let (name, password) = decoded
            .split_once(':')
            .ok_or_else(|| LimeError::Authentication("Malformed Basic credentials".to_string()))?;
        if name.is_empty() {
            return Err(LimeError::Authentication(
                "Basic credentials without a name".to_string(),
            ));
        }
        Ok(Self {
            name: name.to_string(),
            password: password.to_string(),
        })
    }

    /// Key under which the transport for these credentials is cached.
    pub fn transport_key(&self) -> String {
        transport_key(&self.name, &self.password)
    }

    /// The identity these credentials authenticate.
    pub fn identity(&self, domain: &str) -> Identity {
        Identity::new(self.name.clone(), domain)
    }

    /// A fresh node for a transport emulating this client.
    pub fn node(&self, domain: &str) -> Node {
        self.identity(domain)
            .with_instance(uuid::Uuid::new_v4().to_string())
    }
}

/// Stable hash of a `(name, password)` pair, identifying the cached
/// transport for a client.
pub fn transport_key(name: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}
