//! Storage for undelivered envelopes.
//!
//! The HTTP emulation layer deposits envelopes that cannot be delivered
//! synchronously here, keyed by recipient identity, for later polling.
//! Ordering within a recipient's queue follows insertion order; retention
//! is at-most-once (a deleted or dequeued envelope is gone).

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::envelope::{Envelope, Identity};
use crate::error::{LimeError, Result};

/// Per-identity queue of undelivered envelopes.
#[async_trait]
pub trait EnvelopeStorage: Send + Sync {
    /// Append an envelope to the identity's queue.
    ///
    /// Fails with `Storage` when the envelope has no id or the id is
    /// already present for the identity.
    async fn store(&self, identity: &Identity, envelope: Envelope) -> Result<()>;

    /// Snapshot of the stored envelope ids, in insertion order.
    async fn get_ids(&self, identity: &Identity) -> Vec<Uuid>;

    /// Look up a stored envelope by id.
    async fn get(&self, identity: &Identity, id: Uuid) -> Option<Envelope>;

    /// Remove a stored envelope; returns whether it was present.
    async fn delete(&self, identity: &Identity, id: Uuid) -> bool;
}

/// In-memory envelope storage.
pub struct InMemoryEnvelopeStorage {
    envelopes: RwLock<HashMap<Identity, Vec<(Uuid, Envelope)>>>,
}

impl InMemoryEnvelopeStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            envelopes: RwLock::new(HashMap::new()),
        }
    }

    /// Remove and return the oldest stored envelope for the identity.
    pub async fn dequeue(&self, identity: &Identity) -> Option<Envelope> {
        let mut envelopes = self.envelopes.write().await;
        let queue = envelopes.get_mut(identity)?;
        if queue.is_empty() {
            return None;
        }
        let (_, envelope) = queue.remove(0);
        if queue.is_empty() {
            envelopes.remove(identity);
        }
        Some(envelope)
    }
}

impl Default for InMemoryEnvelopeStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EnvelopeStorage for InMemoryEnvelopeStorage {
    async fn store(&self, identity: &Identity, envelope: Envelope) -> Result<()> {
        let id = envelope
            .id()
            .ok_or_else(|| LimeError::Storage("Cannot store an envelope without an id".to_string()))?;

        let mut envelopes = self.envelopes.write().await;
        let queue = envelopes.entry(identity.clone()).or_default();
        if queue.iter().any(|(stored, _)| *stored == id) {
            return Err(LimeError::Storage(format!(
                "Envelope {id} is already stored for {identity}"
            )));
        }
        queue.push((id, envelope));
        Ok(())
    }

    async fn get_ids(&self, identity: &Identity) -> Vec<Uuid> {
        self.envelopes
            .read()
            .await
            .get(identity)
            .map(|queue| queue.iter().map(|(id, _)| *id).collect())
            .unwrap_or_default()
    }

    async fn get(&self, identity: &Identity, id: Uuid) -> Option<Envelope> {
        self.envelopes
            .read()
            .await
            .get(identity)?
            .iter()
            .find(|(stored, _)| *stored == id)
            .map(|(_, envelope)| envelope.clone())
    }

    async fn delete(&self, identity: &Identity, id: Uuid) -> bool {
        let mut envelopes = self.envelopes.write().await;
        let Some(queue) = envelopes.get_mut(identity) else {
            return false;
        };
        let before = queue.len();
        queue.retain(|(stored, _)| *stored != id);
        let removed = queue.len() < before;
        if queue.is_empty() {
            envelopes.remove(identity);
        }
        removed
    }
}
