//! Transport layer abstraction.
//!
//! A transport is a frame-oriented duplex carrier of envelopes. The channel
//! layer is transport-agnostic: TCP, WebSocket and the HTTP-emulated
//! transport all present the same contract.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │                 Channel                  │
//! │           (Transport-Agnostic)          │
//! └──────────────────┬──────────────────────┘
//!                    │
//!          ┌────────┴─────────┐
//!          ▼                  ▼
//! ┌─────────────────┐ ┌──────────────────┐
//! │ MemoryTransport │ │ServerHttpTransport│
//! │   (loopback)    │ │  (HTTP emulation) │
//! └─────────────────┘ └──────────────────┘
//! ```
//!
//! `send` and `receive` may run concurrently on distinct tasks; concurrent
//! `send`s serialize behind an internal lock in both provided
//! implementations. `set_encryption` / `set_compression` are issued by the
//! channel during negotiation and are atomic with respect to framing.

mod memory;

pub use memory::MemoryTransport;

use async_trait::async_trait;

use crate::envelope::{Envelope, SessionCompression, SessionEncryption};
use crate::error::Result;

/// A duplex, frame-oriented carrier of envelopes.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to the remote endpoint.
    async fn open(&self, uri: &str) -> Result<()>;

    /// Tear down the connection. Pending `receive` calls fail with `Closed`.
    async fn close(&self) -> Result<()>;

    /// Send one envelope to the remote endpoint.
    async fn send(&self, envelope: Envelope) -> Result<()>;

    /// Receive the next envelope from the remote endpoint.
    async fn receive(&self) -> Result<Envelope>;

    /// Whether the transport is currently usable.
    fn is_connected(&self) -> bool;

    /// Encryption modes this transport can apply.
    fn supported_encryption(&self) -> Vec<SessionEncryption> {
        vec![SessionEncryption::None]
    }

    /// Compression modes this transport can apply.
    fn supported_compression(&self) -> Vec<SessionCompression> {
        vec![SessionCompression::None]
    }

    /// Apply a negotiated encryption mode.
    async fn set_encryption(&self, encryption: SessionEncryption) -> Result<()> {
        if self.supported_encryption().contains(&encryption) {
            Ok(())
        } else {
            Err(crate::error::LimeError::Transport(format!(
                "Unsupported encryption mode: {encryption:?}"
            )))
        }
    }

    /// Apply a negotiated compression mode.
    async fn set_compression(&self, compression: SessionCompression) -> Result<()> {
        if self.supported_compression().contains(&compression) {
            Ok(())
        } else {
            Err(crate::error::LimeError::Transport(format!(
                "Unsupported compression mode: {compression:?}"
            )))
        }
    }
}
