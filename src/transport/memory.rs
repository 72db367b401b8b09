//! In-process loopback transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};

use super::Transport;
use crate::envelope::{Envelope, SessionCompression, SessionEncryption};
use crate::error::{LimeError, Result};

/// A duplex in-memory transport over bounded queues.
///
/// `pair()` yields two connected ends; what one end sends the other
/// receives. Closing either end closes the pair: blocked `receive` calls
/// on both ends fail with `Closed`. Used by the test suites and by
/// embedders for loopback sessions.
pub struct MemoryTransport {
    tx: mpsc::Sender<Envelope>,
    rx: Mutex<mpsc::Receiver<Envelope>>,
    send_lock: Mutex<()>,
    // Shared by both ends of the pair.
    closing: Arc<watch::Sender<bool>>,
    connected: AtomicBool,
}

impl MemoryTransport {
    /// Create two connected transport ends.
    pub fn pair() -> (Self, Self) {
        Self::pair_with_capacity(32)
    }

    /// Create a connected pair with the given queue capacity.
    pub fn pair_with_capacity(capacity: usize) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel(capacity);
        let (b_tx, a_rx) = mpsc::channel(capacity);
        let (closing, _) = watch::channel(false);
        let closing = Arc::new(closing);
        (
            Self::end(a_tx, a_rx, closing.clone()),
            Self::end(b_tx, b_rx, closing),
        )
    }

    fn end(
        tx: mpsc::Sender<Envelope>,
        rx: mpsc::Receiver<Envelope>,
        closing: Arc<watch::Sender<bool>>,
    ) -> Self {
        Self {
            tx,
            rx: Mutex::new(rx),
            send_lock: Mutex::new(()),
            closing,
            connected: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, _uri: &str) -> Result<()> {
        if *self.closing.borrow() {
            return Err(LimeError::Closed);
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.closing.send_replace(true);
        Ok(())
    }

    async fn send(&self, envelope: Envelope) -> Result<()> {
        if !self.is_connected() {
            return Err(LimeError::NotConnected);
        }
        let _guard = self.send_lock.lock().await;
        self.tx.send(envelope).await.map_err(|_| LimeError::Closed)
    }

    async fn receive(&self) -> Result<Envelope> {
        let mut rx = self.rx.lock().await;
        // Envelopes that arrived before the pair closed are still
        // delivered.
        if let Ok(envelope) = rx.try_recv() {
            return Ok(envelope);
        }
        if !self.is_connected() {
            return Err(LimeError::NotConnected);
        }
        let mut closing = self.closing.subscribe();
        tokio::select! {
            envelope = rx.recv() => envelope.ok_or(LimeError::Closed),
            _ = closing.wait_for(|closed| *closed) => Err(LimeError::Closed),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !*self.closing.borrow()
    }

    fn supported_encryption(&self) -> Vec<SessionEncryption> {
        vec![SessionEncryption::None]
    }

    fn supported_compression(&self) -> Vec<SessionCompression> {
        vec![SessionCompression::None]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Document, Message};

    fn text_message(body: &str) -> Envelope {
        Envelope::from(Message::new(
            "bob@example.org".parse().unwrap(),
            Document::text(body),
        ))
    }

    #[tokio::test]
    async fn test_pair_delivers_both_directions() {
        let (a, b) = MemoryTransport::pair();

        a.send(text_message("ping")).await.unwrap();
        let received = b.receive().await.unwrap();
        assert_eq!(received, text_message("ping"));

        b.send(text_message("pong")).await.unwrap();
        let received = a.receive().await.unwrap();
        assert_eq!(received, text_message("pong"));
    }

    #[tokio::test]
    async fn test_fifo_order_preserved() {
        let (a, b) = MemoryTransport::pair();
        for i in 0..5 {
            a.send(text_message(&format!("m{i}"))).await.unwrap();
        }
        for i in 0..5 {
            assert_eq!(b.receive().await.unwrap(), text_message(&format!("m{i}")));
        }
    }

    #[tokio::test]
    async fn test_drop_unblocks_peer() {
        let (a, b) = MemoryTransport::pair();

        let receiver = tokio::spawn(async move { b.receive().await });
        // Drop our send half so the blocked peer sees the stream end.
        drop(a);

        let result = receiver.await.unwrap();
        assert!(matches!(result, Err(LimeError::Closed)));
    }

    #[tokio::test]
    async fn test_close_unblocks_blocked_peer_receive() {
        let (a, b) = MemoryTransport::pair();

        let receiver = tokio::spawn(async move {
            let result = b.receive().await;
            (result, b)
        });
        a.close().await.unwrap();

        let (result, b) = receiver.await.unwrap();
        assert!(matches!(result, Err(LimeError::Closed)));
        assert!(!b.is_connected());
    }

    #[tokio::test]
    async fn test_closed_end_rejects_operations() {
        let (a, _b) = MemoryTransport::pair();
        a.close().await.unwrap();
        assert!(!a.is_connected());
        assert!(matches!(
            a.send(text_message("x")).await,
            Err(LimeError::NotConnected)
        ));
        assert!(matches!(a.receive().await, Err(LimeError::NotConnected)));
    }
}
