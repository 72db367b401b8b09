//! Lazily established client channels.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::Mutex;

use super::client::ClientChannel;
use crate::envelope::{Command, Message, Notification, SessionState};
use crate::error::{LimeError, Result};

/// Factory invoked whenever a fresh channel must be established.
pub type ChannelBuilder =
    Arc<dyn Fn() -> BoxFuture<'static, Result<ClientChannel>> + Send + Sync>;

/// Observes the lifecycle of an [`OnDemandClientChannel`].
///
/// Listeners run in registration order and each returned future is awaited
/// before the channel proceeds, so observers can defer it with
/// asynchronous work (logging, credential refresh). The `*_failed` hooks
/// return whether the failure was handled; any handling listener keeps the
/// retry loop going.
#[async_trait]
pub trait ChannelListener: Send + Sync {
    /// A channel was established and is now current.
    async fn channel_created(&self, _channel: &ClientChannel) {}

    /// The current channel was discarded.
    async fn channel_discarded(&self) {}

    /// Establishing a channel failed. Return `true` to retry.
    async fn creation_failed(&self, _error: &LimeError) -> bool {
        false
    }

    /// An operation on the current channel failed. Return `true` to retry
    /// on a fresh channel.
    async fn operation_failed(&self, _error: &LimeError) -> bool {
        false
    }
}

/// A durable handle that owns an optionally present channel and rebuilds
/// it lazily.
///
/// Send operations require an established channel; receive operations
/// accept any present channel so buffered envelopes can drain after the
/// session ends. Failed operations discard the channel and, when a
/// listener marks the failure handled, retry on a fresh one. Caller
/// cancellation (dropping the future) and explicit timeouts never enter
/// the retry loop.
pub struct OnDemandClientChannel {
    builder: ChannelBuilder,
    current: RwLock<Option<Arc<ClientChannel>>>,
    build_lock: Mutex<()>,
    listeners: RwLock<Vec<Arc<dyn ChannelListener>>>,
    disposed: AtomicBool,
}

impl OnDemandClientChannel {
    /// Create a handle around a channel factory.
    pub fn new<F, Fut>(builder: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<ClientChannel>> + Send + 'static,
    {
        Self {
            builder: Arc::new(move || builder().boxed()),
            current: RwLock::new(None),
            build_lock: Mutex::new(()),
            listeners: RwLock::new(Vec::new()),
            disposed: AtomicBool::new(false),
        }
    }

    /// Register a lifecycle listener.
    pub fn add_listener(&self, listener: Arc<dyn ChannelListener>) {
        self.listeners.write().expect("listeners lock").push(listener);
    }

    /// Whether a channel is currently present and established.
    pub fn is_established(&self) -> bool {
        self.current_channel()
            .is_some_and(|channel| channel.state() == SessionState::Established)
    }

    /// Send a message envelope, establishing the channel if needed.
    pub async fn send_message(&self, message: Message) -> Result<()> {
        loop {
            let channel = self.acquire(true).await?;
            match channel.send_message(message.clone()).await {
                Ok(()) => return Ok(()),
                Err(error) => self.handle_failure(&channel, error).await?,
            }
        }
    }

    /// Send a notification envelope, establishing the channel if needed.
    pub async fn send_notification(&self, notification: Notification) -> Result<()> {
        loop {
            let channel = self.acquire(true).await?;
            match channel.send_notification(notification.clone()).await {
                Ok(()) => return Ok(()),
                Err(error) => self.handle_failure(&channel, error).await?,
            }
        }
    }

    /// Send a command envelope, establishing the channel if needed.
    pub async fn send_command(&self, command: Command) -> Result<()> {
        loop {
            let channel = self.acquire(true).await?;
            match channel.send_command(command.clone()).await {
                Ok(()) => return Ok(()),
                Err(error) => self.handle_failure(&channel, error).await?,
            }
        }
    }

    /// Receive the next message envelope.
    pub async fn receive_message(&self) -> Result<Message> {
        loop {
            let channel = self.acquire(false).await?;
            match channel.receive_message().await {
                Ok(message) => return Ok(message),
                Err(error) => self.handle_failure(&channel, error).await?,
            }
        }
    }

    /// Receive the next notification envelope.
    pub async fn receive_notification(&self) -> Result<Notification> {
        loop {
            let channel = self.acquire(false).await?;
            match channel.receive_notification().await {
                Ok(notification) => return Ok(notification),
                Err(error) => self.handle_failure(&channel, error).await?,
            }
        }
    }

    /// Receive the next command envelope.
    pub async fn receive_command(&self) -> Result<Command> {
        loop {
            let channel = self.acquire(false).await?;
            match channel.receive_command().await {
                Ok(command) => return Ok(command),
                Err(error) => self.handle_failure(&channel, error).await?,
            }
        }
    }

    /// Gracefully terminate the current session, when one is present.
    pub async fn finish(&self) -> Result<()> {
        let channel = {
            let _guard = self.build_lock.lock().await;
            self.current.write().expect("current lock").take()
        };
        match channel {
            Some(channel) => {
                let result = channel.finish().await;
                self.notify_discarded().await;
                result
            }
            None => Ok(()),
        }
    }

    /// Discard the current channel and refuse further operations.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let channel = {
            let _guard = self.build_lock.lock().await;
            self.current.write().expect("current lock").take()
        };
        if let Some(channel) = channel {
            let _ = channel.close().await;
            self.notify_discarded().await;
        }
    }

    fn current_channel(&self) -> Option<Arc<ClientChannel>> {
        self.current.read().expect("current lock").clone()
    }

    fn satisfies(channel: &ClientChannel, require_established: bool) -> bool {
        !require_established || channel.state() == SessionState::Established
    }

    /// Get the current channel or build one, serializing establishment
    /// behind the single-permit build lock. The fast path never touches
    /// the lock.
    async fn acquire(&self, require_established: bool) -> Result<Arc<ClientChannel>> {
        loop {
            if self.disposed.load(Ordering::SeqCst) {
                return Err(LimeError::Disposed);
            }
            if let Some(channel) = self.current_channel() {
                if Self::satisfies(&channel, require_established) {
                    return Ok(channel);
                }
            }

            let (stale, outcome) = {
                let _guard = self.build_lock.lock().await;
                if self.disposed.load(Ordering::SeqCst) {
                    return Err(LimeError::Disposed);
                }
                // Another task may have built a usable channel meanwhile.
                let mut current = self.current.write().expect("current lock");
                if let Some(channel) = current.as_ref() {
                    if Self::satisfies(channel, require_established) {
                        return Ok(channel.clone());
                    }
                }
                let stale = current.take();
                drop(current);

                let outcome = (self.builder)().await;
                if let Ok(channel) = &outcome {
                    tracing::debug!(session_id = %channel.session_id(), "Channel established");
                }
                let outcome = outcome.map(Arc::new);
                if let Ok(channel) = &outcome {
                    *self.current.write().expect("current lock") = Some(channel.clone());
                }
                (stale, outcome)
            };

            if let Some(stale) = stale {
                let _ = stale.close().await;
                self.notify_discarded().await;
            }
            match outcome {
                Ok(channel) => {
                    self.notify_created(&channel).await;
                    return Ok(channel);
                }
                Err(error) if error.is_terminal() => return Err(error),
                Err(error) => {
                    if !self.notify_creation_failed(&error).await {
                        return Err(error);
                    }
                }
            }
        }
    }

    /// Common failure path: consult listeners, discard the channel, and
    /// decide between retrying (`Ok`) and propagating (`Err`).
    async fn handle_failure(
        &self,
        channel: &Arc<ClientChannel>,
        error: LimeError,
    ) -> Result<()> {
        if error.is_terminal() {
            return Err(error);
        }
        let handled = self.notify_operation_failed(&error).await;
        self.discard(channel).await;
        if handled {
            Ok(())
        } else {
            Err(error)
        }
    }

    /// Remove `channel` from `current` when it is still the cached
    /// instance; a channel rebuilt by a racing task is left untouched.
    async fn discard(&self, channel: &Arc<ClientChannel>) {
        let removed = {
            let _guard = self.build_lock.lock().await;
            let mut current = self.current.write().expect("current lock");
            if current
                .as_ref()
                .is_some_and(|cached| Arc::ptr_eq(cached, channel))
            {
                current.take()
            } else {
                None
            }
        };
        if let Some(removed) = removed {
            let _ = removed.close().await;
            self.notify_discarded().await;
        }
    }

    fn listeners(&self) -> Vec<Arc<dyn ChannelListener>> {
        self.listeners.read().expect("listeners lock").clone()
    }

    async fn notify_created(&self, channel: &ClientChannel) {
        for listener in self.listeners() {
            listener.channel_created(channel).await;
        }
    }

    async fn notify_discarded(&self) {
        for listener in self.listeners() {
            listener.channel_discarded().await;
        }
    }

    async fn notify_creation_failed(&self, error: &LimeError) -> bool {
        let mut handled = false;
        for listener in self.listeners() {
            handled |= listener.creation_failed(error).await;
        }
        handled
    }

    async fn notify_operation_failed(&self, error: &LimeError) -> bool {
        let mut handled = false;
        for listener in self.listeners() {
            handled |= listener.operation_failed(error).await;
        }
        handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingListener {
        created: std::sync::atomic::AtomicUsize,
        failures_handled: bool,
    }

    #[async_trait]
    impl ChannelListener for CountingListener {
        async fn channel_created(&self, _channel: &ClientChannel) {
            self.created.fetch_add(1, Ordering::SeqCst);
        }

        async fn creation_failed(&self, _error: &LimeError) -> bool {
            self.failures_handled
        }
    }

    #[tokio::test]
    async fn test_unhandled_creation_failure_propagates() {
        let channel = OnDemandClientChannel::new(|| async {
            Err(LimeError::Transport("refused".to_string()))
        });
        let listener = Arc::new(CountingListener {
            created: Default::default(),
            failures_handled: false,
        });
        channel.add_listener(listener.clone());

        let to = "bob@example.org".parse().unwrap();
        let result = channel
            .send_message(Message::new(to, crate::envelope::Document::text("hi")))
            .await;
        assert!(matches!(result, Err(LimeError::Transport(_))));
        assert_eq!(listener.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disposed_rejects_operations() {
        let channel = OnDemandClientChannel::new(|| async {
            Err(LimeError::Transport("refused".to_string()))
        });
        channel.dispose().await;

        let to: crate::envelope::Node = "bob@example.org".parse().unwrap();
        let result = channel
            .send_message(Message::new(to, crate::envelope::Document::text("hi")))
            .await;
        assert!(matches!(result, Err(LimeError::Disposed)));
    }

    #[tokio::test]
    async fn test_terminal_creation_error_skips_listeners() {
        let channel = OnDemandClientChannel::new(|| async { Err(LimeError::Cancelled) });
        let listener = Arc::new(CountingListener {
            created: Default::default(),
            failures_handled: true,
        });
        channel.add_listener(listener);

        let result = channel.receive_message().await;
        assert!(matches!(result, Err(LimeError::Cancelled)));
    }
}
