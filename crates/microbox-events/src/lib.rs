//! In-process [`Broker`] built on a tokio broadcast channel.
//!
//! Every subscription owns a dispatcher task reading the shared channel and
//! spawning the handler once per matching message, so handlers for different
//! topics never wait on each other.

use std::sync::Arc;

use async_trait::async_trait;
use microbox_protocol::{Broker, KernelError, KernelResult, Message, MessageHandler};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, instrument, warn};

pub const DEFAULT_BUFFER: usize = 1024;

#[derive(Default)]
struct BrokerState {
    connected: bool,
    pending: Vec<(String, MessageHandler)>,
    dispatchers: Vec<JoinHandle<()>>,
}

#[derive(Clone)]
pub struct MemoryBroker {
    sender: broadcast::Sender<Message>,
    state: Arc<Mutex<BrokerState>>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

impl MemoryBroker {
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer.max(1));
        Self {
            sender,
            state: Arc::new(Mutex::new(BrokerState::default())),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Handlers registered before `connect` that are still waiting.
    pub fn pending_subscriptions(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Raw feed of every published message, regardless of topic.
    pub fn subscribe_stream(&self) -> BroadcastStream<Message> {
        BroadcastStream::new(self.sender.subscribe())
    }

    fn dispatch(&self, topic: String, handler: MessageHandler) -> JoinHandle<()> {
        let mut receiver = self.sender.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(message) if message.topic == topic => {
                        tokio::spawn(handler(message));
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(%topic, skipped, "subscriber lagged, messages dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    #[instrument(skip(self))]
    async fn connect(&self) -> KernelResult<()> {
        let mut state = self.state.lock();
        if state.connected {
            return Ok(());
        }
        state.connected = true;
        let pending = std::mem::take(&mut state.pending);
        debug!(bound = pending.len(), "broker connected");
        for (topic, handler) in pending {
            let dispatcher = self.dispatch(topic, handler);
            state.dispatchers.push(dispatcher);
        }
        Ok(())
    }

    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> KernelResult<()> {
        if !self.is_connected() {
            return Err(KernelError::InvalidState(format!(
                "cannot publish to {topic}: broker is not connected"
            )));
        }
        // No live subscriber is not an error.
        let delivered = self.sender.send(Message::new(topic, payload)).unwrap_or(0);
        debug!(delivered, "message published");
        Ok(())
    }

    #[instrument(skip(self, handler))]
    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> KernelResult<()> {
        if topic.trim().is_empty() {
            return Err(KernelError::validation("subscribe", "topic cannot be empty"));
        }
        let mut state = self.state.lock();
        if state.connected {
            let dispatcher = self.dispatch(topic.to_owned(), handler);
            state.dispatchers.push(dispatcher);
        } else {
            state.pending.push((topic.to_owned(), handler));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn close(&self) -> KernelResult<()> {
        let mut state = self.state.lock();
        state.connected = false;
        for dispatcher in state.dispatchers.drain(..) {
            dispatcher.abort();
        }
        debug!("broker closed");
        Ok(())
    }
}
