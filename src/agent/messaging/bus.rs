//! Message bus routing messages between agent inboxes.
//!
//! Delivery is best-effort and at-most-once: a message addressed to an
//! unknown agent, or to a full inbox under [`OverflowPolicy::Reject`], is
//! logged and dropped. The sender gets no acknowledgement either way.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::handler::{BoxedHandler, dispatch_all};
use super::message::Message;
use crate::config::{BusConfig, OverflowPolicy};

/// Receiving end of one agent's mailbox. Each inbox has exactly one consumer.
#[derive(Debug)]
pub struct Inbox {
    agent: String,
    receiver: mpsc::Receiver<Message>,
}

impl Inbox {
    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Wait for the next message. `None` once the bus has dropped this inbox.
    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    /// Wait at most `timeout` for a message.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Message> {
        tokio::time::timeout(timeout, self.receiver.recv())
            .await
            .ok()
            .flatten()
    }

    pub fn try_recv(&mut self) -> Option<Message> {
        self.receiver.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub delivered: u64,
    pub dropped: u64,
    pub undeliverable: u64,
}

#[derive(Debug, Default)]
struct BusCounters {
    delivered: AtomicU64,
    dropped: AtomicU64,
    undeliverable: AtomicU64,
}

/// Registry mapping agent name to inbox.
///
/// Built once at startup and shared as `Arc<MessageBus>` with every agent.
pub struct MessageBus {
    config: BusConfig,
    inboxes: RwLock<HashMap<String, mpsc::Sender<Message>>>,
    subscribers: RwLock<HashMap<String, Vec<BoxedHandler>>>,
    counters: BusCounters,
}

impl MessageBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            inboxes: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(HashMap::new()),
            counters: BusCounters::default(),
        }
    }

    /// Create an inbox for `agent_name` without putting it in the routing
    /// table. The returned sender is what [`attach`](Self::attach) expects.
    pub fn open_inbox(&self, agent_name: impl Into<String>) -> (mpsc::Sender<Message>, Inbox) {
        let (sender, receiver) = mpsc::channel(self.config.inbox_capacity.max(1));
        let inbox = Inbox {
            agent: agent_name.into(),
            receiver,
        };
        (sender, inbox)
    }

    /// Route messages for `agent_name` into `sender`, replacing any previous
    /// entry under that name.
    pub fn attach(&self, agent_name: impl Into<String>, sender: mpsc::Sender<Message>) {
        let agent = agent_name.into();
        let mut inboxes = self.inboxes.write();
        if inboxes.insert(agent.clone(), sender).is_some() {
            warn!(agent = %agent, "Agent re-registered, previous inbox replaced");
        }
        info!(agent = %agent, registered = inboxes.len(), "Agent registered on message bus");
    }

    /// Register an agent and hand back its inbox. Registering a name again
    /// replaces the previous inbox.
    pub fn register_agent(&self, agent_name: impl Into<String>) -> Inbox {
        let agent = agent_name.into();
        let (sender, inbox) = self.open_inbox(agent.clone());
        self.attach(agent, sender);
        inbox
    }

    pub fn unregister_agent(&self, agent_name: &str) -> bool {
        let removed = self.inboxes.write().remove(agent_name).is_some();
        if removed {
            info!(agent = %agent_name, "Agent unregistered from message bus");
        }
        removed
    }

    pub fn is_registered(&self, agent_name: &str) -> bool {
        self.inboxes.read().contains_key(agent_name)
    }

    pub fn registered_agents(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inboxes.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Route a message. Returns how many inboxes it was queued into.
    ///
    /// Broadcast goes to every registered inbox except the sender's own.
    /// Subscribers for the message type are invoked after queue delivery.
    pub async fn send_message(&self, message: Message) -> usize {
        self.route(message, None).await
    }

    /// Like [`send_message`](Self::send_message), but under
    /// [`OverflowPolicy::Block`] waits at most `limit` per full inbox before
    /// dropping the message.
    pub async fn send_message_within(&self, message: Message, limit: Duration) -> usize {
        self.route(message, Some(limit)).await
    }

    async fn route(&self, message: Message, limit: Option<Duration>) -> usize {
        let targets: Vec<(String, mpsc::Sender<Message>)> = {
            let inboxes = self.inboxes.read();
            if message.is_broadcast() {
                inboxes
                    .iter()
                    .filter(|(name, _)| message.is_for(name))
                    .map(|(name, tx)| (name.clone(), tx.clone()))
                    .collect()
            } else {
                inboxes
                    .get(&message.to_agent)
                    .map(|tx| vec![(message.to_agent.clone(), tx.clone())])
                    .unwrap_or_default()
            }
        };

        if targets.is_empty() && !message.is_broadcast() {
            self.counters.undeliverable.fetch_add(1, Ordering::Relaxed);
            warn!(
                to = %message.to_agent,
                from = %message.from_agent,
                msg_type = %message.message_type,
                "Message undeliverable, agent not registered"
            );
        }

        let mut delivered = 0;
        for (name, sender) in targets {
            if self.deliver(&name, &sender, message.clone(), limit).await {
                delivered += 1;
            }
        }

        self.notify_subscribers(&message).await;
        delivered
    }

    async fn deliver(
        &self,
        name: &str,
        sender: &mpsc::Sender<Message>,
        message: Message,
        limit: Option<Duration>,
    ) -> bool {
        let msg_type = message.message_type.clone();
        let outcome = match (self.config.overflow, limit) {
            (OverflowPolicy::Block, None) => sender.send(message).await.map_err(|_| "inbox closed"),
            (OverflowPolicy::Block, Some(limit)) => {
                sender.send_timeout(message, limit).await.map_err(|e| match e {
                    mpsc::error::SendTimeoutError::Timeout(_) => "inbox full after waiting",
                    mpsc::error::SendTimeoutError::Closed(_) => "inbox closed",
                })
            }
            (OverflowPolicy::Reject, _) => sender.try_send(message).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => "inbox full",
                mpsc::error::TrySendError::Closed(_) => "inbox closed",
            }),
        };

        match outcome {
            Ok(()) => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                debug!(to = %name, msg_type = %msg_type, "Message routed");
                true
            }
            Err(reason) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(to = %name, msg_type = %msg_type, reason, "Message dropped");
                false
            }
        }
    }

    async fn notify_subscribers(&self, message: &Message) {
        let handlers = self
            .subscribers
            .read()
            .get(&message.message_type)
            .cloned()
            .unwrap_or_default();
        if !handlers.is_empty() {
            dispatch_all("message_bus", &handlers, message).await;
        }
    }

    /// Observe every routed message of the given type.
    pub fn subscribe(&self, message_type: impl Into<String>, handler: BoxedHandler) {
        let message_type = message_type.into();
        info!(msg_type = %message_type, "Subscribed to message type");
        self.subscribers
            .write()
            .entry(message_type)
            .or_default()
            .push(handler);
    }

    pub fn subscriber_count(&self, message_type: &str) -> usize {
        self.subscribers
            .read()
            .get(message_type)
            .map_or(0, Vec::len)
    }

    /// Convenience wrapper building a wildcard-addressed message.
    pub async fn broadcast(
        &self,
        from_agent: impl Into<String>,
        message_type: impl Into<String>,
        content: impl Into<String>,
        data: HashMap<String, Value>,
    ) -> usize {
        let message = Message::broadcast(from_agent, message_type, content).with_data(data);
        self.send_message(message).await
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            undeliverable: self.counters.undeliverable.load(Ordering::Relaxed),
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}
