use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{Error, Message};

/// Backlog value that disables buffering on a subscription: delivery applies
/// synchronous backpressure onto the transport instead of dropping.
pub const NO_BACKLOG: usize = 0;

/// Subject wildcard matching exactly one token.
pub const PATTERN_ALL: &str = "*";

/// A pluggable lattice transport.
///
/// Implementations must surface transport failures as
/// [`Error::Transport`], distinct from the encode/decode and operation
/// errors produced by the layers above. Deadlines and cancellation are the
/// caller's: wrap [`Bus::request`] in [`tokio::time::timeout`], or drop the
/// future to cancel at its next suspension point.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Fire-and-forget publish.
    async fn publish(&self, msg: Message) -> Result<(), Error>;

    /// Publish on a fresh inbox and resolve with the first correlated reply.
    async fn request(&self, msg: Message) -> Result<Message, Error>;

    /// Open a subscription on a subject pattern with the given backlog.
    ///
    /// With [`NO_BACKLOG`] the transport delivers with synchronous
    /// backpressure; slow consumers stall the delivery task. With a positive
    /// backlog the transport buffers up to `backlog` messages and drops
    /// further deliveries for this consumer only, counting the drops in
    /// [`Subscription::dropped`].
    async fn subscribe(&self, subject: &str, backlog: usize) -> Result<Subscription, Error>;

    /// A globally unique inbox subject for scatter/gather and request/reply.
    fn new_inbox(&self) -> String;
}

/// A cursor over messages delivered for a subject pattern.
///
/// A subscription has a single consumer. Once [`Subscription::drain`] (or
/// its detached [`DrainTrigger`]) fires, the transport stops accepting new
/// deliveries; in-flight messages are still handed out, then the stream
/// ends. After `drain` returns no further callbacks fire.
pub struct Subscription {
    subject: String,
    messages: mpsc::Receiver<Message>,
    drain: DrainTrigger,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    pub(crate) fn new(
        subject: String,
        messages: mpsc::Receiver<Message>,
        drain: DrainTrigger,
        dropped: Arc<AtomicU64>,
    ) -> Self {
        Subscription {
            subject,
            messages,
            drain,
            dropped,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Number of messages dropped for this consumer because the backlog was
    /// full. Always zero for [`NO_BACKLOG`] subscriptions.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// A cloneable handle that can drain this subscription from another
    /// task, e.g. the server draining a subscription whose receiver lives
    /// inside a worker.
    pub fn drain_trigger(&self) -> DrainTrigger {
        self.drain.clone()
    }

    /// Receive the next message, or `None` once the subscription is closed
    /// and flushed.
    pub async fn next(&mut self) -> Option<Message> {
        self.messages.recv().await
    }

    /// Consume the subscription, invoking `f` for every message until the
    /// subscription is drained or the transport closes it.
    pub async fn handle<F>(mut self, mut f: F)
    where
        F: FnMut(Message),
    {
        while let Some(msg) = self.next().await {
            f(msg);
        }
    }

    /// Stop accepting new messages, flush the ones already delivered, and
    /// close the subscription.
    pub async fn drain(mut self) {
        self.drain.trigger();
        while self.messages.recv().await.is_some() {}
    }
}

impl core::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscription")
            .field("subject", &self.subject)
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

/// Detached handle that tells the transport to stop delivering to a
/// subscription. Triggering is idempotent.
#[derive(Clone)]
pub struct DrainTrigger(Arc<dyn Fn() + Send + Sync>);

impl DrainTrigger {
    pub(crate) fn new(f: impl Fn() + Send + Sync + 'static) -> Self {
        DrainTrigger(Arc::new(f))
    }

    pub fn trigger(&self) {
        (self.0)();
    }
}

impl core::fmt::Debug for DrainTrigger {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("DrainTrigger")
    }
}

/// Token-wise NATS subject matching: `*` matches exactly one token, `>`
/// matches one or more trailing tokens.
pub(crate) fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut subject = subject.split('.');
    for token in pattern.split('.') {
        if token == ">" {
            return subject.next().is_some();
        }
        match subject.next() {
            Some(part) if token == PATTERN_ALL || token == part => {}
            _ => return false,
        }
    }
    subject.next().is_none()
}
