use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::bus::{subject_matches, Bus, DrainTrigger, Subscription, NO_BACKLOG};
use crate::{Error, Message};

/// In-process [`Bus`] with full subject wildcard matching and request/reply
/// correlation over fresh inboxes.
///
/// Embeddings and test suites use it to run lattice servers and clients in
/// one process without a broker. Delivery semantics mirror the NATS
/// transport: publish is fan-out to every matching subscription,
/// [`NO_BACKLOG`] subscriptions apply backpressure onto the publisher, and
/// buffered subscriptions drop for slow consumers only.
#[derive(Clone, Default)]
pub struct InprocBus {
    state: Arc<State>,
}

#[derive(Default)]
struct State {
    entries: RwLock<Vec<Entry>>,
    next_id: AtomicU64,
}

#[derive(Clone)]
struct Entry {
    id: u64,
    pattern: String,
    tx: mpsc::Sender<Message>,
    backlog: usize,
    dropped: Arc<AtomicU64>,
}

impl InprocBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn matching(&self, subject: &str) -> Vec<Entry> {
        self.state
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|entry| subject_matches(&entry.pattern, subject))
            .cloned()
            .collect()
    }

    fn remove(&self, id: u64) {
        self.state
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|entry| entry.id != id);
    }

    /// Drop subscriptions whose consumer went away without draining.
    fn prune_closed(&self) {
        self.state
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|entry| !entry.tx.is_closed());
    }
}

#[async_trait]
impl Bus for InprocBus {
    async fn publish(&self, msg: Message) -> Result<(), Error> {
        if msg.subject.is_empty() {
            return Err(Error::Transport("publish with empty subject".to_string()));
        }

        let mut saw_closed = false;
        for entry in self.matching(&msg.subject) {
            if entry.tx.is_closed() {
                saw_closed = true;
                continue;
            }
            if entry.backlog == NO_BACKLOG {
                let _ = entry.tx.send(msg.clone()).await;
            } else if let Err(mpsc::error::TrySendError::Full(_)) = entry.tx.try_send(msg.clone())
            {
                entry.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        if saw_closed {
            self.prune_closed();
        }
        Ok(())
    }

    async fn request(&self, mut msg: Message) -> Result<Message, Error> {
        let inbox = self.new_inbox();
        let mut sub = self.subscribe(&inbox, 1).await?;
        msg.reply = Some(inbox);
        self.publish(msg).await?;

        let reply = sub.next().await;
        sub.drain().await;
        reply.ok_or_else(|| Error::Transport("no reply received".to_string()))
    }

    async fn subscribe(&self, subject: &str, backlog: usize) -> Result<Subscription, Error> {
        if subject.is_empty() {
            return Err(Error::Transport("subscribe with empty subject".to_string()));
        }

        let (tx, rx) = mpsc::channel(backlog.max(1));
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        let dropped = Arc::new(AtomicU64::new(0));
        self.state
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Entry {
                id,
                pattern: subject.to_string(),
                tx,
                backlog,
                dropped: Arc::clone(&dropped),
            });

        // Removing the entry drops the table's sender; in-flight publishes
        // still deliver through their clones, then the receiver ends.
        let bus = self.clone();
        let drain = DrainTrigger::new(move || bus.remove(id));

        Ok(Subscription::new(subject.to_string(), rx, drain, dropped))
    }

    fn new_inbox(&self) -> String {
        format!("_INBOX.{}", nuid::next())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn publish_subscribe() -> anyhow::Result<()> {
        let bus = InprocBus::new();
        let mut sub = bus.subscribe("test.a", NO_BACKLOG).await?;

        let mut msg = Message::new("test.a");
        msg.data = b"hello".to_vec().into();
        bus.publish(msg).await?;

        let received = sub.next().await.expect("message should be delivered");
        assert_eq!(&received.data[..], b"hello");
        Ok(())
    }

    #[tokio::test]
    async fn wildcard_subscription() -> anyhow::Result<()> {
        let bus = InprocBus::new();
        let mut sub = bus.subscribe("config.get.*", 4).await?;

        bus.publish(Message::new("config.get.myconf")).await?;
        bus.publish(Message::new("config.del.other")).await?;
        bus.publish(Message::new("config.get.second")).await?;

        assert_eq!(sub.next().await.map(|m| m.subject), Some("config.get.myconf".into()));
        assert_eq!(sub.next().await.map(|m| m.subject), Some("config.get.second".into()));
        Ok(())
    }

    #[tokio::test]
    async fn request_reply() -> anyhow::Result<()> {
        let bus = InprocBus::new();
        let mut sub = bus.subscribe("echo", NO_BACKLOG).await?;
        let responder = bus.clone();
        tokio::spawn(async move {
            while let Some(msg) = sub.next().await {
                let Some(reply) = msg.reply.clone() else { continue };
                let mut resp = Message::new(reply);
                resp.data = msg.data;
                let _ = responder.publish(resp).await;
            }
        });

        let mut req = Message::new("echo");
        req.data = b"ping".to_vec().into();
        let resp = tokio::time::timeout(std::time::Duration::from_secs(1), bus.request(req))
            .await
            .expect("request should not time out")?;
        assert_eq!(&resp.data[..], b"ping");
        Ok(())
    }

    #[tokio::test]
    async fn backlog_drops_for_slow_consumer() -> anyhow::Result<()> {
        let bus = InprocBus::new();
        let mut sub = bus.subscribe("burst", 2).await?;

        for _ in 0..5 {
            bus.publish(Message::new("burst")).await?;
        }

        assert_eq!(sub.dropped(), 3);
        assert!(sub.next().await.is_some());
        assert!(sub.next().await.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn drain_stops_delivery() -> anyhow::Result<()> {
        let bus = InprocBus::new();
        let sub = bus.subscribe("stop", 4).await?;

        bus.publish(Message::new("stop")).await?;
        let trigger = sub.drain_trigger();
        trigger.trigger();
        bus.publish(Message::new("stop")).await?;

        // The message published before the drain is flushed; the one after
        // is never delivered.
        let mut seen = 0;
        let mut sub = sub;
        while sub.next().await.is_some() {
            seen += 1;
        }
        assert_eq!(seen, 1);
        Ok(())
    }

    #[tokio::test]
    async fn publish_empty_subject_is_transport_error() {
        let bus = InprocBus::new();
        let err = bus.publish(Message::new("")).await;
        assert!(matches!(err, Err(Error::Transport(_))));
    }
}
