use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tracing::warn;

use crate::bus::{Bus, DrainTrigger, Subscription, NO_BACKLOG};
use crate::{Error, Message};

/// Default lattice transport over an [`async_nats::Client`].
#[derive(Clone)]
pub struct NatsBus {
    client: async_nats::Client,
}

impl NatsBus {
    pub fn new(client: async_nats::Client) -> Self {
        NatsBus { client }
    }

    /// The underlying NATS client.
    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }
}

#[async_trait]
impl Bus for NatsBus {
    async fn publish(&self, msg: Message) -> Result<(), Error> {
        match msg.reply {
            Some(reply) => self
                .client
                .publish_with_reply_and_headers(msg.subject, reply, msg.headers, msg.data)
                .await
                .map_err(Error::transport),
            None => self
                .client
                .publish_with_headers(msg.subject, msg.headers, msg.data)
                .await
                .map_err(Error::transport),
        }
    }

    async fn request(&self, msg: Message) -> Result<Message, Error> {
        let reply = self
            .client
            .request_with_headers(msg.subject, msg.headers, msg.data)
            .await
            .map_err(Error::transport)?;
        Ok(Message::from_nats(reply))
    }

    async fn subscribe(&self, subject: &str, backlog: usize) -> Result<Subscription, Error> {
        let mut subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(Error::transport)?;

        let (tx, rx) = mpsc::channel(backlog.max(1));
        let (drain_tx, mut drain_rx) = watch::channel(false);
        let dropped = Arc::new(AtomicU64::new(0));

        let drop_count = Arc::clone(&dropped);
        let sub_subject = subject.to_string();
        tokio::spawn(async move {
            let forward = |msg: async_nats::Message| {
                let msg = Message::from_nats(msg);
                if backlog == NO_BACKLOG {
                    // Synchronous backpressure: stall this forwarder until
                    // the consumer catches up.
                    ForwardMode::Send(msg)
                } else {
                    ForwardMode::TrySend(msg)
                }
            };
            loop {
                tokio::select! {
                    biased;
                    _ = drain_rx.changed() => {
                        if let Err(error) = subscriber.unsubscribe().await {
                            warn!(subject = %sub_subject, %error, "failed to unsubscribe on drain");
                        }
                        // Flush messages the transport already delivered.
                        while let Some(msg) = subscriber.next().await {
                            if !deliver(&tx, &drop_count, forward(msg)).await {
                                return;
                            }
                        }
                        return;
                    }
                    maybe = subscriber.next() => {
                        let Some(msg) = maybe else { return };
                        if !deliver(&tx, &drop_count, forward(msg)).await {
                            return;
                        }
                    }
                }
            }
        });

        let drain = DrainTrigger::new(move || {
            let _ = drain_tx.send(true);
        });

        Ok(Subscription::new(subject.to_string(), rx, drain, dropped))
    }

    fn new_inbox(&self) -> String {
        self.client.new_inbox()
    }
}

enum ForwardMode {
    Send(Message),
    TrySend(Message),
}

/// Returns `false` once the consumer side is gone.
async fn deliver(
    tx: &mpsc::Sender<Message>,
    dropped: &AtomicU64,
    mode: ForwardMode,
) -> bool {
    match mode {
        ForwardMode::Send(msg) => tx.send(msg).await.is_ok(),
        ForwardMode::TrySend(msg) => match tx.try_send(msg) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                // Slow consumer: drop for this subscription only and let the
                // counter tell the story.
                dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        },
    }
}
