use tokio::task::JoinHandle;
use tracing::warn;
use wasmbus::{Bus, DrainTrigger, Error, Message};

use crate::{parse_event, Event, EventError, PREFIX_EVENTS};

/// Consumer of a lattice event subscription.
///
/// Parsed events land in [`EventHandler::handle_event`]; anything that fails
/// the envelope/type/body parse lands in [`EventHandler::handle_error`],
/// which discards by default.
pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: &Event);

    fn handle_error(&self, _msg: &Message, _error: &EventError) {}
}

/// The simple form of an [`EventHandler`]: a callback for parsed events,
/// parse errors discarded.
pub struct DiscardErrorsHandler<F>(pub F);

impl<F> EventHandler for DiscardErrorsHandler<F>
where
    F: Fn(&Event) + Send + Sync,
{
    fn handle_event(&self, event: &Event) {
        (self.0)(event);
    }
}

/// A running event subscription; dropping it leaves the worker running,
/// [`EventSubscription::drain`] shuts it down.
pub struct EventSubscription {
    drain: DrainTrigger,
    task: JoinHandle<()>,
}

impl EventSubscription {
    /// Stop accepting events, flush in-flight deliveries, and wait for the
    /// worker. No handler callback fires after this returns.
    pub async fn drain(self) {
        self.drain.trigger();
        if let Err(error) = self.task.await {
            warn!(%error, "event subscription worker ended abnormally");
        }
    }
}

/// Subscribe to `wasmbus.evt.<lattice>.<pattern>` and feed every delivery
/// through `handler`.
///
/// `pattern` is a subject pattern over event names, e.g. a concrete name or
/// [`wasmbus::PATTERN_ALL`]. Backlog semantics are those of
/// [`Bus::subscribe`].
pub async fn subscribe(
    bus: &dyn Bus,
    lattice: &str,
    pattern: &str,
    backlog: usize,
    handler: impl EventHandler + 'static,
) -> Result<EventSubscription, Error> {
    let subject = format!("{PREFIX_EVENTS}.{lattice}.{pattern}");
    let mut sub = bus.subscribe(&subject, backlog).await?;
    let drain = sub.drain_trigger();

    let task = tokio::spawn(async move {
        while let Some(msg) = sub.next().await {
            match parse_event(&msg.data) {
                Ok(event) => handler.handle_event(&event),
                Err(error) => handler.handle_error(&msg, &error),
            }
        }
    });

    Ok(EventSubscription { drain, task })
}

#[cfg(test)]
mod test {
    use core::time::Duration;

    use tokio::sync::mpsc;
    use wasmbus::{codec, Bus, InprocBus, NO_BACKLOG, PATTERN_ALL};

    use super::*;
    use crate::{encode_event, event_subject, BusEvent, HostHeartbeat};

    struct ChannelHandler {
        events: mpsc::Sender<Event>,
        errors: mpsc::Sender<String>,
    }

    impl EventHandler for ChannelHandler {
        fn handle_event(&self, event: &Event) {
            let _ = self.events.try_send(event.clone());
        }

        fn handle_error(&self, _msg: &Message, error: &EventError) {
            let _ = self.errors.try_send(error.to_string());
        }
    }

    async fn publish_event(bus: &InprocBus, lattice: &str, event: &BusEvent) -> anyhow::Result<()> {
        let encoded = encode_event("test", event)?;
        let msg = codec::encode(
            event_subject(lattice, event.name()),
            &encoded.cloud_event,
        )?;
        bus.publish(msg).await?;
        Ok(())
    }

    #[tokio::test]
    async fn delivers_parsed_events() -> anyhow::Result<()> {
        let bus = InprocBus::new();
        let (events_tx, mut events_rx) = mpsc::channel(1);
        let (errors_tx, _errors_rx) = mpsc::channel(1);
        let sub = subscribe(
            &bus,
            "default",
            PATTERN_ALL,
            NO_BACKLOG,
            ChannelHandler {
                events: events_tx,
                errors: errors_tx,
            },
        )
        .await?;

        let heartbeat = HostHeartbeat {
            host_id: "my-host-name".to_string(),
            ..Default::default()
        };
        publish_event(&bus, "default", &BusEvent::from(heartbeat.clone())).await?;

        let event = tokio::time::timeout(Duration::from_secs(1), events_rx.recv())
            .await?
            .expect("expected event, got none");
        assert_eq!(event.bus_event, BusEvent::HostHeartbeat(heartbeat));

        sub.drain().await;
        Ok(())
    }

    #[tokio::test]
    async fn unparseable_event_hits_error_handler() -> anyhow::Result<()> {
        let bus = InprocBus::new();
        let (events_tx, mut events_rx) = mpsc::channel(1);
        let (errors_tx, mut errors_rx) = mpsc::channel(1);
        let sub = subscribe(
            &bus,
            "default",
            PATTERN_ALL,
            NO_BACKLOG,
            ChannelHandler {
                events: events_tx,
                errors: errors_tx,
            },
        )
        .await?;

        let mut msg = Message::new(event_subject("default", "host_heartbeat"));
        msg.data = b"not-a-cloudevent".to_vec().into();
        bus.publish(msg).await?;

        tokio::select! {
            _ = events_rx.recv() => panic!("expected error, got event"),
            err = errors_rx.recv() => {
                assert!(err.is_some());
            }
            () = tokio::time::sleep(Duration::from_secs(1)) => panic!("expected error, got none"),
        }

        sub.drain().await;
        Ok(())
    }

    #[tokio::test]
    async fn discard_errors_handler() -> anyhow::Result<()> {
        let bus = InprocBus::new();
        let (events_tx, mut events_rx) = mpsc::channel::<Event>(1);
        let sub = subscribe(
            &bus,
            "default",
            PATTERN_ALL,
            NO_BACKLOG,
            DiscardErrorsHandler(move |event: &Event| {
                let _ = events_tx.try_send(event.clone());
            }),
        )
        .await?;

        publish_event(
            &bus,
            "default",
            &BusEvent::from(HostHeartbeat::default()),
        )
        .await?;

        let event = tokio::time::timeout(Duration::from_secs(1), events_rx.recv())
            .await?
            .expect("expected event, got none");
        assert_eq!(
            event.bus_event.event_type(),
            "com.wasmcloud.lattice.host_heartbeat"
        );

        sub.drain().await;
        Ok(())
    }
}
