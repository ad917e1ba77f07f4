use core::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::{codec, Bus, Error};

/// Typed one-shot lattice request: encode the request, issue a correlated
/// [`Bus::request`], decode the reply.
///
/// An elapsed timeout surfaces as [`Error::Transport`]; decoding failures as
/// [`Error::Decode`]. Operation-level failure lives inside the decoded
/// response envelope and is the caller's to inspect.
#[instrument(level = "debug", skip_all)]
pub async fn lattice_request<Req, Resp>(
    bus: &dyn Bus,
    subject: impl Into<String>,
    req: &Req,
    timeout: Duration,
) -> Result<Resp, Error>
where
    Req: Serialize + ?Sized,
    Resp: DeserializeOwned,
{
    let subject = subject.into();
    debug!(%subject, "lattice request");
    let msg = codec::encode(subject, req)?;
    let reply = tokio::time::timeout(timeout, bus.request(msg))
        .await
        .map_err(|_| Error::Transport("request timed out".to_string()))??;
    codec::decode(&reply)
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use super::*;
    use crate::InprocBus;

    #[tokio::test]
    async fn round_trip() -> anyhow::Result<()> {
        let bus = InprocBus::new();
        let mut sub = bus.subscribe("svc.echo", crate::NO_BACKLOG).await?;
        let responder = bus.clone();
        tokio::spawn(async move {
            while let Some(msg) = sub.next().await {
                let req: BTreeMap<String, String> =
                    codec::decode(&msg).expect("request should decode");
                let Some(reply) = msg.reply.clone() else { continue };
                let resp = codec::encode(reply, &req).expect("response should encode");
                let _ = responder.publish(resp).await;
            }
        });

        let req = BTreeMap::from([("k".to_string(), "v".to_string())]);
        let resp: BTreeMap<String, String> =
            lattice_request(&bus, "svc.echo", &req, Duration::from_secs(1)).await?;
        assert_eq!(resp, req);
        Ok(())
    }

    #[tokio::test]
    async fn timeout_is_transport_error() {
        let bus = InprocBus::new();
        let req = BTreeMap::from([("k".to_string(), "v".to_string())]);
        let result: Result<BTreeMap<String, String>, Error> = lattice_request(
            &bus,
            "svc.nobody-listening",
            &req,
            Duration::from_millis(50),
        )
        .await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
