use core::time::Duration;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{debug, error, instrument};
use wasmbus::{codec, lattice_request, Bus, Error, Subscription};

use crate::api::*;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_WAIT: Duration = Duration::from_secs(5);

/// Backlog used for scatter-gather inboxes; large enough to absorb a burst
/// of host replies while the collector drains them.
const GATHER_BACKLOG: usize = 64;

/// Lattice control interface client.
///
/// Each operation returns the control [`Response`] envelope. The outer
/// `Result` covers protocol failures (transport, timeouts, decoding); the
/// envelope is the authoritative per-request outcome and should be
/// inspected for application-level errors.
#[derive(Clone)]
pub struct Client {
    bus: Arc<dyn Bus>,
    lattice: String,
    timeout: Duration,
    wait: Duration,
}

impl core::fmt::Debug for Client {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Client")
            .field("lattice", &self.lattice)
            .field("timeout", &self.timeout)
            .field("wait", &self.wait)
            .finish_non_exhaustive()
    }
}

/// Fluent configuration for [`Client`].
pub struct ClientBuilder {
    bus: Arc<dyn Bus>,
    lattice: String,
    timeout: Duration,
    wait: Duration,
}

impl ClientBuilder {
    #[must_use]
    pub fn new(bus: Arc<dyn Bus>) -> ClientBuilder {
        ClientBuilder {
            bus,
            lattice: "default".to_string(),
            timeout: DEFAULT_TIMEOUT,
            wait: DEFAULT_WAIT,
        }
    }

    /// The lattice ID/prefix used for this client. Defaults to `default`.
    #[must_use]
    pub fn lattice(self, lattice: impl Into<String>) -> ClientBuilder {
        ClientBuilder {
            lattice: lattice.into(),
            ..self
        }
    }

    /// Timeout for one-shot control requests. Defaults to 2 seconds.
    #[must_use]
    pub fn timeout(self, timeout: Duration) -> ClientBuilder {
        ClientBuilder { timeout, ..self }
    }

    /// Collection window for scatter-gather operations (host ping).
    /// Defaults to 5 seconds.
    #[must_use]
    pub fn wait(self, wait: Duration) -> ClientBuilder {
        ClientBuilder { wait, ..self }
    }

    #[must_use]
    pub fn build(self) -> Client {
        Client {
            bus: self.bus,
            lattice: self.lattice,
            timeout: self.timeout,
            wait: self.wait,
        }
    }
}

impl Client {
    /// A client with all default settings; the same as
    /// `ClientBuilder::new(bus).build()`.
    #[must_use]
    pub fn new(bus: Arc<dyn Bus>, lattice: impl Into<String>) -> Client {
        ClientBuilder::new(bus).lattice(lattice).build()
    }

    fn subject<'a>(&self, parts: impl IntoIterator<Item = &'a str>) -> String {
        let mut subject = format!("{PREFIX_CTL_V1}.{}", self.lattice);
        for part in parts {
            subject.push('.');
            subject.push_str(part);
        }
        subject
    }

    async fn request<Req, Resp>(&self, subject: String, req: &Req) -> Result<Resp, Error>
    where
        Req: serde::Serialize,
        Resp: DeserializeOwned,
    {
        lattice_request(self.bus.as_ref(), subject, req, self.timeout).await
    }

    /// Performs a provider auction, publishing the constraint set hosts
    /// must satisfy. Clients cannot assume an auction returns a bid.
    #[instrument(level = "debug", skip_all)]
    pub async fn provider_auction(
        &self,
        req: &ProviderAuctionRequest,
    ) -> Result<ProviderAuctionResponse, Error> {
        let subject = self.subject(["provider", "auction"]);
        debug!(%subject, "provider_auction:request");
        self.request(subject, req).await
    }

    /// Performs a component auction within the lattice.
    #[instrument(level = "debug", skip_all)]
    pub async fn component_auction(
        &self,
        req: &ComponentAuctionRequest,
    ) -> Result<ComponentAuctionResponse, Error> {
        let subject = self.subject(["component", "auction"]);
        debug!(%subject, "component_auction:request");
        self.request(subject, req).await
    }

    /// Commands a host to scale a component. Idempotent on
    /// `(component_id, component_ref, count)`; a count of zero stops the
    /// component.
    #[instrument(level = "debug", skip_all)]
    pub async fn scale_component(
        &self,
        req: &ScaleComponentRequest,
    ) -> Result<ScaleComponentResponse, Error> {
        let subject = self.subject(["component", "scale", &req.host_id]);
        debug!(%subject, "scale_component:request");
        self.request(subject, req).await
    }

    /// Commands a host to live-update a component to a new image reference.
    /// The host replies once the new instance is live; callers are expected
    /// to retry with backoff.
    #[instrument(level = "debug", skip_all)]
    pub async fn update_component(
        &self,
        req: &UpdateComponentRequest,
    ) -> Result<UpdateComponentResponse, Error> {
        let subject = self.subject(["component", "update", &req.host_id]);
        debug!(%subject, "update_component:request");
        self.request(subject, req).await
    }

    #[instrument(level = "debug", skip_all)]
    pub async fn provider_start(
        &self,
        req: &ProviderStartRequest,
    ) -> Result<ProviderStartResponse, Error> {
        let subject = self.subject(["provider", "start", &req.host_id]);
        debug!(%subject, "provider_start:request");
        self.request(subject, req).await
    }

    #[instrument(level = "debug", skip_all)]
    pub async fn provider_stop(
        &self,
        req: &ProviderStopRequest,
    ) -> Result<ProviderStopResponse, Error> {
        let subject = self.subject(["provider", "stop", &req.host_id]);
        debug!(%subject, "provider_stop:request");
        self.request(subject, req).await
    }

    /// Commands a specific host to shut down gracefully.
    #[instrument(level = "debug", skip_all)]
    pub async fn host_stop(&self, req: &HostStopRequest) -> Result<HostStopResponse, Error> {
        let subject = self.subject(["host", "stop", &req.host_id]);
        debug!(%subject, "host_stop:request");
        self.request(subject, req).await
    }

    /// Puts a named config, replacing any data already present.
    #[instrument(level = "debug", skip_all)]
    pub async fn config_put(&self, req: &ConfigPutRequest) -> Result<ConfigPutResponse, Error> {
        let subject = self.subject(["config", "put", &req.name]);
        debug!(%subject, name = %req.name, "config_put:request");
        self.request(subject, req).await
    }

    /// Gets a named config. An absent config still answers success, with
    /// the [`CONFIG_NOT_FOUND`] message.
    #[instrument(level = "debug", skip_all)]
    pub async fn config_get(&self, req: &ConfigGetRequest) -> Result<ConfigGetResponse, Error> {
        let subject = self.subject(["config", "get", &req.name]);
        debug!(%subject, name = %req.name, "config_get:request");
        self.request(subject, req).await
    }

    #[instrument(level = "debug", skip_all)]
    pub async fn config_delete(
        &self,
        req: &ConfigDeleteRequest,
    ) -> Result<ConfigDeleteResponse, Error> {
        let subject = self.subject(["config", "del", &req.name]);
        debug!(%subject, name = %req.name, "config_delete:request");
        self.request(subject, req).await
    }

    /// Puts (or updates) a label on the given host.
    #[instrument(level = "debug", skip_all)]
    pub async fn host_label_put(
        &self,
        host_id: &str,
        req: &HostLabelPutRequest,
    ) -> Result<HostLabelPutResponse, Error> {
        let subject = self.subject(["host", "label", "put", host_id]);
        debug!(%subject, "host_label_put:request");
        self.request(subject, req).await
    }

    /// Removes a label from the given host. Only the key selects the
    /// label; the request's `value` is ignored by hosts.
    #[instrument(level = "debug", skip_all)]
    pub async fn host_label_delete(
        &self,
        host_id: &str,
        req: &HostLabelDeleteRequest,
    ) -> Result<HostLabelDeleteResponse, Error> {
        let subject = self.subject(["host", "label", "del", host_id]);
        debug!(%subject, "host_label_delete:request");
        self.request(subject, req).await
    }

    /// Lists the link definitions stored in the lattice.
    #[instrument(level = "debug", skip_all)]
    pub async fn link_get(&self) -> Result<LinkGetResponse, Error> {
        let subject = self.subject(["link", "get"]);
        debug!(%subject, "link_get:request");
        self.request(subject, &LinkGetRequest {}).await
    }

    /// Puts a link into the lattice.
    #[instrument(level = "debug", skip_all)]
    pub async fn link_put(&self, req: &LinkPutRequest) -> Result<LinkPutResponse, Error> {
        let subject = self.subject(["link", "put"]);
        debug!(%subject, "link_put:request");
        self.request(subject, req).await
    }

    /// Deletes a link. Idempotent.
    #[instrument(level = "debug", skip_all)]
    pub async fn link_delete(&self, req: &LinkDeleteRequest) -> Result<LinkDeleteResponse, Error> {
        let subject = self.subject(["link", "del"]);
        debug!(%subject, "link_delete:request");
        self.request(subject, req).await
    }

    /// Retrieves the set of cached claims from the lattice.
    #[instrument(level = "debug", skip_all)]
    pub async fn claims_get(&self) -> Result<ClaimsGetResponse, Error> {
        let subject = self.subject(["claims", "get"]);
        debug!(%subject, "claims_get:request");
        self.request(subject, &ClaimsGetRequest {}).await
    }

    /// Retrieves the inventory of a running host.
    #[instrument(level = "debug", skip_all)]
    pub async fn host_inventory(&self, host_id: &str) -> Result<HostInventoryResponse, Error> {
        let subject = self.subject(["host", "get", host_id]);
        debug!(%subject, "host_inventory:request");
        self.request(subject, &HostInventoryRequest {}).await
    }

    /// Queries the lattice for all responsive hosts, always waiting the
    /// full window.
    ///
    /// Scatter-gather: publish once with a fresh inbox as the reply
    /// subject, collect every [`HostPingSingleResponse`] that arrives
    /// within `wait`, and aggregate the payloads in arrival order. The
    /// timeout is normal termination, so partial results come back with
    /// `success = true`; zero running hosts yields an empty list.
    #[instrument(level = "debug", skip_all)]
    pub async fn host_ping(&self, wait: Option<Duration>) -> Result<HostPingResponse, Error> {
        let subject = self.subject(["host", "ping"]);
        debug!(%subject, "host_ping:publish");

        let inbox = self.bus.new_inbox();
        let sub = self.bus.subscribe(&inbox, GATHER_BACKLOG).await?;

        let mut msg = codec::encode(subject.clone(), &HostPingRequest {})?;
        msg.reply = Some(inbox);
        self.bus.publish(msg).await?;

        let wait = wait.unwrap_or(self.wait);
        let singles: Vec<HostPingSingleResponse> =
            collect_timeout(sub, wait, subject.as_str()).await;

        let hosts = singles
            .into_iter()
            .filter(|single| single.success)
            .map(|single| single.response)
            .collect();
        Ok(Response::ok(hosts))
    }
}

/// Collect correlated replies until the window has elapsed or the
/// subscription closes. Replies are gathered in arrival order; no ordering
/// across responders is assumed.
pub(crate) async fn collect_timeout<T: DeserializeOwned>(
    mut sub: Subscription,
    timeout: Duration,
    reason: &str,
) -> Vec<T> {
    let mut items = Vec::new();
    let sleep = tokio::time::sleep(timeout);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            maybe = sub.next() => {
                let Some(msg) = maybe else {
                    break;
                };
                if msg.data.is_empty() {
                    break;
                }
                match codec::decode::<T>(&msg) {
                    Ok(item) => items.push(item),
                    Err(err) => {
                        error!(%reason, error = %err,
                            "deserialization error in scatter-gather - results may be incomplete",
                        );
                        break;
                    }
                }
            },
            () = &mut sleep => { /* window elapsed */ break; }
        }
    }
    sub.drain().await;
    items
}
