//! Request and response shapes for the lattice control API.
//!
//! Every operation answers with the [`Response`] envelope; the payload
//! types mirror the wire contract field for field.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use wasmbus::Error;

/// Subject prefix for the control API: `ctl.v1.<lattice>.<entity>.<op>`.
pub const PREFIX_CTL_V1: &str = "ctl.v1";

/// Message answered by a config get when the named configuration does not
/// exist. The envelope still reports success; this string is the only
/// not-found signal and is part of the wire contract.
pub const CONFIG_NOT_FOUND: &str = "Configuration not found";

/// Control-interface response envelope: `{success, message, response}`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(bound(deserialize = "T: serde::de::DeserializeOwned + Default"))]
pub struct Response<T> {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub response: T,
}

impl<T> Response<T> {
    /// Successful response carrying a payload.
    pub fn ok(response: T) -> Self {
        Response {
            success: true,
            message: String::new(),
            response,
        }
    }
}

impl<T: Default> Response<T> {
    /// Successful response with a message and a zero payload.
    pub fn success(message: impl Into<String>) -> Self {
        Response {
            success: true,
            message: message.into(),
            response: T::default(),
        }
    }

    /// Failed response with a message and a zero payload.
    pub fn error(message: impl Into<String>) -> Self {
        Response {
            success: false,
            message: message.into(),
            response: T::default(),
        }
    }
}

/// Zero payload for acknowledgement-only operations; serializes as `{}`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct EmptyPayload {}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ProviderAuctionRequest {
    /// Constraints a host must satisfy to win the auction. An empty map is
    /// meaningful (any host matches) and is always carried in the body.
    #[serde(default)]
    pub constraints: HashMap<String, String>,
    #[serde(default)]
    pub provider_id: String,
    #[serde(default)]
    pub provider_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ProviderAuctionAck {
    /// The bidding host.
    pub host_id: String,
    #[serde(default)]
    pub constraints: HashMap<String, String>,
    #[serde(default)]
    pub provider_id: String,
    #[serde(default)]
    pub provider_ref: String,
}

pub type ProviderAuctionResponse = Response<ProviderAuctionAck>;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ComponentAuctionRequest {
    #[serde(default)]
    pub constraints: HashMap<String, String>,
    #[serde(default)]
    pub component_id: String,
    #[serde(default)]
    pub component_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ComponentAuctionAck {
    pub host_id: String,
    #[serde(default)]
    pub constraints: HashMap<String, String>,
    #[serde(default)]
    pub component_id: String,
    #[serde(default)]
    pub component_ref: String,
}

pub type ComponentAuctionResponse = Response<ComponentAuctionAck>;

/// Idempotent on `(component_id, component_ref, count)`; `count = 0` stops
/// the component.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ScaleComponentRequest {
    pub component_id: String,
    pub component_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,
    pub count: u32,
    pub host_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config: Vec<String>,
    /// Permit an image reference change as part of this scale request.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub allow_update: bool,
}

pub type ScaleComponentResponse = Response<EmptyPayload>;

/// Rolling image swap. The server reports success only once the new
/// instance is live; callers retry with backoff.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct UpdateComponentRequest {
    pub component_id: String,
    pub host_id: String,
    pub new_component_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,
}

pub type UpdateComponentResponse = Response<EmptyPayload>;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ProviderStartRequest {
    pub host_id: String,
    pub provider_id: String,
    pub provider_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config: Vec<String>,
}

pub type ProviderStartResponse = Response<EmptyPayload>;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ProviderStopRequest {
    pub host_id: String,
    pub provider_id: String,
}

pub type ProviderStopResponse = Response<EmptyPayload>;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HostStopRequest {
    pub host_id: String,
    /// Grace period in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

pub type HostStopResponse = Response<EmptyPayload>;

/// Config put: the body on the wire is the raw values map, no envelope.
/// The name never travels in the body; the server fills it in from the
/// final subject token.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ConfigPutRequest {
    #[serde(skip)]
    pub name: String,
    #[serde(flatten)]
    pub values: HashMap<String, String>,
}

pub type ConfigPutResponse = Response<EmptyPayload>;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ConfigGetRequest {
    #[serde(skip)]
    pub name: String,
}

pub type ConfigGetResponse = Response<HashMap<String, String>>;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ConfigDeleteRequest {
    #[serde(skip)]
    pub name: String,
}

pub type ConfigDeleteResponse = Response<EmptyPayload>;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HostLabelPutRequest {
    pub key: String,
    pub value: String,
}

pub type HostLabelPutResponse = Response<EmptyPayload>;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HostLabelDeleteRequest {
    pub key: String,
    /// The server ignores this field; only the key selects the label. It is
    /// kept for wire compatibility with existing clients and should not be
    /// relied upon.
    #[serde(default)]
    pub value: String,
}

pub type HostLabelDeleteResponse = Response<EmptyPayload>;

/// A named binding of a (source, interface, target) tuple.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Link {
    pub source_id: String,
    pub target: String,
    pub name: String,
    pub wit_namespace: String,
    pub wit_package: String,
    #[serde(rename = "interfaces")]
    pub wit_interfaces: Vec<String>,
    #[serde(default)]
    pub source_config: Vec<String>,
    #[serde(default)]
    pub target_config: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LinkGetRequest {}

pub type LinkGetResponse = Response<Vec<Link>>;

pub type LinkPutRequest = Link;

pub type LinkPutResponse = Response<EmptyPayload>;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LinkDeleteRequest {
    pub source_id: String,
    pub name: String,
    pub wit_namespace: String,
    pub wit_package: String,
}

pub type LinkDeleteResponse = Response<EmptyPayload>;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ClaimsGetRequest {}

pub type ClaimsGetResponse = Response<HashMap<String, String>>;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HostInventoryRequest {}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ComponentDescription {
    pub id: String,
    #[serde(default)]
    pub image_ref: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub revision: i32,
    #[serde(default)]
    pub max_instances: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ProviderDescription {
    pub id: String,
    #[serde(default)]
    pub image_ref: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub revision: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HostInventory {
    #[serde(default)]
    pub components: Vec<ComponentDescription>,
    #[serde(default)]
    pub providers: Vec<ProviderDescription>,
    pub host_id: String,
    #[serde(default)]
    pub friendly_name: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub uptime_human: String,
    #[serde(default)]
    pub uptime_seconds: u64,
}

pub type HostInventoryResponse = Response<HostInventory>;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HostPingRequest {}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HostPingPayload {
    pub id: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub friendly_name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub lattice: String,
    #[serde(default)]
    pub rpc_host: String,
    #[serde(default)]
    pub ctl_host: String,
    #[serde(default)]
    pub uptime_seconds: u64,
    #[serde(default)]
    pub uptime_human: String,
}

/// One host's reply to a ping; the scatter-gather client aggregates these.
pub type HostPingSingleResponse = Response<HostPingPayload>;

/// Aggregated ping result: every host reply that arrived within the wait
/// window, in arrival order.
pub type HostPingResponse = Response<Vec<HostPingPayload>>;

/// Server side of the control API. A host implements this and serves it
/// with [`crate::Server`].
#[async_trait]
pub trait Api: Send + Sync + 'static {
    async fn provider_auction(
        &self,
        req: ProviderAuctionRequest,
    ) -> Result<ProviderAuctionResponse, Error>;
    async fn component_auction(
        &self,
        req: ComponentAuctionRequest,
    ) -> Result<ComponentAuctionResponse, Error>;

    async fn scale_component(
        &self,
        req: ScaleComponentRequest,
    ) -> Result<ScaleComponentResponse, Error>;
    async fn update_component(
        &self,
        req: UpdateComponentRequest,
    ) -> Result<UpdateComponentResponse, Error>;

    async fn provider_start(
        &self,
        req: ProviderStartRequest,
    ) -> Result<ProviderStartResponse, Error>;
    async fn provider_stop(&self, req: ProviderStopRequest)
        -> Result<ProviderStopResponse, Error>;

    async fn host_stop(&self, req: HostStopRequest) -> Result<HostStopResponse, Error>;

    async fn config_put(&self, req: ConfigPutRequest) -> Result<ConfigPutResponse, Error>;
    async fn config_get(&self, req: ConfigGetRequest) -> Result<ConfigGetResponse, Error>;
    async fn config_delete(&self, req: ConfigDeleteRequest)
        -> Result<ConfigDeleteResponse, Error>;

    async fn host_label_put(
        &self,
        req: HostLabelPutRequest,
    ) -> Result<HostLabelPutResponse, Error>;
    async fn host_label_delete(
        &self,
        req: HostLabelDeleteRequest,
    ) -> Result<HostLabelDeleteResponse, Error>;

    async fn link_get(&self, req: LinkGetRequest) -> Result<LinkGetResponse, Error>;
    async fn link_put(&self, req: LinkPutRequest) -> Result<LinkPutResponse, Error>;
    async fn link_delete(&self, req: LinkDeleteRequest) -> Result<LinkDeleteResponse, Error>;

    async fn claims_get(&self, req: ClaimsGetRequest) -> Result<ClaimsGetResponse, Error>;

    async fn host_inventory(
        &self,
        req: HostInventoryRequest,
    ) -> Result<HostInventoryResponse, Error>;
    async fn host_ping(&self, req: HostPingRequest) -> Result<HostPingSingleResponse, Error>;
}
