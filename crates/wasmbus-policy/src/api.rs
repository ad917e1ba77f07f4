//! Wire types for the policy API. Field names follow the engine's
//! camelCase wire convention.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use wasmbus::Error;

/// Kind discriminators carried in the request body.
pub const KIND_START_COMPONENT: &str = "startComponent";
pub const KIND_START_PROVIDER: &str = "startProvider";
pub const KIND_PERFORM_INVOCATION: &str = "performInvocation";

/// Envelope every policy request travels in. The `kind` field selects the
/// concrete shape of `request`; the envelope is decoded first with a raw
/// `request` so dispatch never commits to a shape prematurely.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(bound(deserialize = "T: serde::de::DeserializeOwned + Default"))]
pub struct BaseRequest<T> {
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub host: Host,
    #[serde(default)]
    pub request: T,
}

impl<T> BaseRequest<T> {
    /// A decision response carrying this request's id.
    pub fn decision(&self, permitted: bool, message: impl Into<String>) -> Response {
        Response {
            request_id: self.request_id.clone(),
            permitted,
            message: message.into(),
        }
    }

    /// An allow decision for this request.
    pub fn allow(&self, message: impl Into<String>) -> Response {
        self.decision(true, message)
    }

    /// A deny decision for this request.
    pub fn deny(&self, message: impl Into<String>) -> Response {
        self.decision(false, message)
    }
}

/// The engine's verdict.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Response {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub permitted: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// The host asking for a decision.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    pub public_key: String,
    #[serde(default)]
    pub lattice: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// Claims summary some engines receive alongside invocation targets.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub public_key: String,
    #[serde(default)]
    pub issuer: String,
    #[serde(default)]
    pub issued_at: i64,
    #[serde(default)]
    pub expires_at: i64,
    #[serde(default)]
    pub expired: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StartComponentPayload {
    pub component_id: String,
    #[serde(default)]
    pub image_ref: String,
    #[serde(default)]
    pub max_instances: u32,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

pub type StartComponentRequest = BaseRequest<StartComponentPayload>;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StartProviderPayload {
    pub provider_id: String,
    #[serde(default)]
    pub image_ref: String,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

pub type StartProviderRequest = BaseRequest<StartProviderPayload>;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InvocationTarget {
    pub component_id: String,
    #[serde(default)]
    pub image_ref: String,
    #[serde(default)]
    pub max_instances: u32,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PerformInvocationPayload {
    pub interface: String,
    #[serde(default)]
    pub function: String,
    #[serde(default)]
    pub target: InvocationTarget,
}

pub type PerformInvocationRequest = BaseRequest<PerformInvocationPayload>;

/// A policy engine implements this and serves it with [`crate::Server`].
#[async_trait]
pub trait Api: Send + Sync + 'static {
    /// Decide whether a component may be started.
    async fn start_component(&self, req: StartComponentRequest) -> Result<Response, Error>;
    /// Decide whether a provider may be started.
    async fn start_provider(&self, req: StartProviderRequest) -> Result<Response, Error>;
    /// Decide whether an invocation may proceed.
    async fn perform_invocation(&self, req: PerformInvocationRequest) -> Result<Response, Error>;
}
