//! Host bootstrap configuration over the lattice.
//!
//! Hosts joining a lattice ask `wasmbus.cfg.<lattice>.req` for their
//! configuration, presenting their labels; the answering service hands
//! back whatever the deployment provisions for them (currently registry
//! credentials). Wire field names are camelCase.

use core::time::Duration;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use wasmbus::{lattice_request, Bus, Error, RequestHandler, ServerError};

/// Subject prefix for the host-config API.
pub const PREFIX_CONFIG: &str = "wasmbus.cfg";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HostRequest {
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HostResponse {
    #[serde(
        rename = "registryCredentials",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub registry_credentials: Option<HashMap<String, RegistryCredential>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RegistryCredential {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// The configuration service a deployment implements.
#[async_trait]
pub trait Api: Send + Sync + 'static {
    /// Answer a host's bootstrap request.
    async fn host(&self, req: HostRequest) -> Result<HostResponse, Error>;
}

/// Config subject for a lattice.
pub fn config_subject(lattice: &str) -> String {
    format!("{PREFIX_CONFIG}.{lattice}.req")
}

/// Ask the lattice's config service for this host's configuration.
pub async fn request_host_config(
    bus: &dyn Bus,
    lattice: &str,
    req: &HostRequest,
    timeout: Duration,
) -> Result<HostResponse, Error> {
    lattice_request(bus, config_subject(lattice), req, timeout).await
}

/// Serves the host-config API for one lattice.
pub struct Server {
    inner: wasmbus::Server,
    lattice: String,
    api: Arc<dyn Api>,
}

impl Server {
    pub fn new(bus: Arc<dyn Bus>, lattice: impl Into<String>, api: Arc<dyn Api>) -> Self {
        Server {
            inner: wasmbus::Server::new(bus),
            lattice: lattice.into(),
            api,
        }
    }

    /// Take the receiving half of the underlying server's error stream.
    pub fn error_stream(&self) -> Option<tokio::sync::mpsc::Receiver<ServerError>> {
        self.inner.error_stream()
    }

    pub async fn serve(&self) -> Result<(), Error> {
        let api = Arc::clone(&self.api);
        let handler = RequestHandler::new(move |req: HostRequest| {
            let api = Arc::clone(&api);
            async move { api.host(req).await }.boxed()
        });
        self.inner
            .register_handler(config_subject(&self.lattice), handler)
            .await
    }

    pub async fn drain(&self) -> Result<(), Error> {
        self.inner.drain().await
    }
}
