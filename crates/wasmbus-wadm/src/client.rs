use core::time::Duration;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use wasmbus::{lattice_request, Bus, Error};

use crate::types::*;
use crate::PREFIX_WADM;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Client for the wadm application management API on one lattice.
#[derive(Clone)]
pub struct Client {
    bus: Arc<dyn Bus>,
    lattice: String,
    timeout: Duration,
}

impl core::fmt::Debug for Client {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Client")
            .field("lattice", &self.lattice)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Client {
    pub fn new(bus: Arc<dyn Bus>, lattice: impl Into<String>) -> Self {
        Client {
            bus,
            lattice: lattice.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn subject<'a>(&self, parts: impl IntoIterator<Item = &'a str>) -> String {
        let mut subject = format!("{PREFIX_WADM}.{}", self.lattice);
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

    /// List all models. Uses the modern enveloped `model.get` subject.
    #[instrument(level = "debug", skip_all)]
    pub async fn model_list(&self, req: &ModelListRequest) -> Result<ModelListResponse, Error> {
        let subject = self.subject(["model", "get"]);
        debug!(%subject, "model_list:request");
        self.request(subject, req).await
    }

    /// Fetch one model by name, optionally at a specific version.
    #[instrument(level = "debug", skip_all)]
    pub async fn model_get(&self, req: &ModelGetRequest) -> Result<ModelGetResponse, Error> {
        let subject = self.subject(["model", "get", &req.name]);
        debug!(%subject, name = %req.name, "model_get:request");
        self.request(subject, req).await
    }

    #[instrument(level = "debug", skip_all)]
    pub async fn model_versions(
        &self,
        req: &ModelVersionsRequest,
    ) -> Result<ModelVersionsResponse, Error> {
        let subject = self.subject(["model", "versions", &req.name]);
        debug!(%subject, name = %req.name, "model_versions:request");
        self.request(subject, req).await
    }

    #[instrument(level = "debug", skip_all)]
    pub async fn model_status(
        &self,
        req: &ModelStatusRequest,
    ) -> Result<ModelStatusResponse, Error> {
        let subject = self.subject(["model", "status", &req.name]);
        debug!(%subject, name = %req.name, "model_status:request");
        self.request(subject, req).await
    }

    /// Create or update a model; the body is the manifest itself.
    #[instrument(level = "debug", skip_all)]
    pub async fn model_put(&self, req: &ModelPutRequest) -> Result<ModelPutResponse, Error> {
        let subject = self.subject(["model", "put"]);
        debug!(%subject, name = %req.metadata.name, "model_put:request");
        self.request(subject, req).await
    }

    #[instrument(level = "debug", skip_all)]
    pub async fn model_delete(
        &self,
        req: &ModelDeleteRequest,
    ) -> Result<ModelDeleteResponse, Error> {
        let subject = self.subject(["model", "del", &req.name]);
        debug!(%subject, name = %req.name, "model_delete:request");
        self.request(subject, req).await
    }

    #[instrument(level = "debug", skip_all)]
    pub async fn model_deploy(
        &self,
        req: &ModelDeployRequest,
    ) -> Result<ModelDeployResponse, Error> {
        let subject = self.subject(["model", "deploy", &req.name]);
        debug!(%subject, name = %req.name, "model_deploy:request");
        self.request(subject, req).await
    }

    #[instrument(level = "debug", skip_all)]
    pub async fn model_undeploy(
        &self,
        req: &ModelUndeployRequest,
    ) -> Result<ModelUndeployResponse, Error> {
        let subject = self.subject(["model", "undeploy", &req.name]);
        debug!(%subject, name = %req.name, "model_undeploy:request");
        self.request(subject, req).await
    }
}
