use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use wasmbus::{codec, Bus, Error, RequestHandler, ServerError, PATTERN_ALL};

use crate::types::*;
use crate::PREFIX_WADM;

/// Server side of the wadm API; a model store implements this.
#[async_trait]
pub trait Api: Send + Sync + 'static {
    async fn model_list(&self, req: ModelListRequest) -> Result<ModelListResponse, Error>;
    async fn model_get(&self, req: ModelGetRequest) -> Result<ModelGetResponse, Error>;
    async fn model_versions(
        &self,
        req: ModelVersionsRequest,
    ) -> Result<ModelVersionsResponse, Error>;
    async fn model_status(&self, req: ModelStatusRequest) -> Result<ModelStatusResponse, Error>;
    async fn model_put(&self, req: ModelPutRequest) -> Result<ModelPutResponse, Error>;
    async fn model_delete(&self, req: ModelDeleteRequest) -> Result<ModelDeleteResponse, Error>;
    async fn model_deploy(&self, req: ModelDeployRequest) -> Result<ModelDeployResponse, Error>;
    async fn model_undeploy(
        &self,
        req: ModelUndeployRequest,
    ) -> Result<ModelUndeployResponse, Error>;
}

macro_rules! api_handler {
    ($api:expr, $method:ident) => {{
        let api = Arc::clone(&$api);
        RequestHandler::new(move |req| {
            let api = Arc::clone(&api);
            async move { api.$method(req).await }.boxed()
        })
    }};
}

/// Sets the request name from the wildcard-captured final subject token.
macro_rules! name_from_subject {
    ($handler:expr) => {
        $handler.with_pre_request(|_ctx, req, msg| {
            req.name = msg.last_subject_part().to_string();
            Ok(())
        })
    };
}

/// Serves the wadm API on `wadm.api.<lattice>.model.<op>[.<name>]`.
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

    fn subject<'a>(&self, parts: impl IntoIterator<Item = &'a str>) -> String {
        let mut subject = format!("{PREFIX_WADM}.{}", self.lattice);
        for part in parts {
            subject.push('.');
            subject.push_str(part);
        }
        subject
    }

    /// Take the receiving half of the underlying server's error stream.
    pub fn error_stream(&self) -> Option<tokio::sync::mpsc::Receiver<ServerError>> {
        self.inner.error_stream()
    }

    /// Register every model operation and start the workers.
    pub async fn serve(&self) -> Result<(), Error> {
        // The legacy list subject answers with just the models array, no
        // envelope, and backfills the deprecated flat status field. The
        // post-request hook is the escape hatch for this wire shape; new
        // subjects should not grow more of these.
        let list_legacy = api_handler!(self.api, model_list).with_post_request(
            |_ctx, resp: &ModelListResponse, msg| {
                let mut models = resp.models.clone();
                for model in &mut models {
                    if let Some(detailed) = &model.detailed_status {
                        model.status = Some(detailed.info.status_type);
                    }
                }
                let bare = codec::encode(msg.subject.clone(), &models)?;
                msg.data = bare.data;
                Ok(())
            },
        );
        self.inner
            .register_handler(self.subject(["model", "list"]), list_legacy)
            .await?;

        self.inner
            .register_handler(
                self.subject(["model", "get"]),
                api_handler!(self.api, model_list),
            )
            .await?;

        self.inner
            .register_handler(
                self.subject(["model", "put"]),
                api_handler!(self.api, model_put),
            )
            .await?;

        let get = name_from_subject!(api_handler!(self.api, model_get));
        self.inner
            .register_handler(self.subject(["model", "get", PATTERN_ALL]), get)
            .await?;

        let status = name_from_subject!(api_handler!(self.api, model_status));
        self.inner
            .register_handler(self.subject(["model", "status", PATTERN_ALL]), status)
            .await?;

        let delete = name_from_subject!(api_handler!(self.api, model_delete));
        self.inner
            .register_handler(self.subject(["model", "del", PATTERN_ALL]), delete)
            .await?;

        let versions = name_from_subject!(api_handler!(self.api, model_versions));
        self.inner
            .register_handler(self.subject(["model", "versions", PATTERN_ALL]), versions)
            .await?;

        let deploy = name_from_subject!(api_handler!(self.api, model_deploy));
        self.inner
            .register_handler(self.subject(["model", "deploy", PATTERN_ALL]), deploy)
            .await?;

        let undeploy = name_from_subject!(api_handler!(self.api, model_undeploy));
        self.inner
            .register_handler(self.subject(["model", "undeploy", PATTERN_ALL]), undeploy)
            .await?;

        Ok(())
    }

    /// Drain every subscription and stop serving.
    pub async fn drain(&self) -> Result<(), Error> {
        self.inner.drain().await
    }
}
