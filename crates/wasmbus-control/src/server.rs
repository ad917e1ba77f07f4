use std::sync::Arc;

use futures::FutureExt;
use wasmbus::{Bus, Error, RequestHandler, ServerError, PATTERN_ALL};

use crate::api::*;

/// Builds a [`RequestHandler`] that forwards the decoded request to one
/// method of the [`Api`] implementation.
macro_rules! api_handler {
    ($api:expr, $method:ident) => {{
        let api = Arc::clone(&$api);
        RequestHandler::new(move |req| {
            let api = Arc::clone(&api);
            async move { api.$method(req).await }.boxed()
        })
    }};
}

/// Serves the control API for one host.
///
/// Host-scoped operations are registered under this host's ID; lattice-wide
/// operations (auctions, links, claims, config, ping) are shared subjects
/// every host in the lattice answers.
pub struct Server {
    inner: wasmbus::Server,
    lattice: String,
    host_id: String,
    api: Arc<dyn Api>,
}

impl Server {
    pub fn new(
        bus: Arc<dyn Bus>,
        lattice: impl Into<String>,
        host_id: impl Into<String>,
        api: Arc<dyn Api>,
    ) -> Self {
        Server {
            inner: wasmbus::Server::new(bus),
            lattice: lattice.into(),
            host_id: host_id.into(),
            api,
        }
    }

    fn subject<'a>(&self, parts: impl IntoIterator<Item = &'a str>) -> String {
        let mut subject = format!("{PREFIX_CTL_V1}.{}", self.lattice);
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

    /// Register every control operation and start the workers.
    pub async fn serve(&self) -> Result<(), Error> {
        self.inner
            .register_handler(
                self.subject(["provider", "auction"]),
                api_handler!(self.api, provider_auction),
            )
            .await?;

        self.inner
            .register_handler(
                self.subject(["component", "auction"]),
                api_handler!(self.api, component_auction),
            )
            .await?;

        self.inner
            .register_handler(
                self.subject(["component", "scale", &self.host_id]),
                api_handler!(self.api, scale_component),
            )
            .await?;

        self.inner
            .register_handler(
                self.subject(["component", "update", &self.host_id]),
                api_handler!(self.api, update_component),
            )
            .await?;

        self.inner
            .register_handler(
                self.subject(["provider", "start", &self.host_id]),
                api_handler!(self.api, provider_start),
            )
            .await?;

        self.inner
            .register_handler(
                self.subject(["provider", "stop", &self.host_id]),
                api_handler!(self.api, provider_stop),
            )
            .await?;

        self.inner
            .register_handler(
                self.subject(["host", "stop", &self.host_id]),
                api_handler!(self.api, host_stop),
            )
            .await?;

        // Config operations carry the config name as the final subject
        // token, captured by the wildcard and restored by the pre-hook.
        let config_put = api_handler!(self.api, config_put).with_pre_request(
            |_ctx, req: &mut ConfigPutRequest, msg| {
                req.name = msg.last_subject_part().to_string();
                Ok(())
            },
        );
        self.inner
            .register_handler(self.subject(["config", "put", PATTERN_ALL]), config_put)
            .await?;

        let config_get = api_handler!(self.api, config_get).with_pre_request(
            |_ctx, req: &mut ConfigGetRequest, msg| {
                req.name = msg.last_subject_part().to_string();
                Ok(())
            },
        );
        self.inner
            .register_handler(self.subject(["config", "get", PATTERN_ALL]), config_get)
            .await?;

        let config_delete = api_handler!(self.api, config_delete).with_pre_request(
            |_ctx, req: &mut ConfigDeleteRequest, msg| {
                req.name = msg.last_subject_part().to_string();
                Ok(())
            },
        );
        self.inner
            .register_handler(self.subject(["config", "del", PATTERN_ALL]), config_delete)
            .await?;

        self.inner
            .register_handler(
                self.subject(["host", "label", "put", &self.host_id]),
                api_handler!(self.api, host_label_put),
            )
            .await?;

        self.inner
            .register_handler(
                self.subject(["host", "label", "del", &self.host_id]),
                api_handler!(self.api, host_label_delete),
            )
            .await?;

        self.inner
            .register_handler(self.subject(["link", "get"]), api_handler!(self.api, link_get))
            .await?;

        self.inner
            .register_handler(self.subject(["link", "put"]), api_handler!(self.api, link_put))
            .await?;

        self.inner
            .register_handler(
                self.subject(["link", "del"]),
                api_handler!(self.api, link_delete),
            )
            .await?;

        self.inner
            .register_handler(
                self.subject(["claims", "get"]),
                api_handler!(self.api, claims_get),
            )
            .await?;

        self.inner
            .register_handler(
                self.subject(["host", "get", &self.host_id]),
                api_handler!(self.api, host_inventory),
            )
            .await?;

        self.inner
            .register_handler(
                self.subject(["host", "ping"]),
                api_handler!(self.api, host_ping),
            )
            .await?;

        Ok(())
    }

    /// Drain every subscription and stop serving.
    pub async fn drain(&self) -> Result<(), Error> {
        self.inner.drain().await
    }
}
