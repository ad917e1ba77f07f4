use std::sync::Arc;

use futures::FutureExt;
use wasmbus::{codec, Bus, Context, Error, Message, RequestHandler, ServerError, TypedHandler};

use crate::api::*;

macro_rules! api_handler {
    ($api:expr, $method:ident) => {{
        let api = Arc::clone(&$api);
        RequestHandler::new(move |req| {
            let api = Arc::clone(&api);
            async move { api.$method(req).await }.boxed()
        })
    }};
}

/// Serves a policy engine on a single, deployment-chosen subject.
///
/// All three request kinds share the subject; a [`TypedHandler`] inspects
/// the in-body `kind` discriminator and hands the message to the matching
/// decision handler. Requests with an unknown kind get no reply; the
/// failure is visible on the error stream.
pub struct Server {
    inner: wasmbus::Server,
    subject: String,
    api: Arc<dyn Api>,
}

impl Server {
    pub fn new(bus: Arc<dyn Bus>, subject: impl Into<String>, api: Arc<dyn Api>) -> Self {
        Server {
            inner: wasmbus::Server::new(bus),
            subject: subject.into(),
            api,
        }
    }

    /// Take the receiving half of the underlying server's error stream.
    pub fn error_stream(&self) -> Option<tokio::sync::mpsc::Receiver<ServerError>> {
        self.inner.error_stream()
    }

    /// Register the kind-dispatched handler and start serving.
    pub async fn serve(&self) -> Result<(), Error> {
        let handler = TypedHandler::new(extract_kind);
        handler.register_type(
            KIND_START_COMPONENT,
            api_handler!(self.api, start_component),
        )?;
        handler.register_type(KIND_START_PROVIDER, api_handler!(self.api, start_provider))?;
        handler.register_type(
            KIND_PERFORM_INVOCATION,
            api_handler!(self.api, perform_invocation),
        )?;

        self.inner
            .register_handler(self.subject.clone(), handler)
            .await
    }

    /// Drain every subscription and stop serving.
    pub async fn drain(&self) -> Result<(), Error> {
        self.inner.drain().await
    }
}

/// First-stage decode: only the envelope, with the kind-specific request
/// left raw.
fn extract_kind(_ctx: &Context, msg: &Message) -> Result<String, Error> {
    let base: BaseRequest<serde_json::Value> = codec::decode(msg)?;
    match base.kind.as_str() {
        KIND_START_COMPONENT | KIND_START_PROVIDER | KIND_PERFORM_INVOCATION => Ok(base.kind),
        other => Err(Error::Operation(format!("unknown request kind: {other}"))),
    }
}
