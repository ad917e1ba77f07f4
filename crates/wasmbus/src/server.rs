use std::collections::HashMap;
use std::sync::{Arc, Mutex as SyncMutex, PoisonError};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::bus::{Bus, DrainTrigger, NO_BACKLOG};
use crate::{codec, Context, Error, Message};

/// Transport and encoding errors that happen outside the request/response
/// scope, reported on the server's out-of-band error stream.
#[derive(Debug)]
pub struct ServerError {
    pub error: Error,
    pub request: Message,
}

/// Anything that can be registered with a [`Server`] for a subject.
///
/// Primary implementations are [`RequestHandler`], [`TypedHandler`] and
/// [`ServerHandlerFunc`]. The originating bus is passed in so a handler can
/// publish its reply without plumbing the bus through.
#[async_trait]
pub trait AnyServerHandler: Send + Sync {
    async fn handle_message(
        &self,
        bus: &Arc<dyn Bus>,
        ctx: &mut Context,
        msg: &Message,
    ) -> Result<(), Error>;
}

/// Adapter implementing [`AnyServerHandler`] from a closure.
///
/// The closure does its borrowing up front and returns an owned future;
/// state it needs from the message must be cloned out before the `async`
/// block.
pub struct ServerHandlerFunc<F>(pub F);

#[async_trait]
impl<F> AnyServerHandler for ServerHandlerFunc<F>
where
    F: Fn(Arc<dyn Bus>, &Message) -> BoxFuture<'static, Result<(), Error>> + Send + Sync,
{
    async fn handle_message(
        &self,
        bus: &Arc<dyn Bus>,
        _ctx: &mut Context,
        msg: &Message,
    ) -> Result<(), Error> {
        (self.0)(Arc::clone(bus), msg).await
    }
}

struct Worker {
    subject: String,
    drain: DrainTrigger,
    task: JoinHandle<()>,
}

/// Subject-keyed handler registry over a [`Bus`].
///
/// Each registered handler gets its own [`NO_BACKLOG`] subscription and
/// exactly one worker task reading messages sequentially, which preserves
/// ordering per subject; concurrency comes from registering multiple
/// subjects, not from multiple workers per subject.
pub struct Server {
    bus: Arc<dyn Bus>,
    context_fn: Arc<dyn Fn() -> Context + Send + Sync>,
    workers: Mutex<Vec<Worker>>,
    error_tx: SyncMutex<Option<mpsc::Sender<ServerError>>>,
    error_rx: SyncMutex<Option<mpsc::Receiver<ServerError>>>,
}

impl Server {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        let (error_tx, error_rx) = mpsc::channel(1);
        Server {
            bus,
            context_fn: Arc::new(Context::new),
            workers: Mutex::new(Vec::new()),
            error_tx: SyncMutex::new(Some(error_tx)),
            error_rx: SyncMutex::new(Some(error_rx)),
        }
    }

    /// Replace the function that seeds a fresh [`Context`] for every
    /// incoming message (tracing, deadlines, auth). Defaults to an empty
    /// context.
    #[must_use]
    pub fn with_context_fn(mut self, f: impl Fn() -> Context + Send + Sync + 'static) -> Self {
        self.context_fn = Arc::new(f);
        self
    }

    pub fn bus(&self) -> &Arc<dyn Bus> {
        &self.bus
    }

    /// Take the receiving half of the error stream. Can be taken once.
    ///
    /// The stream is observability, not control: the sending side never
    /// blocks, and errors are dropped when no consumer keeps up.
    pub fn error_stream(&self) -> Option<mpsc::Receiver<ServerError>> {
        self.error_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Register `handler` for `subject` and start its worker.
    ///
    /// The handler is invoked sequentially, one message at a time; it must
    /// tolerate sequential reentry but never sees concurrent invocations
    /// for the same subject.
    pub async fn register_handler(
        &self,
        subject: impl Into<String>,
        handler: impl AnyServerHandler + 'static,
    ) -> Result<(), Error> {
        let subject = subject.into();
        let mut sub = self.bus.subscribe(&subject, NO_BACKLOG).await?;
        let drain = sub.drain_trigger();

        let bus = Arc::clone(&self.bus);
        let context_fn = Arc::clone(&self.context_fn);
        let error_tx = self
            .error_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let worker_subject = subject.clone();
        let task = tokio::spawn(async move {
            while let Some(msg) = sub.next().await {
                let mut ctx = context_fn();
                if let Err(error) = handler.handle_message(&bus, &mut ctx, &msg).await {
                    debug!(subject = %worker_subject, %error, "handler error");
                    report_error(error_tx.as_ref(), error, msg);
                }
            }
        });

        self.workers.lock().await.push(Worker {
            subject,
            drain,
            task,
        });
        Ok(())
    }

    /// Drain every subscription, wait for in-flight handlers, and close the
    /// error stream. Blocking; after it returns no handler fires again.
    pub async fn drain(&self) -> Result<(), Error> {
        let workers = std::mem::take(&mut *self.workers.lock().await);
        for worker in &workers {
            worker.drain.trigger();
        }
        for worker in workers {
            if let Err(error) = worker.task.await {
                warn!(subject = %worker.subject, %error, "worker ended abnormally");
            }
        }
        self.error_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}

/// Best-effort, never blocking: observability must not back-pressure the
/// control plane.
fn report_error(error_tx: Option<&mpsc::Sender<ServerError>>, error: Error, request: Message) {
    if let Some(tx) = error_tx {
        let _ = tx.try_send(ServerError { error, request });
    }
}

type HandleFn<Req, Resp> =
    Box<dyn Fn(Req) -> BoxFuture<'static, Result<Resp, Error>> + Send + Sync>;
type DecodeFn<Req> = Box<dyn Fn(&mut Context, &Message) -> Result<Req, Error> + Send + Sync>;
type EncodeFn<Resp> =
    Box<dyn Fn(&mut Context, &str, &Resp) -> Result<Message, Error> + Send + Sync>;
type PreRequestFn<Req> =
    Box<dyn Fn(&mut Context, &mut Req, &Message) -> Result<(), Error> + Send + Sync>;
type PostRequestFn<Resp> =
    Box<dyn Fn(&mut Context, &Resp, &mut Message) -> Result<(), Error> + Send + Sync>;

/// Generic request/response handler.
///
/// The pipeline per message is: decode (JSON by default) → optional
/// pre-request hook → user handler → encode onto the reply subject (JSON by
/// default) → optional post-request hook → publish. Any failing step
/// converts to its typed error kind and aborts the pipeline; the server
/// reports the error on its stream.
///
/// The decode and encode steps can be replaced wholesale (the secrets
/// channel swaps in sealed-box variants), and the pre/post hooks cover the
/// common cases of populating request fields from the subject and rewriting
/// the outgoing body for wire compatibility. Hooks share per-message state
/// through the [`Context`].
pub struct RequestHandler<Req, Resp> {
    handler: HandleFn<Req, Resp>,
    decode: Option<DecodeFn<Req>>,
    encode: Option<EncodeFn<Resp>>,
    pre_request: Option<PreRequestFn<Req>>,
    post_request: Option<PostRequestFn<Resp>>,
}

impl<Req, Resp> RequestHandler<Req, Resp>
where
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + Sync + 'static,
{
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(Req) -> BoxFuture<'static, Result<Resp, Error>> + Send + Sync + 'static,
    {
        RequestHandler {
            handler: Box::new(handler),
            decode: None,
            encode: None,
            pre_request: None,
            post_request: None,
        }
    }

    /// Replace the default JSON decode step.
    #[must_use]
    pub fn with_decode(
        mut self,
        f: impl Fn(&mut Context, &Message) -> Result<Req, Error> + Send + Sync + 'static,
    ) -> Self {
        self.decode = Some(Box::new(f));
        self
    }

    /// Replace the default JSON encode step.
    #[must_use]
    pub fn with_encode(
        mut self,
        f: impl Fn(&mut Context, &str, &Resp) -> Result<Message, Error> + Send + Sync + 'static,
    ) -> Self {
        self.encode = Some(Box::new(f));
        self
    }

    /// Hook between decode and the user handler; populates request fields
    /// not carried in the body (e.g. a name from the subject).
    #[must_use]
    pub fn with_pre_request(
        mut self,
        f: impl Fn(&mut Context, &mut Req, &Message) -> Result<(), Error> + Send + Sync + 'static,
    ) -> Self {
        self.pre_request = Some(Box::new(f));
        self
    }

    /// Hook between encode and publish; may mutate headers or re-serialize
    /// the outgoing body for wire compatibility.
    #[must_use]
    pub fn with_post_request(
        mut self,
        f: impl Fn(&mut Context, &Resp, &mut Message) -> Result<(), Error> + Send + Sync + 'static,
    ) -> Self {
        self.post_request = Some(Box::new(f));
        self
    }
}

#[async_trait]
impl<Req, Resp> AnyServerHandler for RequestHandler<Req, Resp>
where
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + Sync + 'static,
{
    async fn handle_message(
        &self,
        bus: &Arc<dyn Bus>,
        ctx: &mut Context,
        msg: &Message,
    ) -> Result<(), Error> {
        let mut req = match &self.decode {
            Some(f) => f(ctx, msg),
            None => codec::decode(msg),
        }
        .map_err(Error::into_decode)?;

        if let Some(f) = &self.pre_request {
            f(ctx, &mut req, msg).map_err(Error::into_operation)?;
        }

        let resp = (self.handler)(req).await.map_err(Error::into_operation)?;

        let reply = msg.reply.clone().unwrap_or_default();
        let mut out = match &self.encode {
            Some(f) => f(ctx, &reply, &resp),
            None => codec::encode(reply, &resp),
        }
        .map_err(Error::into_encode)?;

        if let Some(f) = &self.post_request {
            f(ctx, &resp, &mut out).map_err(Error::into_operation)?;
        }

        bus.publish(out).await
    }
}

type TypeExtractor = Box<dyn Fn(&Context, &Message) -> Result<String, Error> + Send + Sync>;

/// Dispatcher for subjects that carry multiple request shapes distinguished
/// by an in-body discriminator (e.g. the policy engine's `kind` field).
///
/// The extractor runs a first, shape-agnostic decode to discover the kind;
/// the registered sub-handler then commits to the concrete shape.
pub struct TypedHandler {
    extractor: TypeExtractor,
    handlers: SyncMutex<HashMap<String, Arc<dyn AnyServerHandler>>>,
}

impl TypedHandler {
    pub fn new(
        extractor: impl Fn(&Context, &Message) -> Result<String, Error> + Send + Sync + 'static,
    ) -> Self {
        TypedHandler {
            extractor: Box::new(extractor),
            handlers: SyncMutex::new(HashMap::new()),
        }
    }

    /// Register a handler for a kind. Registering the same kind twice is an
    /// operation error.
    pub fn register_type(
        &self,
        kind: impl Into<String>,
        handler: impl AnyServerHandler + 'static,
    ) -> Result<(), Error> {
        let kind = kind.into();
        let mut handlers = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if handlers.contains_key(&kind) {
            return Err(Error::Operation(format!(
                "handler for kind '{kind}' already registered"
            )));
        }
        handlers.insert(kind, Arc::new(handler));
        Ok(())
    }
}

#[async_trait]
impl AnyServerHandler for TypedHandler {
    async fn handle_message(
        &self,
        bus: &Arc<dyn Bus>,
        ctx: &mut Context,
        msg: &Message,
    ) -> Result<(), Error> {
        let kind = (self.extractor)(ctx, msg).map_err(Error::into_operation)?;

        let handler = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::Operation(format!("no handler for kind '{kind}'")))?;

        handler.handle_message(bus, ctx, msg).await
    }
}

#[cfg(test)]
mod test {
    use core::time::Duration;
    use std::sync::atomic::{AtomicU32, Ordering};

    use futures::FutureExt;
    use serde::Deserialize;

    use super::*;
    use crate::{lattice_request, InprocBus};

    #[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
    struct EchoRequest {
        value: String,
        #[serde(skip)]
        name: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
    struct EchoResponse {
        value: String,
        name: String,
    }

    fn echo_handler() -> RequestHandler<EchoRequest, EchoResponse> {
        RequestHandler::new(|req: EchoRequest| {
            async move {
                Ok(EchoResponse {
                    value: req.value,
                    name: req.name,
                })
            }
            .boxed()
        })
    }

    fn test_bus() -> Arc<dyn Bus> {
        Arc::new(InprocBus::new())
    }

    #[tokio::test]
    async fn request_response_pipeline() -> anyhow::Result<()> {
        let bus = test_bus();
        let server = Server::new(Arc::clone(&bus));
        server.register_handler("svc.echo", echo_handler()).await?;

        let req = EchoRequest {
            value: "hello".to_string(),
            name: String::new(),
        };
        let resp: EchoResponse =
            lattice_request(bus.as_ref(), "svc.echo", &req, Duration::from_secs(1)).await?;
        assert_eq!(resp.value, "hello");

        server.drain().await?;
        Ok(())
    }

    #[tokio::test]
    async fn pre_request_hook_sets_subject_parameter() -> anyhow::Result<()> {
        let bus = test_bus();
        let server = Server::new(Arc::clone(&bus));
        let handler = echo_handler().with_pre_request(|_ctx, req, msg| {
            req.name = msg.last_subject_part().to_string();
            Ok(())
        });
        server.register_handler("svc.echo.*", handler).await?;

        let req = EchoRequest {
            value: "hi".to_string(),
            name: String::new(),
        };
        let resp: EchoResponse =
            lattice_request(bus.as_ref(), "svc.echo.abc", &req, Duration::from_secs(1)).await?;
        assert_eq!(resp.name, "abc");

        server.drain().await?;
        Ok(())
    }

    #[tokio::test]
    async fn post_request_hook_rewrites_body() -> anyhow::Result<()> {
        let bus = test_bus();
        let server = Server::new(Arc::clone(&bus));
        let handler = echo_handler().with_post_request(|_ctx, resp, msg| {
            let tmp = codec::encode(msg.subject.clone(), &resp.value)?;
            msg.data = tmp.data;
            Ok(())
        });
        server.register_handler("svc.echo", handler).await?;

        let req = EchoRequest {
            value: "bare".to_string(),
            name: String::new(),
        };
        let resp: String =
            lattice_request(bus.as_ref(), "svc.echo", &req, Duration::from_secs(1)).await?;
        assert_eq!(resp, "bare");

        server.drain().await?;
        Ok(())
    }

    #[tokio::test]
    async fn subject_fifo_ordering() -> anyhow::Result<()> {
        let bus = test_bus();
        let server = Server::new(Arc::clone(&bus));

        let (tx, mut rx) = mpsc::channel::<String>(16);
        let handler = ServerHandlerFunc(move |_bus: Arc<dyn Bus>, msg: &Message| {
            let tx = tx.clone();
            let value = String::from_utf8_lossy(&msg.data).to_string();
            async move {
                let _ = tx.send(value).await;
                Ok(())
            }
            .boxed()
        });
        server.register_handler("svc.fifo", handler).await?;

        for i in 0..10 {
            let mut msg = Message::new("svc.fifo");
            msg.data = format!("{i}").into_bytes().into();
            bus.publish(msg).await?;
        }

        for i in 0..10 {
            let value = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await?
                .expect("message should arrive");
            assert_eq!(value, format!("{i}"));
        }

        server.drain().await?;
        Ok(())
    }

    #[tokio::test]
    async fn handler_error_reaches_error_stream() -> anyhow::Result<()> {
        let bus = test_bus();
        let server = Server::new(Arc::clone(&bus));
        let mut errors = server.error_stream().expect("error stream available once");
        assert!(server.error_stream().is_none());

        server.register_handler("svc.echo", echo_handler()).await?;

        // Not valid JSON for EchoRequest: decode fails, nothing is published.
        let mut msg = Message::new("svc.echo");
        msg.data = b"not-json".to_vec().into();
        bus.publish(msg).await?;

        let err = tokio::time::timeout(Duration::from_secs(1), errors.recv())
            .await?
            .expect("server error should be reported");
        assert!(matches!(err.error, Error::Decode(_)));
        assert_eq!(err.request.subject, "svc.echo");

        server.drain().await?;
        Ok(())
    }

    #[tokio::test]
    async fn error_stream_never_blocks_handlers() -> anyhow::Result<()> {
        let bus = test_bus();
        let server = Server::new(Arc::clone(&bus));
        // Nobody consumes the error stream; the worker must keep going.
        server.register_handler("svc.echo", echo_handler()).await?;

        for _ in 0..5 {
            let mut msg = Message::new("svc.echo");
            msg.data = b"not-json".to_vec().into();
            bus.publish(msg).await?;
        }

        // The subject still answers well-formed requests afterwards.
        let req = EchoRequest {
            value: "alive".to_string(),
            name: String::new(),
        };
        let resp: EchoResponse =
            lattice_request(bus.as_ref(), "svc.echo", &req, Duration::from_secs(1)).await?;
        assert_eq!(resp.value, "alive");

        server.drain().await?;
        Ok(())
    }

    #[tokio::test]
    async fn drain_stops_callbacks() -> anyhow::Result<()> {
        let bus = test_bus();
        let server = Server::new(Arc::clone(&bus));

        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);
        let handler = ServerHandlerFunc(move |_bus: Arc<dyn Bus>, _msg: &Message| {
            seen.fetch_add(1, Ordering::SeqCst);
            async move { Ok(()) }.boxed()
        });
        server.register_handler("svc.once", handler).await?;

        bus.publish(Message::new("svc.once")).await?;
        server.drain().await?;
        let after_drain = calls.load(Ordering::SeqCst);

        bus.publish(Message::new("svc.once")).await?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), after_drain);
        Ok(())
    }

    #[tokio::test]
    async fn typed_handler_dispatch() -> anyhow::Result<()> {
        #[derive(Debug, Clone, Serialize, Deserialize, Default)]
        struct KindEnvelope {
            kind: String,
            value: String,
        }

        let typed = TypedHandler::new(|_ctx, msg| {
            let envelope: KindEnvelope = codec::decode(msg)?;
            Ok(envelope.kind)
        });
        typed.register_type(
            "echo",
            RequestHandler::new(|req: KindEnvelope| {
                async move {
                    Ok(EchoResponse {
                        value: req.value,
                        name: String::new(),
                    })
                }
                .boxed()
            }),
        )?;

        // Registering the same kind twice fails.
        let duplicate = typed.register_type("echo", echo_handler());
        assert!(matches!(duplicate, Err(Error::Operation(_))));

        let bus = test_bus();
        let server = Server::new(Arc::clone(&bus));
        server.register_handler("svc.typed", typed).await?;

        let req = KindEnvelope {
            kind: "echo".to_string(),
            value: "dispatched".to_string(),
        };
        let resp: EchoResponse =
            lattice_request(bus.as_ref(), "svc.typed", &req, Duration::from_secs(1)).await?;
        assert_eq!(resp.value, "dispatched");

        server.drain().await?;
        Ok(())
    }

    #[tokio::test]
    async fn typed_handler_unknown_kind_is_operation_error() -> anyhow::Result<()> {
        let typed = TypedHandler::new(|_ctx, _msg| Ok("nope".to_string()));
        let bus = test_bus();
        let mut ctx = Context::new();
        let result = typed
            .handle_message(&bus, &mut ctx, &Message::new("svc.typed"))
            .await;
        assert!(matches!(result, Err(Error::Operation(_))));
        Ok(())
    }
}
