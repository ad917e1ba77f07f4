use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use nkeys::XKey;
use wasmbus::{
    codec, AnyServerHandler, Bus, Context, Error, Message, RequestHandler, ServerError,
    ServerHandlerFunc,
};

use crate::api::{
    GetRequest, GetResponse, GetSecretError, API_VERSION, PREFIX_SECRETS, RESPONSE_XKEY,
    WASMCLOUD_HOST_XKEY,
};

/// Backend side of the secrets channel.
#[async_trait]
pub trait Api: Send + Sync + 'static {
    /// Answer a (decrypted) secret request. Application-level failures
    /// belong in [`GetResponse::error`]; returning `Err` aborts the reply
    /// and only reaches the error stream.
    async fn get(&self, req: GetRequest) -> Result<GetResponse, Error>;
}

/// Typed per-message context value carrying the requesting host's public
/// curve key from the decode hook to the encode hook.
#[derive(Debug, Clone)]
struct HostXkey(String);

/// Serves one secrets backend on
/// `wasmbus.secrets.v1alpha1.<backend>.(server_xkey|get)`.
///
/// The long-lived server curve key is supplied at construction and never
/// logged. Request bodies are opened with it; every response is sealed
/// with a fresh ephemeral key pair whose public half rides in the
/// [`RESPONSE_XKEY`] header. Protocol errors (missing header, decryption
/// or structural failures) are answered in plaintext without that header,
/// so clients can read them before any key material is established.
pub struct Server {
    inner: wasmbus::Server,
    name: String,
    key: Arc<XKey>,
    api: Arc<dyn Api>,
}

impl Server {
    pub fn new(bus: Arc<dyn Bus>, name: impl Into<String>, key: XKey, api: Arc<dyn Api>) -> Self {
        Server {
            inner: wasmbus::Server::new(bus),
            name: name.into(),
            key: Arc::new(key),
            api,
        }
    }

    fn subject(&self, op: &str) -> String {
        format!("{PREFIX_SECRETS}.{API_VERSION}.{}.{op}", self.name)
    }

    /// Take the receiving half of the underlying server's error stream.
    pub fn error_stream(&self) -> Option<tokio::sync::mpsc::Receiver<ServerError>> {
        self.inner.error_stream()
    }

    /// Register the xkey advertisement and the ciphered get endpoint.
    pub async fn serve(&self) -> Result<(), Error> {
        let pub_key = self.key.public_key();
        let xkey_handler = ServerHandlerFunc(move |bus: Arc<dyn Bus>, msg: &Message| {
            let pub_key = pub_key.clone();
            let reply = msg.reply.clone();
            async move {
                let Some(reply) = reply else {
                    return Err(Error::Operation("missing reply subject".to_string()));
                };
                let mut resp = Message::new(reply);
                resp.data = pub_key.into_bytes().into();
                bus.publish(resp).await
            }
            .boxed()
        });
        self.inner
            .register_handler(self.subject("server_xkey"), xkey_handler)
            .await?;

        let server_key = Arc::clone(&self.key);
        let api = Arc::clone(&self.api);
        let get = RequestHandler::new(move |req: GetRequest| {
            let api = Arc::clone(&api);
            async move { api.get(req).await }.boxed()
        })
        .with_decode(move |ctx, msg| decode_ciphered(&server_key, ctx, msg))
        .with_encode(encode_ciphered);

        self.inner
            .register_handler(self.subject("get"), PlaintextErrors(get))
            .await
    }

    /// Drain every subscription and stop serving.
    pub async fn drain(&self) -> Result<(), Error> {
        self.inner.drain().await
    }
}

/// Open the sealed request body with the server key and the host key
/// announced in the request headers. On failure, the precise protocol
/// error tag is stashed in the context for the plaintext responder.
fn decode_ciphered(
    server_key: &XKey,
    ctx: &mut Context,
    msg: &Message,
) -> Result<GetRequest, Error> {
    let Some(host_pub_key) = msg
        .headers
        .get(WASMCLOUD_HOST_XKEY)
        .map(|value| value.as_str().to_string())
    else {
        ctx.insert(GetSecretError::InvalidHeaders);
        return Err(Error::Decode("missing host public key header".to_string()));
    };

    let host_xkey = XKey::from_public_key(&host_pub_key).map_err(|e| {
        ctx.insert(GetSecretError::InvalidHeaders);
        Error::decode(e)
    })?;

    let opened = server_key.open(&msg.data, &host_xkey).map_err(|e| {
        ctx.insert(GetSecretError::DecryptionError);
        Error::decode(e)
    })?;

    let mut req: GetRequest = serde_json::from_slice(&opened).map_err(|e| {
        ctx.insert(GetSecretError::InvalidPayload);
        Error::decode(e)
    })?;

    req.host_pub_key = host_pub_key.clone();
    ctx.insert(HostXkey(host_pub_key));
    Ok(req)
}

/// Seal the response to the requesting host with a fresh ephemeral key
/// pair, announcing the ephemeral public key in the response headers.
fn encode_ciphered(ctx: &mut Context, reply: &str, resp: &GetResponse) -> Result<Message, Error> {
    let Some(HostXkey(host_pub_key)) = ctx.get::<HostXkey>() else {
        return Err(Error::Encode("missing host public key".to_string()));
    };
    let host_xkey = XKey::from_public_key(host_pub_key).map_err(Error::encode)?;

    let response_key = XKey::new();
    let mut msg = codec::encode(reply, resp)?;
    msg.data = response_key
        .seal(&msg.data, &host_xkey)
        .map_err(Error::encode)?
        .into();
    msg.headers
        .insert(RESPONSE_XKEY, response_key.public_key().as_str());

    Ok(msg)
}

/// Wrapper that answers protocol errors in plaintext.
///
/// When the inner pipeline fails before a sealed response could be built,
/// the tag stashed in the context is sent back as a plaintext
/// [`GetResponse`] with no response-xkey header; the error still
/// propagates to the server's error stream.
struct PlaintextErrors<H>(H);

#[async_trait]
impl<H: AnyServerHandler> AnyServerHandler for PlaintextErrors<H> {
    async fn handle_message(
        &self,
        bus: &Arc<dyn Bus>,
        ctx: &mut Context,
        msg: &Message,
    ) -> Result<(), Error> {
        let result = self.0.handle_message(bus, ctx, msg).await;
        if result.is_err() {
            if let (Some(tag), Some(reply)) = (ctx.get::<GetSecretError>(), msg.reply.clone()) {
                let response = GetResponse::from(tag.clone());
                let out = codec::encode(reply, &response)?;
                bus.publish(out).await?;
            }
        }
        result
    }
}
