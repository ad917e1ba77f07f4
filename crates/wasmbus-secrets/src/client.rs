use core::time::Duration;
use std::sync::Arc;

use nkeys::XKey;
use tracing::{debug, instrument};
use wasmbus::{Bus, Message};

use crate::api::{
    GetRequest, GetResponse, SecretValue, API_VERSION, PREFIX_SECRETS, RESPONSE_XKEY,
    WASMCLOUD_HOST_XKEY,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors that can be returned during creation or use of a [`Client`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to fetch server xkey: {0}")]
    RequestServerXkey(wasmbus::Error),
    #[error("failed to convert server xkey: {0}")]
    ConvertServerXkey(String),
    #[error("failed to parse server xkey: {0}")]
    ParseServerXkey(nkeys::error::Error),
    #[error("invalid xkey: {0}")]
    InvalidXkey(nkeys::error::Error),
    #[error("failed to serialize secret request: {0}")]
    SerializeSecretRequest(serde_json::Error),
    #[error("failed to seal secret request: {0}")]
    SealSecretRequest(nkeys::error::Error),
    #[error("failed to send secret request: {0}")]
    SendSecretRequest(wasmbus::Error),
    #[error("failed to parse xkey from server response: {0}")]
    ParseServerResponseXkey(nkeys::error::Error),
    #[error("failed to open secret response: {0}")]
    OpenSecretResponse(nkeys::error::Error),
    #[error("failed to deserialize secret response: {0}")]
    DeserializeSecretResponse(serde_json::Error),
    #[error("server error: {0}")]
    Server(String),
    #[error("missing secret: {0}")]
    MissingSecret(String),
}

/// Subject family for one secrets backend; a prefix the concrete request
/// subjects hang off.
#[derive(Debug)]
struct SecretsTopic(String);

impl SecretsTopic {
    fn new(backend: &str, api_version: Option<&str>) -> Self {
        let version = api_version.unwrap_or(API_VERSION);
        Self(format!("{PREFIX_SECRETS}.{version}.{backend}"))
    }

    fn get(&self) -> String {
        format!("{}.get", self.0)
    }

    fn server_xkey(&self) -> String {
        format!("{}.server_xkey", self.0)
    }
}

/// Client for one secrets backend.
///
/// The server's public curve key is negotiated once at construction and
/// cached; every `get` seals the request from the caller's key to the
/// server key and opens the response with the ephemeral key announced in
/// the response headers.
pub struct Client {
    bus: Arc<dyn Bus>,
    topic: SecretsTopic,
    server_xkey: XKey,
    timeout: Duration,
}

impl core::fmt::Debug for Client {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Client")
            .field("topic", &self.topic)
            .field("server_xkey", &self.server_xkey.public_key())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a new [`Client`], negotiating the server xkey along the way.
    pub async fn new(bus: Arc<dyn Bus>, backend: &str) -> Result<Self, ClientError> {
        Self::new_with_version(bus, backend, None).await
    }

    /// Create a new [`Client`] against a specific secrets API version.
    pub async fn new_with_version(
        bus: Arc<dyn Bus>,
        backend: &str,
        api_version: Option<&str>,
    ) -> Result<Self, ClientError> {
        let topic = SecretsTopic::new(backend, api_version);

        // Fetch the server xkey so requests can be sealed to it.
        let reply = tokio::time::timeout(
            DEFAULT_TIMEOUT,
            bus.request(Message::new(topic.server_xkey())),
        )
        .await
        .map_err(|_| {
            ClientError::RequestServerXkey(wasmbus::Error::Transport(
                "request timed out".to_string(),
            ))
        })?
        .map_err(ClientError::RequestServerXkey)?;

        let raw = std::str::from_utf8(&reply.data)
            .map_err(|e| ClientError::ConvertServerXkey(e.to_string()))?;
        let server_xkey = XKey::from_public_key(raw).map_err(ClientError::ParseServerXkey)?;

        Ok(Self {
            bus,
            topic,
            server_xkey,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// The server's public curve key, as negotiated at construction.
    pub fn server_xkey(&self) -> String {
        self.server_xkey.public_key()
    }

    /// Retrieve a secret.
    ///
    /// `request_xkey` must be a full curve key pair (it is used to open the
    /// response). A response without the [`RESPONSE_XKEY`] header is a
    /// plaintext protocol error and surfaces as [`ClientError::Server`].
    #[instrument(level = "debug", skip_all, fields(key = %request.key))]
    pub async fn get(
        &self,
        request: GetRequest,
        request_xkey: XKey,
    ) -> Result<SecretValue, ClientError> {
        // A public-only xkey cannot open the response.
        if let Err(e) = request_xkey.seed() {
            return Err(ClientError::InvalidXkey(e));
        }

        let raw = serde_json::to_vec(&request).map_err(ClientError::SerializeSecretRequest)?;
        let sealed = request_xkey
            .seal(&raw, &self.server_xkey)
            .map_err(ClientError::SealSecretRequest)?;

        let subject = self.topic.get();
        debug!(%subject, "secrets get:request");
        let mut msg = Message::new(subject);
        msg.headers
            .insert(WASMCLOUD_HOST_XKEY, request_xkey.public_key().as_str());
        msg.data = sealed.into();

        let reply = tokio::time::timeout(self.timeout, self.bus.request(msg))
            .await
            .map_err(|_| {
                ClientError::SendSecretRequest(wasmbus::Error::Transport(
                    "request timed out".to_string(),
                ))
            })?
            .map_err(ClientError::SendSecretRequest)?;

        // No response-xkey header means the server answered in plaintext:
        // a protocol error readable without any keys.
        let Some(response_xkey_header) = reply.headers.get(RESPONSE_XKEY) else {
            let response: GetResponse = serde_json::from_slice(&reply.data)
                .map_err(ClientError::DeserializeSecretResponse)?;
            if let Some(error) = response.error {
                return Err(ClientError::Server(error.to_string()));
            }
            return Err(ClientError::Server(
                "unhandled server error (the server errored without explanation)".to_string(),
            ));
        };

        let response_xkey = XKey::from_public_key(response_xkey_header.as_str())
            .map_err(ClientError::ParseServerResponseXkey)?;
        let opened = request_xkey
            .open(&reply.data, &response_xkey)
            .map_err(ClientError::OpenSecretResponse)?;

        let response: GetResponse =
            serde_json::from_slice(&opened).map_err(ClientError::DeserializeSecretResponse)?;
        if let Some(error) = response.error {
            return Err(ClientError::Server(error.to_string()));
        }
        response
            .secret
            .ok_or_else(|| ClientError::MissingSecret(request.key.clone()))
    }
}
