//! Wire types for the secrets channel.

use serde::{Deserialize, Serialize};

use crate::claims::{validate_token, Claims, ComponentClaims, HostClaims};

/// Subject prefix for secrets backends:
/// `wasmbus.secrets.<version>.<backend>.(server_xkey|get)`.
pub const PREFIX_SECRETS: &str = "wasmbus.secrets";

/// Current secrets API version.
pub const API_VERSION: &str = "v1alpha1";

/// Request header carrying the requesting host's public curve key. The
/// request body is sealed from this key to the server's key, and the
/// response is sealed back to it.
pub const WASMCLOUD_HOST_XKEY: &str = "WasmCloud-Host-Xkey";

/// Response header carrying the fresh ephemeral public curve key the
/// response body was sealed with. Absent on plaintext protocol errors.
pub const RESPONSE_XKEY: &str = "Server-Response-Xkey";

/// Error taxonomy of the secrets channel.
///
/// On the wire, variants without a message serialize as a bare string
/// (`"SecretNotFound"`); variants carrying a message serialize as a
/// single-key object (`{"InvalidEntityJWT": "..."}`). Both forms are
/// accepted on decode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, thiserror::Error)]
pub enum GetSecretError {
    #[error("Secret not found")]
    SecretNotFound,
    #[error("Invalid request")]
    InvalidRequest,
    #[error("Invalid headers")]
    InvalidHeaders,
    #[error("Invalid payload")]
    InvalidPayload,
    #[error("Error encrypting secret")]
    EncryptionError,
    #[error("Error decrypting secret")]
    DecryptionError,
    #[error("Invalid Entity JWT: {0}")]
    InvalidEntityJWT(String),
    #[error("Invalid Host JWT: {0}")]
    InvalidHostJWT(String),
    #[error("Error fetching secret: {0}")]
    UpstreamError(String),
    #[error("Policy error: {0}")]
    PolicyError(String),
    #[error("Encountered an unknown error fetching secret: {0}")]
    Other(String),
}

/// The request to retrieve a secret: the key plus the identity context the
/// backend validates before answering.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct GetRequest {
    pub key: String,
    #[serde(default)]
    pub field: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default)]
    pub context: Context,
    /// Public curve key of the requesting host. Never carried in the body;
    /// the server fills it in from the request headers.
    #[serde(skip)]
    pub host_pub_key: String,
}

/// Either a secret or an error; never both.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct GetResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<GetSecretError>,
}

impl From<GetSecretError> for GetResponse {
    fn from(error: GetSecretError) -> Self {
        GetResponse {
            secret: None,
            error: Some(error),
        }
    }
}

/// A secret value, either textual or binary. The binary form serializes as
/// a JSON array of bytes.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SecretValue {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_secret: Option<Vec<u8>>,
}

/// Identity context accompanying every secret request.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Context {
    /// The component or provider's signed JWT.
    pub entity_jwt: String,
    /// The host's signed JWT.
    pub host_jwt: String,
    /// The application the entity belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application: Option<ApplicationContext>,
}

impl Context {
    /// Validate both JWTs: ed25519 signature under the key embedded in the
    /// `iss` claim, time bounds, and a parseable `wascap` claim of the
    /// matching shape.
    pub fn is_valid(&self) -> Result<(), GetSecretError> {
        self.entity_capabilities()?;
        self.host_capabilities()?;
        Ok(())
    }

    /// The verified claims of the requesting component or provider.
    pub fn entity_capabilities(&self) -> Result<Claims<ComponentClaims>, GetSecretError> {
        validate_token::<ComponentClaims>(&self.entity_jwt)
            .map_err(|e| GetSecretError::InvalidEntityJWT(e.to_string()))
    }

    /// The verified claims of the requesting host.
    pub fn host_capabilities(&self) -> Result<Claims<HostClaims>, GetSecretError> {
        validate_token::<HostClaims>(&self.host_jwt)
            .map_err(|e| GetSecretError::InvalidHostJWT(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ApplicationContext {
    #[serde(default)]
    pub policy: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ApplicationContextPolicy {
    #[serde(default)]
    properties: serde_json::Value,
}

impl ApplicationContext {
    /// The `properties` of the policy document embedded in this context.
    pub fn policy_properties(&self) -> Result<serde_json::Value, serde_json::Error> {
        let policy: ApplicationContextPolicy = serde_json::from_str(&self.policy)?;
        Ok(policy.properties)
    }
}
