//! Wascap-form JWT claims: ed25519-signed tokens whose issuer key is
//! reconstructed from the textual `iss` claim, with custom claims under the
//! `wascap` namespace.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use data_encoding::BASE64URL_NOPAD;
use nkeys::KeyPair;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

const HEADER_TYPE: &str = "jwt";
const HEADER_ALGORITHM: &str = "Ed25519";

// Current internal revision number embedded in freshly signed claims.
const WASCAP_INTERNAL_REVISION: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum ClaimsError {
    #[error("invalid token format, expected 3 segments")]
    InvalidFormat,
    #[error("invalid token header")]
    InvalidHeader,
    #[error("invalid token segment: {0}")]
    Segment(String),
    #[error("invalid issuer key: {0}")]
    IssuerKey(String),
    #[error("signature is not valid")]
    InvalidSignature,
    #[error("token expired {0} ago")]
    Expired(String),
    #[error("token cannot be used for another {0}")]
    NotYetValid(String),
    #[error("token carries no wascap claims")]
    MissingMetadata,
    #[error("failed to sign claims: {0}")]
    Signing(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct ClaimsHeader {
    #[serde(rename = "typ")]
    header_type: String,
    #[serde(rename = "alg")]
    algorithm: String,
}

/// RFC 7519 claims with the `wascap` custom-claim namespace.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct Claims<T> {
    /// Expiry, in seconds since the epoch.
    #[serde(rename = "exp", skip_serializing_if = "Option::is_none")]
    pub expires: Option<u64>,

    #[serde(rename = "jti")]
    pub id: String,

    /// Issue time, in seconds since the epoch.
    #[serde(rename = "iat")]
    pub issued_at: u64,

    /// Issuer of the token; by convention the textual public key of the
    /// signing identity, from which the verification key is rebuilt.
    #[serde(rename = "iss")]
    pub issuer: String,

    /// Subject of the token, usually the public key of the entity the
    /// claims describe.
    #[serde(rename = "sub")]
    pub subject: String,

    /// When the token becomes valid; valid immediately if unset.
    #[serde(rename = "nbf", skip_serializing_if = "Option::is_none")]
    pub not_before: Option<u64>,

    /// Custom claims in the `wascap` namespace.
    #[serde(rename = "wascap", skip_serializing_if = "Option::is_none")]
    pub metadata: Option<T>,

    /// Internal revision number used to aid in parsing and validating.
    #[serde(rename = "wascap_revision", skip_serializing_if = "Option::is_none")]
    pub wascap_revision: Option<u32>,
}

/// The wascap claims describing a component or capability provider.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct ComponentClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Hash of the module bytes as they existed before signing.
    #[serde(rename = "hash", default, skip_serializing_if = "String::is_empty")]
    pub module_hash: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,

    /// Monotonically increasing revision number.
    #[serde(rename = "rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<i32>,

    /// Human-friendly version string.
    #[serde(rename = "ver", default, skip_serializing_if = "Option::is_none")]
    pub ver: Option<String>,

    /// Code-friendly alias usable instead of a public key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_alias: Option<String>,

    /// Whether this entity is a capability provider.
    #[serde(rename = "prov", default)]
    pub provider: bool,
}

/// The wascap claims describing a host.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct HostClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

impl<T> Claims<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Fresh, non-expiring claims for the given metadata.
    pub fn new(metadata: T, issuer: impl Into<String>, subject: impl Into<String>) -> Self {
        Claims {
            expires: None,
            id: nuid::next().to_string(),
            issued_at: since_the_epoch().as_secs(),
            issuer: issuer.into(),
            subject: subject.into(),
            not_before: None,
            metadata: Some(metadata),
            wascap_revision: Some(WASCAP_INTERNAL_REVISION),
        }
    }

    /// Sign the claims into a compact JWT with the given ed25519 key pair.
    /// The key pair must match the `iss` claim for the token to validate.
    pub fn encode(&self, kp: &KeyPair) -> Result<String, ClaimsError> {
        let header = ClaimsHeader {
            header_type: HEADER_TYPE.to_string(),
            algorithm: HEADER_ALGORITHM.to_string(),
        };
        let header = to_jwt_segment(&header)?;
        let claims = to_jwt_segment(self)?;

        let head_and_claims = format!("{header}.{claims}");
        let sig = kp
            .sign(head_and_claims.as_bytes())
            .map_err(|e| ClaimsError::Signing(e.to_string()))?;
        let sig64 = BASE64URL_NOPAD.encode(&sig);
        Ok(format!("{head_and_claims}.{sig64}"))
    }

    /// Decode the claims segment without verifying the signature.
    pub fn decode(input: &str) -> Result<Claims<T>, ClaimsError> {
        let segments: Vec<&str> = input.split('.').collect();
        if segments.len() != 3 {
            return Err(ClaimsError::InvalidFormat);
        }
        from_jwt_segment(segments[1])
    }
}

/// Fully validate a wascap token: three-segment shape, `Ed25519` header,
/// a `wascap` claim parseable as `T`, an ed25519 signature verifying under
/// the key rebuilt from `iss`, and expiry/not-before bounds against the
/// system clock. Returns the decoded claims on success.
pub fn validate_token<T>(input: &str) -> Result<Claims<T>, ClaimsError>
where
    T: Serialize + DeserializeOwned,
{
    let segments: Vec<&str> = input.split('.').collect();
    if segments.len() != 3 {
        return Err(ClaimsError::InvalidFormat);
    }

    let header: ClaimsHeader = from_jwt_segment(segments[0])?;
    if header.header_type != HEADER_TYPE || header.algorithm != HEADER_ALGORITHM {
        return Err(ClaimsError::InvalidHeader);
    }

    let claims: Claims<T> = from_jwt_segment(segments[1])?;
    if claims.metadata.is_none() {
        return Err(ClaimsError::MissingMetadata);
    }

    let header_and_claims = format!("{}.{}", segments[0], segments[1]);
    let sig = BASE64URL_NOPAD
        .decode(segments[2].as_bytes())
        .map_err(|e| ClaimsError::Segment(e.to_string()))?;

    let kp = KeyPair::from_public_key(&claims.issuer)
        .map_err(|e| ClaimsError::IssuerKey(e.to_string()))?;
    kp.verify(header_and_claims.as_bytes(), &sig)
        .map_err(|_| ClaimsError::InvalidSignature)?;

    let now = since_the_epoch();
    if let Some(exp) = claims.expires {
        let exp = Duration::from_secs(exp);
        if exp < now {
            return Err(ClaimsError::Expired(human_duration(now - exp)));
        }
    }
    if let Some(nbf) = claims.not_before {
        let nbf = Duration::from_secs(nbf);
        if now < nbf {
            return Err(ClaimsError::NotYetValid(human_duration(nbf - now)));
        }
    }

    Ok(claims)
}

fn to_jwt_segment<T: Serialize>(value: &T) -> Result<String, ClaimsError> {
    let encoded = serde_json::to_vec(value).map_err(|e| ClaimsError::Segment(e.to_string()))?;
    Ok(BASE64URL_NOPAD.encode(&encoded))
}

fn from_jwt_segment<T: DeserializeOwned>(segment: &str) -> Result<T, ClaimsError> {
    let decoded = BASE64URL_NOPAD
        .decode(segment.as_bytes())
        .map_err(|e| ClaimsError::Segment(e.to_string()))?;
    serde_json::from_slice(&decoded).map_err(|e| ClaimsError::Segment(e.to_string()))
}

fn since_the_epoch() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

fn human_duration(duration: Duration) -> String {
    // Sub-second noise only clutters the message.
    humantime::format_duration(Duration::from_secs(duration.as_secs())).to_string()
}
