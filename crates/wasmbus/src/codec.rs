//! Mimetype-driven payload encoding.
//!
//! JSON is the default wire format for every lattice API; YAML is accepted
//! for application manifests. The chosen mimetype rides along in the
//! message headers so the receiving side can pick the matching codec.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Error, Message};

pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
pub const MIME_JSON: &str = "application/json";
pub const MIME_YAML: &str = "application/yaml";

/// Serialize `value` as JSON into a new [`Message`] for `subject`.
pub fn encode<T>(subject: impl Into<String>, value: &T) -> Result<Message, Error>
where
    T: Serialize + ?Sized,
{
    encode_mimetype(subject, value, MIME_JSON)
}

/// Serialize `value` into a new [`Message`] for `subject` using the given
/// mimetype. Unsupported mimetypes are an encode error.
pub fn encode_mimetype<T>(
    subject: impl Into<String>,
    value: &T,
    mimetype: &str,
) -> Result<Message, Error>
where
    T: Serialize + ?Sized,
{
    let data = match mimetype {
        MIME_JSON => serde_json::to_vec(value).map_err(Error::encode)?,
        MIME_YAML => serde_yaml::to_string(value)
            .map_err(Error::encode)?
            .into_bytes(),
        other => return Err(Error::Encode(format!("unsupported mimetype '{other}'"))),
    };

    let mut msg = Message::new(subject);
    msg.headers.insert(HEADER_CONTENT_TYPE, mimetype);
    msg.data = data.into();
    Ok(msg)
}

/// Deserialize the payload of `msg`, picking the codec from the
/// `Content-Type` header and defaulting to JSON.
pub fn decode<T: DeserializeOwned>(msg: &Message) -> Result<T, Error> {
    match msg.headers.get(HEADER_CONTENT_TYPE).map(|v| v.as_str()) {
        Some(MIME_YAML) => serde_yaml::from_slice(&msg.data).map_err(Error::decode),
        _ => serde_json::from_slice(&msg.data).map_err(Error::decode),
    }
}
