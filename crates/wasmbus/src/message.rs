use bytes::Bytes;

/// The envelope every lattice RPC travels in.
///
/// A message is created either by a client about to publish, or by the bus
/// on delivery to a subscription. The subject is immutable once published;
/// headers and data may be rewritten by server-side hooks before the reply
/// goes out.
#[derive(Debug, Clone, Default)]
pub struct Message {
    /// Dot-separated subject the message is published on.
    pub subject: String,
    /// Subject the receiver should publish the response on, if any.
    pub reply: Option<String>,
    /// Case-insensitive header multimap (NATS header semantics).
    pub headers: async_nats::HeaderMap,
    /// Opaque payload bytes. The codec in [`crate::codec`] interprets them
    /// according to the `Content-Type` header.
    pub data: Bytes,
}

impl Message {
    pub fn new(subject: impl Into<String>) -> Self {
        Message {
            subject: subject.into(),
            ..Default::default()
        }
    }

    /// Final token of the subject.
    ///
    /// Server hooks use this to pluck path parameters out of wildcard
    /// subscriptions, e.g. the config name on `config.get.*`.
    pub fn last_subject_part(&self) -> &str {
        self.subject.rsplit('.').next().unwrap_or_default()
    }

    pub(crate) fn from_nats(msg: async_nats::Message) -> Self {
        Message {
            subject: msg.subject.to_string(),
            reply: msg.reply.map(|s| s.to_string()),
            headers: msg.headers.unwrap_or_default(),
            data: msg.payload,
        }
    }
}
