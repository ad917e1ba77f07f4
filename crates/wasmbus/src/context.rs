/// Per-message request context.
///
/// The server seeds one [`Context`] for every incoming message (see
/// [`crate::Server`]) and threads it through the handler hooks. Hooks use it
/// to carry typed values between pipeline stages; e.g. the secrets channel
/// stashes the requesting host's public xkey during decode and reads it
/// back while encoding the sealed response.
#[derive(Debug, Default)]
pub struct Context {
    extensions: http::Extensions,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a typed value, returning the previous value of the same type.
    pub fn insert<T>(&mut self, value: T) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.extensions.insert(value)
    }

    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.extensions.get::<T>()
    }

    pub fn remove<T>(&mut self) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.extensions.remove::<T>()
    }
}
