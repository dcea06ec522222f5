use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetError {
    /// Transport-level failure or an explicit 503 from a replica. The caller
    /// re-resolves via the naming service and retries; this is the only
    /// error class that is retried automatically.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// A non-success status carrying a domain error from the server.
    #[error("{message}")]
    Status { code: u16, message: String },

    /// Naming-service failure (node not bound, registry unreachable).
    #[error("Naming service error: {0}")]
    Naming(String),

    /// The server answered with a body we could not decode.
    #[error("Invalid response: {0}")]
    Decode(String),
}
