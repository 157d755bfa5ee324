/// Core error type for the gateway.
///
/// Adapter crates map their specific failures into this type. Per-message
/// outcomes do not use it: those are carried by
/// [`SendError`](crate::governance::SendError) inside a `SendResult`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("batch of {requested} destinations exceeds the maximum of {max}")]
    BatchTooLarge { requested: usize, max: usize },

    /// Failure reported by the chat-session client. The text is what the
    /// retry engine classifies, so it is displayed verbatim.
    #[error("{0}")]
    Provider(String),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
