use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Exchange API error: {0}")]
    Exchange(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Order size is unusable (non-positive, below lot size or minimum notional).
    /// Never retried.
    #[error("Sizing error: {0}")]
    Sizing(String),

    #[error("Invalid market snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether retrying the same request could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Exchange(_) | Error::Http(_) | Error::Io(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
