use std::io;

pub type Result<T> = std::result::Result<T, SinkError>;

/// Error type shared by all sink transports.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("{transport} send failed: {message}")]
    Send {
        transport: &'static str,
        message: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("sink is closed")]
    Closed,
}
