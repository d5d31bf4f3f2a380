/// Shared error type used across all toolwire crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transport: {0}")]
    Transport(String),

    #[error("session: {0}")]
    Session(String),

    #[error("tool {tool}: {message}")]
    Tool { tool: String, message: String },

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
