//! Error types for elohim-link

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Could not resolve host: {0}")]
    Resolve(String),

    #[error("Connection error: {0}")]
    Connect(String),

    #[error("Connect timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML encode error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Link session closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, LinkError>;
