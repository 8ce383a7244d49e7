//! Error types for the IRC client

use thiserror::Error;

/// Main error type for the IRC client
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Message parsing error: {0}")]
    MessageParse(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("unknown protocol '{0}'")]
    UnknownProtocol(String),

    #[error("command '{command}' not available in protocol '{protocol}'")]
    UnknownCommand { protocol: String, command: String },

    #[error("connection id '{0}' is already in use")]
    DuplicateId(String),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Config(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Config(s)
    }
}
