//! Error types for the wallet connectivity layer.

use std::io;

use thiserror::Error;

use crate::types::ChainHash;

/// Main error type for the connectivity layer.
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("Electrum error: {0}")]
    Electrum(#[from] ElectrumError),

    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Errors surfaced by the Electrum client pool.
#[derive(Debug, Error)]
pub enum ElectrumError {
    /// The pool has no elected master; retry after a status listener fires.
    #[error("Not connected to any Electrum server")]
    NotConnected,

    #[error("Unknown chain hash: {0}")]
    UnknownChainHash(ChainHash),

    #[error("Server list resource error: {0}")]
    ServerList(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Logging setup errors.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Subscriber initialization failed: {0}")]
    Subscriber(String),
}

/// Type alias for Result with WalletError.
pub type Result<T> = std::result::Result<T, WalletError>;

/// Type alias for Electrum operation results.
pub type ElectrumResult<T> = std::result::Result<T, ElectrumError>;

/// Type alias for logging operation results.
pub type LoggingResult<T> = std::result::Result<T, LoggingError>;
