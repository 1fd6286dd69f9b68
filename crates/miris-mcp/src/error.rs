use thiserror::Error;

use miris_core::MirisError;

#[derive(Error, Debug)]
pub enum MirisMcpError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("No feed snapshot available: pass `feeds` or configure snapshot.path")]
    NoSnapshot,

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error(transparent)]
    Core(#[from] MirisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, MirisMcpError>;
