//! Error types for Miris Core
//!
//! The analysis functions themselves are total. These errors only surface
//! when validating input at the boundary: stream messages, snapshot files,
//! tool arguments and analysis parameters.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MirisError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid feed '{feed}': {reason}")]
    InvalidFeed { feed: String, reason: String },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl From<serde_json::Error> for MirisError {
    fn from(e: serde_json::Error) -> Self {
        MirisError::Parse(e.to_string())
    }
}

pub type MirisResult<T> = Result<T, MirisError>;
