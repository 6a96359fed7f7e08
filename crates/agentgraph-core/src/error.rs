//! Error types for Agentgraph

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid task spec: {0}")]
    InvalidTaskSpec(String),

    #[error("duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid_spec(reason: impl Into<String>) -> Self {
        Self::InvalidTaskSpec(reason.into())
    }
}
