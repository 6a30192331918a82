//! Error types for the session core

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors that abort session construction or a turn.
///
/// Most runtime failures (token counting, retrieval, streaming) are recovered
/// locally and never surface here; only configuration problems that would
/// leave prompt formatting undefined are fatal.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Unknown model family: {0}")]
    UnknownModelFamily(String),

    #[error("Missing required persona field: {0}")]
    MissingPersonaField(&'static str),

    #[error("Configuration invalid: {0}")]
    Configuration(String),
}

/// Errors from a vector index backend.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Index backend error: {0}")]
    Backend(String),

    #[error("Embedding failed: {0}")]
    Embedding(String),
}

/// Errors from the language model collaborator's fragment stream.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Model backend error: {0}")]
    Backend(String),
}
