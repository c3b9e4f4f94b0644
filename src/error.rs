use std::error::Error as StdError;

use thiserror::Error;

/// Voxverify's crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Voxverify's crate-wide error type.
///
/// Every enroll/verify failure maps onto one of these variants so callers can decide what to
/// do next:
/// - `InvalidAudioFormat` / `InvalidSpeakerId`: fix the input and re-submit.
/// - `EmbeddingExtraction`: the backend failed; surfaced as-is, never retried.
/// - `StoreUnavailable`: transient infrastructure fault (see [`Error::is_retryable`]).
/// - `StoreRejected`: schema or dimension mismatch; needs an operator.
/// - `SpeakerNotFound` / `NoEnrolledSpeakers`: an explicit reject, not a crash.
///
/// Kept separate from `anyhow` so downstream libraries don't have to adopt `anyhow` in their
/// own public APIs.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid audio format: {0}")]
    InvalidAudioFormat(String),

    #[error("embedding extraction failed: {0}")]
    EmbeddingExtraction(String),

    #[error("vector store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("vector store rejected request: {0}")]
    StoreRejected(String),

    #[error("speaker '{0}' has no enrolled samples")]
    SpeakerNotFound(String),

    #[error("no speakers are enrolled")]
    NoEnrolledSpeakers,

    #[error("invalid speaker id: {0}")]
    InvalidSpeakerId(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Other(#[from] Box<dyn StdError + Send + Sync>),
}

impl Error {
    pub(crate) fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    pub(crate) fn invalid_audio(message: impl Into<String>) -> Self {
        Self::InvalidAudioFormat(message.into())
    }

    pub(crate) fn unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable(message.into())
    }

    pub(crate) fn rejected(message: impl Into<String>) -> Self {
        Self::StoreRejected(message.into())
    }

    /// Whether a single bounded retry is allowed for the failed operation.
    ///
    /// Only transient store faults qualify. Embedding failures are surfaced immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Other(Box::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Other(Box::new(err))
    }
}
