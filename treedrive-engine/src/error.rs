use thiserror::Error;
use treedrive_core::{ApiError, ApiErrorClass};

use crate::paths::PathError;
use crate::state::StateError;

/// Failure surface of the read caches. Cloneable so a single in-flight
/// request can report the same failure to every coalesced caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("session expired")]
    SessionExpired,
    #[error("access denied: {0}")]
    Denied(String),
    #[error("server rejected the request: {0}")]
    Api(String),
    #[error("no cached cursor for folder {0:?}")]
    StaleCursor(String),
}

impl From<ApiError> for CacheError {
    fn from(err: ApiError) -> Self {
        match err.classification() {
            Some(ApiErrorClass::Session) => CacheError::SessionExpired,
            Some(ApiErrorClass::Denied) => CacheError::Denied(err.to_string()),
            Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient) => {
                CacheError::Transport(err.to_string())
            }
            Some(_) => CacheError::Api(err.to_string()),
            None => CacheError::Transport(err.to_string()),
        }
    }
}

/// Errors surfaced by mutating engine operations (move/rename). Server-side
/// rejections carry the server's message verbatim for the UI boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("api error: {0}")]
    Api(#[from] ApiError),
    #[error("{0}")]
    Rejected(String),
    #[error("state store error: {0}")]
    State(#[from] StateError),
}

impl From<PathError> for EngineError {
    fn from(err: PathError) -> Self {
        EngineError::Cache(CacheError::Path(err))
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("api error: {0}")]
    Api(#[from] ApiError),
    #[error("{0}")]
    Rejected(String),
    #[error("state store error: {0}")]
    State(#[from] StateError),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("job polling was cancelled")]
    Cancelled,
}
