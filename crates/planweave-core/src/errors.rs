//! Error types for the planweave core library.
//!
//! Only [`EngineError`] crosses the public `decompose` boundary. The
//! collaborator-scoped errors ([`RepositoryError`], [`RetrievalError`],
//! [`CacheError`]) are either promoted into it or downgraded to warnings.

/// Top-level error enum for a decomposition run.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Decomposition timed out after {elapsed_ms} ms (budget {budget_ms} ms)")]
    Timeout { elapsed_ms: u64, budget_ms: u64 },

    #[error("Step {step} requires {path} but it does not exist at revision {revision}")]
    RequiredPathMissing {
        step: usize,
        path: String,
        revision: String,
    },

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Failure reading from the source repository. A missing file is not an
/// error; readers return `Ok(None)` for it.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Unknown revision: {0}")]
    UnknownRevision(String),

    #[error("Failed to read {path} at {revision}: {message}")]
    Read {
        path: String,
        revision: String,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure talking to the retrieval collaborator.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("Retrieval timed out")]
    Timeout,

    #[error("Retrieval unavailable: {0}")]
    Unavailable(String),
}

/// Failure of a graph cache backend. Always recoverable by re-parsing.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt cache entry for {repository}@{revision}: {message}")]
    Corrupt {
        repository: String,
        revision: String,
        message: String,
    },
}

impl From<rusqlite::Error> for CacheError {
    fn from(err: rusqlite::Error) -> Self {
        CacheError::Unavailable(err.to_string())
    }
}
