//! Error taxonomy for retrieval and adjudication.

use thiserror::Error;

/// Failure reported by an external backend (vector store, graph store,
/// embedding service). Opaque to the core beyond its message.
#[derive(Debug, Clone, Error)]
#[error("{backend}: {message}")]
pub struct BackendError {
    pub backend: &'static str,
    pub message: String,
}

impl BackendError {
    pub fn new(backend: &'static str, message: impl Into<String>) -> Self {
        Self {
            backend,
            message: message.into(),
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Errors surfaced to callers of the retrieval and adjudication core.
///
/// Single-source failures are absorbed and reported through `partial` /
/// `degraded` flags instead; these variants mean every path was exhausted.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Both the dense and the lexical path failed for one query.
    #[error("all retrieval backends failed (dense: {dense}; lexical: {lexical})")]
    Backend { dense: String, lexical: String },

    /// A lexical search ran before anything was indexed.
    #[error("search called before any records were indexed")]
    EmptyIndex,

    /// The caller's cancellation token fired or its deadline passed.
    #[error("query cancelled")]
    Cancelled,

    /// Every source of a memory query failed, including the fact graph.
    #[error("fact graph unavailable: {0}")]
    Graph(#[from] BackendError),

    /// Writing records into an index failed.
    #[error("index write failed: {0}")]
    Index(BackendError),

    #[error("rule catalog error: {0}")]
    Rules(#[from] game_rules::RulesError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type RetrievalResult<T> = Result<T, RetrievalError>;
