//! Error types for the rule catalog.

use thiserror::Error;

use crate::rules::RuleId;

/// Errors raised while loading or editing the rule catalog.
#[derive(Debug, Error)]
pub enum RulesError {
    #[error("rule `{0}` is already in the catalog")]
    DuplicateRule(RuleId),

    #[error("rule `{0}` is not in the catalog")]
    UnknownRule(RuleId),

    #[error("rule `{0}` is missing a required field: {1}")]
    InvalidRule(RuleId, &'static str),

    #[error("failed to parse rule corpus: {0}")]
    CorpusParse(#[from] toml::de::Error),

    #[error("failed to read rule corpus: {0}")]
    CorpusIo(#[from] std::io::Error),
}

pub type RulesResult<T> = Result<T, RulesError>;
