//! Configuration for retrieval, context assembly, and adjudication.
//!
//! Every section has defaults, so a config file only needs to name the values
//! it changes:
//!
//! ```toml
//! [fusion]
//! dense_weight = 0.7
//! lexical_weight = 0.3
//!
//! [context]
//! max_hits = 12
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{RetrievalError, RetrievalResult};

/// Weights and pool sizes for dense/lexical fusion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub dense_weight: f32,
    pub lexical_weight: f32,

    /// How many hits to request from each sub-index before filtering and fusion.
    pub candidate_pool: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            dense_weight: 0.6,
            lexical_weight: 0.4,
            candidate_pool: 50,
        }
    }
}

/// BM25 tuning parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    pub k1: f32,
    /// Length normalization strength (0.0 - 1.0).
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

/// Bounds on the context bundle handed to generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub max_hits: usize,
    pub max_facts: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_hits: 8,
            max_facts: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdjudicationConfig {
    /// How many rule records to pull from hybrid retrieval per question.
    pub candidate_k: usize,

    /// Rules found only by dense search need at least this cosine similarity
    /// to become candidates.
    pub min_dense_similarity: f32,
}

impl Default for AdjudicationConfig {
    fn default() -> Self {
        Self {
            candidate_k: 10,
            min_dense_similarity: 0.35,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Predicates where a subject holds at most one current value.
    pub exclusive_predicates: Vec<String>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            exclusive_predicates: vec!["LOCATED_IN".to_string(), "HELD_BY".to_string()],
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub fusion: FusionConfig,
    pub bm25: Bm25Params,
    pub context: ContextConfig,
    pub adjudication: AdjudicationConfig,
    pub graph: GraphConfig,
}

impl CoreConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> RetrievalResult<Self> {
        let config: CoreConfig =
            toml::from_str(text).map_err(|e| RetrievalError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> RetrievalResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RetrievalError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> RetrievalResult<()> {
        let fusion = &self.fusion;
        let numbers = [
            ("fusion.dense_weight", fusion.dense_weight),
            ("fusion.lexical_weight", fusion.lexical_weight),
            ("bm25.k1", self.bm25.k1),
            ("bm25.b", self.bm25.b),
            ("adjudication.min_dense_similarity", self.adjudication.min_dense_similarity),
        ];
        if let Some((name, _)) = numbers.iter().find(|(_, value)| !value.is_finite()) {
            return Err(RetrievalError::Config(format!("{} must be a finite number", name)));
        }
        if fusion.dense_weight < 0.0 || fusion.lexical_weight < 0.0 {
            return Err(RetrievalError::Config(
                "fusion weights must be non-negative".into(),
            ));
        }
        if fusion.dense_weight + fusion.lexical_weight <= 0.0 {
            return Err(RetrievalError::Config(
                "at least one fusion weight must be positive".into(),
            ));
        }
        if fusion.candidate_pool == 0 {
            return Err(RetrievalError::Config("candidate_pool must be positive".into()));
        }
        if self.bm25.k1 < 0.0 || !(0.0..=1.0).contains(&self.bm25.b) {
            return Err(RetrievalError::Config(
                "bm25 requires k1 >= 0 and 0 <= b <= 1".into(),
            ));
        }
        if !(-1.0..=1.0).contains(&self.adjudication.min_dense_similarity) {
            return Err(RetrievalError::Config(
                "min_dense_similarity must be within [-1, 1]".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.fusion.dense_weight, 0.6);
        assert_eq!(config.fusion.lexical_weight, 0.4);
        assert_eq!(config.bm25.k1, 1.2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config = CoreConfig::from_toml_str(
            r#"
            [fusion]
            dense_weight = 0.7
            lexical_weight = 0.3

            [context]
            max_hits = 12
            "#,
        )
        .unwrap();

        assert_eq!(config.fusion.dense_weight, 0.7);
        assert_eq!(config.fusion.candidate_pool, 50);
        assert_eq!(config.context.max_hits, 12);
        assert_eq!(config.context.max_facts, 16);
        assert_eq!(config.graph.exclusive_predicates.len(), 2);
    }

    #[test]
    fn test_invalid_weights_rejected() {
        let result = CoreConfig::from_toml_str("[fusion]\ndense_weight = -1.0");
        assert!(matches!(result, Err(RetrievalError::Config(_))));

        let zero = CoreConfig::from_toml_str("[fusion]\ndense_weight = 0.0\nlexical_weight = 0.0");
        assert!(matches!(zero, Err(RetrievalError::Config(_))));
    }

    #[test]
    fn test_non_finite_numbers_rejected() {
        let nan = CoreConfig::from_toml_str("[fusion]\ndense_weight = nan");
        assert!(matches!(nan, Err(RetrievalError::Config(ref m)) if m.contains("dense_weight")));

        let inf = CoreConfig::from_toml_str("[bm25]\nk1 = inf");
        assert!(matches!(inf, Err(RetrievalError::Config(_))));

        let mut config = CoreConfig::default();
        config.fusion.lexical_weight = f32::NAN;
        assert!(config.validate().is_err());

        let mut config = CoreConfig::default();
        config.adjudication.min_dense_similarity = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_bm25_rejected() {
        let result = CoreConfig::from_toml_str("[bm25]\nb = 1.5");
        assert!(matches!(result, Err(RetrievalError::Config(_))));
    }

    #[test]
    fn test_adjudication_section() {
        let config = CoreConfig::from_toml_str("[adjudication]\ncandidate_k = 4").unwrap();
        assert_eq!(config.adjudication.candidate_k, 4);
        assert_eq!(config.adjudication.min_dense_similarity, 0.35);

        let bad = CoreConfig::from_toml_str("[adjudication]\nmin_dense_similarity = 2.0");
        assert!(matches!(bad, Err(RetrievalError::Config(_))));
    }
}
