//! Hybrid retriever - concurrent dense and lexical search fused into one ranking.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::fusion::fuse;
use crate::config::FusionConfig;
use crate::error::{RetrievalError, RetrievalResult};
use crate::memory::{rank_order, DenseIndex, LexicalIndex, RecordFilter, RecordId, ScoredRecord};

/// A search channel feeding the fusion step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Dense,
    Lexical,
    Graph,
}

/// A channel that failed while others carried the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Degradation {
    pub channel: Channel,
    pub error: String,
}

/// Outcome of one hybrid query.
#[derive(Debug, Clone, Default)]
pub struct FusedRanking {
    pub fused: Vec<ScoredRecord>,
    /// Dense hits after resolving and filtering, before fusion.
    pub dense: Vec<ScoredRecord>,
    pub lexical: Vec<ScoredRecord>,
    /// Empty unless one channel failed.
    pub degraded: Vec<Degradation>,
}

impl FusedRanking {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}

/// Fuses a dense index and the lexical index over the same record set.
///
/// The lexical index doubles as the record catalog: dense hits are resolved to
/// records through it, and ids it does not know are dropped.
pub struct HybridRetriever {
    lexical: Arc<LexicalIndex>,
    dense: Arc<dyn DenseIndex>,
    config: FusionConfig,
}

impl HybridRetriever {
    pub fn new(lexical: Arc<LexicalIndex>, dense: Arc<dyn DenseIndex>, config: FusionConfig) -> Self {
        Self {
            lexical,
            dense,
            config,
        }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn lexical(&self) -> &Arc<LexicalIndex> {
        &self.lexical
    }

    /// Top `k` records for a query across every session.
    pub async fn retrieve(
        &self,
        query_text: &str,
        query_embedding: &[f32],
        k: usize,
        cancel: &CancellationToken,
    ) -> RetrievalResult<FusedRanking> {
        self.retrieve_filtered(query_text, query_embedding, k, &RecordFilter::any(), cancel)
            .await
    }

    /// Top `k` records admitted by `filter`.
    ///
    /// An empty `query_embedding` skips the dense channel. A single failing
    /// channel is logged and reported in `degraded`; only a failure of both is
    /// an error. Cancellation abandons both searches.
    pub async fn retrieve_filtered(
        &self,
        query_text: &str,
        query_embedding: &[f32],
        k: usize,
        filter: &RecordFilter,
        cancel: &CancellationToken,
    ) -> RetrievalResult<FusedRanking> {
        if cancel.is_cancelled() {
            return Err(RetrievalError::Cancelled);
        }
        if k == 0 {
            return Ok(FusedRanking::default());
        }
        let pool = self.config.candidate_pool.max(k);

        let searches = async {
            tokio::join!(
                self.search_dense(query_embedding, pool, filter),
                async { self.search_lexical(query_text, pool, filter) },
            )
        };
        let (dense, lexical) = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("[hybrid] cancelled before both channels completed");
                return Err(RetrievalError::Cancelled);
            }
            results = searches => results,
        };

        let mut ranking = FusedRanking::default();
        match (dense, lexical) {
            (Err(dense), Err(lexical)) => {
                warn!("[hybrid] both channels failed: dense: {}; lexical: {}", dense, lexical);
                return Err(RetrievalError::Backend { dense, lexical });
            }
            (Ok(dense), Err(error)) => {
                warn!("[hybrid] lexical channel failed, using dense only: {}", error);
                ranking.degraded.push(Degradation {
                    channel: Channel::Lexical,
                    error,
                });
                ranking.dense = dense;
            }
            (Err(error), Ok(lexical)) => {
                warn!("[hybrid] dense channel failed, using lexical only: {}", error);
                ranking.degraded.push(Degradation {
                    channel: Channel::Dense,
                    error,
                });
                ranking.lexical = lexical;
            }
            (Ok(dense), Ok(lexical)) => {
                ranking.dense = dense;
                ranking.lexical = lexical;
            }
        }

        ranking.fused = fuse(&ranking.dense, &ranking.lexical, &self.config, k);
        debug!(
            "[hybrid] {} dense + {} lexical -> {} fused",
            ranking.dense.len(),
            ranking.lexical.len(),
            ranking.fused.len()
        );
        Ok(ranking)
    }

    async fn search_dense(
        &self,
        embedding: &[f32],
        pool: usize,
        filter: &RecordFilter,
    ) -> Result<Vec<ScoredRecord>, String> {
        if embedding.is_empty() {
            return Ok(Vec::new());
        }
        let admit = |id: &RecordId| self.lexical.get(id).is_some_and(|r| filter.matches(&r));
        let hits = self
            .dense
            .search(embedding, pool, &admit)
            .await
            .map_err(|e| e.to_string())?;

        let mut resolved: Vec<ScoredRecord> = hits
            .into_iter()
            .filter_map(|(id, score)| {
                let record = self.lexical.get(&id)?;
                filter
                    .matches(&record)
                    .then(|| ScoredRecord::new(record, score))
            })
            .collect();
        resolved.sort_by(rank_order);
        Ok(resolved)
    }

    fn search_lexical(
        &self,
        text: &str,
        pool: usize,
        filter: &RecordFilter,
    ) -> Result<Vec<ScoredRecord>, String> {
        self.lexical
            .search_filtered(text, pool, filter)
            .map_err(|e| e.to_string())
    }
}
