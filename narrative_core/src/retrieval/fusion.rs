//! Score fusion - min-max normalization and weighted combination of rankings.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::FusionConfig;
use crate::memory::{rank_order, Record, RecordId, ScoredRecord};

/// Keep the best score per record id. Order is not preserved.
pub fn dedup_max(hits: &[ScoredRecord]) -> Vec<ScoredRecord> {
    let mut best: HashMap<&RecordId, &ScoredRecord> = HashMap::new();
    for hit in hits {
        best.entry(hit.id())
            .and_modify(|current| {
                if hit.score > current.score {
                    *current = hit;
                }
            })
            .or_insert(hit);
    }
    best.into_values().cloned().collect()
}

/// Min-max normalize scores into `[0, 1]`.
///
/// A list whose scores are all equal maps every hit to 1.0: each hit is the
/// best that list produced.
pub fn min_max_normalize(hits: &[ScoredRecord]) -> HashMap<RecordId, f32> {
    let Some(first) = hits.first() else {
        return HashMap::new();
    };
    let (min, max) = hits.iter().fold((first.score, first.score), |(lo, hi), h| {
        (lo.min(h.score), hi.max(h.score))
    });
    let range = max - min;

    hits.iter()
        .map(|h| {
            let norm = if range > f32::EPSILON {
                (h.score - min) / range
            } else {
                1.0
            };
            (h.id().clone(), norm)
        })
        .collect()
}

/// Weighted fusion of a dense and a lexical ranking.
///
/// A record missing from one list scores 0 there. The result is ordered by
/// fused score, then newer timestamp, then id, and truncated to `k`.
pub fn fuse(
    dense: &[ScoredRecord],
    lexical: &[ScoredRecord],
    weights: &FusionConfig,
    k: usize,
) -> Vec<ScoredRecord> {
    let dense = dedup_max(dense);
    let lexical = dedup_max(lexical);
    let dense_norm = min_max_normalize(&dense);
    let lexical_norm = min_max_normalize(&lexical);

    let mut records: HashMap<RecordId, Arc<Record>> = HashMap::new();
    for hit in dense.iter().chain(lexical.iter()) {
        records
            .entry(hit.id().clone())
            .or_insert_with(|| Arc::clone(&hit.record));
    }

    let mut fused: Vec<ScoredRecord> = records
        .into_iter()
        .map(|(id, record)| {
            let d = dense_norm.get(&id).copied().unwrap_or(0.0);
            let l = lexical_norm.get(&id).copied().unwrap_or(0.0);
            ScoredRecord::new(record, weights.dense_weight * d + weights.lexical_weight * l)
        })
        .collect();

    fused.sort_by(rank_order);
    fused.truncate(k);
    fused
}
