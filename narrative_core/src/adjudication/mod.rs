//! # Rule Adjudication
//!
//! Answers rule questions ("can I do X in situation Y?") with a structured
//! [`Ruling`] that cites the rules it applied.
//!
//! ## Pipeline
//!
//! 1. **Candidates**: exact tag/keyword matches from the live catalog, merged
//!    with a hybrid ranking over approved rules indexed as records
//! 2. **Prerequisites**: each candidate's conditions are checked against the
//!    situation; decidably false rules drop out
//! 3. **Conflicts**: disagreeing rules are settled by [`conflict::resolve`]
//! 4. **Ruling**: the surviving effect becomes a decision with rolls,
//!    citations and a confidence

pub mod conflict;
pub mod ruling;

pub use conflict::*;
pub use ruling::*;

use chrono::{DateTime, Utc};
use game_rules::text::{keywords, tokenize};
use game_rules::{evaluate_all, EffectKind, Evaluation, RollRequirement, RuleCatalog, RuleEntry, RuleId, RuleStore};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::{AdjudicationConfig, CoreConfig};
use crate::error::{RetrievalError, RetrievalResult};
use crate::memory::{DenseIndex, EmbeddingFunction, EventType, LexicalIndex, Record, RecordId};
use crate::retrieval::{FusedRanking, HybridRetriever};

/// Session id under which rules are indexed as records.
pub const RULE_SESSION: &str = "rules";

/// Turns rule questions into rulings.
///
/// The engine owns a private rule index kept in step with the store's
/// published revision. Each `adjudicate` call reads one catalog snapshot and
/// keeps no state between calls.
pub struct RuleResolutionEngine {
    store: Arc<RuleStore>,
    retriever: HybridRetriever,
    dense: Arc<dyn DenseIndex>,
    embedder: Arc<dyn EmbeddingFunction>,
    config: AdjudicationConfig,
    /// Catalog revision last written to the rule index.
    synced: Mutex<Option<u64>>,
}

impl RuleResolutionEngine {
    pub fn new(
        store: Arc<RuleStore>,
        dense: Arc<dyn DenseIndex>,
        embedder: Arc<dyn EmbeddingFunction>,
        config: &CoreConfig,
    ) -> Self {
        let lexical = Arc::new(LexicalIndex::new(config.bm25));
        let retriever = HybridRetriever::new(lexical, Arc::clone(&dense), config.fusion.clone());

        Self {
            store,
            retriever,
            dense,
            embedder,
            config: config.adjudication.clone(),
            synced: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<RuleStore> {
        &self.store
    }

    /// Index every approved rule of the current catalog.
    ///
    /// Rules are re-indexed in place, so calling this after an approval only
    /// changes the approved entry. Returns the number of rules indexed.
    pub async fn sync_rules(&self) -> RetrievalResult<usize> {
        let snapshot = self.store.snapshot();
        self.sync_catalog(&snapshot).await
    }

    async fn sync_catalog(&self, catalog: &RuleCatalog) -> RetrievalResult<usize> {
        let records: Vec<Arc<Record>> = catalog
            .approved()
            .iter()
            .map(|entry| Arc::new(rule_record(entry)))
            .collect();

        self.retriever.lexical().index(records.iter().cloned());
        for record in &records {
            let embedding = self
                .embedder
                .embed(&record.indexed_text())
                .await
                .map_err(RetrievalError::Index)?;
            self.dense
                .upsert(record.id.clone(), embedding)
                .await
                .map_err(RetrievalError::Index)?;
        }

        let mut synced = self.synced.lock();
        *synced = Some(synced.map_or(catalog.revision(), |r| r.max(catalog.revision())));
        info!(
            "[adjudicate] indexed {} approved rules at revision {}",
            records.len(),
            catalog.revision()
        );
        Ok(records.len())
    }

    fn is_stale(&self, revision: u64) -> bool {
        self.synced.lock().map_or(true, |synced| synced < revision)
    }

    /// Rule on a question given a situation map (e.g. `target_condition` ->
    /// `unconscious`).
    ///
    /// No applicable rule is an `AMBIGUOUS` ruling, not an error. Errors mean
    /// cancellation, or retrieval failing while no exact match exists.
    pub async fn adjudicate(
        &self,
        question: &str,
        situation: &HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> RetrievalResult<Ruling> {
        if cancel.is_cancelled() {
            return Err(RetrievalError::Cancelled);
        }

        let snapshot = self.store.snapshot();
        if self.is_stale(snapshot.revision()) {
            if let Err(e) = self.sync_catalog(&snapshot).await {
                warn!("[adjudicate] rule index sync failed, ranking may be stale: {}", e);
            }
        }

        let terms = keywords(question);
        let question_words: HashSet<String> = tokenize(question).into_iter().collect();

        let mut found: BTreeMap<RuleId, (Arc<RuleEntry>, bool, f32)> = BTreeMap::new();
        for matched in snapshot.match_terms(&terms) {
            found.insert(matched.entry.rule_id.clone(), (matched.entry, true, 0.0));
        }

        let embedding = match self.embedder.embed(question).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!("[adjudicate] embedding failed, using lexical rule search only: {}", e);
                Vec::new()
            }
        };

        match self
            .retriever
            .retrieve(&terms.join(" "), &embedding, self.config.candidate_k, cancel)
            .await
        {
            Ok(ranking) => {
                for (id, score) in self.admitted_hits(&ranking) {
                    let Some(entry) = snapshot.get(&RuleId::new(id.as_str())) else {
                        continue;
                    };
                    if entry.is_draft() {
                        continue;
                    }
                    found
                        .entry(entry.rule_id.clone())
                        .and_modify(|(_, _, s)| *s = s.max(score))
                        .or_insert_with(|| (Arc::clone(entry), false, score));
                }
            }
            Err(RetrievalError::Cancelled) => return Err(RetrievalError::Cancelled),
            Err(e) if found.is_empty() => return Err(e),
            Err(e) => warn!("[adjudicate] rule retrieval failed, using exact matches only: {}", e),
        }

        let mut candidates: Vec<Candidate> = found
            .into_values()
            .filter_map(|(entry, exact_match, retrieval_score)| {
                let (prerequisites, unevaluated) = evaluate_all(&entry.prerequisites, situation);
                if prerequisites == Evaluation::Violated {
                    debug!("[adjudicate] {} dropped: prerequisites not met", entry.rule_id);
                    return None;
                }
                Some(Candidate {
                    tag_overlap: entry.tag_overlap(&question_words),
                    entry,
                    retrieval_score,
                    exact_match,
                    prerequisites,
                    unevaluated,
                })
            })
            .collect();

        if candidates.is_empty() {
            info!("[adjudicate] no applicable rule for {:?}", question);
            return Ok(Ruling::no_match());
        }

        rank_candidates(&mut candidates);
        let ruling = rule_from(&candidates, resolve(&candidates));
        info!(
            "[adjudicate] {} from {} candidates (applied {:?}, confidence {:.2})",
            ruling.decision,
            candidates.len(),
            ruling.applied_rules,
            ruling.confidence
        );
        Ok(ruling)
    }

    /// Fused hits backed by a lexical match or a close enough embedding.
    fn admitted_hits(&self, ranking: &FusedRanking) -> Vec<(RecordId, f32)> {
        let lexical: HashSet<&RecordId> = ranking.lexical.iter().map(|hit| hit.id()).collect();
        let mut similarity: HashMap<&RecordId, f32> = HashMap::new();
        for hit in &ranking.dense {
            let best = similarity.entry(hit.id()).or_insert(f32::MIN);
            *best = best.max(hit.score);
        }

        ranking
            .fused
            .iter()
            .filter(|hit| {
                lexical.contains(hit.id())
                    || similarity
                        .get(hit.id())
                        .is_some_and(|s| *s >= self.config.min_dense_similarity)
            })
            .map(|hit| (hit.id().clone(), hit.score))
            .collect()
    }
}

/// A rule as an indexable record. The revision doubles as the timestamp so
/// newer rules win ranking ties.
fn rule_record(entry: &RuleEntry) -> Record {
    let published = i64::try_from(entry.revision)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .unwrap_or_default();

    entry.tags.iter().fold(
        Record::new(RULE_SESSION, entry.searchable_text())
            .with_id(entry.rule_id.as_str())
            .with_timestamp(published)
            .with_speaker(entry.source_ref.as_str())
            .with_event_type(EventType::Rule)
            .with_summary(entry.title.as_str()),
        |record, tag| record.with_tag(tag.as_str()),
    )
}

fn rule_from(candidates: &[Candidate], resolution: Resolution) -> Ruling {
    match resolution {
        Resolution::Decided {
            subject,
            winner,
            effect,
            corroborating,
            overruled,
            precedence,
        } => {
            let top = &candidates[winner];
            let supporting: Vec<&Candidate> = corroborating.iter().map(|i| &candidates[*i]).collect();

            let (decision, required_rolls) = match &effect.kind {
                EffectKind::Allow => (Decision::Allowed, Vec::new()),
                EffectKind::Deny => (Decision::Denied, Vec::new()),
                EffectKind::Roll(parsed) => {
                    let mut rolls = vec![top.entry.roll.clone().unwrap_or_else(|| parsed.clone())];
                    for other in &supporting {
                        if let Some(roll) = declared_roll(other, &subject) {
                            if !rolls.contains(&roll) {
                                rolls.push(roll);
                            }
                        }
                    }
                    (Decision::RollCheck, rolls)
                }
                EffectKind::Informational => (Decision::Ambiguous, Vec::new()),
            };

            let mut explanation = format!(
                "{} ({}): {}.",
                top.entry.title, top.entry.rule_id, effect.text
            );
            if let Some(precedence) = precedence {
                let losers: Vec<&str> = overruled
                    .iter()
                    .map(|i| candidates[*i].entry.rule_id.as_str())
                    .collect();
                explanation.push_str(&format!(
                    " Takes precedence over {} because {}.",
                    losers.join(", "),
                    precedence.describe()
                ));
            }
            if !supporting.is_empty() {
                let ids: Vec<&str> = supporting.iter().map(|c| c.entry.rule_id.as_str()).collect();
                explanation.push_str(&format!(" Consistent with {}.", ids.join(", ")));
            }
            if !top.unevaluated.is_empty() {
                explanation.push_str(&format!(
                    " Assumes unverified conditions: {}.",
                    top.unevaluated.join(", ")
                ));
            }

            let mut confidence = 0.35
                + 0.35 * top.relevance()
                + 0.2 * (1.0 - 1.0 / (1.0 + supporting.len() as f32));
            if !overruled.is_empty() {
                confidence *= 0.85;
            }
            if !top.unevaluated.is_empty() {
                confidence *= 0.8;
            }

            Ruling {
                decision,
                required_rolls,
                explanation,
                applied_rules: std::iter::once(top)
                    .chain(supporting)
                    .map(|c| c.entry.rule_id.clone())
                    .collect(),
                confidence: confidence.clamp(0.0, 1.0),
            }
        }
        Resolution::Conflict { subject, tied } => {
            let applied_rules: Vec<RuleId> = tied
                .iter()
                .map(|i| candidates[*i].entry.rule_id.clone())
                .collect();
            let ids: Vec<&str> = applied_rules.iter().map(RuleId::as_str).collect();
            let relevance = tied
                .iter()
                .map(|i| candidates[*i].relevance())
                .fold(0.0_f32, f32::max);

            Ruling {
                decision: Decision::Ambiguous,
                required_rolls: Vec::new(),
                explanation: format!(
                    "Rules {} conflict on {} and no precedence settles it.",
                    ids.join(", "),
                    if subject.is_empty() { "this question" } else { subject.as_str() }
                ),
                applied_rules,
                confidence: (0.25 * relevance).clamp(0.0, 1.0),
            }
        }
        Resolution::Undecided => {
            let top = &candidates[0];
            match &top.entry.roll {
                Some(roll) => Ruling {
                    decision: Decision::RollCheck,
                    required_rolls: vec![roll.clone()],
                    explanation: format!(
                        "{} ({}) calls for a {}.",
                        top.entry.title, top.entry.rule_id, roll.roll_type
                    ),
                    applied_rules: vec![top.entry.rule_id.clone()],
                    confidence: (0.3 + 0.3 * top.relevance()).clamp(0.0, 1.0),
                },
                None => Ruling {
                    decision: Decision::Ambiguous,
                    required_rolls: Vec::new(),
                    explanation: format!(
                        "{} ({}) applies but does not settle the question.",
                        top.entry.title, top.entry.rule_id
                    ),
                    applied_rules: vec![top.entry.rule_id.clone()],
                    confidence: (0.2 * top.relevance()).clamp(0.0, 1.0),
                },
            }
        }
    }
}

fn declared_roll(candidate: &Candidate, subject: &str) -> Option<RollRequirement> {
    match candidate.verdict_on(subject)?.kind {
        EffectKind::Roll(parsed) => Some(candidate.entry.roll.clone().unwrap_or(parsed)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BackendError, BackendResult};
    use crate::memory::{HashingEmbedder, InMemoryDenseIndex};
    use async_trait::async_trait;
    use game_rules::{RollType, RuleStatus};

    struct BrokenEmbedder;

    #[async_trait]
    impl EmbeddingFunction for BrokenEmbedder {
        async fn embed(&self, _text: &str) -> BackendResult<Vec<f32>> {
            Err(BackendError::new("embedder", "offline"))
        }

        fn dimensions(&self) -> usize {
            0
        }
    }

    fn melee_attack() -> RuleEntry {
        RuleEntry::new("R1", "Melee attacks")
            .with_section("Combat")
            .with_tags(["attack", "melee"])
            .with_effect("attack: make an attack roll vs AC")
            .with_roll(RollRequirement::new(RollType::AttackRoll))
            .with_source_ref("PHB p.194")
    }

    fn unconscious_target() -> RuleEntry {
        RuleEntry::new("R2", "Attacking an unconscious creature")
            .with_section("Combat")
            .with_tags(["attack", "exception", "unconscious"])
            .with_prerequisite("target_condition=unconscious")
            .with_prerequisite("target_within_5ft=yes")
            .with_effect("attack: auto-hit")
            .with_source_ref("PHB p.292")
    }

    fn engine_with(entries: Vec<RuleEntry>) -> RuleResolutionEngine {
        let store = Arc::new(RuleStore::from_entries(entries).unwrap());
        RuleResolutionEngine::new(
            store,
            Arc::new(InMemoryDenseIndex::new()),
            Arc::new(HashingEmbedder::default()),
            &CoreConfig::default(),
        )
    }

    fn situation(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    const ATTACK_QUESTION: &str = "Can I attack the unconscious goblin next to me?";

    #[tokio::test]
    async fn test_exception_overrides_general_rule() {
        let engine = engine_with(vec![melee_attack(), unconscious_target()]);
        let ruling = engine
            .adjudicate(
                ATTACK_QUESTION,
                &situation(&[("target_condition", "unconscious"), ("target_within_5ft", "yes")]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(ruling.decision, Decision::Allowed);
        assert_eq!(ruling.applied_rules, vec![RuleId::from("R2")]);
        assert!(ruling.required_rolls.is_empty());
        assert!(ruling.explanation.contains("R1"));
        assert!(ruling.confidence > 0.0 && ruling.confidence <= 1.0);
    }

    #[tokio::test]
    async fn test_violated_prerequisite_falls_back_to_general_rule() {
        let engine = engine_with(vec![melee_attack(), unconscious_target()]);
        let ruling = engine
            .adjudicate(
                ATTACK_QUESTION,
                &situation(&[("target_condition", "prone"), ("target_within_5ft", "yes")]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(ruling.decision, Decision::RollCheck);
        assert_eq!(ruling.applied_rules, vec![RuleId::from("R1")]);
        assert_eq!(
            ruling.required_rolls,
            vec![RollRequirement::new(RollType::AttackRoll)]
        );
    }

    #[tokio::test]
    async fn test_unknown_prerequisites_lower_confidence() {
        let engine = engine_with(vec![melee_attack(), unconscious_target()]);
        let cancel = CancellationToken::new();

        let confirmed = engine
            .adjudicate(
                ATTACK_QUESTION,
                &situation(&[("target_condition", "unconscious"), ("target_within_5ft", "yes")]),
                &cancel,
            )
            .await
            .unwrap();
        let assumed = engine
            .adjudicate(ATTACK_QUESTION, &HashMap::new(), &cancel)
            .await
            .unwrap();

        // Without the situation R2 still wins on tag overlap, but flagged.
        assert_eq!(assumed.applied_rules, vec![RuleId::from("R2")]);
        assert!(assumed.explanation.contains("unverified"));
        assert!(assumed.confidence < confirmed.confidence);
    }

    #[tokio::test]
    async fn test_no_match_is_ambiguous() {
        let engine = engine_with(vec![melee_attack(), unconscious_target()]);
        let ruling = engine
            .adjudicate("Where is the nearest bakery?", &HashMap::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(ruling, Ruling::no_match());
    }

    #[tokio::test]
    async fn test_drafts_are_invisible_until_approved() {
        let engine = engine_with(vec![melee_attack()]);
        engine
            .store()
            .append_draft(
                RuleEntry::new("H1", "Swimming in armor")
                    .with_tags(["swim"])
                    .with_effect("swim: cannot swim in heavy armor"),
            )
            .unwrap();

        let question = "Can I swim across the river?";
        let cancel = CancellationToken::new();
        let before = engine.adjudicate(question, &HashMap::new(), &cancel).await.unwrap();
        assert_eq!(before, Ruling::no_match());

        engine.store().approve(&RuleId::from("H1")).unwrap();
        assert_eq!(
            engine.store().lookup(&RuleId::from("H1")).unwrap().status,
            RuleStatus::Approved
        );
        let after = engine.adjudicate(question, &HashMap::new(), &cancel).await.unwrap();
        assert_eq!(after.decision, Decision::Denied);
        assert_eq!(after.applied_rules, vec![RuleId::from("H1")]);
    }

    #[tokio::test]
    async fn test_negated_permission_is_denied() {
        let engine = engine_with(vec![RuleEntry::new("S1", "Silenced casters")
            .with_section("Magic")
            .with_tags(["spell", "silenced"])
            .with_effect("spell: casting is not permitted while silenced")]);

        let ruling = engine
            .adjudicate(
                "Can I cast a spell while silenced?",
                &HashMap::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(ruling.decision, Decision::Denied);
        assert_eq!(ruling.applied_rules, vec![RuleId::from("S1")]);
        assert!(ruling.required_rolls.is_empty());
    }

    #[tokio::test]
    async fn test_unsettled_conflict_cites_every_tied_rule() {
        let engine = engine_with(vec![
            RuleEntry::new("D1", "Doors open")
                .with_tags(["door"])
                .with_effect("door: may open freely"),
            RuleEntry::new("D2", "Doors are sealed")
                .with_tags(["door"])
                .with_effect("door: cannot open"),
        ]);
        let ruling = engine
            .adjudicate("Can I open the door?", &HashMap::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(ruling.decision, Decision::Ambiguous);
        let mut tied = ruling.applied_rules.clone();
        tied.sort();
        assert_eq!(tied, vec![RuleId::from("D1"), RuleId::from("D2")]);
        assert!(ruling.explanation.contains("conflict"));
    }

    #[tokio::test]
    async fn test_embedding_outage_keeps_lexical_rules() {
        let store = Arc::new(RuleStore::from_entries(vec![melee_attack()]).unwrap());
        let engine = RuleResolutionEngine::new(
            store,
            Arc::new(InMemoryDenseIndex::new()),
            Arc::new(BrokenEmbedder),
            &CoreConfig::default(),
        );

        assert!(matches!(engine.sync_rules().await, Err(RetrievalError::Index(_))));
        let ruling = engine
            .adjudicate("Can I make a melee attack?", &HashMap::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(ruling.decision, Decision::RollCheck);
        assert_eq!(ruling.applied_rules, vec![RuleId::from("R1")]);
    }

    #[tokio::test]
    async fn test_sync_indexes_approved_rules_only() {
        let engine = engine_with(vec![
            melee_attack(),
            unconscious_target(),
            RuleEntry::new("X1", "Pending").with_status(RuleStatus::Draft),
        ]);
        assert_eq!(engine.sync_rules().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let engine = engine_with(vec![melee_attack()]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = engine.adjudicate(ATTACK_QUESTION, &HashMap::new(), &cancel).await;
        assert!(matches!(result, Err(RetrievalError::Cancelled)));
    }
}
