//! End-to-end scenarios across retrieval, the fact graph and adjudication.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use game_rules::{RuleEntry, RuleId, RuleStore, TomlRuleCorpus};
use narrative_core::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, day, hour, 0, 0).unwrap()
}

struct FailingDense;

#[async_trait]
impl DenseIndex for FailingDense {
    async fn upsert(&self, _id: RecordId, _embedding: Vec<f32>) -> BackendResult<()> {
        Ok(())
    }

    async fn search(
        &self,
        _embedding: &[f32],
        _k: usize,
        _admit: &(dyn for<'r> Fn(&'r RecordId) -> bool + Sync),
    ) -> BackendResult<Vec<(RecordId, f32)>> {
        Err(BackendError::new("dense", "vector store timed out"))
    }
}

#[derive(Default)]
struct CountingDense {
    inner: InMemoryDenseIndex,
    searches: AtomicUsize,
}

#[async_trait]
impl DenseIndex for CountingDense {
    async fn upsert(&self, id: RecordId, embedding: Vec<f32>) -> BackendResult<()> {
        self.inner.upsert(id, embedding).await
    }

    async fn search(
        &self,
        embedding: &[f32],
        k: usize,
        admit: &(dyn for<'r> Fn(&'r RecordId) -> bool + Sync),
    ) -> BackendResult<Vec<(RecordId, f32)>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.inner.search(embedding, k, admit).await
    }
}

fn campaign_log() -> Vec<Record> {
    vec![
        Record::new("s1", "The goblin attacks the caravan").with_id("e1").with_timestamp(at(1, 9)),
        Record::new("s1", "The dragon sleeps on its hoard").with_id("e2").with_timestamp(at(1, 10)),
        Record::new("s1", "A goblin scout watches from the ridge").with_id("e3").with_timestamp(at(1, 11)),
        Record::new("s1", "The party camps by the river").with_id("e4").with_timestamp(at(1, 12)),
        Record::new("s1", "The goblin chief demands tribute").with_id("e5").with_timestamp(at(1, 13)),
    ]
}

async fn populated(dense: Arc<dyn DenseIndex>) -> (Arc<LexicalIndex>, HashingEmbedder) {
    let embedder = HashingEmbedder::default();
    let lexical = Arc::new(LexicalIndex::default());
    EpisodicStore::new(lexical.clone(), dense, Arc::new(embedder.clone()))
        .add_all(campaign_log())
        .await
        .unwrap();
    (lexical, embedder)
}

#[tokio::test]
async fn retrieve_is_bounded_and_ordered() {
    let dense: Arc<dyn DenseIndex> = Arc::new(InMemoryDenseIndex::new());
    let (lexical, embedder) = populated(dense.clone()).await;
    let retriever = HybridRetriever::new(lexical, dense, FusionConfig::default());

    let query = "goblin attacks";
    let ranking = retriever
        .retrieve(query, &embedder.embed_sync(query), 3, &CancellationToken::new())
        .await
        .unwrap();

    assert!(ranking.fused.len() <= 3);
    assert!(!ranking.is_degraded());
    for pair in ranking.fused.windows(2) {
        assert!(pair[0].score >= pair[1].score);
        if pair[0].score == pair[1].score {
            assert!(pair[0].record.timestamp >= pair[1].record.timestamp);
        }
    }
    assert_eq!(ranking.fused[0].id().as_str(), "e1");
}

#[tokio::test]
async fn equal_scores_prefer_newer_records() {
    let lexical = Arc::new(LexicalIndex::default());
    lexical.index(vec![
        Record::new("s1", "goblin ambush").with_id("old").with_timestamp(at(1, 8)),
        Record::new("s1", "goblin ambush").with_id("new").with_timestamp(at(2, 8)),
    ]);
    let retriever = HybridRetriever::new(
        lexical,
        Arc::new(InMemoryDenseIndex::new()),
        FusionConfig::default(),
    );

    let ranking = retriever
        .retrieve("goblin", &[], 5, &CancellationToken::new())
        .await
        .unwrap();
    let ids: Vec<&str> = ranking.fused.iter().map(|hit| hit.id().as_str()).collect();
    assert_eq!(ids, vec!["new", "old"]);
}

#[tokio::test]
async fn dense_outage_returns_lexical_ranking() {
    let (lexical, embedder) = populated(Arc::new(FailingDense)).await;
    let expected: Vec<RecordId> = lexical
        .search("goblin", 5)
        .unwrap()
        .iter()
        .map(|hit| hit.id().clone())
        .collect();

    let retriever = HybridRetriever::new(lexical, Arc::new(FailingDense), FusionConfig::default());
    let ranking = retriever
        .retrieve("goblin", &embedder.embed_sync("goblin"), 5, &CancellationToken::new())
        .await
        .unwrap();

    let fused: Vec<RecordId> = ranking.fused.iter().map(|hit| hit.id().clone()).collect();
    assert_eq!(fused, expected);
    assert_eq!(ranking.degraded.len(), 1);
    assert_eq!(ranking.degraded[0].channel, Channel::Dense);
}

#[tokio::test]
async fn factual_hint_answers_from_graph_alone() {
    let dense = Arc::new(CountingDense::default());
    let (lexical, embedder) = populated(dense.clone()).await;
    let retriever = Arc::new(HybridRetriever::new(lexical, dense.clone(), FusionConfig::default()));

    let graph = Arc::new(InMemoryFactGraph::default());
    graph.register_subject(Subject::character("aria", "Aria")).await.unwrap();
    graph
        .assert_fact(FactAssertion::new("aria", "HAS", "torch").valid_from(at(1, 9)))
        .await
        .unwrap();

    let router = MemoryRouter::new(retriever, graph, ContextConfig::default());
    let query = MemoryQuery::new("s1", "What does Aria have?")
        .with_embedding(embedder.embed_sync("What does Aria have?"))
        .with_intent(QueryIntent::Factual);
    let context = router.query(&query, &CancellationToken::new()).await.unwrap();

    assert_eq!(context.intent, QueryIntent::Factual);
    assert_eq!(context.facts.len(), 1);
    assert_eq!(context.facts[0].describe(), "aria HAS torch");
    assert!(context.fused_hits.is_empty());
    assert!(!context.partial);
    assert_eq!(dense.searches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn exclusive_predicate_keeps_one_open_assertion() {
    let graph = InMemoryFactGraph::default();
    graph
        .assert_fact(FactAssertion::new("aria", "LOCATED_IN", "tavern").valid_from(at(1, 9)))
        .await
        .unwrap();
    graph
        .assert_fact(FactAssertion::new("aria", "LOCATED_IN", "forest").valid_from(at(1, 15)))
        .await
        .unwrap();

    let current = graph.current_assertions("aria").await.unwrap();
    let open: Vec<_> = current
        .iter()
        .filter(|fact| fact.predicate == "LOCATED_IN")
        .collect();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].object_id, "forest");

    let earlier = graph.assertions_at("aria", at(1, 12)).await.unwrap();
    assert_eq!(earlier.len(), 1);
    assert_eq!(earlier[0].object_id, "tavern");
}

const RULE_CORPUS: &str = r#"
    [[rule]]
    rule_id = "R1"
    title = "Melee attacks"
    section = "Combat"
    tags = ["attack", "melee"]
    effects = ["attack: make an attack roll vs AC"]
    source_ref = "PHB p.194"

    [rule.roll]
    roll_type = "attack_roll"

    [[rule]]
    rule_id = "R2"
    title = "Attacking an unconscious creature"
    section = "Combat"
    tags = ["attack", "exception", "unconscious"]
    prerequisites = ["target_condition=unconscious", "target_within_5ft"]
    effects = ["attack: auto-hit"]
    source_ref = "PHB p.292"
"#;

fn engine_for(store: RuleStore) -> RuleResolutionEngine {
    RuleResolutionEngine::new(
        Arc::new(store),
        Arc::new(InMemoryDenseIndex::new()),
        Arc::new(HashingEmbedder::default()),
        &CoreConfig::default(),
    )
}

#[tokio::test]
async fn unconscious_target_exception_is_allowed() {
    let engine = engine_for(RuleStore::load(&TomlRuleCorpus::inline(RULE_CORPUS)).unwrap());
    let situation: HashMap<String, String> = [
        ("target_condition", "unconscious"),
        ("target_within_5ft", "true"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    let ruling = engine
        .adjudicate(
            "Can I attack the unconscious guard beside me?",
            &situation,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(ruling.decision, Decision::Allowed);
    assert_eq!(ruling.applied_rules, vec![RuleId::from("R2")]);
    assert!(ruling.required_rolls.is_empty());
}

#[tokio::test]
async fn unmatched_question_is_ambiguous() {
    let engine = engine_for(RuleStore::load(&TomlRuleCorpus::inline(RULE_CORPUS)).unwrap());
    let ruling = engine
        .adjudicate("How much does bread cost?", &HashMap::new(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(ruling.decision, Decision::Ambiguous);
    assert!(ruling.applied_rules.is_empty());
    assert_eq!(ruling.confidence, 0.0);
}

#[tokio::test]
async fn draft_only_match_is_ambiguous() {
    let store = RuleStore::new();
    store
        .append_draft(
            RuleEntry::new("F1", "Flying mounts")
                .with_tags(["flying", "mount"])
                .with_effect("mount: may fly at double speed"),
        )
        .unwrap();
    let engine = engine_for(store);

    let ruling = engine
        .adjudicate("Can my flying mount carry two riders?", &HashMap::new(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(ruling, Ruling::no_match());
}

#[test]
fn goblin_query_ranks_goblin_event_first() {
    let index = LexicalIndex::default();
    index.index(vec![
        Record::new("s1", "the goblin attacks").with_id("g"),
        Record::new("s1", "the dragon sleeps").with_id("d"),
    ]);

    let hits = index.search("goblin", 10).unwrap();
    assert_eq!(hits[0].id().as_str(), "g");
    assert!(hits.iter().all(|hit| hit.id().as_str() != "d"));
}

#[test]
fn reindexing_is_idempotent() {
    let index = LexicalIndex::default();
    index.index(campaign_log());
    let first: Vec<(RecordId, f32)> = index
        .search("goblin river", 5)
        .unwrap()
        .into_iter()
        .map(|hit| (hit.id().clone(), hit.score))
        .collect();

    index.index(campaign_log());
    let second: Vec<(RecordId, f32)> = index
        .search("goblin river", 5)
        .unwrap()
        .into_iter()
        .map(|hit| (hit.id().clone(), hit.score))
        .collect();

    assert_eq!(index.len(), 5);
    assert_eq!(first, second);
}
