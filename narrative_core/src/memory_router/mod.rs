//! Memory Router - classifies a query and assembles a bounded context bundle.
//!
//! Dispatch by intent:
//! 1. **Episodic**: hybrid retrieval scoped to the caller's session
//! 2. **Factual**: current graph assertions for the named subjects, falling
//!    back to episodic retrieval when the graph has nothing
//! 3. **Temporal**: hybrid retrieval over the referenced session or time
//!    window, concurrently with a point-in-time graph query

mod context;
mod intent;

pub use context::*;
pub use intent::*;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::ContextConfig;
use crate::error::{BackendError, RetrievalError, RetrievalResult};
use crate::knowledge_base::{FactAssertion, FactGraph, Subject};
use crate::memory::RecordFilter;
use crate::retrieval::{Channel, Degradation, FusedRanking, HybridRetriever};

/// A request for narrative memory.
#[derive(Debug, Clone)]
pub struct MemoryQuery {
    pub session_id: String,
    pub text: String,
    /// May be empty, which skips dense search.
    pub embedding: Vec<f32>,
    /// Overrides classification when set.
    pub intent_hint: Option<QueryIntent>,
    /// Point in time for temporal queries.
    pub as_of: Option<DateTime<Utc>>,
}

impl MemoryQuery {
    pub fn new(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            text: text.into(),
            embedding: Vec::new(),
            intent_hint: None,
            as_of: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn with_intent(mut self, intent: QueryIntent) -> Self {
        self.intent_hint = Some(intent);
        self
    }

    pub fn as_of(mut self, at: DateTime<Utc>) -> Self {
        self.as_of = Some(at);
        self
    }
}

/// Routes memory queries to the hybrid retriever and the fact graph.
pub struct MemoryRouter {
    retriever: Arc<HybridRetriever>,
    graph: Arc<dyn FactGraph>,
    config: ContextConfig,
}

impl MemoryRouter {
    pub fn new(
        retriever: Arc<HybridRetriever>,
        graph: Arc<dyn FactGraph>,
        config: ContextConfig,
    ) -> Self {
        Self {
            retriever,
            graph,
            config,
        }
    }

    /// Answer a memory query.
    ///
    /// A failing graph yields `facts = []` with `partial = true`; only the
    /// failure of every source the intent needs (or cancellation) is an error.
    pub async fn query(
        &self,
        query: &MemoryQuery,
        cancel: &CancellationToken,
    ) -> RetrievalResult<RetrievedContext> {
        if cancel.is_cancelled() {
            return Err(RetrievalError::Cancelled);
        }

        let mut degraded = Vec::new();
        let mut lookup_error = None;
        let subjects = if query.intent_hint == Some(QueryIntent::Episodic) {
            Vec::new()
        } else {
            match guarded(cancel, self.graph.subjects()).await? {
                Ok(subjects) => subjects,
                Err(e) => {
                    warn!("[router] subject lookup failed: {}", e);
                    degraded.push(graph_degradation(&e));
                    lookup_error = Some(e);
                    Vec::new()
                }
            }
        };

        let classification = IntentClassifier::new(subjects)
            .with_sessions(self.sessions_by_recency())
            .classify(&query.text, &query.session_id);
        let intent = query.intent_hint.unwrap_or(classification.intent);
        debug!(
            "[router] session {} intent {} (classified {})",
            query.session_id, intent, classification.intent
        );

        let mut context = match intent {
            QueryIntent::Episodic => self.episodic(query, cancel).await?,
            QueryIntent::Factual => {
                self.factual(query, &classification.subjects, &mut degraded, cancel)
                    .await?
            }
            QueryIntent::Temporal => {
                self.temporal(query, &classification, lookup_error.as_ref(), &mut degraded, cancel)
                    .await?
            }
        };

        context.intent = intent;
        context.facts.truncate(self.config.max_facts);
        degraded.append(&mut context.degraded);
        context.degraded = degraded;
        context.partial = !context.degraded.is_empty();
        Ok(context)
    }

    async fn episodic(
        &self,
        query: &MemoryQuery,
        cancel: &CancellationToken,
    ) -> RetrievalResult<RetrievedContext> {
        let ranking = self
            .retriever
            .retrieve_filtered(
                &query.text,
                &query.embedding,
                self.config.max_hits,
                &RecordFilter::session(query.session_id.as_str()),
                cancel,
            )
            .await?;
        Ok(self.context_from(QueryIntent::Episodic, ranking))
    }

    async fn factual(
        &self,
        query: &MemoryQuery,
        subjects: &[Subject],
        degraded: &mut Vec<Degradation>,
        cancel: &CancellationToken,
    ) -> RetrievalResult<RetrievedContext> {
        let mut facts = Vec::new();
        let mut graph_failed = false;
        for subject in subjects {
            match guarded(cancel, self.graph.current_assertions(&subject.id)).await? {
                Ok(found) => facts.extend(found),
                Err(e) => {
                    warn!("[router] graph lookup for {} failed: {}", subject.id, e);
                    degraded.push(graph_degradation(&e));
                    graph_failed = true;
                    break;
                }
            }
        }

        if !graph_failed && !facts.is_empty() {
            let mut context = RetrievedContext::empty(QueryIntent::Factual);
            context.facts = facts;
            return Ok(context);
        }

        debug!("[router] no current facts, falling back to episodic retrieval");
        let mut context = self.episodic(query, cancel).await?;
        if !graph_failed {
            context.facts = facts;
        }
        Ok(context)
    }

    /// `lookup_error` is set when the graph already failed to list subjects;
    /// a retrieval failure on top of it leaves no source standing.
    async fn temporal(
        &self,
        query: &MemoryQuery,
        classification: &Classification,
        lookup_error: Option<&BackendError>,
        degraded: &mut Vec<Degradation>,
        cancel: &CancellationToken,
    ) -> RetrievalResult<RetrievedContext> {
        let session_end = classification
            .referenced_session
            .as_deref()
            .and_then(|s| self.retriever.lexical().session_span(s))
            .map(|(_, end)| end);
        let at = query
            .as_of
            .or(classification.referenced_date)
            .or(session_end)
            .unwrap_or_else(Utc::now);

        let filter = match &classification.referenced_session {
            Some(session) => RecordFilter::session(session.as_str()),
            None => RecordFilter::any().with_window(None, Some(at)),
        };

        let history = self.retriever.retrieve_filtered(
            &query.text,
            &query.embedding,
            self.config.max_hits,
            &filter,
            cancel,
        );
        let facts = async {
            let mut facts: Vec<FactAssertion> = Vec::new();
            for subject in &classification.subjects {
                facts.extend(self.graph.assertions_at(&subject.id, at).await?);
            }
            Ok::<_, BackendError>(facts)
        };
        let (history, facts) = guarded(cancel, async { tokio::join!(history, facts) }).await?;

        let mut context = match (history, facts, lookup_error) {
            (Err(RetrievalError::Cancelled), _, _) => return Err(RetrievalError::Cancelled),
            (Ok(ranking), Ok(facts), _) => {
                let mut context = self.context_from(QueryIntent::Temporal, ranking);
                context.facts = facts;
                context
            }
            (Ok(ranking), Err(e), _) => {
                warn!("[router] point-in-time graph query failed: {}", e);
                degraded.push(graph_degradation(&e));
                self.context_from(QueryIntent::Temporal, ranking)
            }
            (Err(retrieval), Ok(_), Some(e)) => {
                warn!("[router] every source failed: {}; graph: {}", retrieval, e);
                return Err(RetrievalError::Graph(e.clone()));
            }
            (Err(RetrievalError::Backend { dense, lexical }), Ok(facts), None) => {
                warn!("[router] history retrieval failed, facts only");
                let mut context = RetrievedContext::empty(QueryIntent::Temporal);
                context.degraded.push(Degradation {
                    channel: Channel::Dense,
                    error: dense,
                });
                context.degraded.push(Degradation {
                    channel: Channel::Lexical,
                    error: lexical,
                });
                context.facts = facts;
                context
            }
            (Err(other), Ok(_), None) => return Err(other),
            (Err(retrieval), Err(e), _) => {
                warn!("[router] every source failed: {}; graph: {}", retrieval, e);
                return Err(RetrievalError::Graph(e));
            }
        };
        context.as_of = Some(at);
        Ok(context)
    }

    fn context_from(&self, intent: QueryIntent, ranking: FusedRanking) -> RetrievedContext {
        let limit = self.config.max_hits;
        let mut context = RetrievedContext::empty(intent);
        context.dense_hits = ranking.dense.into_iter().take(limit).collect();
        context.lexical_hits = ranking.lexical.into_iter().take(limit).collect();
        context.fused_hits = ranking.fused;
        context.degraded = ranking.degraded;
        context
    }

    /// Session ids ordered by their last record, oldest first.
    fn sessions_by_recency(&self) -> Vec<String> {
        let lexical = self.retriever.lexical();
        let mut sessions: Vec<(DateTime<Utc>, String)> = lexical
            .sessions()
            .into_iter()
            .filter_map(|s| lexical.session_span(&s).map(|(_, end)| (end, s)))
            .collect();
        sessions.sort();
        sessions.into_iter().map(|(_, s)| s).collect()
    }
}

fn graph_degradation(error: &BackendError) -> Degradation {
    Degradation {
        channel: Channel::Graph,
        error: error.to_string(),
    }
}

/// Run `fut` unless `cancel` fires first.
async fn guarded<F: Future>(cancel: &CancellationToken, fut: F) -> RetrievalResult<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RetrievalError::Cancelled),
        output = fut => Ok(output),
    }
}
