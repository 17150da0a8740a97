//! Fact graph - temporal assertions over named subjects.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::{normalize_predicate, FactAssertion, FactId, Subject};
use crate::config::GraphConfig;
use crate::error::{BackendError, BackendResult};

/// Structured store of timestamped facts.
///
/// Backends must uphold the exclusivity invariant: for an exclusive predicate
/// a subject has at most one open assertion at any observation point, so
/// `assert_fact` closes the prior value and opens the new one atomically.
#[async_trait]
pub trait FactGraph: Send + Sync {
    /// Open assertions about a subject.
    async fn current_assertions(&self, subject_id: &str) -> BackendResult<Vec<FactAssertion>>;

    /// Assertions about a subject that held at `at`.
    async fn assertions_at(
        &self,
        subject_id: &str,
        at: DateTime<Utc>,
    ) -> BackendResult<Vec<FactAssertion>>;

    /// Record a fact, returning the id of the open assertion that now holds it.
    async fn assert_fact(&self, fact: FactAssertion) -> BackendResult<FactId>;

    /// Close an open assertion at `at`. Returns false if it was already closed.
    async fn retract(&self, id: FactId, at: DateTime<Utc>) -> BackendResult<bool>;

    async fn register_subject(&self, subject: Subject) -> BackendResult<()>;

    /// Every known subject, in id order.
    async fn subjects(&self) -> BackendResult<Vec<Subject>>;
}

#[derive(Debug, Default)]
struct GraphState {
    facts: HashMap<FactId, FactAssertion>,

    /// Index: subject -> its facts in insertion order.
    by_subject: HashMap<String, Vec<FactId>>,

    subjects: BTreeMap<String, Subject>,
}

impl GraphState {
    fn for_subject<'a>(
        &'a self,
        subject_id: &str,
    ) -> impl Iterator<Item = &'a FactAssertion> + 'a {
        self.by_subject
            .get(subject_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.facts.get(id))
    }

    fn open_ids(&self, subject_id: &str, predicate: &str) -> Vec<FactId> {
        self.for_subject(subject_id)
            .filter(|f| f.is_current() && f.predicate == predicate)
            .map(|f| f.id)
            .collect()
    }
}

/// Fact graph held in memory.
///
/// One mutex guards all state, so every write (including close-then-open)
/// is a single critical section and readers never observe two open values
/// for an exclusive predicate.
#[derive(Debug)]
pub struct InMemoryFactGraph {
    exclusive: HashSet<String>,
    state: Mutex<GraphState>,
}

impl Default for InMemoryFactGraph {
    fn default() -> Self {
        Self::new(&GraphConfig::default())
    }
}

impl InMemoryFactGraph {
    pub fn new(config: &GraphConfig) -> Self {
        Self {
            exclusive: config
                .exclusive_predicates
                .iter()
                .map(|p| normalize_predicate(p))
                .collect(),
            state: Mutex::new(GraphState::default()),
        }
    }

    pub fn is_exclusive(&self, predicate: &str) -> bool {
        self.exclusive.contains(&normalize_predicate(predicate))
    }

    /// Every assertion ever recorded for a subject, closed ones included.
    pub fn history(&self, subject_id: &str) -> Vec<FactAssertion> {
        let state = self.state.lock();
        sorted(state.for_subject(subject_id).cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.state.lock().facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl FactGraph for InMemoryFactGraph {
    async fn current_assertions(&self, subject_id: &str) -> BackendResult<Vec<FactAssertion>> {
        let state = self.state.lock();
        Ok(sorted(
            state
                .for_subject(subject_id)
                .filter(|f| f.is_current())
                .cloned()
                .collect(),
        ))
    }

    async fn assertions_at(
        &self,
        subject_id: &str,
        at: DateTime<Utc>,
    ) -> BackendResult<Vec<FactAssertion>> {
        let state = self.state.lock();
        Ok(sorted(
            state
                .for_subject(subject_id)
                .filter(|f| f.was_valid_at(at))
                .cloned()
                .collect(),
        ))
    }

    async fn assert_fact(&self, mut fact: FactAssertion) -> BackendResult<FactId> {
        fact.predicate = normalize_predicate(&fact.predicate);
        if let Some(until) = fact.valid_until {
            if until <= fact.valid_from {
                return Err(BackendError::new(
                    "graph",
                    format!("assertion {} closes before it opens", fact.describe()),
                ));
            }
        }

        let mut state = self.state.lock();

        // Re-asserting an open fact is a no-op.
        if let Some(existing) = state.for_subject(&fact.subject_id).find(|f| {
            f.is_current() && f.predicate == fact.predicate && f.object_id == fact.object_id
        }) {
            return Ok(existing.id);
        }

        if self.exclusive.contains(&fact.predicate) && fact.is_current() {
            let open = state.open_ids(&fact.subject_id, &fact.predicate);
            for id in &open {
                if state.facts[id].valid_from > fact.valid_from {
                    return Err(BackendError::new(
                        "graph",
                        format!(
                            "{} {} changed after {}",
                            fact.subject_id, fact.predicate, fact.valid_from
                        ),
                    ));
                }
            }
            for id in open {
                if let Some(prior) = state.facts.get_mut(&id) {
                    debug!("[graph] closing {} at {}", prior.describe(), fact.valid_from);
                    prior.valid_until = Some(fact.valid_from);
                }
            }
        }

        let id = fact.id;
        debug!("[graph] opening {}", fact.describe());
        state
            .by_subject
            .entry(fact.subject_id.clone())
            .or_default()
            .push(id);
        state.facts.insert(id, fact);
        Ok(id)
    }

    async fn retract(&self, id: FactId, at: DateTime<Utc>) -> BackendResult<bool> {
        let mut state = self.state.lock();
        let fact = state
            .facts
            .get_mut(&id)
            .ok_or_else(|| BackendError::new("graph", format!("unknown fact {}", id)))?;
        if !fact.is_current() {
            return Ok(false);
        }
        if at < fact.valid_from {
            return Err(BackendError::new(
                "graph",
                format!("cannot retract {} before it opened", fact.describe()),
            ));
        }
        fact.valid_until = Some(at);
        Ok(true)
    }

    async fn register_subject(&self, subject: Subject) -> BackendResult<()> {
        self.state
            .lock()
            .subjects
            .insert(subject.id.clone(), subject);
        Ok(())
    }

    async fn subjects(&self) -> BackendResult<Vec<Subject>> {
        Ok(self.state.lock().subjects.values().cloned().collect())
    }
}

fn sorted(mut facts: Vec<FactAssertion>) -> Vec<FactAssertion> {
    facts.sort_by(|a, b| {
        a.predicate
            .cmp(&b.predicate)
            .then(a.valid_from.cmp(&b.valid_from))
            .then_with(|| a.object_id.cmp(&b.object_id))
    });
    facts
}
