//! Rule store - an immutable catalog snapshot behind a publish lock.
//!
//! Readers take a cheap `Arc` clone of the current catalog and never block
//! writers for longer than the pointer swap. Writers (draft appends and
//! approvals) build a fresh catalog from the current one and publish it, so a
//! live entry is never mutated in place.

use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use super::{RuleCorpusSource, RuleEntry, RuleId, RuleStatus};
use crate::error::{RulesError, RulesResult};
use crate::text::{is_stopword, tokenize};

/// A rule matched against a set of question terms.
#[derive(Debug, Clone)]
pub struct RuleMatch {
    pub entry: Arc<RuleEntry>,
    /// Tags whose words all appear in the question.
    pub tag_overlap: usize,
    /// Distinct question terms found in the rule's title, section, or effects.
    pub keyword_hits: usize,
}

/// One published version of the rule catalog.
#[derive(Debug, Clone, Default)]
pub struct RuleCatalog {
    entries: HashMap<RuleId, Arc<RuleEntry>>,

    /// Index: tag word -> rules carrying a tag with that word.
    tag_index: HashMap<String, BTreeSet<RuleId>>,

    /// Index: keyword -> rules mentioning it in title, section, or effects.
    keyword_index: HashMap<String, BTreeSet<RuleId>>,

    revision: u64,
}

impl RuleCatalog {
    /// Get an entry by id, drafts included.
    pub fn get(&self, id: &RuleId) -> Option<&Arc<RuleEntry>> {
        self.entries.get(id)
    }

    /// Iterate over approved entries in id order.
    pub fn approved(&self) -> Vec<Arc<RuleEntry>> {
        let mut approved: Vec<_> = self
            .entries
            .values()
            .filter(|e| !e.is_draft())
            .cloned()
            .collect();
        approved.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));
        approved
    }

    /// Iterate over draft entries awaiting review.
    pub fn drafts(&self) -> impl Iterator<Item = &Arc<RuleEntry>> {
        self.entries.values().filter(|e| e.is_draft())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Revision of the most recent publish.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Exact tag/keyword match of approved rules against question terms.
    ///
    /// Results are ordered by tag overlap, then keyword hits, then rule id.
    pub fn match_terms(&self, terms: &[String]) -> Vec<RuleMatch> {
        let term_set: HashSet<String> = terms.iter().cloned().collect();

        let mut keyword_hits: HashMap<&RuleId, usize> = HashMap::new();
        let mut tagged: HashSet<&RuleId> = HashSet::new();
        for term in &term_set {
            if let Some(ids) = self.keyword_index.get(term) {
                for id in ids {
                    *keyword_hits.entry(id).or_default() += 1;
                }
            }
            if let Some(ids) = self.tag_index.get(term) {
                tagged.extend(ids);
            }
        }

        let candidates: BTreeSet<&RuleId> =
            keyword_hits.keys().copied().chain(tagged).collect();

        let mut matches: Vec<RuleMatch> = candidates
            .into_iter()
            .filter_map(|id| self.entries.get(id))
            .filter(|entry| !entry.is_draft())
            .map(|entry| RuleMatch {
                tag_overlap: entry.tag_overlap(&term_set),
                keyword_hits: keyword_hits.get(&entry.rule_id).copied().unwrap_or(0),
                entry: Arc::clone(entry),
            })
            .filter(|m| m.tag_overlap > 0 || m.keyword_hits > 0)
            .collect();

        matches.sort_by(|a, b| {
            b.tag_overlap
                .cmp(&a.tag_overlap)
                .then(b.keyword_hits.cmp(&a.keyword_hits))
                .then_with(|| a.entry.rule_id.cmp(&b.entry.rule_id))
        });
        matches
    }

    fn insert(&mut self, entry: RuleEntry) {
        let id = entry.rule_id.clone();
        self.unindex(&id);

        for tag in &entry.tags {
            for word in tokenize(tag) {
                self.tag_index.entry(word).or_default().insert(id.clone());
            }
        }

        let mut keyword_source = vec![entry.title.as_str(), entry.section.as_str()];
        keyword_source.extend(entry.effects.iter().map(String::as_str));
        for word in keyword_source.into_iter().flat_map(tokenize) {
            if !is_stopword(&word) {
                self.keyword_index.entry(word).or_default().insert(id.clone());
            }
        }

        self.entries.insert(id, Arc::new(entry));
    }

    fn unindex(&mut self, id: &RuleId) {
        if self.entries.remove(id).is_none() {
            return;
        }
        for ids in self.tag_index.values_mut() {
            ids.remove(id);
        }
        for ids in self.keyword_index.values_mut() {
            ids.remove(id);
        }
    }
}

/// Runtime rule catalog.
#[derive(Debug, Default)]
pub struct RuleStore {
    current: RwLock<Arc<RuleCatalog>>,
    /// Serializes writers so two publishes never race on the same base snapshot.
    publish: Mutex<()>,
}

impl RuleStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from an initial set of rules, published as revision 1.
    pub fn from_entries(entries: impl IntoIterator<Item = RuleEntry>) -> RulesResult<Self> {
        let mut catalog = RuleCatalog {
            revision: 1,
            ..RuleCatalog::default()
        };

        for mut entry in entries {
            validate(&entry)?;
            if catalog.entries.contains_key(&entry.rule_id) {
                return Err(RulesError::DuplicateRule(entry.rule_id));
            }
            normalize(&mut entry);
            entry.revision = 1;
            catalog.insert(entry);
        }

        info!(
            "[rules] loaded {} rules ({} drafts)",
            catalog.len(),
            catalog.drafts().count()
        );

        Ok(Self {
            current: RwLock::new(Arc::new(catalog)),
            publish: Mutex::new(()),
        })
    }

    /// Load the initial catalog from a corpus source.
    pub fn load(source: &dyn RuleCorpusSource) -> RulesResult<Self> {
        Self::from_entries(source.load()?)
    }

    /// Current catalog snapshot. Stays valid regardless of later publishes.
    pub fn snapshot(&self) -> Arc<RuleCatalog> {
        Arc::clone(&self.current.read())
    }

    /// Look up a rule by id, drafts included.
    pub fn lookup(&self, id: &RuleId) -> Option<Arc<RuleEntry>> {
        self.snapshot().get(id).cloned()
    }

    /// Append an extracted rule as a draft. Returns the publish revision.
    pub fn append_draft(&self, mut entry: RuleEntry) -> RulesResult<u64> {
        validate(&entry)?;
        entry.status = RuleStatus::Draft;

        self.publish_with(|catalog, revision| {
            if catalog.entries.contains_key(&entry.rule_id) {
                return Err(RulesError::DuplicateRule(entry.rule_id.clone()));
            }
            debug!("[rules] appending draft {}", entry.rule_id);
            normalize(&mut entry);
            entry.revision = revision;
            catalog.insert(entry);
            Ok(())
        })
    }

    /// Approve a draft, publishing a new entry version.
    ///
    /// Approving an already-approved rule is a no-op returning the current revision.
    pub fn approve(&self, id: &RuleId) -> RulesResult<u64> {
        let existing = self
            .lookup(id)
            .ok_or_else(|| RulesError::UnknownRule(id.clone()))?;
        if !existing.is_draft() {
            return Ok(existing.revision);
        }

        self.publish_with(|catalog, revision| {
            let current = catalog
                .get(id)
                .ok_or_else(|| RulesError::UnknownRule(id.clone()))?;
            let mut approved = RuleEntry::clone(current);
            approved.status = RuleStatus::Approved;
            approved.revision = revision;
            info!("[rules] approved {} at revision {}", id, revision);
            catalog.insert(approved);
            Ok(())
        })
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    fn publish_with<F>(&self, edit: F) -> RulesResult<u64>
    where
        F: FnOnce(&mut RuleCatalog, u64) -> RulesResult<()>,
    {
        let _writer = self.publish.lock();
        let mut next = RuleCatalog::clone(&self.snapshot());
        let revision = next.revision + 1;
        edit(&mut next, revision)?;
        next.revision = revision;
        *self.current.write() = Arc::new(next);
        Ok(revision)
    }
}

fn validate(entry: &RuleEntry) -> RulesResult<()> {
    if entry.rule_id.as_str().trim().is_empty() {
        return Err(RulesError::InvalidRule(entry.rule_id.clone(), "rule_id"));
    }
    if entry.title.trim().is_empty() {
        return Err(RulesError::InvalidRule(entry.rule_id.clone(), "title"));
    }
    Ok(())
}

fn normalize(entry: &mut RuleEntry) {
    entry.tags = entry.tags.iter().map(|t| t.trim().to_lowercase()).collect();
}
