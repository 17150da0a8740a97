//! Lexical index - in-memory inverted index with BM25 ranking.

use chrono::{DateTime, Utc};
use game_rules::text::tokenize;
use log::debug;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use super::{rank_order, Record, RecordFilter, RecordId, ScoredRecord};
use crate::config::Bm25Params;
use crate::error::{RetrievalError, RetrievalResult};

#[derive(Debug)]
struct Document {
    record: Arc<Record>,
    term_freqs: HashMap<String, u32>,
    len: usize,
}

#[derive(Debug, Default)]
struct InvertedIndex {
    docs: HashMap<RecordId, Document>,

    /// Index: term -> documents containing it. Its length is the term's document frequency.
    postings: HashMap<String, HashSet<RecordId>>,

    total_len: usize,
}

impl InvertedIndex {
    fn upsert(&mut self, record: Arc<Record>) {
        self.remove(&record.id);

        let tokens = tokenize(&record.indexed_text());
        let mut term_freqs: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            *term_freqs.entry(token.clone()).or_default() += 1;
        }
        for term in term_freqs.keys() {
            self.postings
                .entry(term.clone())
                .or_default()
                .insert(record.id.clone());
        }

        self.total_len += tokens.len();
        self.docs.insert(
            record.id.clone(),
            Document {
                record,
                term_freqs,
                len: tokens.len(),
            },
        );
    }

    fn remove(&mut self, id: &RecordId) {
        let Some(doc) = self.docs.remove(id) else {
            return;
        };
        self.total_len -= doc.len;
        for term in doc.term_freqs.keys() {
            if let Some(ids) = self.postings.get_mut(term) {
                ids.remove(id);
                if ids.is_empty() {
                    self.postings.remove(term);
                }
            }
        }
    }

    fn average_len(&self) -> f32 {
        if self.docs.is_empty() {
            0.0
        } else {
            self.total_len as f32 / self.docs.len() as f32
        }
    }
}

/// BM25 inverted index over records.
///
/// `index` is the only writer and takes the write lock; searches share the
/// read lock and can run concurrently with each other.
#[derive(Debug)]
pub struct LexicalIndex {
    params: Bm25Params,
    /// `None` until the first `index` call.
    inner: RwLock<Option<InvertedIndex>>,
}

impl Default for LexicalIndex {
    fn default() -> Self {
        Self::new(Bm25Params::default())
    }
}

impl LexicalIndex {
    pub fn new(params: Bm25Params) -> Self {
        Self {
            params,
            inner: RwLock::new(None),
        }
    }

    /// Add or replace records. Re-indexing a record with the same id replaces it.
    ///
    /// Returns the number of records in the index afterwards.
    pub fn index<I, R>(&self, records: I) -> usize
    where
        I: IntoIterator<Item = R>,
        R: Into<Arc<Record>>,
    {
        let mut guard = self.inner.write();
        let index = guard.get_or_insert_with(InvertedIndex::default);
        for record in records {
            index.upsert(record.into());
        }
        debug!(
            "[lexical] {} documents, {} terms",
            index.docs.len(),
            index.postings.len()
        );
        index.docs.len()
    }

    /// Rank all records against a query.
    pub fn search(&self, query: &str, k: usize) -> RetrievalResult<Vec<ScoredRecord>> {
        self.search_filtered(query, k, &RecordFilter::any())
    }

    /// Rank records admitted by `filter` against a query.
    ///
    /// Corpus statistics (document frequency, average length) always cover the
    /// whole index so scores stay comparable across filters.
    pub fn search_filtered(
        &self,
        query: &str,
        k: usize,
        filter: &RecordFilter,
    ) -> RetrievalResult<Vec<ScoredRecord>> {
        let guard = self.inner.read();
        let index = guard.as_ref().ok_or(RetrievalError::EmptyIndex)?;
        if k == 0 || index.docs.is_empty() {
            return Ok(Vec::new());
        }

        let terms: BTreeSet<String> = tokenize(query).into_iter().collect();
        let n = index.docs.len() as f32;
        let avg_len = index.average_len().max(1.0);
        let Bm25Params { k1, b } = self.params;

        let mut scores: HashMap<&RecordId, f32> = HashMap::new();
        for term in &terms {
            let Some(postings) = index.postings.get(term) else {
                continue;
            };
            let df = postings.len() as f32;
            let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();

            for id in postings {
                let doc = &index.docs[id];
                if !filter.matches(&doc.record) {
                    continue;
                }
                let tf = doc.term_freqs.get(term).copied().unwrap_or(0) as f32;
                let norm = k1 * (1.0 - b + b * doc.len as f32 / avg_len);
                *scores.entry(id).or_default() += idf * tf * (k1 + 1.0) / (tf + norm);
            }
        }

        let mut hits: Vec<ScoredRecord> = scores
            .into_iter()
            .map(|(id, score)| ScoredRecord::new(Arc::clone(&index.docs[id].record), score))
            .collect();
        hits.sort_by(rank_order);
        hits.truncate(k);
        Ok(hits)
    }

    /// Fetch an indexed record by id.
    pub fn get(&self, id: &RecordId) -> Option<Arc<Record>> {
        self.inner
            .read()
            .as_ref()
            .and_then(|index| index.docs.get(id))
            .map(|doc| Arc::clone(&doc.record))
    }

    /// First and last timestamp recorded for a session.
    pub fn session_span(&self, session_id: &str) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let guard = self.inner.read();
        let index = guard.as_ref()?;
        index
            .docs
            .values()
            .filter(|doc| doc.record.session_id == session_id)
            .fold(None, |span, doc| {
                let ts = doc.record.timestamp;
                Some(match span {
                    None => (ts, ts),
                    Some((first, last)) => (first.min(ts), last.max(ts)),
                })
            })
    }

    /// Distinct session ids present in the index.
    pub fn sessions(&self) -> BTreeSet<String> {
        self.inner
            .read()
            .as_ref()
            .map(|index| {
                index
                    .docs
                    .values()
                    .map(|doc| doc.record.session_id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().as_ref().map_or(0, |index| index.docs.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `index` has been called at least once.
    pub fn is_built(&self) -> bool {
        self.inner.read().is_some()
    }
}
