//! Record definitions - the unit indexed by both dense and lexical search.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

/// Unique identifier for records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    /// Create a new random record ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Kind of event a record captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Dialogue,
    Action,
    System,
    Rule,
}

/// A piece of narrative history.
///
/// Records are immutable once written: new information is a new record, never
/// an edit of an old one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub speaker: String,
    pub event_type: EventType,

    /// Short text used in context bundles.
    pub summary: String,

    /// Full text.
    pub raw_text: String,

    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl Record {
    /// Create a dialogue record stamped with the current time.
    pub fn new(session_id: impl Into<String>, raw_text: impl Into<String>) -> Self {
        Self {
            id: RecordId::new(),
            session_id: session_id.into(),
            timestamp: Utc::now(),
            speaker: String::new(),
            event_type: EventType::Dialogue,
            summary: String::new(),
            raw_text: raw_text.into(),
            tags: BTreeSet::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<RecordId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_speaker(mut self, speaker: impl Into<String>) -> Self {
        self.speaker = speaker.into();
        self
    }

    pub fn with_event_type(mut self, event_type: EventType) -> Self {
        self.event_type = event_type;
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Text fed to the lexical index and the embedding function.
    pub fn indexed_text(&self) -> String {
        let mut text = String::with_capacity(self.summary.len() + self.raw_text.len() + 1);
        if !self.summary.is_empty() {
            text.push_str(&self.summary);
            text.push('\n');
        }
        text.push_str(&self.raw_text);
        for tag in &self.tags {
            text.push(' ');
            text.push_str(tag);
        }
        text
    }

    /// Best short rendering of the record for prompts.
    pub fn headline(&self) -> &str {
        if self.summary.is_empty() {
            &self.raw_text
        } else {
            &self.summary
        }
    }
}

/// A record paired with the score one ranking gave it.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: Arc<Record>,
    pub score: f32,
}

impl ScoredRecord {
    pub fn new(record: Arc<Record>, score: f32) -> Self {
        Self { record, score }
    }

    pub fn id(&self) -> &RecordId {
        &self.record.id
    }
}

/// Ranking order shared by every index: higher score, then newer record, then id.
pub fn rank_order(a: &ScoredRecord, b: &ScoredRecord) -> std::cmp::Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| b.record.timestamp.cmp(&a.record.timestamp))
        .then_with(|| a.record.id.cmp(&b.record.id))
}

/// Restricts which records a search may return.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub session_id: Option<String>,
    /// Inclusive lower bound.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound.
    pub until: Option<DateTime<Utc>>,
    pub event_types: Option<Vec<EventType>>,
}

impl RecordFilter {
    /// A filter that admits every record.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }

    pub fn with_window(mut self, from: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        self.from = from;
        self.until = until;
        self
    }

    pub fn with_event_types(mut self, event_types: Vec<EventType>) -> Self {
        self.event_types = Some(event_types);
        self
    }

    pub fn is_unrestricted(&self) -> bool {
        self == &Self::default()
    }

    pub fn matches(&self, record: &Record) -> bool {
        if let Some(session) = &self.session_id {
            if &record.session_id != session {
                return false;
            }
        }
        if self.from.is_some_and(|from| record.timestamp < from) {
            return false;
        }
        if self.until.is_some_and(|until| record.timestamp > until) {
            return false;
        }
        if let Some(types) = &self.event_types {
            if !types.contains(&record.event_type) {
                return false;
            }
        }
        true
    }
}
