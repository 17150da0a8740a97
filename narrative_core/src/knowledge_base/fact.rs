//! Fact definitions - timestamped assertions between subjects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for fact assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FactId(pub Uuid);

impl FactId {
    /// Create a new random fact ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FactId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kinds of named subjects in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    Character,
    Location,
    Item,
    Faction,
    Other,
}

/// A named node facts can be about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub name: String,
    pub kind: SubjectKind,
}

impl Subject {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: SubjectKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
        }
    }

    pub fn character(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, SubjectKind::Character)
    }

    pub fn location(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, SubjectKind::Location)
    }

    pub fn item(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, SubjectKind::Item)
    }
}

/// One relationship with a validity interval.
///
/// `valid_until == None` means the assertion is currently true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactAssertion {
    pub id: FactId,
    pub subject_id: String,
    /// Upper-case relation name, e.g. `OWNS` or `LOCATED_IN`.
    pub predicate: String,
    pub object_id: String,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    /// Id of the event that produced the assertion.
    pub provenance: Option<String>,
}

impl FactAssertion {
    /// Create an open assertion starting now.
    pub fn new(
        subject_id: impl Into<String>,
        predicate: impl AsRef<str>,
        object_id: impl Into<String>,
    ) -> Self {
        Self {
            id: FactId::new(),
            subject_id: subject_id.into(),
            predicate: normalize_predicate(predicate.as_ref()),
            object_id: object_id.into(),
            valid_from: Utc::now(),
            valid_until: None,
            provenance: None,
        }
    }

    pub fn valid_from(mut self, at: DateTime<Utc>) -> Self {
        self.valid_from = at;
        self
    }

    pub fn valid_until(mut self, at: DateTime<Utc>) -> Self {
        self.valid_until = Some(at);
        self
    }

    pub fn with_provenance(mut self, event_id: impl Into<String>) -> Self {
        self.provenance = Some(event_id.into());
        self
    }

    pub fn is_current(&self) -> bool {
        self.valid_until.is_none()
    }

    /// Whether the assertion held at `at`. The interval is half-open:
    /// `[valid_from, valid_until)`.
    pub fn was_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.valid_from <= at && self.valid_until.map_or(true, |until| at < until)
    }

    /// `subject PREDICATE object`, as rendered into prompts.
    pub fn describe(&self) -> String {
        format!("{} {} {}", self.subject_id, self.predicate, self.object_id)
    }
}

pub fn normalize_predicate(predicate: &str) -> String {
    predicate.trim().to_uppercase().replace([' ', '-'], "_")
}
