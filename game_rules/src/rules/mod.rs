//! Rule catalog: entries, the snapshot store, and corpus sources.

mod corpus;
mod store;

pub use corpus::*;
pub use store::*;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use crate::mechanics::{Effect, RollRequirement};
use crate::text::tokenize;

/// Stable identifier for a rule. Rulings cite it, so it never changes across reloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub String);

impl RuleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RuleId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RuleId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Review state of a rule. Drafts never take part in adjudication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    Draft,
    #[default]
    Approved,
}

/// Tag marking a rule as a specific exception to a general rule.
pub const EXCEPTION_TAG: &str = "exception";

/// A single rule in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEntry {
    pub rule_id: RuleId,
    pub title: String,

    /// Section heading the rule belongs to (e.g. "Combat", "Conditions").
    #[serde(default)]
    pub section: String,

    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// Conjunctive conditions, see [`crate::mechanics::Prerequisite`].
    #[serde(default)]
    pub prerequisites: Vec<String>,

    #[serde(default)]
    pub effects: Vec<String>,

    #[serde(default)]
    pub exceptions: Vec<String>,

    /// Roll the rule demands when its effects call for dice.
    #[serde(default)]
    pub roll: Option<RollRequirement>,

    /// Full rule prose, indexed for retrieval.
    #[serde(default)]
    pub content: String,

    #[serde(default)]
    pub source_ref: String,

    #[serde(default)]
    pub status: RuleStatus,

    /// Publish generation assigned by the store. Entries published together
    /// share a revision.
    #[serde(skip)]
    pub revision: u64,
}

impl RuleEntry {
    /// Create an approved rule with the given id and title.
    pub fn new(rule_id: impl Into<RuleId>, title: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.into(),
            title: title.into(),
            section: String::new(),
            tags: BTreeSet::new(),
            prerequisites: Vec::new(),
            effects: Vec::new(),
            exceptions: Vec::new(),
            roll: None,
            content: String::new(),
            source_ref: String::new(),
            status: RuleStatus::Approved,
            revision: 0,
        }
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = section.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into().to_lowercase());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags
            .extend(tags.into_iter().map(|t| t.into().to_lowercase()));
        self
    }

    pub fn with_prerequisite(mut self, condition: impl Into<String>) -> Self {
        self.prerequisites.push(condition.into());
        self
    }

    pub fn with_effect(mut self, effect: impl Into<String>) -> Self {
        self.effects.push(effect.into());
        self
    }

    pub fn with_exception(mut self, exception: impl Into<String>) -> Self {
        self.exceptions.push(exception.into());
        self
    }

    pub fn with_roll(mut self, roll: RollRequirement) -> Self {
        self.roll = Some(roll);
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_source_ref(mut self, source_ref: impl Into<String>) -> Self {
        self.source_ref = source_ref.into();
        self
    }

    pub fn with_status(mut self, status: RuleStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_draft(&self) -> bool {
        self.status == RuleStatus::Draft
    }

    /// Whether the rule is a specific exception to a general rule.
    pub fn is_exception(&self) -> bool {
        self.tags.contains(EXCEPTION_TAG)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(&tag.to_lowercase())
    }

    /// Number of tags whose words all appear among the given terms.
    pub fn tag_overlap(&self, terms: &HashSet<String>) -> usize {
        self.tags
            .iter()
            .filter(|tag| {
                let words = tokenize(tag);
                !words.is_empty() && words.iter().all(|w| terms.contains(w))
            })
            .count()
    }

    /// Parsed effects. Unprefixed effects govern the rule's section.
    pub fn parsed_effects(&self) -> Vec<Effect> {
        self.effects
            .iter()
            .map(|raw| {
                let mut effect = Effect::parse(raw);
                if effect.subject.is_none() && !self.section.is_empty() {
                    effect.subject = Some(self.section.to_lowercase());
                }
                effect
            })
            .collect()
    }

    /// All text that should be searchable for this rule.
    pub fn searchable_text(&self) -> String {
        let mut parts = vec![self.title.as_str(), self.section.as_str()];
        parts.extend(self.effects.iter().map(String::as_str));
        parts.extend(self.exceptions.iter().map(String::as_str));
        parts.push(self.content.as_str());

        let mut text = parts
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        for tag in &self.tags {
            text.push(' ');
            text.push_str(tag);
        }
        text
    }
}
