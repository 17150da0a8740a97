//! Rule-based query intent classification.
//!
//! Deterministic keyword and pattern heuristics, no model call:
//! - past-tense cue plus a session, location, or date reference => temporal
//! - a known subject plus a state-query verb => factual
//! - anything else => episodic

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::knowledge_base::{Subject, SubjectKind};
use game_rules::text::{contains_phrase, tokenize};

/// What kind of memory a query asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    /// Recent narrative in the current session.
    Episodic,
    /// Current state of a named subject.
    Factual,
    /// Historical state or events of another session or time.
    Temporal,
}

impl QueryIntent {
    pub fn label(&self) -> &'static str {
        match self {
            QueryIntent::Episodic => "episodic",
            QueryIntent::Factual => "factual",
            QueryIntent::Temporal => "temporal",
        }
    }
}

impl std::fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for QueryIntent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "episodic" => Ok(QueryIntent::Episodic),
            "factual" => Ok(QueryIntent::Factual),
            "temporal" => Ok(QueryIntent::Temporal),
            other => Err(format!("unknown intent: {}", other)),
        }
    }
}

/// Matched as whole-word phrases over the query tokens.
const PAST_CUES: &[&str] = &[
    "what happened",
    "happened",
    "did",
    "was",
    "were",
    "had",
    "used to",
    "back when",
    "earlier",
    "previously",
    "before",
    "ago",
    "last time",
    "remember when",
];

const STATE_CUES: &[&str] = &[
    "where is",
    "where's",
    "where are",
    "who has",
    "who owns",
    "who holds",
    "has",
    "have",
    "owns",
    "own",
    "holds",
    "holding",
    "carries",
    "carrying",
    "located",
    "is in",
];

const PREVIOUS_SESSION_CUES: &[&str] = &["last session", "previous session", "prior session"];

/// What the classifier found in a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub intent: QueryIntent,
    /// Known subjects named in the query, in order of first mention.
    pub subjects: Vec<Subject>,
    /// A session other than the current one that the query refers to.
    pub referenced_session: Option<String>,
    /// First ISO date (`YYYY-MM-DD`) in the query, as the end of that day.
    pub referenced_date: Option<DateTime<Utc>>,
}

/// Classifies queries against the known subjects and sessions.
#[derive(Debug, Clone, Default)]
pub struct IntentClassifier {
    subjects: Vec<(Vec<String>, Subject)>,
    /// Oldest first.
    sessions: Vec<String>,
}

impl IntentClassifier {
    pub fn new(subjects: Vec<Subject>) -> Self {
        let subjects = subjects
            .into_iter()
            .flat_map(|subject| {
                let mut aliases = vec![tokenize(&subject.name)];
                let id_tokens = tokenize(&subject.id);
                if id_tokens != aliases[0] {
                    aliases.push(id_tokens);
                }
                aliases
                    .into_iter()
                    .filter(|tokens| !tokens.is_empty())
                    .map(move |tokens| (tokens, subject.clone()))
            })
            .collect();
        Self {
            subjects,
            sessions: Vec::new(),
        }
    }

    /// Known session ids, oldest first.
    pub fn with_sessions(mut self, sessions: Vec<String>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn classify(&self, text: &str, current_session: &str) -> Classification {
        let tokens = tokenize(text);

        let subjects = self.mentioned_subjects(&tokens);
        let referenced_session = self.referenced_session(&tokens, current_session);
        let referenced_date = find_iso_date(text);

        let past = contains_any(&tokens, PAST_CUES);
        let names_location = subjects.iter().any(|s| s.kind == SubjectKind::Location);
        let state_query = contains_any(&tokens, STATE_CUES);

        let intent = if past
            && (referenced_session.is_some() || names_location || referenced_date.is_some())
        {
            QueryIntent::Temporal
        } else if !subjects.is_empty() && state_query {
            QueryIntent::Factual
        } else {
            QueryIntent::Episodic
        };

        Classification {
            intent,
            subjects,
            referenced_session,
            referenced_date,
        }
    }

    fn mentioned_subjects(&self, tokens: &[String]) -> Vec<Subject> {
        let mut found: Vec<(usize, Subject)> = Vec::new();
        for (alias, subject) in &self.subjects {
            if found.iter().any(|(_, s)| s.id == subject.id) {
                continue;
            }
            if let Some(pos) = find_phrase(tokens, alias) {
                found.push((pos, subject.clone()));
            }
        }
        found.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
        found.into_iter().map(|(_, s)| s).collect()
    }

    fn referenced_session(
        &self,
        tokens: &[String],
        current_session: &str,
    ) -> Option<String> {
        let named = self
            .sessions
            .iter()
            .filter(|s| s.as_str() != current_session)
            .find(|s| {
                let alias = tokenize(s);
                !alias.is_empty() && find_phrase(tokens, &alias).is_some()
            });
        if let Some(session) = named {
            return Some(session.clone());
        }

        if contains_any(tokens, PREVIOUS_SESSION_CUES) {
            return self
                .sessions
                .iter()
                .rev()
                .find(|s| s.as_str() != current_session)
                .cloned();
        }
        None
    }
}

fn contains_any(tokens: &[String], cues: &[&str]) -> bool {
    cues.iter().any(|cue| contains_phrase(tokens, cue))
}

fn find_phrase(tokens: &[String], phrase: &[String]) -> Option<usize> {
    if phrase.is_empty() || phrase.len() > tokens.len() {
        return None;
    }
    tokens.windows(phrase.len()).position(|w| w == phrase)
}

fn find_iso_date(text: &str) -> Option<DateTime<Utc>> {
    text.split(|c: char| !(c.is_ascii_digit() || c == '-'))
        .filter(|word| word.len() == 10)
        .find_map(|word| NaiveDate::parse_from_str(word, "%Y-%m-%d").ok())
        .and_then(|date| date.and_hms_opt(23, 59, 59))
        .map(|naive| naive.and_utc())
}
