//! The context bundle handed to narrative generation.

use chrono::{DateTime, Utc};

use super::QueryIntent;
use crate::knowledge_base::FactAssertion;
use crate::memory::ScoredRecord;
use crate::retrieval::Degradation;

/// Everything one memory query retrieved.
///
/// Both `fused_hits` and `facts` are always present (possibly empty), whichever
/// branch produced the bundle.
#[derive(Debug, Clone)]
pub struct RetrievedContext {
    pub intent: QueryIntent,
    pub dense_hits: Vec<ScoredRecord>,
    pub lexical_hits: Vec<ScoredRecord>,
    pub fused_hits: Vec<ScoredRecord>,
    pub facts: Vec<FactAssertion>,

    /// Point in time the facts describe. `None` means current state.
    pub as_of: Option<DateTime<Utc>>,

    /// Set when a source failed and the bundle holds only what the others returned.
    pub partial: bool,
    pub degraded: Vec<Degradation>,
}

impl RetrievedContext {
    pub fn empty(intent: QueryIntent) -> Self {
        Self {
            intent,
            dense_hits: Vec::new(),
            lexical_hits: Vec::new(),
            fused_hits: Vec::new(),
            facts: Vec::new(),
            as_of: None,
            partial: false,
            degraded: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fused_hits.is_empty() && self.facts.is_empty()
    }

    /// Format the context as a prompt string.
    pub fn to_prompt_string(&self) -> String {
        let mut prompt = String::new();

        prompt.push_str("## Query Intent\n");
        prompt.push_str(self.intent.label());
        if let Some(at) = self.as_of {
            prompt.push_str(&format!(" (as of {})", at.format("%Y-%m-%d %H:%M")));
        }
        prompt.push_str("\n\n");

        if !self.facts.is_empty() {
            prompt.push_str("## Known Facts\n");
            for fact in &self.facts {
                let interval = match fact.valid_until {
                    Some(until) => format!(
                        "{} to {}",
                        fact.valid_from.format("%Y-%m-%d"),
                        until.format("%Y-%m-%d")
                    ),
                    None => format!("since {}", fact.valid_from.format("%Y-%m-%d")),
                };
                prompt.push_str(&format!("- {} ({})\n", fact.describe(), interval));
            }
            prompt.push('\n');
        }

        if !self.fused_hits.is_empty() {
            prompt.push_str("## Relevant History\n");
            for hit in &self.fused_hits {
                let record = &hit.record;
                let speaker = if record.speaker.is_empty() {
                    String::new()
                } else {
                    format!("{}: ", record.speaker)
                };
                prompt.push_str(&format!(
                    "- [{} {}] {}{}\n",
                    record.session_id,
                    record.timestamp.format("%Y-%m-%d %H:%M"),
                    speaker,
                    record.headline()
                ));
            }
            prompt.push('\n');
        }

        if self.partial {
            prompt.push_str("## Notes\n");
            prompt.push_str("Some memory sources were unavailable; context may be incomplete.\n\n");
        }

        prompt
    }
}
