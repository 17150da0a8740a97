//! Ruling definitions - the structured output of adjudication.

use game_rules::{RollOutcome, RollRequirement, RuleId};
use serde::{Deserialize, Serialize};

/// Terminal outcome of an adjudication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Allowed,
    Denied,
    RollCheck,
    /// No rule applies, or applicable rules conflict with no precedence.
    Ambiguous,
}

impl Decision {
    pub fn label(&self) -> &'static str {
        match self {
            Decision::Allowed => "ALLOWED",
            Decision::Denied => "DENIED",
            Decision::RollCheck => "ROLL_CHECK",
            Decision::Ambiguous => "AMBIGUOUS",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A citable answer to a rule question. Never mutated after it is produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ruling {
    pub decision: Decision,
    pub required_rolls: Vec<RollRequirement>,
    pub explanation: String,
    pub applied_rules: Vec<RuleId>,
    /// Between 0.0 and 1.0.
    pub confidence: f32,
}

impl Ruling {
    /// The ruling for a question no rule covers.
    pub fn no_match() -> Self {
        Self {
            decision: Decision::Ambiguous,
            required_rolls: Vec::new(),
            explanation: "No matching rule was found for this question.".to_string(),
            applied_rules: Vec::new(),
            confidence: 0.0,
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        self.decision == Decision::Ambiguous
    }

    /// Settle rolled totals against the required rolls, pairwise in order.
    pub fn settle(&self, totals: &[i32]) -> Vec<RollOutcome> {
        self.required_rolls
            .iter()
            .zip(totals)
            .map(|(roll, total)| roll.resolve(*total))
            .collect()
    }
}
