//! Game mechanics: roll types, effect classification, and roll resolution.

mod prerequisite;

pub use prerequisite::*;

use serde::{Deserialize, Serialize};

use crate::text::{contains_phrase, mentions, tokenize};

/// Kinds of dice resolution a rule can demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollType {
    AttackRoll,
    SavingThrow,
    SkillCheck,
    AbilityCheck,
    DamageRoll,
}

impl RollType {
    /// Human-readable name used in explanations.
    pub fn label(&self) -> &'static str {
        match self {
            RollType::AttackRoll => "attack roll",
            RollType::SavingThrow => "saving throw",
            RollType::SkillCheck => "skill check",
            RollType::AbilityCheck => "ability check",
            RollType::DamageRoll => "damage roll",
        }
    }

    /// Detect a roll type mentioned in free text. Negated mentions such as
    /// "no check required" do not count.
    pub fn detect(text: &str) -> Option<Self> {
        let tokens = tokenize(text);
        ROLL_CUES
            .iter()
            .find(|(_, cues)| cues.iter().any(|cue| mentions(&tokens, cue)))
            .map(|(roll_type, _)| *roll_type)
    }
}

/// Checked in order; the bare "check" only after the specific kinds.
const ROLL_CUES: &[(RollType, &[&str])] = &[
    (RollType::AttackRoll, &["attack roll", "attack rolls", "roll to hit"]),
    (RollType::SavingThrow, &["saving throw", "saving throws", "save", "saves"]),
    (RollType::SkillCheck, &["skill check", "skill checks"]),
    (RollType::AbilityCheck, &["ability check", "ability checks", "check", "checks"]),
    (RollType::DamageRoll, &["damage roll", "damage rolls"]),
];

impl std::fmt::Display for RollType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A roll a player must make, with an optional target number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollRequirement {
    pub roll_type: RollType,
    /// Difficulty class or target armor class. `None` when the target is
    /// situational (e.g. "vs AC" of an unknown creature).
    #[serde(default)]
    pub difficulty: Option<u32>,
}

impl RollRequirement {
    pub fn new(roll_type: RollType) -> Self {
        Self {
            roll_type,
            difficulty: None,
        }
    }

    pub fn with_difficulty(mut self, difficulty: u32) -> Self {
        self.difficulty = Some(difficulty);
        self
    }

    /// Parse a roll requirement out of an effect string such as
    /// "DC 15 Dexterity saving throw" or "requires an attack roll vs AC".
    pub fn parse(text: &str) -> Option<Self> {
        let roll_type = RollType::detect(text)?;
        let mut requirement = Self::new(roll_type);
        if let Some(dc) = parse_difficulty(text) {
            requirement.difficulty = Some(dc);
        }
        Some(requirement)
    }

    /// Settle a rolled total against this requirement.
    ///
    /// Meeting the difficulty is a success. Without a known difficulty the
    /// outcome cannot be settled here.
    pub fn resolve(&self, total: i32) -> RollOutcome {
        match self.difficulty {
            Some(dc) if total >= dc as i32 => RollOutcome::Success,
            Some(_) => RollOutcome::Failure,
            None => RollOutcome::Unresolved,
        }
    }
}

/// Result of settling a die roll against a requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollOutcome {
    Success,
    Failure,
    Unresolved,
}

fn parse_difficulty(text: &str) -> Option<u32> {
    let words: Vec<String> = text
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_ascii_alphanumeric())
                .to_lowercase()
        })
        .collect();

    words.windows(2).find_map(|pair| match pair[0].as_str() {
        "dc" | "difficulty" | "ac" => pair[1].parse().ok(),
        _ => None,
    })
}

/// What a rule effect means for adjudication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum EffectKind {
    /// The action succeeds or is permitted outright.
    Allow,
    /// The action is forbidden or fails outright.
    Deny,
    /// The outcome is settled by dice.
    Roll(RollRequirement),
    /// Descriptive effect with no permission or dice semantics.
    Informational,
}

impl EffectKind {
    /// Whether two effects on the same subject disagree.
    pub fn contradicts(&self, other: &EffectKind) -> bool {
        match (self, other) {
            (EffectKind::Informational, _) | (_, EffectKind::Informational) => false,
            (EffectKind::Roll(_), EffectKind::Roll(_)) => false,
            (a, b) => std::mem::discriminant(a) != std::mem::discriminant(b),
        }
    }
}

/// Matched even after a negation: "not permitted" is itself a denial.
const DENY_CUES: &[&str] = &[
    "cannot",
    "can't",
    "can not",
    "not allowed",
    "not permitted",
    "disallowed",
    "may not",
    "must not",
    "unable to",
    "forbidden",
    "denied",
    "impossible",
    "automatically fails",
    "auto-fail",
    "prohibited",
];

/// Outright success wording; wins over any dice mentioned alongside it.
const AUTO_SUCCESS_CUES: &[&str] = &[
    "auto-hit",
    "automatically hits",
    "hits automatically",
    "automatically succeeds",
    "auto-success",
    "allowed",
    "permitted",
];

/// Soft permission wording; only counts when no roll is mentioned.
const PERMISSION_CUES: &[&str] = &["may", "can", "succeeds"];

/// A single effect of a rule, split into the thing it governs and its meaning.
///
/// Effect strings may be written as `subject: outcome` (e.g.
/// `"attack: auto-hit"`); without a prefix the subject is `None` and callers
/// fall back to the rule's section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Effect {
    pub subject: Option<String>,
    pub text: String,
    pub kind: EffectKind,
}

impl Effect {
    pub fn parse(raw: &str) -> Self {
        let (subject, text) = match raw.split_once(':') {
            Some((subject, rest)) if !subject.trim().is_empty() && !subject.contains(' ') => {
                (Some(subject.trim().to_lowercase()), rest.trim())
            }
            _ => (None, raw.trim()),
        };

        Self {
            subject,
            text: text.to_string(),
            kind: classify_effect(text),
        }
    }
}

/// Classify free-text effect wording.
///
/// Deny cues are checked first so "cannot make an attack roll" is a denial,
/// not a roll. Cues match whole words only.
pub fn classify_effect(text: &str) -> EffectKind {
    let tokens = tokenize(text);

    if DENY_CUES.iter().any(|cue| contains_phrase(&tokens, cue)) {
        return EffectKind::Deny;
    }
    if AUTO_SUCCESS_CUES.iter().any(|cue| mentions(&tokens, cue)) {
        return EffectKind::Allow;
    }
    if let Some(requirement) = RollRequirement::parse(text) {
        return EffectKind::Roll(requirement);
    }
    if PERMISSION_CUES.iter().any(|cue| mentions(&tokens, cue)) {
        return EffectKind::Allow;
    }
    EffectKind::Informational
}
