//! Conflict policy between candidate rules.
//!
//! When candidates disagree about the same subject, precedence is applied in
//! a fixed order, each step only narrowing the contenders:
//! 1. **Specific exception**: rules tagged `exception` whose prerequisites all hold
//! 2. **Tag overlap**: rules sharing more tags with the question
//! 3. **Recency**: rules published at a later revision
//!
//! Whatever still disagrees after the last step is a conflict.

use game_rules::{Effect, EffectKind, Evaluation, RuleEntry};
use std::sync::Arc;

/// A rule that survived retrieval and prerequisite filtering.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub entry: Arc<RuleEntry>,
    /// Tags whose words all appear in the question.
    pub tag_overlap: usize,
    /// Fused retrieval score in `[0, 1]`; 0 for exact matches retrieval missed.
    pub retrieval_score: f32,
    /// Found by exact tag or keyword match.
    pub exact_match: bool,
    /// `Satisfied` or `Unknown`; violated rules never become candidates.
    pub prerequisites: Evaluation,
    /// Conditions the situation could not decide.
    pub unevaluated: Vec<String>,
}

impl Candidate {
    pub fn is_specific_exception(&self) -> bool {
        self.entry.is_exception() && self.prerequisites == Evaluation::Satisfied
    }

    /// How strongly retrieval supports this rule, in `[0, 1]`.
    pub fn relevance(&self) -> f32 {
        let exact = if self.exact_match { 0.5 } else { 0.0 };
        self.retrieval_score.clamp(0.0, 1.0).max(exact)
    }

    /// Effects with permission or dice meaning, in declaration order.
    pub fn decisive_effects(&self) -> Vec<Effect> {
        self.entry
            .parsed_effects()
            .into_iter()
            .filter(|e| e.kind != EffectKind::Informational)
            .collect()
    }

    /// This rule's decisive effect on `subject`. Effects without a subject
    /// apply to any subject.
    pub fn verdict_on(&self, subject: &str) -> Option<Effect> {
        self.decisive_effects().into_iter().find(|e| {
            e.subject
                .as_deref()
                .map_or(true, |s| s.is_empty() || s == subject)
        })
    }
}

/// Order candidates by tag overlap, then relevance, then rule id.
pub fn rank_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.tag_overlap
            .cmp(&a.tag_overlap)
            .then_with(|| {
                b.relevance()
                    .partial_cmp(&a.relevance())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.entry.rule_id.cmp(&b.entry.rule_id))
    });
}

/// Which precedence step settled a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precedence {
    SpecificException,
    TagOverlap,
    Recency,
}

impl Precedence {
    pub fn describe(&self) -> &'static str {
        match self {
            Precedence::SpecificException => "a specific exception overrides the general rule",
            Precedence::TagOverlap => "it matches more of the question's tags",
            Precedence::Recency => "it is the more recently published rule",
        }
    }
}

/// Outcome of the conflict policy. Indices refer to the ranked candidate list.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Decided {
        subject: String,
        winner: usize,
        effect: Effect,
        /// Agreeing rules on the same subject, in rank order.
        corroborating: Vec<usize>,
        /// Disagreeing rules that lost on precedence.
        overruled: Vec<usize>,
        precedence: Option<Precedence>,
    },
    Conflict {
        subject: String,
        tied: Vec<usize>,
    },
    /// No candidate has a permission or dice effect.
    Undecided,
}

/// Apply the conflict policy to ranked candidates.
///
/// The subject in question is the first decisive effect's subject among the
/// ranked candidates; rules silent on that subject take no part.
pub fn resolve(candidates: &[Candidate]) -> Resolution {
    let Some(subject) = candidates.iter().find_map(|c| {
        c.decisive_effects()
            .into_iter()
            .next()
            .map(|e| e.subject.unwrap_or_default())
    }) else {
        return Resolution::Undecided;
    };

    let contenders: Vec<(usize, Effect)> = candidates
        .iter()
        .enumerate()
        .filter_map(|(i, c)| c.verdict_on(&subject).map(|e| (i, e)))
        .collect();

    let mut remaining = contenders.clone();
    let mut precedence = None;
    for step in [
        Precedence::SpecificException,
        Precedence::TagOverlap,
        Precedence::Recency,
    ] {
        if !has_conflict(&remaining) {
            break;
        }
        let narrowed = narrow(step, candidates, &remaining);
        if narrowed.len() < remaining.len() {
            remaining = narrowed;
            precedence = Some(step);
        }
    }

    if has_conflict(&remaining) {
        return Resolution::Conflict {
            subject,
            tied: remaining.into_iter().map(|(i, _)| i).collect(),
        };
    }

    let (winner, effect) = remaining[0].clone();
    let corroborating = remaining[1..].iter().map(|(i, _)| *i).collect();
    let overruled = contenders
        .iter()
        .map(|(i, _)| *i)
        .filter(|i| !remaining.iter().any(|(r, _)| r == i))
        .collect();

    Resolution::Decided {
        subject,
        winner,
        effect,
        corroborating,
        overruled,
        precedence,
    }
}

fn has_conflict(contenders: &[(usize, Effect)]) -> bool {
    contenders.iter().enumerate().any(|(n, (_, a))| {
        contenders[n + 1..]
            .iter()
            .any(|(_, b)| a.kind.contradicts(&b.kind))
    })
}

fn narrow(
    step: Precedence,
    candidates: &[Candidate],
    contenders: &[(usize, Effect)],
) -> Vec<(usize, Effect)> {
    let keep_max = |key: &dyn Fn(&Candidate) -> u64| {
        let best = contenders
            .iter()
            .map(|(i, _)| key(&candidates[*i]))
            .max()
            .unwrap_or(0);
        contenders
            .iter()
            .filter(|(i, _)| key(&candidates[*i]) == best)
            .cloned()
            .collect::<Vec<_>>()
    };

    match step {
        Precedence::SpecificException => keep_max(&|c| u64::from(c.is_specific_exception())),
        Precedence::TagOverlap => keep_max(&|c| c.tag_overlap as u64),
        Precedence::Recency => keep_max(&|c| c.entry.revision),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use game_rules::{RollType, RuleId};

    fn candidate(entry: RuleEntry, tag_overlap: usize) -> Candidate {
        Candidate {
            entry: Arc::new(entry),
            tag_overlap,
            retrieval_score: 0.5,
            exact_match: true,
            prerequisites: Evaluation::Satisfied,
            unevaluated: Vec::new(),
        }
    }

    fn general_attack() -> RuleEntry {
        RuleEntry::new("R1", "Melee attacks")
            .with_section("Combat")
            .with_tags(["attack", "melee"])
            .with_effect("attack: make an attack roll vs AC")
    }

    fn unconscious_autohit() -> RuleEntry {
        RuleEntry::new("R2", "Unconscious targets")
            .with_tags(["attack", "exception", "unconscious"])
            .with_prerequisite("target_condition=unconscious")
            .with_effect("attack: auto-hit")
    }

    fn winner_id(candidates: &[Candidate], resolution: &Resolution) -> Option<RuleId> {
        match resolution {
            Resolution::Decided { winner, .. } => Some(candidates[*winner].entry.rule_id.clone()),
            _ => None,
        }
    }

    #[test]
    fn test_specific_exception_wins() {
        let mut candidates = vec![candidate(general_attack(), 1), candidate(unconscious_autohit(), 1)];
        rank_candidates(&mut candidates);

        let resolution = resolve(&candidates);
        assert_eq!(winner_id(&candidates, &resolution), Some(RuleId::from("R2")));
        match resolution {
            Resolution::Decided { effect, overruled, precedence, .. } => {
                assert_eq!(effect.kind, EffectKind::Allow);
                assert_eq!(overruled.len(), 1);
                assert_eq!(precedence, Some(Precedence::SpecificException));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_exception_with_unknown_prerequisites_is_not_specific() {
        let mut exception = candidate(unconscious_autohit(), 1);
        exception.prerequisites = Evaluation::Unknown;
        let candidates = vec![candidate(general_attack(), 1), exception];

        assert!(matches!(resolve(&candidates), Resolution::Conflict { ref tied, .. } if tied.len() == 2));
    }

    #[test]
    fn test_tag_overlap_then_recency() {
        let deny = RuleEntry::new("R3", "Heavy armor stealth")
            .with_tags(["stealth", "armor"])
            .with_effect("stealth: cannot hide in heavy armor");
        let roll = RuleEntry::new("R4", "Hiding")
            .with_tags(["stealth"])
            .with_effect("stealth: make a Dexterity skill check");

        let candidates = vec![candidate(deny.clone(), 2), candidate(roll.clone(), 1)];
        assert_eq!(winner_id(&candidates, &resolve(&candidates)), Some(RuleId::from("R3")));

        let mut older = deny;
        older.revision = 1;
        let mut newer = roll;
        newer.revision = 2;
        let candidates = vec![candidate(older, 1), candidate(newer, 1)];
        let resolution = resolve(&candidates);
        assert_eq!(winner_id(&candidates, &resolution), Some(RuleId::from("R4")));
        assert!(matches!(
            resolution,
            Resolution::Decided { precedence: Some(Precedence::Recency), .. }
        ));
    }

    #[test]
    fn test_unbroken_tie_is_conflict() {
        let a = RuleEntry::new("A", "Allow").with_effect("door: may open");
        let b = RuleEntry::new("B", "Deny").with_effect("door: cannot open");
        let candidates = vec![candidate(a, 0), candidate(b, 0)];

        match resolve(&candidates) {
            Resolution::Conflict { subject, tied } => {
                assert_eq!(subject, "door");
                assert_eq!(tied, vec![0, 1]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_agreeing_rules_corroborate() {
        let a = RuleEntry::new("A", "Attack").with_effect("attack: make an attack roll");
        let b = RuleEntry::new("B", "Ranged").with_effect("attack: roll to hit against AC 12");
        let c = RuleEntry::new("C", "Other").with_effect("grapple: athletics check");
        let candidates = vec![candidate(a, 1), candidate(b, 1), candidate(c, 0)];

        match resolve(&candidates) {
            Resolution::Decided { winner, corroborating, overruled, effect, .. } => {
                assert_eq!(winner, 0);
                assert_eq!(corroborating, vec![1]);
                assert!(overruled.is_empty());
                assert!(matches!(effect.kind, EffectKind::Roll(ref r) if r.roll_type == RollType::AttackRoll));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_informational_only_is_undecided() {
        let lore = RuleEntry::new("L", "Lore").with_effect("the moon is full tonight");
        assert_eq!(resolve(&[candidate(lore, 0)]), Resolution::Undecided);
        assert_eq!(resolve(&[]), Resolution::Undecided);
    }
}
