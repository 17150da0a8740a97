//! Prerequisite conditions evaluated against a situation description.
//!
//! A condition set is a conjunction of key lookups against a string map.
//! Supported forms:
//!
//! - `key` / `!key`: truthy or falsy flag
//! - `key=value` / `key!=value`: case-insensitive equality
//! - `key<n`, `key<=n`, `key>n`, `key>=n`: numeric comparison

use std::collections::HashMap;

/// Three-valued result of checking a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    Satisfied,
    Violated,
    /// The situation does not mention the key, or the value is not comparable.
    Unknown,
}

/// Operator of a comparison condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A parsed prerequisite condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Prerequisite {
    Flag { key: String, expected: bool },
    Compare {
        key: String,
        op: Comparison,
        value: String,
    },
}

impl Prerequisite {
    /// Parse a condition string. Returns `None` for empty input.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        // Two-character operators must be tried before their one-character prefixes.
        const OPERATORS: &[(&str, Comparison)] = &[
            ("!=", Comparison::Ne),
            ("<=", Comparison::Le),
            (">=", Comparison::Ge),
            ("=", Comparison::Eq),
            ("<", Comparison::Lt),
            (">", Comparison::Gt),
        ];

        for (symbol, op) in OPERATORS {
            if let Some((key, value)) = raw.split_once(symbol) {
                return Some(Prerequisite::Compare {
                    key: normalize_key(key),
                    op: *op,
                    value: value.trim().to_lowercase(),
                });
            }
        }

        match raw.strip_prefix('!') {
            Some(key) => Some(Prerequisite::Flag {
                key: normalize_key(key),
                expected: false,
            }),
            None => Some(Prerequisite::Flag {
                key: normalize_key(raw),
                expected: true,
            }),
        }
    }

    /// The situation key this condition reads.
    pub fn key(&self) -> &str {
        match self {
            Prerequisite::Flag { key, .. } | Prerequisite::Compare { key, .. } => key,
        }
    }

    /// Evaluate against a situation map whose keys are matched case-insensitively.
    pub fn evaluate(&self, situation: &HashMap<String, String>) -> Evaluation {
        let Some(actual) = lookup(situation, self.key()) else {
            return Evaluation::Unknown;
        };

        match self {
            Prerequisite::Flag { expected, .. } => match parse_bool(&actual) {
                Some(value) if value == *expected => Evaluation::Satisfied,
                Some(_) => Evaluation::Violated,
                None => Evaluation::Unknown,
            },
            Prerequisite::Compare { op, value, .. } => compare(&actual, *op, value),
        }
    }
}

/// Evaluate a conjunction of raw condition strings.
///
/// Any violated condition makes the whole set violated; otherwise any unknown
/// condition makes it unknown. Returns the keys that could not be decided.
pub fn evaluate_all(
    conditions: &[String],
    situation: &HashMap<String, String>,
) -> (Evaluation, Vec<String>) {
    let mut unknown = Vec::new();

    for raw in conditions {
        let Some(prerequisite) = Prerequisite::parse(raw) else {
            continue;
        };
        match prerequisite.evaluate(situation) {
            Evaluation::Violated => return (Evaluation::Violated, Vec::new()),
            Evaluation::Unknown => unknown.push(raw.trim().to_string()),
            Evaluation::Satisfied => {}
        }
    }

    if unknown.is_empty() {
        (Evaluation::Satisfied, unknown)
    } else {
        (Evaluation::Unknown, unknown)
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase().replace([' ', '-'], "_")
}

fn lookup(situation: &HashMap<String, String>, key: &str) -> Option<String> {
    situation
        .iter()
        .find(|(k, _)| normalize_key(k) == key)
        .map(|(_, v)| v.trim().to_lowercase())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" | "yes" | "1" | "y" => Some(true),
        "false" | "no" | "0" | "n" => Some(false),
        _ => None,
    }
}

fn compare(actual: &str, op: Comparison, expected: &str) -> Evaluation {
    let verdict = |ok: bool| {
        if ok {
            Evaluation::Satisfied
        } else {
            Evaluation::Violated
        }
    };

    match op {
        Comparison::Eq => verdict(actual == expected),
        Comparison::Ne => verdict(actual != expected),
        Comparison::Lt | Comparison::Le | Comparison::Gt | Comparison::Ge => {
            let (Ok(a), Ok(b)) = (actual.parse::<f64>(), expected.parse::<f64>()) else {
                return Evaluation::Unknown;
            };
            verdict(match op {
                Comparison::Lt => a < b,
                Comparison::Le => a <= b,
                Comparison::Gt => a > b,
                _ => a >= b,
            })
        }
    }
}
