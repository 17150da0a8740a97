//! Rule corpus sources - where the initial catalog comes from.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::RuleEntry;
use crate::error::RulesResult;

/// Supplies the initial rule entries at startup.
pub trait RuleCorpusSource: Send + Sync {
    fn load(&self) -> RulesResult<Vec<RuleEntry>>;
}

/// A fixed, in-memory list of rules.
#[derive(Debug, Clone, Default)]
pub struct StaticRuleCorpus {
    entries: Vec<RuleEntry>,
}

impl StaticRuleCorpus {
    pub fn new(entries: Vec<RuleEntry>) -> Self {
        Self { entries }
    }
}

impl RuleCorpusSource for StaticRuleCorpus {
    fn load(&self) -> RulesResult<Vec<RuleEntry>> {
        Ok(self.entries.clone())
    }
}

#[derive(Debug, Deserialize)]
struct CorpusFile {
    #[serde(default, rename = "rule")]
    rules: Vec<RuleEntry>,
}

/// Rules stored as a TOML document of `[[rule]]` tables.
///
/// ```toml
/// [[rule]]
/// rule_id = "melee-attack"
/// title = "Melee attacks"
/// section = "Combat"
/// tags = ["attack", "melee"]
/// effects = ["attack: make an attack roll vs AC"]
///
/// [rule.roll]
/// roll_type = "attack_roll"
/// ```
#[derive(Debug, Clone)]
pub enum TomlRuleCorpus {
    Inline(String),
    File(PathBuf),
}

impl TomlRuleCorpus {
    pub fn inline(text: impl Into<String>) -> Self {
        TomlRuleCorpus::Inline(text.into())
    }

    pub fn from_path(path: impl AsRef<Path>) -> Self {
        TomlRuleCorpus::File(path.as_ref().to_path_buf())
    }

    /// Parse a TOML corpus document.
    pub fn parse(text: &str) -> RulesResult<Vec<RuleEntry>> {
        let file: CorpusFile = toml::from_str(text)?;
        Ok(file.rules)
    }
}

impl RuleCorpusSource for TomlRuleCorpus {
    fn load(&self) -> RulesResult<Vec<RuleEntry>> {
        match self {
            TomlRuleCorpus::Inline(text) => Self::parse(text),
            TomlRuleCorpus::File(path) => {
                let text = std::fs::read_to_string(path)?;
                Self::parse(&text)
            }
        }
    }
}
