//! Command risk classification.
//!
//! The gate is pure and deterministic: the same command and rule set always
//! produce the same verdict. Rules are data (ordered pattern -> risk), so
//! deployments can extend them through settings without touching this
//! logic. A `Blocked` verdict means the command must never reach the
//! transport.

mod rules;
pub mod segments;

pub use rules::{Rule, BUILTIN_RULES, READ_ONLY_COMMANDS, SAFE_PREFIXES};
pub use segments::split_segments;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How dangerous a command is. Ordered: `Blocked` is worse than `Confirm`,
/// which is worse than `Safe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RiskLevel {
    Safe,
    Confirm,
    Blocked,
}

/// Classification result for one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub risk: RiskLevel,
    pub rationale: String,
}

/// A user-supplied rule, loaded from settings and compiled at gate
/// construction. Overrides are evaluated before the built-in table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleOverride {
    pub pattern: String,
    pub risk: RiskLevel,
    pub rationale: String,
}

#[derive(Error, Debug)]
pub enum SafetyError {
    #[error("Invalid rule pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },
}

/// Deterministic risk classifier over an ordered rule set.
pub struct SafetyGate {
    rules: Vec<Rule>,
}

impl SafetyGate {
    /// Gate with the built-in rule table only.
    pub fn new() -> Self {
        Self {
            rules: BUILTIN_RULES.clone(),
        }
    }

    /// Gate with user overrides prepended to the built-in table.
    pub fn with_overrides(overrides: &[RuleOverride]) -> Result<Self, SafetyError> {
        let mut rules = Vec::with_capacity(overrides.len() + BUILTIN_RULES.len());
        for o in overrides {
            let pattern = Regex::new(&o.pattern).map_err(|source| SafetyError::InvalidPattern {
                pattern: o.pattern.clone(),
                source,
            })?;
            rules.push(Rule::new(pattern, o.risk, o.rationale.clone()));
        }
        rules.extend(BUILTIN_RULES.iter().cloned());
        Ok(Self { rules })
    }

    /// Classify a raw command string.
    ///
    /// Rules are matched against the whole command first (to catch patterns
    /// spanning pipes, like fork bombs), then against each chained segment;
    /// the worst verdict wins. Segments with no rule match fall back to the
    /// read-only allowlist: allowlisted commands are `Safe`, everything
    /// else requires confirmation. `Blocked` only ever comes from a rule.
    pub fn classify(&self, raw_command: &str) -> Verdict {
        let segments = split_segments(raw_command);
        if segments.is_empty() {
            return Verdict {
                risk: RiskLevel::Confirm,
                rationale: "empty command".to_string(),
            };
        }

        let mut worst = match self.match_rule(raw_command) {
            Some(v) => v,
            None => Verdict {
                risk: RiskLevel::Safe,
                rationale: "read-only command".to_string(),
            },
        };

        for segment in segments {
            let verdict = self.classify_segment(segment);
            if verdict.risk > worst.risk {
                worst = verdict;
            }
        }
        worst
    }

    fn classify_segment(&self, segment: &str) -> Verdict {
        if let Some(verdict) = self.match_rule(segment) {
            return verdict;
        }

        if is_read_only(segment) {
            Verdict {
                risk: RiskLevel::Safe,
                rationale: "read-only command".to_string(),
            }
        } else {
            let word = segment.split_whitespace().next().unwrap_or(segment);
            Verdict {
                risk: RiskLevel::Confirm,
                rationale: format!("'{word}' is not in the read-only allowlist"),
            }
        }
    }

    fn match_rule(&self, text: &str) -> Option<Verdict> {
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(text))
            .map(|rule| Verdict {
                risk: rule.risk,
                rationale: rule.rationale.clone(),
            })
    }
}

impl Default for SafetyGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Check a single segment against the read-only allowlists.
///
/// Single-word commands match on their first word; tools with subcommands
/// (git, docker, ...) match on the first two non-flag words.
fn is_read_only(segment: &str) -> bool {
    let words: Vec<&str> = segment.split_whitespace().collect();
    let Some(first) = words.first() else {
        return false;
    };

    if READ_ONLY_COMMANDS.contains(first) {
        return true;
    }

    // First non-flag word after the command is the subcommand.
    if let Some(sub) = words.iter().skip(1).find(|w| !w.starts_with('-')) {
        return SAFE_PREFIXES.contains(format!("{first} {sub}").as_str());
    }
    false
}
