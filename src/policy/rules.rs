//! Substring rule engine used as the default dialogue policy
//!
//! All user turns are lowercased and concatenated, then checked against an
//! ordered trigger table. The first rule with a matching trigger wins; if
//! none match, the fallback asks the user to clarify.

use super::{DialoguePolicy, PolicyResponse};
use crate::conversation::ConversationHistory;
use crate::{ParleyError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::debug;

const DEFAULT_FALLBACK: &str =
    "Sorry, I didn't catch that. Could you tell me more about what you're looking for?";

/// Built-in table: (triggers, response, end_session)
const DEFAULT_RULES: &[(&[&str], &str, bool)] = &[
    (
        &["thank you", "thanks", "bye"],
        "You're welcome! Happy flying, and come back any time.",
        true,
    ),
    (
        &["$500", "500", "budget", "cheap"],
        "For under $500, take a look at the DJI Mini series, Holy Stone and Potensic. \
         They fly well and shoot decent video for the price.",
        false,
    ),
    (
        &["racing", "fpv"],
        "For racing you'll want an FPV drone. BetaFPV and iFlight make good starter kits \
         with goggles included.",
        false,
    ),
    (
        &["camera", "photo", "video"],
        "For aerial photography the DJI Air and Mavic lines have the best cameras. \
         What's your budget?",
        false,
    ),
    (
        &["drone"],
        "Great, let's find you a drone! What will you use it for, and how much do you \
         want to spend?",
        false,
    ),
    (
        &["hello", "hey"],
        "Hello! I can help you pick a drone. What are you looking for?",
        false,
    ),
];

/// A single trigger → response rule
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Rule {
    /// Substrings that activate the rule (matched case-insensitively)
    pub triggers: Vec<String>,
    /// Response content
    pub response: String,
    /// Whether the conversation closes after this response is spoken
    #[serde(default)]
    pub end_session: bool,
}

impl Rule {
    /// Rule answering `response` when any trigger appears
    pub fn new(triggers: &[&str], response: impl Into<String>) -> Self {
        Self {
            triggers: triggers.iter().map(|t| t.to_lowercase()).collect(),
            response: response.into(),
            end_session: false,
        }
    }

    pub fn ending_session(mut self) -> Self {
        self.end_session = true;
        self
    }

    /// Check if any trigger occurs in the (already lowercased) text
    pub fn matches(&self, text: &str) -> bool {
        self.triggers
            .iter()
            .any(|trigger| text.contains(trigger.as_str()))
    }
}

/// Rule table as stored in a TOML file
#[derive(Debug, Clone, Deserialize)]
pub struct RuleSet {
    /// Clarification used when nothing matches
    #[serde(default = "default_fallback")]
    pub fallback: String,
    /// Ordered rules; first match wins
    #[serde(default)]
    pub rules: Vec<Rule>,
}

fn default_fallback() -> String {
    DEFAULT_FALLBACK.to_string()
}

impl RuleSet {
    /// Parse a rule set from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let set: RuleSet = toml::from_str(content)
            .map_err(|e| ParleyError::ConfigError(format!("Invalid rule file: {}", e)))?;
        set.validate()?;
        Ok(set)
    }

    /// Load a rule set from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ParleyError::IOError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Reject rules that could never fire or would say nothing
    pub fn validate(&self) -> Result<()> {
        if self.fallback.trim().is_empty() {
            return Err(ParleyError::ConfigError("fallback response is empty".into()));
        }
        for (index, rule) in self.rules.iter().enumerate() {
            if rule.triggers.is_empty() || rule.triggers.iter().any(|t| t.trim().is_empty()) {
                return Err(ParleyError::ConfigError(format!(
                    "rule {} has an empty trigger",
                    index
                )));
            }
            if rule.response.trim().is_empty() {
                return Err(ParleyError::ConfigError(format!(
                    "rule {} has an empty response",
                    index
                )));
            }
        }
        Ok(())
    }
}

/// Ordered substring matcher implementing [`DialoguePolicy`]
#[derive(Debug, Clone)]
pub struct RuleEngine {
    rules: Vec<Rule>,
    fallback: String,
}

impl Default for RuleEngine {
    fn default() -> Self {
        let rules = DEFAULT_RULES
            .iter()
            .map(|(triggers, response, end_session)| {
                let rule = Rule::new(triggers, *response);
                if *end_session {
                    rule.ending_session()
                } else {
                    rule
                }
            })
            .collect();

        Self {
            rules,
            fallback: DEFAULT_FALLBACK.to_string(),
        }
    }
}

impl RuleEngine {
    pub fn new(rules: Vec<Rule>, fallback: impl Into<String>) -> Self {
        Self {
            rules: rules.into_iter().map(normalize).collect(),
            fallback: fallback.into(),
        }
    }

    pub fn from_rule_set(set: RuleSet) -> Self {
        Self::new(set.rules, set.fallback)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Find the first rule matching the given text
    pub fn find_match(&self, text: &str) -> Option<&Rule> {
        let text = text.to_lowercase();
        self.rules.iter().find(|rule| rule.matches(&text))
    }
}

fn normalize(mut rule: Rule) -> Rule {
    rule.triggers = rule.triggers.iter().map(|t| t.to_lowercase()).collect();
    rule
}

impl DialoguePolicy for RuleEngine {
    fn respond(&self, history: &ConversationHistory) -> PolicyResponse {
        let text = history.user_text();
        match self.find_match(&text) {
            Some(rule) => {
                debug!("Rule matched: {:?}", rule.triggers);
                PolicyResponse {
                    content: rule.response.clone(),
                    end_session: rule.end_session,
                }
            }
            None => {
                debug!("No rule matched, asking for clarification");
                PolicyResponse::reply(self.fallback.clone())
            }
        }
    }
}
