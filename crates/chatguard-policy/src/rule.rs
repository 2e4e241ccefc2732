//! Moderation rule document definitions

use chatguard_core::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Escalation text used when a red flag has no mapped message
pub const FALLBACK_GENERIC_ESCALATION: &str =
    "That sounds serious. If you are in immediate danger, call local emergency services.";

/// Refusal text used when no moderation document could be loaded
pub const FALLBACK_REFUSAL: &str = "I can't provide explicit sexual instructions or sexual content involving minors. I can help with medical information, communication scripts, or referrals. Which of those would you like?";

/// The moderation rule document, as stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationDocument {
    /// Patterns that refuse a message outright before any upstream call
    #[serde(default)]
    pub pre_block_regexes: Vec<String>,

    /// Safety-sensitive topics, checked in order (first match wins)
    #[serde(default)]
    pub red_flag_regexes: Vec<RedFlagRule>,

    /// Escalation message per red-flag id
    #[serde(default)]
    pub escalation_texts: HashMap<String, String>,

    /// Escalation message for red flags without a mapped text
    #[serde(default = "default_generic_escalation")]
    pub generic_escalation: String,

    /// Reply returned for pre-blocked messages
    #[serde(default = "default_refusal")]
    pub refusal_text: String,
}

impl ModerationDocument {
    /// The document substituted when the rule file cannot be loaded.
    ///
    /// Both pattern lists are empty, so only the fixed texts remain.
    pub fn fallback() -> Self {
        Self {
            pre_block_regexes: Vec::new(),
            red_flag_regexes: Vec::new(),
            escalation_texts: HashMap::new(),
            generic_escalation: default_generic_escalation(),
            refusal_text: default_refusal(),
        }
    }

    /// Parse a document from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse a document from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a document from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        read_document(path.as_ref())
    }
}

impl Default for ModerationDocument {
    fn default() -> Self {
        Self::fallback()
    }
}

/// A single red-flag rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedFlagRule {
    /// Rule identifier, also the key into `escalation_texts`
    pub id: String,

    /// Regular expression, matched case-insensitively
    pub pattern: String,

    #[serde(default)]
    pub severity: Severity,
}

/// Severity tag attached to a red-flag rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
    /// Missing or unrecognised tag
    #[default]
    #[serde(other)]
    Unspecified,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
            Self::Unspecified => "unspecified",
        }
    }
}

/// Read a JSON or YAML document, chosen by file extension
pub(crate) fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;

    let is_yaml = path
        .extension()
        .map_or(false, |ext| ext == "yaml" || ext == "yml");

    if is_yaml {
        Ok(serde_yaml::from_str(&content)?)
    } else {
        Ok(serde_json::from_str(&content)?)
    }
}

fn default_generic_escalation() -> String {
    FALLBACK_GENERIC_ESCALATION.to_string()
}

fn default_refusal() -> String {
    FALLBACK_REFUSAL.to_string()
}
