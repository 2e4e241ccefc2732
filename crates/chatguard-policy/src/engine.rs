//! Regex moderation engine
//!
//! Patterns are compiled once, when the engine is built. Matching is
//! case-insensitive and runs against the lower-cased input.
//!
//! A pattern that does not compile never matches. It is reported in the
//! [`CompileReport`] so the loader can warn about it (or refuse to start),
//! instead of being skipped silently on every request.

use chatguard_core::{Error, Result};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::rule::{ModerationDocument, Severity};

/// A red-flag rule that matched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedFlagMatch {
    pub id: String,
    pub severity: Severity,
}

/// Which pattern list a [`PatternIssue`] came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternList {
    PreBlock,
    RedFlag,
}

impl fmt::Display for PatternList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreBlock => f.write_str("pre_block_regexes"),
            Self::RedFlag => f.write_str("red_flag_regexes"),
        }
    }
}

/// A pattern that failed to compile
#[derive(Debug, Clone)]
pub struct PatternIssue {
    pub list: PatternList,

    /// Position within its list
    pub index: usize,

    /// Red-flag id, if the pattern belongs to a red-flag rule
    pub rule_id: Option<String>,

    pub pattern: String,

    /// Compiler error message
    pub error: String,
}

impl fmt::Display for PatternIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.list, self.index)?;
        if let Some(id) = &self.rule_id {
            write!(f, " ({})", id)?;
        }
        write!(f, " {:?}: {}", self.pattern, self.error)
    }
}

/// Outcome of compiling a moderation document
#[derive(Debug, Clone, Default)]
pub struct CompileReport {
    /// Number of patterns that compiled
    pub accepted: usize,

    /// Patterns that were rejected
    pub issues: Vec<PatternIssue>,
}

impl CompileReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

#[derive(Debug, Clone)]
struct CompiledRedFlag {
    id: String,
    severity: Severity,
    regex: Regex,
}

/// Immutable, pre-compiled moderation rules
#[derive(Debug, Clone)]
pub struct ModerationEngine {
    pre_block: Vec<Regex>,
    red_flags: Vec<CompiledRedFlag>,
    escalation_texts: HashMap<String, String>,
    generic_escalation: String,
    refusal_text: String,
}

impl ModerationEngine {
    /// Compile every pattern in `document`, keeping the ones that are valid
    pub fn compile(document: ModerationDocument) -> (Self, CompileReport) {
        let mut report = CompileReport::default();

        let mut pre_block = Vec::with_capacity(document.pre_block_regexes.len());
        for (index, pattern) in document.pre_block_regexes.iter().enumerate() {
            match build_regex(pattern) {
                Ok(regex) => {
                    report.accepted += 1;
                    pre_block.push(regex);
                }
                Err(e) => report.issues.push(PatternIssue {
                    list: PatternList::PreBlock,
                    index,
                    rule_id: None,
                    pattern: pattern.clone(),
                    error: e.to_string(),
                }),
            }
        }

        let mut red_flags = Vec::with_capacity(document.red_flag_regexes.len());
        for (index, rule) in document.red_flag_regexes.into_iter().enumerate() {
            match build_regex(&rule.pattern) {
                Ok(regex) => {
                    report.accepted += 1;
                    red_flags.push(CompiledRedFlag {
                        id: rule.id,
                        severity: rule.severity,
                        regex,
                    });
                }
                Err(e) => report.issues.push(PatternIssue {
                    list: PatternList::RedFlag,
                    index,
                    rule_id: Some(rule.id),
                    pattern: rule.pattern,
                    error: e.to_string(),
                }),
            }
        }

        let engine = Self {
            pre_block,
            red_flags,
            escalation_texts: document.escalation_texts,
            generic_escalation: document.generic_escalation,
            refusal_text: document.refusal_text,
        };

        (engine, report)
    }

    /// Compile `document`, failing on the first invalid pattern
    pub fn compile_strict(document: ModerationDocument) -> Result<Self> {
        let (engine, report) = Self::compile(document);
        match report.issues.first() {
            Some(issue) => Err(Error::rule(format!("invalid pattern {}", issue))),
            None => Ok(engine),
        }
    }

    /// Whether `text` matches any pre-block pattern
    pub fn pre_block(&self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }

        let lowered = text.to_lowercase();
        self.pre_block.iter().any(|re| re.is_match(&lowered))
    }

    /// First red-flag rule (in document order) that matches `text`
    pub fn detect_red_flag(&self, text: &str) -> Option<RedFlagMatch> {
        if text.is_empty() {
            return None;
        }

        let lowered = text.to_lowercase();
        self.red_flags
            .iter()
            .find(|rule| rule.regex.is_match(&lowered))
            .map(|rule| RedFlagMatch {
                id: rule.id.clone(),
                severity: rule.severity,
            })
    }

    /// Escalation text for a red-flag id, or the generic escalation
    pub fn escalation_text(&self, rule_id: &str) -> &str {
        self.escalation_texts
            .get(rule_id)
            .map(String::as_str)
            .unwrap_or(&self.generic_escalation)
    }

    pub fn refusal_text(&self) -> &str {
        &self.refusal_text
    }

    pub fn pre_block_count(&self) -> usize {
        self.pre_block.len()
    }

    pub fn red_flag_count(&self) -> usize {
        self.red_flags.len()
    }
}

impl Default for ModerationEngine {
    fn default() -> Self {
        Self::compile(ModerationDocument::fallback()).0
    }
}

fn build_regex(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}
