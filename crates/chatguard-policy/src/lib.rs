//! ChatGuard Policy
//!
//! Static moderation rules and persona prompts for the chat relay.
//!
//! Rules are defined in a JSON (or YAML) document and specify:
//! - Pre-block patterns that refuse a message before it reaches the model
//! - Red-flag patterns that escalate a session to a safety message
//! - Escalation texts per red flag, a generic escalation, and a refusal text
//!
//! Everything is loaded once at startup into an immutable [`RuleStore`].

pub mod engine;
pub mod persona;
pub mod rule;
pub mod store;

pub use engine::{CompileReport, ModerationEngine, PatternIssue, PatternList, RedFlagMatch};
pub use persona::{PersonaPrompt, PersonaPrompts};
pub use rule::{ModerationDocument, RedFlagRule, Severity};
pub use store::{LoadReport, RuleSources, RuleStore};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::engine::{ModerationEngine, RedFlagMatch};
    pub use crate::persona::PersonaPrompts;
    pub use crate::rule::{ModerationDocument, Severity};
    pub use crate::store::{RuleSources, RuleStore};
}
