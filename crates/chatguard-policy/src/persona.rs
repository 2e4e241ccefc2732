//! Persona system prompts

use chatguard_core::{Persona, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::rule::read_document;

/// System instruction for one persona
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaPrompt {
    #[serde(default)]
    pub system_prompt: String,
}

impl PersonaPrompt {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
        }
    }

    /// Load a prompt document (`{"system_prompt": "..."}`) from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        read_document(path.as_ref())
    }
}

/// Prompts for both personas
#[derive(Debug, Clone, Default)]
pub struct PersonaPrompts {
    pub male: PersonaPrompt,
    pub female: PersonaPrompt,
}

impl PersonaPrompts {
    pub fn new(male: PersonaPrompt, female: PersonaPrompt) -> Self {
        Self { male, female }
    }

    /// System instruction prepended to every upstream call for `persona`
    pub fn system_prompt(&self, persona: Persona) -> &str {
        match persona {
            Persona::Male => &self.male.system_prompt,
            Persona::Female => &self.female.system_prompt,
        }
    }
}
