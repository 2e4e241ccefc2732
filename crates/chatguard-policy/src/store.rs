//! Rule store: persona prompts and moderation rules loaded at startup

use chatguard_core::{Persona, Result};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::engine::{CompileReport, ModerationEngine};
use crate::persona::{PersonaPrompt, PersonaPrompts};
use crate::rule::ModerationDocument;

/// File locations for the rule store
#[derive(Debug, Clone)]
pub struct RuleSources {
    pub male_prompt: PathBuf,
    pub female_prompt: PathBuf,
    pub moderation: PathBuf,
}

impl Default for RuleSources {
    fn default() -> Self {
        Self {
            male_prompt: PathBuf::from("./prompts/male.json"),
            female_prompt: PathBuf::from("./prompts/female.json"),
            moderation: PathBuf::from("./assets/moderation_rules.json"),
        }
    }
}

/// What happened while loading the rule store
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Files that could not be loaded and were replaced by defaults
    pub failures: Vec<String>,

    /// Pattern compilation results for the moderation document
    pub compile: CompileReport,
}

impl LoadReport {
    /// True when the store runs on substituted defaults
    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Immutable prompts and moderation rules, shared by every request
#[derive(Debug, Clone, Default)]
pub struct RuleStore {
    prompts: PersonaPrompts,
    engine: ModerationEngine,
    report: LoadReport,
}

impl RuleStore {
    /// Build a store from in-memory values
    pub fn new(prompts: PersonaPrompts, document: ModerationDocument) -> Self {
        let (engine, compile) = ModerationEngine::compile(document);
        log_compile_report(&compile);

        Self {
            prompts,
            engine,
            report: LoadReport {
                failures: Vec::new(),
                compile,
            },
        }
    }

    /// Load prompts and rules from disk.
    ///
    /// Never fails: a file that cannot be read or parsed is logged and
    /// replaced by an empty prompt or the fallback moderation document.
    pub fn load(sources: &RuleSources) -> Self {
        let (prompts, document, failures) = load_sources(sources);

        let mut store = Self::new(prompts, document);
        store.report.failures = failures;
        store
    }

    /// Load like [`RuleStore::load`], but fail if any moderation pattern
    /// does not compile.
    ///
    /// Missing or unreadable files still fall back to defaults.
    pub fn load_strict(sources: &RuleSources) -> Result<Self> {
        let (prompts, document, failures) = load_sources(sources);
        let engine = ModerationEngine::compile_strict(document)?;

        let accepted = engine.pre_block_count() + engine.red_flag_count();
        Ok(Self {
            prompts,
            engine,
            report: LoadReport {
                failures,
                compile: CompileReport {
                    accepted,
                    issues: Vec::new(),
                },
            },
        })
    }

    pub fn prompts(&self) -> &PersonaPrompts {
        &self.prompts
    }

    pub fn engine(&self) -> &ModerationEngine {
        &self.engine
    }

    pub fn report(&self) -> &LoadReport {
        &self.report
    }
}

fn load_sources(sources: &RuleSources) -> (PersonaPrompts, ModerationDocument, Vec<String>) {
    let mut failures = Vec::new();

    let male = load_prompt(Persona::Male, &sources.male_prompt, &mut failures);
    let female = load_prompt(Persona::Female, &sources.female_prompt, &mut failures);

    let document = match ModerationDocument::from_file(&sources.moderation) {
        Ok(doc) => {
            info!(
                path = %sources.moderation.display(),
                pre_block = doc.pre_block_regexes.len(),
                red_flags = doc.red_flag_regexes.len(),
                "Loaded moderation rules"
            );
            doc
        }
        Err(e) => {
            error!(
                path = %sources.moderation.display(),
                error = %e,
                "Failed to load moderation rules, using fallback document"
            );
            failures.push(format!("{}: {}", sources.moderation.display(), e));
            ModerationDocument::fallback()
        }
    };

    (PersonaPrompts::new(male, female), document, failures)
}

fn load_prompt(persona: Persona, path: &Path, failures: &mut Vec<String>) -> PersonaPrompt {
    match PersonaPrompt::from_file(path) {
        Ok(prompt) => {
            info!(persona = %persona, path = %path.display(), "Loaded persona prompt");
            prompt
        }
        Err(e) => {
            error!(
                persona = %persona,
                path = %path.display(),
                error = %e,
                "Failed to load persona prompt, using empty prompt"
            );
            failures.push(format!("{}: {}", path.display(), e));
            PersonaPrompt::default()
        }
    }
}

fn log_compile_report(report: &CompileReport) {
    for issue in &report.issues {
        warn!(
            list = %issue.list,
            index = issue.index,
            rule = issue.rule_id.as_deref().unwrap_or("-"),
            pattern = %issue.pattern,
            error = %issue.error,
            "Ignoring moderation pattern that does not compile"
        );
    }
}
