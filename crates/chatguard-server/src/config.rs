//! Server configuration

use chatguard_policy::RuleSources;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cli::Cli;

/// Server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Completion API settings
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Prompt and moderation rule files
    #[serde(default)]
    pub rules: RulesConfig,

    /// Treat an invalid moderation pattern as a startup error
    #[serde(default)]
    pub strict_rules: bool,

    /// Completion API credential, only ever taken from the CLI/environment
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl ServerConfig {
    /// Load configuration from file and CLI overrides
    pub fn load(config_path: &str, cli: &Cli) -> anyhow::Result<Self> {
        let mut config = if Path::new(config_path).exists() {
            let content = std::fs::read_to_string(config_path)?;
            serde_yaml::from_str(&content)?
        } else {
            Self::default()
        };

        config.apply_overrides(cli);
        Ok(config)
    }

    fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(upstream) = &cli.upstream {
            self.upstream.base_url = upstream.clone();
        }

        if cli.strict_rules {
            self.strict_rules = true;
        }

        if cli.allow_insecure_upstream {
            self.upstream.allow_insecure = true;
        }

        self.api_key = cli.api_key.clone().filter(|key| !key.is_empty());
    }
}

/// Completion API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL; `/chat/completions` is appended
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Permit plain HTTP and local/private hosts (development only)
    #[serde(default)]
    pub allow_insecure: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            allow_insecure: false,
        }
    }
}

/// Prompt and moderation rule file locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default = "default_male_prompt")]
    pub male_prompt: PathBuf,

    #[serde(default = "default_female_prompt")]
    pub female_prompt: PathBuf,

    #[serde(default = "default_moderation")]
    pub moderation: PathBuf,
}

impl RulesConfig {
    pub fn sources(&self) -> RuleSources {
        RuleSources {
            male_prompt: self.male_prompt.clone(),
            female_prompt: self.female_prompt.clone(),
            moderation: self.moderation.clone(),
        }
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            male_prompt: default_male_prompt(),
            female_prompt: default_female_prompt(),
            moderation: default_moderation(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    800
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_male_prompt() -> PathBuf {
    RuleSources::default().male_prompt
}

fn default_female_prompt() -> PathBuf {
    RuleSources::default().female_prompt
}

fn default_moderation() -> PathBuf {
    RuleSources::default().moderation
}
