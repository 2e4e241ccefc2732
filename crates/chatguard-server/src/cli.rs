use clap::{Parser, ValueEnum};

#[derive(Parser, Debug, Clone)]
#[command(name = "chatguard-server")]
#[command(author, version, about = "Moderated chat relay for LLM completion APIs", long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "chatguard.yaml")]
    pub config: String,

    /// Listen address
    #[arg(short = 'l', long, default_value = "0.0.0.0")]
    pub listen: String,

    /// Listen port
    #[arg(short = 'P', long, env = "PORT", default_value = "4000")]
    pub port: u16,

    /// Completion API credential
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Completion API base URL (overrides the config file)
    #[arg(short, long)]
    pub upstream: Option<String>,

    /// Refuse to start when a moderation pattern does not compile
    #[arg(long)]
    pub strict_rules: bool,

    /// Allow plain HTTP and local/private upstream hosts
    #[arg(long)]
    pub allow_insecure_upstream: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    pub log_format: LogFormat,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["chatguard-server"]).unwrap();
        assert_eq!(cli.config, "chatguard.yaml");
        assert_eq!(cli.listen, "0.0.0.0");
        assert!(!cli.strict_rules);
        assert_eq!(cli.log_format, LogFormat::Text);
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::try_parse_from([
            "chatguard-server",
            "--port",
            "9000",
            "--upstream",
            "https://llm.example.com/v1",
            "--strict-rules",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.port, 9000);
        assert_eq!(cli.upstream.as_deref(), Some("https://llm.example.com/v1"));
        assert!(cli.strict_rules);
        assert_eq!(cli.log_format, LogFormat::Json);
    }
}
