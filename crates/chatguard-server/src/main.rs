//! ChatGuard Server
//!
//! Session-based chat relay that forwards conversation turns to an
//! OpenAI-compatible completion API, screening user input and model output
//! against regex moderation rules.

use anyhow::Result;
use chatguard_policy::RuleStore;
use chatguard_server::cli::{Cli, LogFormat};
use chatguard_server::security::{validate_upstream_url, UpstreamUrlPolicy};
use chatguard_server::{create_router, AppState, InMemorySessionStore, OpenAiGateway, Relay, ServerConfig};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.log_format);

    info!("Starting ChatGuard Server");

    let config = ServerConfig::load(&cli.config, &cli)?;
    info!("Upstream: {}", config.upstream.base_url);
    info!("Model: {}", config.upstream.model);

    if config.api_key.is_none() {
        error!("OPENAI_API_KEY is not set; completion requests will fail until it is provided");
    }

    validate_upstream_url(
        &config.upstream.base_url,
        UpstreamUrlPolicy::for_upstream(&config.upstream),
    )?;

    let metrics_handle = init_metrics()?;

    let sources = config.rules.sources();
    let rules = if config.strict_rules {
        RuleStore::load_strict(&sources)?
    } else {
        RuleStore::load(&sources)
    };
    let report = rules.report();
    if report.is_degraded() {
        warn!(
            failures = report.failures.len(),
            "Running with substituted prompts or moderation rules"
        );
    }
    info!(
        pre_block = rules.engine().pre_block_count(),
        red_flags = rules.engine().red_flag_count(),
        "Moderation rules ready"
    );

    let gateway = OpenAiGateway::new(&config.upstream, config.api_key.clone())?;
    let relay = Relay::new(
        Arc::new(rules),
        Arc::new(InMemorySessionStore::new()),
        Arc::new(gateway),
    );
    let app = create_router(AppState::new(relay, Some(metrics_handle)));

    let addr: SocketAddr = format!("{}:{}", cli.listen, cli.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Relay listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_signal().await;
            warn!("Shutdown signal received, stopping server...");
        })
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Listen for shutdown signals (SIGTERM, SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn init_tracing(verbose: bool, format: LogFormat) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("chatguard_server=debug,chatguard_policy=debug,tower_http=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("chatguard_server=info,chatguard_policy=info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Initialize metrics exporter and return handle for rendering
fn init_metrics() -> Result<PrometheusHandle> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics: {}", e))?;

    metrics::describe_counter!(
        "chatguard_requests_total",
        "Total number of requests by action"
    );
    metrics::describe_counter!(
        "chatguard_moderation_total",
        "Moderation decisions by phase and outcome"
    );
    metrics::describe_counter!(
        "chatguard_gateway_errors_total",
        "Failed completion API calls"
    );
    metrics::describe_histogram!(
        "chatguard_gateway_latency_us",
        metrics::Unit::Microseconds,
        "Completion API latency in microseconds"
    );
    metrics::describe_gauge!("chatguard_active_sessions", "Sessions currently stored");

    info!("Metrics exporter initialized");
    Ok(handle)
}
