mod config;

use anyhow::Context;
use atelier_core::{JsonlSink, LogSink, MultiSink, SpanSink, TraceRecorder};
use atelier_gateway::{AtelierServer, AuthConfig, RateLimiter};
use atelier_models::ModelGateway;
use atelier_orchestrator::{roster, tier_table, OrchestrationRequest, Orchestrator};
use clap::{Parser, Subcommand};
use config::{AtelierConfig, LogFormat};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "atelier", about = "Atelier: multi-agent design orchestration engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "atelier.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run one orchestration from a JSON request file and print the result
    Run {
        #[arg(short, long)]
        request: PathBuf,
    },
    /// Print the agent roster and complexity tiers
    Agents,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
    }
}

/// The span recorder plus the JSONL sink to drain before exit, if one is configured.
fn span_recorder(config: &AtelierConfig) -> anyhow::Result<(TraceRecorder, Option<Arc<JsonlSink>>)> {
    let mut sinks: Vec<Arc<dyn SpanSink>> = vec![Arc::new(LogSink)];
    let jsonl = match &config.tracing.spans_path {
        Some(path) => {
            let sink = Arc::new(JsonlSink::new(path)?);
            sinks.push(sink.clone());
            info!(path = %path.display(), "Writing spans to JSONL");
            Some(sink)
        }
        None => None,
    };
    Ok((TraceRecorder::new(Arc::new(MultiSink::new(sinks))), jsonl))
}

fn build_orchestrator(config: &AtelierConfig) -> anyhow::Result<(Orchestrator, Option<Arc<JsonlSink>>)> {
    let gateway = ModelGateway::from_config(config.gateway()?)?;
    let (recorder, jsonl) = span_recorder(config)?;
    let orchestrator = Orchestrator::new(
        config.orchestrator.to_orchestrator_config(),
        Arc::new(gateway),
        recorder,
    );
    Ok((orchestrator, jsonl))
}

async fn flush_spans(jsonl: Option<Arc<JsonlSink>>) {
    if let Some(sink) = jsonl {
        sink.shutdown().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // `agents` needs no config file.
    let config = match (&cli.command, AtelierConfig::load(&cli.config)) {
        (Commands::Agents, Err(_)) => AtelierConfig::parse("")?,
        (_, loaded) => loaded?,
    };
    init_tracing(config.tracing.log_format);

    match cli.command {
        Commands::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);

            let (orchestrator, jsonl) = build_orchestrator(&config)?;
            let orchestrator = Arc::new(orchestrator);

            let rate_limiter = if config.rate_limit_enabled() {
                let limiter = Arc::new(RateLimiter::new(
                    config.security.max_burst,
                    config.security.max_requests_per_second,
                ));
                let sweeper = limiter.clone();
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(Duration::from_secs(60));
                    loop {
                        interval.tick().await;
                        let evicted = sweeper.cleanup(Duration::from_secs(600));
                        if evicted > 0 {
                            debug!(evicted, "Evicted idle rate-limit clients");
                        }
                    }
                });
                Some(limiter)
            } else {
                None
            };

            let auth = AuthConfig::new(config.security.api_keys.clone());
            if auth.is_enabled() {
                info!(keys = auth.api_keys.len(), "API key auth enabled");
            }

            let app = AtelierServer::build_with_middleware(orchestrator, rate_limiter, auth);

            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("failed to bind {addr}"))?;
            info!("Atelier listening on {}", addr);

            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        warn!(error = %e, "Failed to listen for shutdown signal");
                    }
                    info!("Shutting down");
                })
                .await?;
            flush_spans(jsonl).await;
        }
        Commands::Run { request } => {
            let raw = tokio::fs::read_to_string(&request)
                .await
                .with_context(|| format!("failed to read request file '{}'", request.display()))?;
            let request: OrchestrationRequest =
                serde_json::from_str(&raw).context("invalid orchestration request")?;

            let (orchestrator, jsonl) = build_orchestrator(&config)?;
            let outcome = orchestrator.orchestrate(request).await;
            flush_spans(jsonl).await;
            match outcome {
                Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
                Err(e) => {
                    let body = serde_json::json!({
                        "error": e.kind(),
                        "stage": e.stage(),
                        "reason": e.to_string(),
                        "traceId": e.trace_id(),
                        "agentResults": e.agent_results(),
                    });
                    println!("{}", serde_json::to_string_pretty(&body)?);
                    anyhow::bail!("orchestration failed: {e}");
                }
            }
        }
        Commands::Agents => {
            println!("Agents:");
            for profile in roster() {
                println!(
                    "  {:<20} {:<22} weight {:.1}  ({})",
                    profile.role.to_string(),
                    profile.name,
                    profile.weight,
                    profile.capability
                );
            }
            println!("\nComplexity tiers:");
            for tier in tier_table() {
                println!(
                    "  {:<8} {} agents, {} tokens each",
                    tier.complexity.to_string(),
                    tier.agent_count,
                    tier.token_budget
                );
            }
        }
    }

    Ok(())
}
