use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use spark_domain::config::{ConfigSeverity, SparkConfig};
use spark_gateway::api;
use spark_gateway::api::jwks::JwksCache;
use spark_gateway::runtime::rate_limit::RateLimiter;
use spark_gateway::state::{AppState, PreflightMode};
use spark_providers::{EmbeddingsClient, LlmClient};
use spark_settling::TemplateStore;
use spark_store::RestStore;

#[derive(Parser)]
#[command(name = "sparkd", about = "Spark conversational serving layer")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Validate the config and exit non-zero on errors.
    ConfigValidate,
    /// Print the effective config (secrets redacted).
    ConfigShow,
    /// Print the version.
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = SparkConfig::load(cli.config.as_deref())?;
            run_server(Arc::new(config)).await
        }
        Some(Command::ConfigValidate) => {
            let config = SparkConfig::load(cli.config.as_deref())?;
            let issues = config.validate();
            for issue in &issues {
                let tag = match issue.severity {
                    ConfigSeverity::Warning => "warning",
                    ConfigSeverity::Error => "error",
                };
                eprintln!("{tag}: {issue}");
            }
            if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
                std::process::exit(1);
            }
            println!("config ok");
            Ok(())
        }
        Some(Command::ConfigShow) => {
            let mut config = SparkConfig::load(cli.config.as_deref())?;
            redact(&mut config);
            println!(
                "{}",
                toml::to_string_pretty(&config).context("serializing config")?
            );
            Ok(())
        }
        Some(Command::Version) => {
            println!("sparkd {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing for the serve path.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,spark_gateway=debug")),
        )
        .json()
        .init();
}

fn redact(config: &mut SparkConfig) {
    fn mask(value: &mut String) {
        if !value.is_empty() {
            *value = "***".into();
        }
    }
    mask(&mut config.store.supabase_service_key);
    mask(&mut config.llm.google_ai_api_key);
    mask(&mut config.llm.openai_api_key);
    if let Some(key) = config.llm.moonshot_api_key.as_mut() {
        mask(key);
    }
    if let Some(key) = config.llm.groq_api_key.as_mut() {
        mask(key);
    }
}

async fn run_server(config: Arc<SparkConfig>) -> anyhow::Result<()> {
    tracing::info!("Spark gateway starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Store ────────────────────────────────────────────────────────
    let store = Arc::new(RestStore::new(&config.store).context("initializing store client")?);
    tracing::info!(url = %config.store.supabase_url, "store client ready");

    // ── LLM + embeddings ─────────────────────────────────────────────
    let llm = Arc::new(LlmClient::from_config(&config.llm));
    if llm.is_empty() {
        tracing::warn!("no LLM providers configured — chat requests will fail");
    }
    let embeddings = Arc::new(EmbeddingsClient::from_config(&config.llm));
    tracing::info!(
        primary = %config.llm.spark_primary_model,
        fallback = %config.llm.spark_fallback_model,
        preflight = %config.llm.spark_preflight_model,
        embedding_dimensions = embeddings.dimensions(),
        "model routing ready"
    );

    // ── Templates ────────────────────────────────────────────────────
    let templates = Arc::new(TemplateStore::new(config.orientations_dir.clone()));
    match &config.orientations_dir {
        Some(dir) => tracing::info!(dir = %dir.display(), "orientation templates: disk + built-ins"),
        None => tracing::info!("orientation templates: built-ins only"),
    }

    // ── Rate limiter ─────────────────────────────────────────────────
    let rate_limiter = Arc::new(RateLimiter::new());
    tracing::info!(
        widget_rpm = config.spark.rate_limit_rpm,
        admin_rpm = config.admin.rate_limit_rpm,
        "rate limiter ready (in-memory, resets on restart)"
    );

    // ── JWKS cache (admin auth) ──────────────────────────────────────
    let jwks = Arc::new(JwksCache::new(&config.store.supabase_url));
    tracing::info!(url = %jwks.url(), "JWKS cache ready (1h TTL)");

    // ── Preflight mode flag ──────────────────────────────────────────
    let preflight_mode = PreflightMode::from_env();
    tracing::info!(mode = ?preflight_mode, "preflight mode");

    let state = AppState {
        config: config.clone(),
        store,
        llm,
        embeddings,
        templates,
        rate_limiter,
        jwks,
        preflight_mode,
    };

    // ── Concurrency limit (backpressure protection) ──────────────────
    let max_concurrent = std::env::var("SPARK_MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(256);
    tracing::info!(max_concurrent, "concurrency limit set");

    // ── Bind ─────────────────────────────────────────────────────────
    let app = api::router(state)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent))
        .into_make_service_with_connect_info::<std::net::SocketAddr>();

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    tracing::info!(addr = %addr, "Spark gateway listening");

    axum::serve(listener, app)
        .await
        .context("axum server error")?;

    Ok(())
}
