// Slackline server binary
// Decision: Fail startup on missing credentials rather than serving a bot that cannot answer

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use slackline_api::{build_router, AppState};
use slackline_core::config::BotConfig;
use slackline_core::dedup::DedupCoordinator;
use slackline_core::orchestrator::{OrchestratorParts, ResponseOrchestrator};
use slackline_core::resources::load_system_instructions;
use slackline_core::telemetry::{init_tracing, TelemetryConfig};
use slackline_openai::create_driver;
use slackline_slack::{SignatureVerifier, SlackClient, SlackSettings};
use slackline_storage::{ClaimBackend, PostgresClaimStore};

const DEFAULT_PORT: u16 = 80;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    // - RUST_LOG or LOG_LEVEL: Log filter (default: "slackline=info,tower_http=info")
    // - LOG_FORMAT=json: JSON lines
    let telemetry_config = TelemetryConfig::from_env();
    init_tracing(&telemetry_config);

    info!(
        service = %telemetry_config.service_name,
        version = env!("CARGO_PKG_VERSION"),
        "slackline starting..."
    );

    let slack = SlackSettings::from_env().context("Failed to load Slack settings")?;
    let mut config = BotConfig::from_env();

    if config.system_instructions.trim().is_empty() {
        let path = std::env::var("SYSTEM_INSTRUCTIONS_FILE")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);
        config.system_instructions = load_system_instructions(path.as_deref()).await;
    }

    let client = SlackClient::with_base_url(&slack.bot_token, &slack.api_base_url);

    if config.identity.user_id.is_none() {
        config.identity.user_id = slack.bot_user_id.clone();
    }
    if config.identity.user_id.is_none() || config.identity.bot_id.is_none() {
        match client.auth_test().await {
            Ok(identity) => {
                config.identity.user_id = config.identity.user_id.take().or(identity.user_id);
                config.identity.bot_id = config.identity.bot_id.take().or(identity.bot_id);
            }
            Err(e) => warn!(error = %e, "auth.test failed, bot identity incomplete"),
        }
    }
    info!(
        user_id = config.identity.user_id.as_deref().unwrap_or(""),
        bot_id = config.identity.bot_id.as_deref().unwrap_or(""),
        "Bot identity resolved"
    );

    let llm = create_driver(&config.llm).context("Failed to create LLM driver")?;
    info!(
        provider = %config.llm.provider,
        model = %config.llm.call_config().model,
        "LLM driver configured"
    );

    let store_url = std::env::var("DEDUP_STORE_URL").ok();
    let backend = ClaimBackend::connect(store_url.as_deref())
        .await
        .context("Failed to connect to claim store")?;
    if let Some(store) = backend.postgres() {
        spawn_claim_purge(store.clone(), config.dedup_ttl);
    }

    let dedup = DedupCoordinator::new(backend.store(), config.dedup_ttl)
        .with_key_prefix(config.dedup_key_prefix.clone());
    info!(
        backend = dedup.backend(),
        owner = dedup.owner(),
        ttl_secs = config.dedup_ttl.as_secs(),
        "Dedup configured"
    );

    let orchestrator = ResponseOrchestrator::new(OrchestratorParts {
        config,
        dedup,
        platform: Arc::new(client),
        llm,
    });
    let state = AppState::new(
        Arc::new(orchestrator),
        SignatureVerifier::new(slack.signing_secret.clone()),
    );
    let app = build_router(state);

    let port = match std::env::var("PORT") {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(value = %raw, default = DEFAULT_PORT, "Invalid PORT, using default");
            DEFAULT_PORT
        }),
        Err(_) => DEFAULT_PORT,
    };
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("slackline stopped");
    Ok(())
}

/// Delete expired Postgres claims once per TTL
fn spawn_claim_purge(store: PostgresClaimStore, every: std::time::Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every.max(std::time::Duration::from_secs(1)));
        loop {
            interval.tick().await;
            if let Err(e) = store.purge_expired().await {
                warn!(error = %e, "Claim purge failed");
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
