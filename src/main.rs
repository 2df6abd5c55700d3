use std::sync::Arc;

use media_leverage::auth::Allowlist;
use media_leverage::bot::{Bot, BotDeps};
use media_leverage::channels::{ChannelManager, CliChannel, TelegramChannel};
use media_leverage::config::BotConfig;
use media_leverage::llm::create_provider;
use media_leverage::pipeline::PipelineOrchestrator;
use media_leverage::ratelimit::RateLimiter;
use media_leverage::store::{Database, LibSqlBackend};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config = BotConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    // Held for the process lifetime so buffered log lines are flushed.
    let _log_guard = init_tracing(&config);

    let llm = create_provider(&config.llm)?;

    eprintln!("🤖 Media Leverage v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   LLM: {} / {}", config.llm.backend.as_str(), config.llm.model);

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .unwrap_or_else(|e| {
                eprintln!(
                    "Error: Failed to open database at {}: {}",
                    config.db_path.display(),
                    e
                );
                std::process::exit(1);
            }),
    );
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   Allowlist: {}", config.users_config.display());

    // ── Channels ─────────────────────────────────────────────────────────
    let mut channels = ChannelManager::new();
    if let Some(token) = config.telegram_token.clone() {
        channels.add(Box::new(TelegramChannel::new(token)));
    }
    if let Some(user_id) = config.cli_user_id {
        channels.add(Box::new(CliChannel::new(user_id)));
        eprintln!("   CLI: acting as user {user_id}. Type a message and press Enter.");
    }
    eprintln!("   Channels: {}\n", channels.names().join(", "));
    let channels = Arc::new(channels);

    // ── Bot ──────────────────────────────────────────────────────────────
    let pipeline = Arc::new(PipelineOrchestrator::new(
        Arc::clone(&llm),
        Arc::clone(&db),
        config.pipeline_config(),
    ));
    let deps = BotDeps {
        store: db,
        llm,
        pipeline,
        allowlist: Arc::new(Allowlist::new(config.users_config.clone())),
        limiter: Arc::new(RateLimiter::new(config.rate_limit.clone())),
        outbox: channels.clone(),
    };

    Bot::new(channels, deps, config.queue_idle).run().await?;

    Ok(())
}

/// Console logging, plus a daily-rolling file when a log directory is set.
fn init_tracing(config: &BotConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer().with_target(false);

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "media-leverage.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .init();
            None
        }
    }
}
