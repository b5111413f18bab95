mod bot;
mod commands;
mod config;
mod gateway;
mod llm;
mod memory;
mod platform;
mod router;
mod scheduler;
mod texts;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::Bot;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bot::AppState;
use crate::config::Config;
use crate::gateway::{LlmGateway, MeteredGateway};
use crate::llm::LlmClient;
use crate::memory::users::UserDirectory;
use crate::memory::MemoryStore;
use crate::platform::telegram::TelegramBroadcaster;
use crate::scheduler::greetings::{register_greetings, GreetingBroadcast};
use crate::scheduler::Scheduler;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mindcoach=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration; an explicit path must exist, the default may not.
    let explicit_path = std::env::args().nth(1).map(PathBuf::from);
    let config_path = explicit_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let loaded = match explicit_path {
        Some(path) => Config::load(&path),
        None => Config::load_or_default(&config_path),
    };
    let config = loaded
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!(
        "  Provider: {} ({})",
        config.llm.provider,
        config.llm.effective_base_url()
    );
    info!("  Model: {}", config.llm.model);
    info!("  Free messages per day: {}", config.billing.free_messages);
    info!("  Greeting offset: {}", config.schedule.utc_offset);

    let store = MemoryStore::open(&config.memory.database_path)?;
    let users: Arc<dyn UserDirectory> = Arc::new(store.clone());

    let llm = LlmClient::new(config.llm.clone(), config.voice.clone());
    let gateway = MeteredGateway::new(
        LlmGateway::new(llm),
        Arc::new(store),
        config.billing.free_messages,
    );

    let state = Arc::new(AppState::new(&config, Arc::clone(&users), Arc::new(gateway)));
    let bot = Bot::new(&config.telegram.bot_token);

    // Greetings live only as long as the process.
    let mut scheduler = Scheduler::new(config.schedule.offset()?).await?;
    let broadcast = Arc::new(GreetingBroadcast::new(
        users,
        Arc::new(TelegramBroadcaster::new(bot.clone())),
    ));
    register_greetings(&scheduler, broadcast).await?;
    for job in scheduler.jobs().await {
        info!(
            "  Job {} ({}): {} [{}]",
            job.id, job.name, job.cron, job.guid
        );
    }
    scheduler.start().await?;

    info!("Bot is starting...");
    platform::telegram::run(state, bot).await?;

    scheduler.shutdown().await?;
    Ok(())
}
