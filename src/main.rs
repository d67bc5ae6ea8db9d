mod config;
mod credentials;
mod platform;
mod router;
mod sheets;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::prelude::*;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::router::Router;
use crate::sheets::SheetsClient;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,abiobot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        error!("Startup failed: {:#}", e);
        return Err(e);
    }

    Ok(())
}

async fn run() -> Result<()> {
    if let Ok(path) = dotenvy::dotenv() {
        info!("Loaded environment from {}", path.display());
    }

    let config = load_config()?;
    let settings = config
        .validate(|key| std::env::var(key).ok())
        .context("Invalid configuration")?;

    info!("Configuration loaded successfully");
    info!("  Credentials: {}", config.credentials.source);
    info!("  Service account: {}", settings.credentials.key.client_email);
    if let Some(project) = &settings.credentials.key.project_id {
        info!("  Project: {}", project);
    }
    info!("  Spreadsheet: {}", settings.spreadsheet_id);
    info!("  Row layout: {}", settings.row_layout);

    let sheets = SheetsClient::open(&settings)
        .await
        .with_context(|| format!("Failed to open spreadsheet {}", settings.spreadsheet_id))?;
    info!("Rows will be appended to sheet '{}'", sheets.sheet_title());

    let bot = Bot::new(&settings.bot_token);
    let me = bot
        .get_me()
        .await
        .context("Failed to authenticate with Telegram")?;
    info!("Authenticated as @{}", me.username());

    let router = Arc::new(
        Router::new(
            Arc::new(sheets),
            settings.row_layout,
            settings.confirm_on_failure,
        )
        .with_bot_username(me.username()),
    );

    info!("Bot is running...");
    platform::telegram::run(bot, router).await
}

/// The first argument names the config file; without it `config.toml` is
/// read if present.
fn load_config() -> Result<Config> {
    match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Config::load(&path)
                .with_context(|| format!("Failed to load config from {}", path.display()))
        }
        None => {
            let path = PathBuf::from(DEFAULT_CONFIG_PATH);
            if path.exists() {
                info!("Loading configuration from: {}", path.display());
                Config::load(&path)
            } else {
                info!("No config file, using environment only");
                Ok(Config::default())
            }
        }
    }
}
