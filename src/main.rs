//! SalesCRM Worker - WhatsApp messaging and lead automation backend
//!
//! Serves the webhook, send and automation endpoints over HTTP, or runs a
//! single automation sweep from the command line.

mod cli;
mod config;
mod db;
mod defaults;
mod error;
mod handlers;
mod services;
mod store;
mod types;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use crate::cli::{Cli, Command};
use crate::config::{Config, StoreBackend};
use crate::handlers::AppState;
use crate::services::automations::AutomationRunner;
use crate::services::lead_provisioning::CALLING_CODES;
use crate::services::whatsapp_provider::{GraphApiProvider, WhatsAppProvider};
use crate::store::{CrmStore, MemoryStore, PgStore};

/// Country names for the in-memory backend, keyed by ISO code
const MEMORY_COUNTRY_NAMES: &[(&str, &str)] = &[
    ("CO", "Colombia"),
    ("MX", "Mexico"),
    ("CL", "Chile"),
    ("PE", "Peru"),
    ("AR", "Argentina"),
    ("VE", "Venezuela"),
    ("EC", "Ecuador"),
    ("BO", "Bolivia"),
    ("PY", "Paraguay"),
    ("UY", "Uruguay"),
    ("BR", "Brazil"),
];

#[tokio::main]
async fn main() -> Result<()> {
    let logs_dir = std::env::var("LOGS_DIR").unwrap_or_else(|_| defaults::DEFAULT_LOGS_DIR.to_string());
    std::fs::create_dir_all(&logs_dir).ok();

    // File appender for persistent logs (daily rotation)
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "worker.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let json_logs = std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);
    let stdout_layer = if json_logs {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,salescrm_worker=debug".into()),
        ))
        .with(stdout_layer)
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    let cli = Cli::parse();

    let config = Config::from_env()?;
    info!("Configuration loaded");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Migrate => {
            let StoreBackend::Postgres { database_url } = &config.store else {
                anyhow::bail!("migrate requires STORE_BACKEND=postgres");
            };
            let pool = db::create_pool(database_url).await?;
            db::run_migrations(&pool).await?;
        }
        Command::RunAutomation { target } => {
            let store = open_store(&config).await?;
            let report = AutomationRunner::new(store).run(target).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Serve => {
            info!("Starting SalesCRM Worker...");
            let store = open_store(&config).await?;
            let provider = whatsapp_provider(&config)?;
            let state = Arc::new(AppState::new(&config, store, provider));
            handlers::serve(&config, state).await?;
        }
    }

    Ok(())
}

async fn open_store(config: &Config) -> Result<Arc<dyn CrmStore>> {
    match &config.store {
        StoreBackend::Postgres { database_url } => {
            let pool = db::create_pool(database_url).await?;
            info!("Connected to PostgreSQL");
            db::run_migrations(&pool).await?;
            Ok(Arc::new(PgStore::new(pool)))
        }
        StoreBackend::Memory => {
            let store = MemoryStore::new();
            for (_, iso) in CALLING_CODES {
                let name = MEMORY_COUNTRY_NAMES
                    .iter()
                    .find(|(code, _)| code == iso)
                    .map(|(_, name)| *name)
                    .unwrap_or(*iso);
                store.add_country(name, iso);
            }
            info!("Using in-memory store ({} countries)", CALLING_CODES.len());
            Ok(Arc::new(store))
        }
    }
}

fn whatsapp_provider(config: &Config) -> Result<Option<Arc<dyn WhatsAppProvider>>> {
    let Some(creds) = &config.whatsapp else {
        info!("WhatsApp credentials not set, only dry-run sends will succeed");
        return Ok(None);
    };
    let provider = GraphApiProvider::new(
        config.graph_base_url.clone(),
        creds.access_token.clone(),
        creds.phone_number_id.clone(),
    )
    .context("failed to build WhatsApp client")?;
    Ok(Some(Arc::new(provider)))
}
