mod api;
mod commands;
mod config;
mod error;
mod events;
mod longpoll;
mod queue;
mod session;
mod supervisor;
#[cfg(test)]
mod testing;
mod worker;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::VkClient;
use crate::commands::ChatCommands;
use crate::config::{Cli, Config};
use crate::supervisor::Supervisor;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,vkbot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_cli(Cli::parse())?;

    info!("Configuration loaded");
    info!("  API: {} (v{})", config.api.base_url, config.api.version);
    info!(
        "  Long poll: wait {}s, mode {}, version {}",
        config.longpoll.wait, config.longpoll.mode, config.longpoll.version
    );
    info!(
        "  Queue capacity: {}, echo: {}",
        config.dispatch.queue_capacity, config.dispatch.echo
    );

    let api = Arc::new(VkClient::new(
        config.token.clone(),
        config.api.clone(),
        config.longpoll.clone(),
    ));
    let handler = Arc::new(ChatCommands::new(config.dispatch.command_prefix));

    info!("Bot is starting...");
    Supervisor::new(api, handler, config).run().await
}
