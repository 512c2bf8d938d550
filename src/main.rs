mod addressing;
mod config;
mod dispatcher;
mod forwarder;
mod identity;
mod pipeline;
mod platform;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::addressing::AddressingClassifier;
use crate::config::Config;
use crate::dispatcher::OutboundDispatcher;
use crate::forwarder::{HttpBackend, InboundForwarder};
use crate::identity::IdentityTracker;
use crate::pipeline::{ConnectNotice, Pipeline};
use crate::platform::wppconnect::WppConnectTransport;
use crate::platform::Transport;
use crate::server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,wpp_bridge=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Session: {}", config.wppconnect.session);
    info!("  Backend: {} (fallback {})", config.backend.primary_url, config.backend.fallback_url);
    info!("  Aliases: {:?}", config.bot.aliases);

    let wpp = Arc::new(WppConnectTransport::new(config.wppconnect.clone()));
    let transport: Arc<dyn Transport> = wpp.clone();

    let backend = Arc::new(HttpBackend::new(&config.backend)?);
    let forwarder = InboundForwarder::new(&config.backend, backend, transport.clone())?;
    let classifier = AddressingClassifier::new(&config.bot.aliases)?;

    let notice = config.bot.notify_on_connect.clone().map(|recipient| ConnectNotice {
        recipient,
        text: config.bot.connect_message.clone(),
    });

    let pipeline = Pipeline::new(
        Arc::new(IdentityTracker::new()),
        classifier,
        forwarder,
        transport.clone(),
    )
    .with_connect_notice(notice)
    .with_max_concurrent_forwards(config.backend.max_concurrent_forwards);

    let state = AppState {
        pipeline: Arc::new(pipeline),
        dispatcher: Arc::new(OutboundDispatcher::new(
            transport.clone(),
            config.wppconnect.image_filename.clone(),
        )),
        transport,
    };

    // The server must be up before the session starts pushing events
    let addr = config.listen_addr();
    let server = tokio::spawn(async move { server::serve(&addr, state).await });

    let webhook_url = config.session_webhook_url();
    if let Err(e) = wpp.start_session(&webhook_url).await {
        error!("Failed to start WhatsApp session: {:#}", e);
        return Err(e);
    }

    info!("Bridge is running...");
    server.await.context("Server task panicked")??;

    Ok(())
}
