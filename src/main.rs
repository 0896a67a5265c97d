use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use pilotweb::brain::{Brain, ModelGateway};
use pilotweb::config::Config;
use pilotweb::face::{self, AppState};
use pilotweb::hands::BrowserManager;
use pilotweb::{AgentSession, events};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    let config = Config::parse();

    let brain = Brain::new(&config.gateway()).context("model gateway configuration")?;
    info!(backend = brain.name(), url = %config.agent_url, model = %config.model, "model gateway ready");
    let gateway: Arc<dyn ModelGateway> = Arc::new(brain);

    // The browser is launched lazily by /launch or the first run.
    let browser = Arc::new(BrowserManager::new(config.browser()));
    let session = Arc::new(AgentSession::new(gateway, config.session_max_failures));
    let state = Arc::new(AppState::new(
        session,
        browser.clone(),
        config.run_settings(),
        events::channel(),
    ));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("could not bind port {}", config.port))?;

    tokio::select! {
        result = face::serve(listener, state) => result.context("http server failed")?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }

    browser.close().await?;
    Ok(())
}
