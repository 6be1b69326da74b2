// Reasoning Relay - rewrites reasoning tags for OpenAI-compatible clients
//
// The relay sits between a client and one or more OpenAI-compatible
// backends. It forwards requests unchanged apart from per-route rewrites
// (model name, parameter overrides, injected prompts) and rewrites tagged
// regions like <think>...</think> out of the responses, including SSE streams.
//
// Architecture:
// - Proxy server (axum): accepts client requests, one session per request
// - Routing: first matching route picks the backend and the rewrite rules
// - Rewrite: streaming tag matcher applied to every response choice
// - SSE: frame codec that rewrites streams without buffering them

mod cli;
mod config;
mod logging;
mod proxy;
mod startup;
mod util;

use anyhow::Result;
use clap::Parser;
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    // Handle CLI commands first (config --show, --path, --check)
    // If a command was handled, exit early
    if cli::handle_command(&cli)? {
        return Ok(());
    }

    let overrides = cli.overrides();

    // Ensure config template exists (helps users discover options), but only
    // at the default location: an explicit path that is missing is an error
    if let (_, false) = Config::resolve_path(&overrides) {
        Config::ensure_config_exists();
    }

    let config = Config::load(&overrides)?;

    // The guard must be kept alive for the duration of the program to ensure logs flush
    let _file_guard = logging::init(&config.logging);

    if let Some(path) = &config.source {
        tracing::debug!("Config loaded from {}", path.display());
    }

    let state = proxy::ProxyState::from_config(&config)?;
    startup::print_startup(&config, &state);
    startup::log_startup(&config, &state);

    // Create shutdown channel for graceful proxy shutdown
    // This is a oneshot channel - it can only send one signal
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    let mut proxy_handle = tokio::spawn(proxy::start_proxy(config.bind_addr, state, shutdown_rx));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("Shutting down...");
            // If the send fails, the proxy has already shut down (which is fine)
            let _ = shutdown_tx.send(());
            (&mut proxy_handle).await??;
        }
        // Server stopped on its own: bind failure or a fatal server error
        result = &mut proxy_handle => {
            result??;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
