//! `PairChat` Server -- direct-message backend.
//!
//! An axum WebSocket server that stores one-to-one messages, tracks
//! seen/unseen state, and pushes new messages to recipients who are
//! online. Clients identify themselves with a `hello` frame; everything
//! else rides the same connection.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9100
//! cargo run --bin pairchat-server
//!
//! # Run on custom address
//! cargo run --bin pairchat-server -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! PAIRCHAT_ADDR=127.0.0.1:8080 cargo run --bin pairchat-server
//! ```

use std::sync::Arc;

use clap::Parser;
use pairchat_server::config::{ServerCliArgs, ServerConfig};
use pairchat_server::server::{self, ServerState};

#[tokio::main]
async fn main() {
    let cli = ServerCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting pairchat server");

    let state = Arc::new(ServerState::new());

    match server::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    }
}
