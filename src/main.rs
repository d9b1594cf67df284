#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # wa-bridge
//!
//! HTTP API for sending WhatsApp messages from one linked device session.
//!
//! The WhatsApp protocol itself is spoken by a bridge child process
//! (`connection.bridge_command`); this binary owns the session lifecycle,
//! credentials on disk and the REST surface.
//!
//! ## Subcommands
//!
//! - `wa-bridge serve` (default): run the HTTP server
//! - `wa-bridge template <path>`: write the recipient spreadsheet template
//!
//! ## API surface
//!
//! | Method | Path                                 | Auth | Description                      |
//! |--------|--------------------------------------|------|----------------------------------|
//! | GET    | `/`                                  | No   | Liveness probe                   |
//! | POST   | `/api/whatsapp/send/text`            | Yes  | Send a text message              |
//! | POST   | `/api/whatsapp/send/media`           | Yes  | Send image/video/audio/sticker   |
//! | POST   | `/api/whatsapp/send/bulk`            | Yes  | Send one message to many         |
//! | GET    | `/api/whatsapp/status`               | Yes  | Connection snapshot              |
//! | GET    | `/api/whatsapp/qr`                   | Yes  | Current pairing QR payload       |
//! | POST   | `/api/whatsapp/auth`                 | Yes  | Wait for pairing to complete     |
//! | POST   | `/api/whatsapp/connect`              | Yes  | Open (or reopen) the session     |
//! | POST   | `/api/whatsapp/disconnect`           | Yes  | Close the session                |
//! | POST   | `/api/whatsapp/upload-excel`         | Yes  | Extract numbers from `.xlsx`     |
//! | GET    | `/api/whatsapp/download-template`    | Yes  | Recipient spreadsheet template   |
//!
//! ## Configuration
//!
//! Loaded from a TOML file (`--config`, or `wa-bridge.toml` if present).
//! `WA_BRIDGE_*` environment variables override file values.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use wa_bridge::backend::bridge::BridgeBackend;
use wa_bridge::connection::{ConnectSettings, ConnectionManager};
use wa_bridge::session::SessionStore;
use wa_bridge::{incoming, logging, routes, spreadsheet, util, AppState, Config};

/// HTTP API for a single WhatsApp linked-device session.
#[derive(Parser)]
#[command(name = "wa-bridge", version)]
struct Cli {
    /// Path to TOML config file.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default when no subcommand given).
    Serve,
    /// Write the recipient spreadsheet template and exit.
    Template {
        /// Destination file.
        #[arg(default_value = spreadsheet::TEMPLATE_FILE_NAME)]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Template { path }) => write_template(&path),
        Some(Commands::Serve) | None => run_server(cli.config.as_deref()).await,
    }
}

fn write_template(path: &std::path::Path) -> ExitCode {
    let result = spreadsheet::template()
        .map_err(|e| e.to_string())
        .and_then(|bytes| std::fs::write(path, bytes).map_err(|e| e.to_string()));
    match result {
        Ok(()) => {
            println!("Wrote {}", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to write template to {}: {e}", path.display());
            ExitCode::FAILURE
        }
    }
}

async fn run_server(config_path: Option<&str>) -> ExitCode {
    let config = match Config::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("wa-bridge: {e}");
            return ExitCode::FAILURE;
        }
    };

    logging::init(&config.logging);

    info!("wa-bridge v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Session: {}", config.session.id);
    info!("Listening on {}", config.server.listen);

    if config.uses_default_token() {
        warn!("Using default API token, set WA_BRIDGE_API_TOKEN or update config");
    }

    let backend = match BridgeBackend::from_config(&config.connection) {
        Ok(backend) => backend,
        Err(e) => {
            error!("Invalid bridge configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    let settings = match ConnectSettings::from_config(&config.connection) {
        Ok(settings) => settings,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let store = SessionStore::new(util::expand_path(&config.session.sessions_dir));

    let manager = ConnectionManager::new(
        config.session.id.clone(),
        Arc::new(backend),
        store,
        settings,
    );
    let replies = config.messages.clone();
    let state = AppState::new(config, manager.clone());
    let incoming_task = incoming::spawn(state.dispatcher.clone(), replies);

    // A failed first connect leaves the API up; POST /connect retries.
    if let Err(e) = manager.connect().await {
        error!("Initial connection failed: {e}");
    }

    let listener = match TcpListener::bind(&state.config.server.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {e}", state.config.server.listen);
            manager.disconnect().await;
            return ExitCode::FAILURE;
        }
    };

    let app = routes::router(state);
    info!("Server ready");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!("Shutting down...");
    manager.disconnect().await;
    incoming_task.abort();

    match served {
        Ok(()) => {
            info!("Goodbye");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Server error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
                info!("Received SIGINT");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received SIGINT");
    }
}
