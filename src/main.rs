// src/main.rs
// Gatehouse - Anthropic-compatible gateway with a server-side agent loop

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use gatehouse::config::EnvConfig;
use gatehouse::web::{AppState, create_router};

#[derive(Parser)]
#[command(name = "gatehouse", version, about = "Self-hosted Anthropic-compatible gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP gateway (default)
    Serve {
        /// Override the listen port (falls back to PORT)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Validate the environment configuration and exit
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env from the home config dir only, never from the CWD - a
    // hostile workspace must not be able to override provider credentials.
    if let Some(home) = dirs::home_dir() {
        let _ = dotenvy::from_path(home.join(".gatehouse/.env"));
    }

    let level = std::env::var("GATEHOUSE_LOG")
        .ok()
        .and_then(|value| value.to_lowercase().parse::<Level>().ok())
        .unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Config => {
            let config = EnvConfig::load();
            let validation = config.validate();
            println!("{}", validation.report());
            if !validation.is_valid() {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Serve { port } => serve(port).await,
    }
}

async fn serve(port_override: Option<u16>) -> Result<()> {
    let mut config = EnvConfig::load();
    if let Some(port) = port_override {
        config.server.port = port;
    }
    let port = config.server.port;

    let validation = config.validate();
    for warning in &validation.warnings {
        tracing::warn!("{warning}");
    }
    if !validation.is_valid() {
        for error in &validation.errors {
            tracing::error!("{error}");
        }
        anyhow::bail!("configuration is invalid");
    }

    let state = AppState::initialize(config).await?;
    let router = create_router(state.clone());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;
    info!(port, "Gatehouse listening");

    // On ctrl-c / SIGTERM, close every MCP child before exiting
    let shutdown_state = state.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown signal received, closing MCP clients");
            shutdown_state.shutdown().await;
        })
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
