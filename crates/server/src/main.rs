// crates/server/src/main.rs
//! Backdesk server binary.
//!
//! Parses the command line, builds the session registry and serves the API
//! until Ctrl-C / SIGTERM. Remaining sessions are closed on the way out so
//! their running jobs are stopped and joined.

use anyhow::Result;
use backdesk_server::config::DEFAULT_LOG_FILTER;
use backdesk_server::{create_app, AppState, Args};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .init();

    let args = Args::parse();
    let state = AppState::from_args(&args)?;
    let app = create_app(state.clone());

    let addr = args.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        %addr,
        user_header = %state.user_header,
        job_kinds = state.registry.catalog().len(),
        "backdesk v{} listening",
        env!("CARGO_PKG_VERSION")
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let registry = state.registry.clone();
    let closed = tokio::task::spawn_blocking(move || registry.close_all()).await?;
    info!(closed, remaining = state.registry.len(), "backdesk stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown requested");
}
