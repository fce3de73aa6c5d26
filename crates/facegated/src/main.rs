use std::sync::Arc;

use anyhow::{Context, Result};
use facegate_core::{AccessGate, EuclideanMatcher, OnnxProvider, StartupMode, TemplateStore};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod routes;
#[cfg(test)]
mod testing;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "facegated starting");

    let config = config::DaemonConfig::from_env(None).context("failed to load configuration")?;
    let settings = &config.settings;

    let store = Arc::new(TemplateStore::open(settings.template_path.clone()));
    let mode = settings.startup_mode_or(StartupMode::Wait);
    let gate = AccessGate::start(store, EuclideanMatcher::new(settings.tolerance), mode)
        .context("failed to start access gate")?;

    let provider = OnnxProvider::from_settings(settings).with_context(|| {
        format!("failed to load face models from {}", settings.model_dir.display())
    })?;
    let engine = engine::spawn_engine(provider, gate.clone())?;

    let app = routes::router(routes::AppState { engine, gate }).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    tracing::info!(
        addr = %config.bind,
        "facegated ready; open http://{} in a browser",
        config.bind
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("facegated shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
}
