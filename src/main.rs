//! Drive Relay - CORS file relay with a disk cache
//!
//! Fetches a remote file (resolving Google Drive share links), normalizes its
//! content type and download name, streams it to the client and keeps a copy
//! on disk for later requests.

mod cache;
mod config;
mod proxy;
mod upstream;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cache::{CacheStore, Sweeper};
use config::Settings;
use proxy::{build_router, Pipeline};
use upstream::SourceResolver;

fn init_logging(settings: &Settings) -> Result<()> {
    let filter = match &settings.log_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if settings.log_json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    info!("Received shutdown signal, draining connections...");
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::parse();
    init_logging(&settings)?;

    if let Err(e) = settings.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(e);
    }

    let cache_dir = settings.cache_dir();
    let store = Arc::new(
        CacheStore::open(cache_dir.clone(), settings.fresh_for())
            .with_context(|| format!("Failed to open cache at {}", cache_dir.display()))?,
    );
    info!(
        cache_dir = %store.cache_dir().display(),
        fresh_secs = settings.fresh_secs,
        max_age_secs = settings.max_age_secs,
        "Cache ready"
    );

    let sweeper = Sweeper::start(
        Arc::clone(&store),
        settings.max_age(),
        settings.sweep_interval(),
    );

    let resolver = SourceResolver::new(settings.connect_timeout(), settings.drive_base_url.clone())?;
    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&store),
        resolver,
        settings.idle_timeout(),
        settings.client_buffer_bytes,
    ));
    let app = build_router(pipeline);

    let addr = settings.listen_addr()?;
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, %addr, "Failed to bind listener");
            sweeper.stop().await;
            return Err(e.into());
        }
    };
    info!(%addr, "Relay listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    sweeper.stop().await;

    if let Err(e) = served {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Shutdown complete.");
    Ok(())
}
