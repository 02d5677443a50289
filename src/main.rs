//! kwikapi - expose plain methods as versioned RPC endpoints.
//!
//! Serves the sample `Calc` fragments over HTTP.

mod demo;

use kwikapi_core::MethodRegistry;
use kwikapi_protocol::CodecTable;
use kwikapi_server::{Config, HttpServer};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if KWIKAPI_CONFIG is set, then env overrides)
    let mut config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("KWIKAPI_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };

    if let Err(e) = config.load_secrets() {
        tracing::error!("Failed to load auth secrets: {}", e);
        return Err(e.into());
    }
    if let Err(e) = config.validate() {
        tracing::error!("{}", e);
        return Err(e.into());
    }

    tracing::info!("Starting kwikapi server");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  URL prefix: /{}", config.api.prefix.trim_matches('/'));
    if let Some(ref version) = config.api.default_version {
        tracing::info!("  Default version: {}", version);
    }
    if config.auth.required {
        tracing::info!(
            "  Authentication: required ({} token(s))",
            config.auth.token_hashes.len()
        );
    } else {
        tracing::info!("  Authentication: optional");
    }

    let registry = Arc::new(MethodRegistry::new());
    registry.register(Arc::new(demo::Calc), "v1", "")?;
    registry.register(Arc::new(demo::Calc), "v2", "")?;
    registry.register(Arc::new(demo::ConcStr), "v1", "Calc/ConcStr")?;

    let mut codecs = CodecTable::new();
    if let Some(ref protocol) = config.api.default_protocol {
        codecs.set_default(protocol)?;
    }
    tracing::info!("  Protocols: {}", codecs.names().join(", "));

    let server = Arc::new(HttpServer::from_config(
        &config,
        registry,
        Arc::new(codecs),
    )?);
    if config.metrics.enabled {
        tracing::info!("  Metrics: http://{}/metrics", config.network.bind_addr);
    }

    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
    });

    server.run().await?;

    tracing::info!("Server stopped");
    Ok(())
}
