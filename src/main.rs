// src/main.rs
//! Netpanel
//!
//! Runs the interception engine behind a local HTTP proxy. Point a browser
//! (or `curl -x`) at the proxy to record, hold, and replay its traffic.

use anyhow::{Context, Result};
use netpanel_engine::interception::ProxyServer;
use netpanel_engine::network::HyperNetwork;
use netpanel_engine::observability::{init_metrics, init_tracing};
use netpanel_engine::recording::{ArchiveRecorder, RecordArchive};
use netpanel_engine::utils::config::EngineConfig;
use netpanel_engine::Engine;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = EngineConfig::load().context("failed to load configuration")?;

    // Initialize observability (tracing, metrics, logging)
    init_tracing(&config.logging)?;
    init_metrics(&config.metrics)?;

    info!("Starting Netpanel v{}", netpanel_engine::VERSION);
    info!("Configuration loaded: {:?}", config);

    let engine = Arc::new(Engine::new(config.clone(), Arc::new(HyperNetwork::new()))?);

    let mut recorder = if config.archive.enabled {
        let archive = Arc::new(RecordArchive::open(&config.archive).await?);
        let mut recorder = ArchiveRecorder::new(archive, &config.archive);
        recorder.start(engine.subscribe())?;
        Some(recorder)
    } else {
        None
    };

    let shutdown = CancellationToken::new();
    let proxy = Arc::new(ProxyServer::new(config.proxy.clone(), Arc::clone(&engine)));
    let mut server = tokio::spawn(proxy.run(shutdown.clone()));

    // Graceful shutdown handler
    let served = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to install CTRL+C signal handler")?;
            info!("Received shutdown signal, cleaning up...");
            shutdown.cancel();
            (&mut server).await
        }
        result = &mut server => result,
    }
    .context("proxy task panicked")?;

    if let Some(recorder) = recorder.as_mut() {
        recorder.shutdown().await?;
        let stats = recorder.stats();
        info!(
            "Archived {} records in {} batches",
            stats.records_archived, stats.batches_flushed
        );
    }

    match served {
        Ok(()) => {
            info!("Proxy stopped gracefully");
            Ok(())
        }
        Err(e) => {
            error!("Proxy error: {}", e);
            Err(e.into())
        }
    }
}
