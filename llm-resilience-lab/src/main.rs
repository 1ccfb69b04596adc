use anyhow::{Context, Result};
use llm_resilience_engine::observability::init_logging;
use llm_resilience_engine::ResilienceLayer;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

mod config;
mod probes;

use probes::HttpProbe;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = config::Settings::load()?;

    init_logging(settings.log.clone())?;
    tracing::info!("Starting LLM resilience monitor");

    if let Some(addr) = settings.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        tracing::info!("Metrics exporter listening on {}", addr);
    }

    let layer = ResilienceLayer::from_settings(&settings.resilience)?;

    let client = reqwest::Client::builder()
        .timeout(settings.resilience.health.probe_timeout)
        .build()?;
    for service in &settings.services {
        let probe = HttpProbe::new(client.clone(), &service.url, service.expected_status)
            .with_context(|| format!("Invalid probe settings for {}", service.name))?;
        layer
            .health
            .register(service.name.clone(), Arc::new(probe), service.metadata.clone())
            .await?;
    }
    if settings.services.is_empty() {
        tracing::warn!("No services configured; the monitor has nothing to poll");
    }

    layer.health.start()?;

    let maintenance = CancellationToken::new();
    let pruner = tokio::spawn(prune_signatures(
        layer.clone(),
        settings.prune_interval,
        maintenance.clone(),
    ));

    shutdown_signal().await;

    maintenance.cancel();
    if let Err(e) = pruner.await {
        tracing::error!("Signature pruner ended abnormally: {}", e);
    }
    layer.shutdown().await;

    let overall = layer.overall_health().await;
    let report = serde_json::to_string(&overall)?;
    if overall.status.is_available() {
        tracing::info!(status = %overall.status, "Final health: {}", report);
    } else {
        tracing::warn!(status = %overall.status, "Final health: {}", report);
    }

    Ok(())
}

/// Periodically drops error signatures past their retention period.
async fn prune_signatures(layer: ResilienceLayer, every: Duration, token: CancellationToken) {
    let mut ticker = interval(every.max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let removed = layer.classifier.prune_expired();
                tracing::debug!("Pruned {} error signatures", removed);
            }
        }
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM");
        }
    }
}
