mod http;
mod jobs;
mod metrics;

use crate::jobs::{JobSettings, Jobs};
use crate::metrics::Metrics;
use anyhow::Context;
use lidarclass::pipeline::DEFAULT_CHUNK_SIZE;
use lidarclass::{PipelineConfig, RuleSet};
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing_subscriber::{fmt, EnvFilter};

/// Holds all configuration for the classification service.
#[derive(Debug, Clone)]
struct Config {
    listen_addr: SocketAddr,
    metrics_listen_addr: SocketAddr,
    output_dir: PathBuf,
    chunk_size: usize,
    preset: String,
    max_jobs: usize,
    job_retention_secs: u64,
}

impl Config {
    /// Parses configuration from environment variables.
    fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            listen_addr: std::env::var("LIDARCLASS_LISTEN_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".into())
                .parse()
                .context("Failed to parse LIDARCLASS_LISTEN_ADDR")?,
            metrics_listen_addr: std::env::var("LIDARCLASS_METRICS_LISTEN_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:9091".into())
                .parse()
                .context("Failed to parse LIDARCLASS_METRICS_LISTEN_ADDR")?,
            output_dir: std::env::var("LIDARCLASS_OUTPUT_DIR")
                .unwrap_or_else(|_| "outputs".into())
                .into(),
            chunk_size: std::env::var("LIDARCLASS_CHUNK_SIZE")
                .unwrap_or_else(|_| DEFAULT_CHUNK_SIZE.to_string())
                .parse()
                .context("Failed to parse LIDARCLASS_CHUNK_SIZE")?,
            preset: std::env::var("LIDARCLASS_PRESET").unwrap_or_else(|_| "refined".into()),
            max_jobs: std::env::var("LIDARCLASS_MAX_JOBS")
                .unwrap_or_else(|_| "2".into())
                .parse()
                .context("Failed to parse LIDARCLASS_MAX_JOBS")?,
            job_retention_secs: std::env::var("LIDARCLASS_JOB_RETENTION_SECS")
                .unwrap_or_else(|_| "3600".into())
                .parse()
                .context("Failed to parse LIDARCLASS_JOB_RETENTION_SECS")?,
        })
    }

    fn job_settings(&self) -> anyhow::Result<JobSettings> {
        let rules = RuleSet::preset(&self.preset)
            .with_context(|| format!("Unknown LIDARCLASS_PRESET {:?}", self.preset))?;
        let pipeline = PipelineConfig {
            chunk_size: self.chunk_size,
            ..Default::default()
        };
        pipeline
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid pipeline configuration: {e}"))?;
        if self.max_jobs == 0 {
            anyhow::bail!("LIDARCLASS_MAX_JOBS must be at least 1");
        }

        Ok(JobSettings {
            output_dir: self.output_dir.clone(),
            pipeline,
            rules,
            max_concurrent: self.max_jobs,
            retention: Duration::from_secs(self.job_retention_secs),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let config = Config::from_env()?;
    tracing::info!(config = ?config, "Loaded configuration");

    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("Failed to create {}", config.output_dir.display()))?;

    let metrics = Arc::new(Metrics::new().context("Failed to create metrics registry")?);
    let jobs = Jobs::new(config.job_settings()?, metrics.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(());

    // Spawn the API server
    let api_handle = {
        let router = http::router(jobs.clone());
        let addr = config.listen_addr;
        let mut rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            tracing::info!(addr = %addr, "API listening");
            axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(async move {
                    let _ = rx.changed().await;
                })
                .await?;
            Ok::<(), anyhow::Error>(())
        })
    };

    // Spawn the metrics server
    let metrics_handle = {
        let router = metrics.router();
        let addr = config.metrics_listen_addr;
        let mut rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(async move {
                    let _ = rx.changed().await;
                })
                .await?;
            Ok::<(), anyhow::Error>(())
        })
    };

    tracing::info!("All services started. Awaiting shutdown signal...");

    shutdown_signal().await;

    tracing::info!("Shutdown signal received. Cancelling running jobs...");
    jobs.cancel_all();
    drop(shutdown_tx);

    let (api_res, metrics_res) = tokio::join!(api_handle, metrics_handle);

    match api_res {
        Ok(Err(e)) => tracing::error!(error = %e, "API server failed."),
        Err(e) => tracing::error!(error = %e, "API server task panicked."),
        Ok(Ok(())) => {}
    }
    match metrics_res {
        Ok(Err(e)) => tracing::error!(error = %e, "Metrics server failed."),
        Err(e) => tracing::error!(error = %e, "Metrics server task panicked."),
        Ok(Ok(())) => {}
    }

    tracing::info!("Service shut down gracefully.");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM. If a handler cannot be installed, that
/// branch never resolves.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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
}
