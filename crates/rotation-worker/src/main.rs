use std::sync::Arc;

use anyhow::{Context, Result};
use polygon_client::PolygonClient;
use rotation_core::MarketDataProvider;
use sector_rotation::{
    RotationCalculationService, RotationDb, RotationPersistenceService, WeeklyRotationJob,
};

mod config;

use config::{RunMode, WorkerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load .env, init tracing
    dotenvy::dotenv().ok();
    init_tracing();

    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting sector rotation worker");

    // 2. Configuration
    let config = WorkerConfig::from_env()?;
    tracing::info!("Configuration loaded and validated");
    tracing::info!("  Mode: {:?}", config.mode);
    tracing::info!("  Benchmark: {}", config.benchmark_symbol);
    tracing::info!(
        "  Sectors: {}",
        config
            .sectors
            .iter()
            .map(|s| s.symbol.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    tracing::info!(
        "  Normalization window: {} weeks, momentum: {} weeks",
        config.params.normalization_window_weeks,
        config.params.momentum_weeks
    );

    // 3. Wire adapters
    let provider: Arc<dyn MarketDataProvider> =
        Arc::new(PolygonClient::new(config.polygon_api_key.clone()));
    let calculator = Arc::new(RotationCalculationService::new(
        provider,
        &config.benchmark_symbol,
    ));
    let db = Arc::new(
        RotationDb::new(&config.database_url)
            .await
            .with_context(|| format!("Failed to open database {}", config.database_url))?,
    );
    let persistence = Arc::new(RotationPersistenceService::new(
        calculator,
        db.clone(),
        db,
        config.params,
    ));

    // 4. Run
    match config.mode {
        RunMode::Init => {
            let result = persistence
                .initialize_last_n_weeks(&config.sectors)
                .await
                .context("Cold start failed")?;
            tracing::info!(
                "Initialized {} rotation points from {} to {}",
                result.data_points.len(),
                result.start_date,
                result.end_date
            );
        }
        RunMode::Incremental => {
            let update = persistence
                .compute_and_save_incremental(&config.sectors)
                .await
                .context("Incremental update failed")?;
            tracing::info!("Incremental update: {:?}", update);
        }
        RunMode::Daemon => {
            let job = WeeklyRotationJob::new(persistence, config.sectors.clone());
            // Catch up on start; the cadence guard makes this a no-op when current.
            job.run_once().await;
            job.run_scheduled(shutdown_signal()).await;
        }
    }

    tracing::info!("Sector rotation worker stopped");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json_logging {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
