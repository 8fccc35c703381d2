// =============================================================================
// Quasar Signal Nexus — Main Entry Point
// =============================================================================
//
// Composition root: wires the data store, the detector family, the fusion
// engine, the outcome tracker, the snapshot fan-out and the API server, then
// runs until Ctrl+C and drains cooperatively.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod clock;
mod detectors;
mod error;
mod exchange;
mod features;
mod filter;
mod indicators;
mod market_data;
mod outcome;
mod predictor;
mod runtime_config;
mod scheduler;
mod signal_engine;
mod snapshot;
mod store;
mod types;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::ApiState;
use crate::clock::Clock;
use crate::detectors::DetectorSet;
use crate::exchange::FuturesRestClient;
use crate::filter::{FilterConfig, SymbolFilter};
use crate::market_data::{ticker, DataStore};
use crate::outcome::OutcomeTracker;
use crate::predictor::{HttpPredictor, SharedPredictor};
use crate::runtime_config::RuntimeConfig;
use crate::scheduler::Scheduler;
use crate::signal_engine::SignalEngine;
use crate::snapshot::{NotificationBuffer, SnapshotAssembler};
use crate::store::{SharedStore, SqliteStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Quasar Signal Nexus — Starting Up                ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path =
        std::env::var("QUASAR_CONFIG").unwrap_or_else(|_| "runtime_config.json".into());
    let config = RuntimeConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        RuntimeConfig::default()
    });

    // Invalid bounds are fatal here and only here.
    if let Err(e) = config.validate() {
        error!(error = %e, "invalid configuration — refusing to start");
        return Err(e.into());
    }

    // ── 2. Core state ────────────────────────────────────────────────────
    let clock = Clock::system();
    let store = Arc::new(DataStore::new(
        clock.clone(),
        config.velocity.window_minutes,
        config.volume.avg_window_minutes,
    ));

    let db_path = std::env::var("QUASAR_DB").unwrap_or_else(|_| "signals.db".into());
    let persistence: SharedStore = Arc::new(SqliteStore::open(&db_path)?);
    info!(
        feature_schema = features::FEATURE_SCHEMA_VERSION,
        "feature schema pinned"
    );

    let client = Arc::new(FuturesRestClient::new());
    let detectors = Arc::new(DetectorSet::new(store.clone(), client.clone(), &config));

    // ── 3. Predictor (optional) ──────────────────────────────────────────
    let predictor: Option<SharedPredictor> = if config.ml.enabled {
        let url = std::env::var("QUASAR_PREDICTOR_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8100".into());
        info!(url = %url, "ML predictor enabled");
        Some(Arc::new(HttpPredictor::new(url, clock.clone())))
    } else {
        info!("ML predictor disabled by config");
        None
    };

    // Record a model-metrics row whenever the predictor reports a new
    // model version.
    if let Some(predictor) = predictor.clone() {
        let persistence = persistence.clone();
        let clock = clock.clone();
        tokio::spawn(async move {
            let mut last_version = String::new();
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(600));
            loop {
                interval.tick().await;
                let Ok(stats) = predictor.stats().await else {
                    continue;
                };
                if stats.model_version == last_version {
                    continue;
                }
                let row = store::ModelMetricsRow {
                    model_version: stats.model_version.clone(),
                    training_date: clock.now_ms(),
                    training_samples: stats.training_samples,
                    validation_auc: stats.validation_auc,
                    validation_accuracy: stats.validation_accuracy,
                    win_rate_predicted: 0.0,
                    win_rate_actual: 0.0,
                    feature_importance_json: "{}".to_string(),
                };
                match persistence.record_model_metrics(&row) {
                    Ok(()) => {
                        info!(model_version = %stats.model_version, "model metrics recorded");
                        last_version = stats.model_version;
                    }
                    Err(e) => warn!(error = %e, "failed to record model metrics"),
                }
            }
        });
    }

    let engine = Arc::new(SignalEngine::new(
        store.clone(),
        detectors.clone(),
        config.ml.clone(),
        predictor,
    ));

    // ── 4. Outcome tracker (with restart recovery) ───────────────────────
    let tracker = Arc::new(OutcomeTracker::new(
        clock.clone(),
        persistence.clone(),
        config.emit_threshold,
        config.evaluation_time_ms,
    ));
    match persistence.load_pending() {
        Ok(rows) if !rows.is_empty() => tracker.restore_pending(rows),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "failed to load pending signals from store"),
    }

    // ── 5. Snapshot assembly & scheduler ─────────────────────────────────
    let connected = Arc::new(AtomicBool::new(false));
    let notifications = Arc::new(NotificationBuffer::new(clock.clone()));
    notifications.set_enabled_types(vec![
        "smartSignals".to_string(),
        "criticalVolatility".to_string(),
        "newListings".to_string(),
        "signalOutcomes".to_string(),
    ]);

    let filter_preset = std::env::var("QUASAR_FILTER").unwrap_or_else(|_| "all".into());
    let filter_config = FilterConfig::preset(&filter_preset).unwrap_or_else(|| {
        warn!(preset = %filter_preset, "unknown filter preset — using 'all'");
        FilterConfig::all()
    });

    let assembler = Arc::new(SnapshotAssembler::new(
        store.clone(),
        detectors.clone(),
        engine.clone(),
        tracker.clone(),
        notifications.clone(),
        SymbolFilter::new(filter_config),
        connected.clone(),
        config.ui.max_displayed,
    ));

    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        detectors,
        engine,
        tracker.clone(),
        assembler.clone(),
        notifications,
        persistence.clone(),
        config.cadences.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    scheduler.start(shutdown_rx.clone());

    // ── 6. Ticker stream (reconnect with fixed 5 s backoff) ──────────────
    let stream_url = std::env::var("QUASAR_STREAM_URL")
        .unwrap_or_else(|_| ticker::DEFAULT_TICKER_STREAM_URL.into());
    {
        let scheduler = scheduler.clone();
        let connected = connected.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                let sink_scheduler = scheduler.clone();
                let sink_connected = connected.clone();
                let run = ticker::run_ticker_stream(&stream_url, move |batch| {
                    sink_connected.store(true, Ordering::SeqCst);
                    sink_scheduler.ingest(batch);
                });

                tokio::select! {
                    result = run => {
                        connected.store(false, Ordering::SeqCst);
                        if let Err(e) = result {
                            error!(error = %e, "ticker stream error — reconnecting in 5s");
                        } else {
                            warn!("ticker stream ended — reconnecting in 5s");
                        }
                    }
                    _ = shutdown.changed() => break,
                }

                tokio::select! {
                    _ = tokio::time::sleep(tokio::time::Duration::from_secs(5)) => {}
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    // ── 7. API server ────────────────────────────────────────────────────
    let api_state = Arc::new(ApiState::new(
        store,
        scheduler.clone(),
        assembler,
        tracker,
        persistence,
        connected,
    ));
    let bind_addr = std::env::var("QUASAR_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    {
        let bind_addr = bind_addr.clone();
        tokio::spawn(async move {
            let app = api::rest::router(api_state);
            let listener = tokio::net::TcpListener::bind(&bind_addr)
                .await
                .expect("failed to bind API server");
            info!(addr = %bind_addr, "API server listening");
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .expect("API server failed");
        });
    }

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 8. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — draining");

    let _ = shutdown_tx.send(true);
    scheduler.drain();

    if let Err(e) = config.save(&config_path) {
        error!(error = %e, "failed to save runtime config on shutdown");
    }

    info!("Quasar Signal Nexus shut down complete.");
    Ok(())
}
