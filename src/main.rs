use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

mod alerts;
mod analytics;
mod api;
mod config;
mod pipeline;

use alerts::{AlertPolicy, AlertTable};
use analytics::{Detector, OnnxBackend};
use api::AppState;
use config::Config;
use pipeline::{FrameMailbox, ResultCache, Worker, WorkerSettings};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("hazardwatch=debug".parse()?))
        .init();

    let config = Config::load()?;
    tracing::info!(
        model = %config.detector.model_path.display(),
        output = ?config.detector.output,
        window = config.alerts.window,
        required_match = config.alerts.required_match,
        cooldown_ms = config.alerts.cooldown_ms,
        "loaded config"
    );

    let backend = OnnxBackend::new(&config.detector)?;
    let mut detector = Detector::new(
        Box::new(backend),
        config.detector.decode_params(),
        f64::from(config.detector.pad_color),
    );
    detector.warm_up()?;
    tracing::info!(backend = detector.backend_name(), "model warm-up complete");

    let backend_name = detector.backend_name();
    let mailbox = Arc::new(FrameMailbox::new(config.pipeline.mailbox_capacity));
    let results = ResultCache::new();
    let alerts = AlertTable::new(AlertPolicy::from(&config.alerts));
    let shutdown = Arc::new(AtomicBool::new(false));

    let worker = Worker::new(
        Arc::clone(&mailbox),
        detector,
        alerts.clone(),
        results.clone(),
        WorkerSettings::from(&config.pipeline),
    );
    let worker_handle = pipeline::spawn_worker(worker, Arc::clone(&shutdown));

    let state = AppState::new(mailbox, results, alerts, backend_name);

    tokio::select! {
        result = api::start_server(state, config.http.port) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "http server failed");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    shutdown.store(true, Ordering::Relaxed);
    if let Err(e) = worker_handle.await {
        tracing::error!(error = %e, "detection worker task failed");
    }

    tracing::info!("shutdown complete");

    Ok(())
}
