//! Observability service
//!
//! Serves the home, heavy and error-injection routes with every request
//! measured, traced and logged, and exposes the metrics for scraping.
//!
//! # Startup
//!
//! 1. Load configuration and initialize tracing
//! 2. Build the metrics registry
//! 3. Spawn the Loki exporter and the Zipkin tracer provider (when enabled)
//! 4. Build the span tracker and structured logger
//! 5. Serve until SIGINT/SIGTERM
//! 6. Stop exporters and wait for their final flush

use obs_service::config::Config;
use obs_service::middleware::Instrumentation;
use obs_service::observability::export::spawn_exporters;
use obs_service::observability::logging::{init_tracing, StructuredLogger};
use obs_service::observability::metrics::MetricsRegistry;
use obs_service::observability::spans::SpanTracker;
use obs_service::routes::{self, AppState};
use obs_service::workload::WorkloadSimulator;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    info!(
        service_name = %config.service_name,
        bind_address = %config.bind_address,
        exporters_enabled = config.exporters_enabled,
        "Configuration loaded successfully"
    );

    let metrics = Arc::new(MetricsRegistry::new()?);

    let shutdown_token = CancellationToken::new();
    let exporters = spawn_exporters(&config, metrics.clone(), shutdown_token.child_token())
        .map_err(|e| {
            error!("Failed to start exporters: {}", e);
            e
        })?;

    let instrumentation = Arc::new(Instrumentation::new(
        metrics.clone(),
        SpanTracker::new(&exporters.tracer_provider),
        StructuredLogger::new(exporters.log_sinks.clone()),
    ));

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;
    let port = config.port;

    let state = Arc::new(AppState {
        simulator: Arc::new(WorkloadSimulator::from_entropy()),
        metrics,
    });
    let app = routes::build_routes(state, instrumentation);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server is running on port {}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped, flushing exporters...");
    shutdown_token.cancel();
    exporters.join().await;

    info!("Shutdown complete");
    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
