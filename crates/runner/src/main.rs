//! Saga runner entry point: wires the orchestrator, state store, and
//! background sweeper, then runs a demo order-fulfillment saga.

mod config;
mod fulfillment;

use std::sync::Arc;

use orchestrator::{BackgroundSweeper, SagaExecutionOptions, SagaOrchestrator, SagaRegistry};
use state_store::InMemorySagaStore;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use uuid::Uuid;

use config::Config;
use fulfillment::{FulfillmentServices, OrderData, OrderFulfillmentSaga};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Wire the store, registry, and orchestrator
    let store = Arc::new(InMemorySagaStore::new());
    let services = FulfillmentServices::new();
    let mut registry = SagaRegistry::new();
    registry.register(&OrderFulfillmentSaga::new(services.clone()));
    let orchestrator = Arc::new(SagaOrchestrator::new(store, Arc::new(registry)));

    // 4. Start the background sweeper
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = BackgroundSweeper::new(
        orchestrator.clone(),
        config.sweeper_config(),
        shutdown_rx,
    );
    let sweeper_handle = tokio::spawn(sweeper.run());

    // 5. Run a demo saga that succeeds and one that compensates
    let report = orchestrator
        .execute::<OrderFulfillmentSaga>(
            OrderData::new(Uuid::new_v4(), 2499),
            SagaExecutionOptions::new().with_correlation_id("demo-ok"),
        )
        .await
        .expect("demo saga execution failed");
    tracing::info!(
        saga_id = %report.saga_id,
        status = %report.status,
        "demo order fulfilled"
    );

    services.set_fail_on_charge(true);
    let report = orchestrator
        .execute::<OrderFulfillmentSaga>(
            OrderData::new(Uuid::new_v4(), 9900),
            SagaExecutionOptions::new().with_correlation_id("demo-declined"),
        )
        .await
        .expect("demo saga execution failed");
    tracing::info!(
        saga_id = %report.saga_id,
        status = %report.status,
        error = report.error.as_deref().unwrap_or(""),
        "demo order rolled back"
    );
    services.set_fail_on_charge(false);

    // 6. Run until a shutdown signal arrives
    shutdown_signal().await;
    shutdown_tx.send(true).ok();
    sweeper_handle.await.expect("sweeper task panicked");

    tracing::info!("runner shut down gracefully");
}
