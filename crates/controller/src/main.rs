//! K20s controller - cpu-driven resource optimizer
//!
//! Watches `ResourceOptimizerProfile` objects and, for each one, scales or
//! resizes the matching workloads or publishes recommendations.

use anyhow::{Context as _, Result};
use k20s_controller::{
    api,
    config::ControllerConfig,
    k8s::{KubeProfileStore, KubeWorkloadStore, ResourceOptimizerProfile},
    reconcile::{self, Context},
};
use kube::{Api, Client, CustomResourceExt};
use optimizer_lib::{
    health::HealthRegistry, sources::PrometheusSource, Orchestrator, PrometheusReporter,
    StructuredLogger,
};
use prometheus::Registry;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const CONTROLLER_VERSION: &str = env!("CARGO_PKG_VERSION");

async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return "SIGINT received";
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT received",
            _ = term.recv() => "SIGTERM received",
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "SIGINT received"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::args().nth(1).as_deref() == Some("crd") {
        // Install with: k20s-controller crd | kubectl apply -f -
        println!("{}", serde_json::to_string_pretty(&ResourceOptimizerProfile::crd())?);
        return Ok(());
    }

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting k20s-controller");

    let config = ControllerConfig::load()?;
    info!(
        prometheus_url = %config.prometheus_url,
        namespace = ?config.watch_namespace,
        evaluation_interval_secs = config.evaluation_interval_secs,
        "Controller configured"
    );

    let health_registry = HealthRegistry::with_default_components().await;

    let registry = Registry::new();
    let reporter = PrometheusReporter::new(&registry).context("Failed to register metrics")?;

    let logger = StructuredLogger::new("controller");
    logger.log_startup(CONTROLLER_VERSION, &format!("0.0.0.0:{}/metrics", config.api_port));

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let metrics_source = PrometheusSource::new(&config.prometheus_url, config.query_timeout())
        .context("Failed to create Prometheus client")?;

    let orchestrator = Orchestrator::new(
        Arc::new(metrics_source),
        Arc::new(KubeWorkloadStore::new(client.clone())),
        Arc::new(KubeProfileStore::new(client.clone())),
    )
    .with_reporter(Arc::new(reporter))
    .with_config(config.engine_config())
    .with_logger(StructuredLogger::new("reconciler"));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), registry));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state, shutdown_rx.clone()));

    let profiles: Api<ResourceOptimizerProfile> = match &config.watch_namespace {
        Some(namespace) => Api::namespaced(client, namespace),
        None => Api::all(client),
    };
    let ctx = Arc::new(Context::new(orchestrator, health_registry.clone(), shutdown_rx));
    let controller_handle = tokio::spawn(reconcile::run(profiles, ctx));

    health_registry.set_ready(true).await;

    let reason = shutdown_signal().await;
    logger.log_shutdown(reason);
    health_registry.set_ready(false).await;
    let _ = shutdown_tx.send(true);

    if let Err(e) = controller_handle.await {
        warn!(error = %e, "Controller task failed");
    }
    match api_handle.await {
        Ok(Err(e)) => warn!(error = %e, "API server failed"),
        Err(e) => warn!(error = %e, "API server task failed"),
        Ok(Ok(())) => {}
    }

    info!("Shutting down");
    Ok(())
}
