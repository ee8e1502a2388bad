mod api;
mod app_state;
mod config;
mod core;
mod errors;
mod reconciler;
mod routes;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::app_state::build_app_state;
use crate::config::Config;
use crate::core::client::deployments::KubeDeploymentFetcher;
use crate::core::client::kube_client::build_kube_client;
use crate::core::client::watch::KubeWatchSource;
use crate::core::informer::manager::InformerManager;
use crate::reconciler::leader::{always_leader, LeaseElector};
use crate::reconciler::DeploymentReconciler;

/// In-flight HTTP requests get this long to finish once shutdown begins.
const HTTP_GRACE_PERIOD: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env().context("failed to load configuration")?;
    info!(?config, version = env!("CARGO_PKG_VERSION"), "starting deploywatch");

    let client = build_kube_client().await?;

    let (http_shutdown_tx, http_shutdown_rx) = watch::channel(false);
    let (task_shutdown_tx, task_shutdown_rx) = watch::channel(false);

    // Informer manager: one watch and cache per configured namespace. A
    // namespace that cannot be watched at all is a startup fault.
    let source = Arc::new(KubeWatchSource::new(client.clone()));
    let informers = Arc::new(InformerManager::new(source.clone()));
    for namespace in &config.namespaces {
        informers
            .add_namespace(namespace)
            .await
            .with_context(|| format!("cannot watch namespace {namespace}"))?;
    }

    // The elector gets its own shutdown signal so the lease is not released
    // until every other task has stopped.
    let (leadership, elector) = if config.enable_leader_election {
        let (elector, leadership) =
            LeaseElector::new(client.clone(), &config.leader_election_namespace);
        let (elector_shutdown_tx, elector_shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(elector.run(elector_shutdown_rx));
        (leadership, Some((elector_shutdown_tx, handle)))
    } else {
        info!("leader election disabled, reconciling unconditionally");
        (always_leader(), None)
    };

    let fetcher = Arc::new(KubeDeploymentFetcher::new(client));
    let reconciler = DeploymentReconciler::new(
        source,
        fetcher,
        config.namespaces.clone(),
        leadership,
        config.reconcile_concurrency,
    );
    let reconciler_handle = tokio::spawn(reconciler.run(task_shutdown_rx));

    let app = routes::app_router().with_state(build_app_state(informers.clone()));
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "HTTP server listening");

    let mut serve_shutdown = http_shutdown_rx;
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = serve_shutdown.changed().await;
            })
            .await
    });

    shutdown_signal().await;
    info!("shutdown signal received, draining");

    // Ordered teardown: stop HTTP intake first, then background tasks, then
    // the watches, and release leadership last.
    let _ = http_shutdown_tx.send(true);
    match tokio::time::timeout(HTTP_GRACE_PERIOD, server_handle).await {
        Ok(Ok(Ok(()))) => info!("HTTP server stopped"),
        Ok(Ok(Err(err))) => error!(error = %err, "HTTP server failed while draining"),
        Ok(Err(err)) => error!(error = %err, "HTTP server task failed"),
        Err(_) => error!("HTTP server did not drain within the grace period"),
    }

    let _ = task_shutdown_tx.send(true);
    if let Err(err) = reconciler_handle.await {
        error!(error = %err, "reconciler task failed");
    }
    informers.shutdown().await;
    if let Some((elector_shutdown_tx, handle)) = elector {
        let _ = elector_shutdown_tx.send(true);
        if let Err(err) = handle.await {
            error!(error = %err, "leader election task failed");
        }
    }

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
