use std::time::Duration;

use anyhow::{Context, Result};
use kube::Client;
use tracing::debug;

/// Bounds startup connectivity so a dead cluster fails fast instead of
/// hanging the process.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Creates a Kubernetes client for in-cluster or local development use and
/// verifies connectivity against the API server.
pub async fn build_kube_client() -> Result<Client> {
    let client = Client::try_default()
        .await
        .context("failed to build Kubernetes client")?;

    let version = tokio::time::timeout(CONNECT_TIMEOUT, client.apiserver_version())
        .await
        .context("timed out connecting to the Kubernetes API server")?
        .context("failed to reach the Kubernetes API server")?;
    debug!(git_version = %version.git_version, "Kubernetes client initialized");

    Ok(client)
}
