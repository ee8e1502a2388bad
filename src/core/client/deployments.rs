use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::{Api, Client};
use tracing::debug;

/// Point-read access to live Deployment objects, used by the reconciler.
#[async_trait]
pub trait DeploymentFetcher: Send + Sync + 'static {
    /// Fetches one deployment; `Ok(None)` when it no longer exists.
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Deployment>, kube::Error>;
}

pub struct KubeDeploymentFetcher {
    client: Client,
}

impl KubeDeploymentFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DeploymentFetcher for KubeDeploymentFetcher {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Deployment>, kube::Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let deployment = api.get_opt(name).await?;
        debug!(namespace, name, found = deployment.is_some(), "fetched deployment");
        Ok(deployment)
    }
}
