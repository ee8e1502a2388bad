use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::ListParams;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client};
use tracing::debug;

pub type DeploymentEvent = watcher::Event<Deployment>;
pub type DeploymentEventStream = BoxStream<'static, Result<DeploymentEvent, watcher::Error>>;

/// List+watch access to the Deployments of a single namespace.
///
/// Abstracted so the informer manager and the reconciler can be driven by
/// scripted event streams in tests.
#[async_trait]
pub trait DeploymentWatchSource: Send + Sync + 'static {
    /// Opens a watch stream for one namespace.
    ///
    /// Fails if the watch cannot be established at all (bad namespace,
    /// missing permissions, cluster unreachable); transient stream drops
    /// after establishment are handled inside the stream itself.
    async fn watch(&self, namespace: &str) -> Result<DeploymentEventStream, kube::Error>;
}

pub struct KubeWatchSource {
    client: Client,
}

impl KubeWatchSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DeploymentWatchSource for KubeWatchSource {
    async fn watch(&self, namespace: &str) -> Result<DeploymentEventStream, kube::Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);

        // Probe with a cheap list so establishment failures surface here
        // instead of disappearing into the watcher's retry loop.
        api.list(&ListParams::default().limit(1)).await?;
        debug!(namespace, "watch established");

        Ok(watcher(api, watcher::Config::default())
            .default_backoff()
            .boxed())
    }
}
