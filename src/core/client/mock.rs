//! Scripted watch source for tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStatus};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::watcher;
use tokio::sync::mpsc;

use crate::core::client::watch::{DeploymentEvent, DeploymentEventStream, DeploymentWatchSource};

/// Watch source backed by in-memory channels; tests push events with
/// [`push`](MockWatchSource::push) after subscribing a namespace.
#[derive(Default)]
pub struct MockWatchSource {
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Result<DeploymentEvent, watcher::Error>>>>>,
    failing: Mutex<HashSet<String>>,
}

impl MockWatchSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes watch establishment fail for the given namespace.
    pub fn fail_namespace(&self, namespace: &str) {
        self.failing.lock().unwrap().insert(namespace.to_string());
    }

    /// Delivers an event to every subscriber of the namespace.
    pub fn push(&self, namespace: &str, event: DeploymentEvent) {
        let subscribers = self.subscribers.lock().unwrap();
        if let Some(senders) = subscribers.get(namespace) {
            for sender in senders {
                let _ = sender.send(Ok(event.clone()));
            }
        }
    }

    /// Number of live subscriptions for a namespace; lets tests wait for a
    /// watch loop to attach before pushing events.
    pub fn subscriber_count(&self, namespace: &str) -> usize {
        self.subscribers
            .lock()
            .unwrap()
            .get(namespace)
            .map_or(0, Vec::len)
    }

    /// Convenience: init + listed objects + init-done in one call.
    pub fn push_initial_listing(&self, namespace: &str, deployments: Vec<Deployment>) {
        self.push(namespace, DeploymentEvent::Init);
        for d in deployments {
            self.push(namespace, DeploymentEvent::InitApply(d));
        }
        self.push(namespace, DeploymentEvent::InitDone);
    }
}

#[async_trait]
impl DeploymentWatchSource for MockWatchSource {
    async fn watch(&self, namespace: &str) -> Result<DeploymentEventStream, kube::Error> {
        if self.failing.lock().unwrap().contains(namespace) {
            return Err(kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".to_string(),
                message: format!("namespaces \"{namespace}\" is forbidden"),
                reason: "Forbidden".to_string(),
                code: 403,
            }));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap()
            .entry(namespace.to_string())
            .or_default()
            .push(tx);

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }
}

/// Builds a plausible Deployment object for event scripts.
pub fn deployment(namespace: &str, name: &str, replicas: i32, image: &str) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            template: PodTemplateSpec {
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "app".to_string(),
                        image: Some(image.to_string()),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }),
        status: Some(DeploymentStatus {
            replicas: Some(replicas),
            ready_replicas: Some(replicas),
            available_replicas: Some(replicas),
            ..Default::default()
        }),
        ..Default::default()
    }
}
