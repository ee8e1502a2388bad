use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::client::watch::{DeploymentEvent, DeploymentEventStream, DeploymentWatchSource};
use crate::core::informer::cache::NamespaceCache;
use crate::core::informer::summary::{change_kind, DeploymentSummary};

#[derive(Debug, Error)]
pub enum InformerError {
    #[error("namespace not being watched: {0}")]
    NamespaceNotWatched(String),
    #[error("failed to establish watch for namespace {namespace}")]
    WatchEstablish {
        namespace: String,
        #[source]
        source: kube::Error,
    },
}

/// One snapshot of a single watched namespace.
#[derive(Debug, Clone)]
pub struct NamespaceSnapshot {
    pub namespace: String,
    pub deployments: Vec<DeploymentSummary>,
}

struct WatchEntry {
    cache: Arc<RwLock<NamespaceCache>>,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Owns one watch task and one cache per watched namespace.
///
/// All reads copy data out; nothing returned to a caller aliases the
/// caches, so a namespace can be removed while snapshots are in flight.
pub struct InformerManager {
    source: Arc<dyn DeploymentWatchSource>,
    entries: RwLock<HashMap<String, WatchEntry>>,
}

impl InformerManager {
    pub fn new(source: Arc<dyn DeploymentWatchSource>) -> Self {
        Self {
            source,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Starts watching a namespace. Idempotent; returns without waiting for
    /// the initial listing to complete. Fails only if the watch cannot be
    /// established at all.
    pub async fn add_namespace(&self, namespace: &str) -> Result<(), InformerError> {
        if self.entries.read().await.contains_key(namespace) {
            debug!(namespace, "namespace already watched");
            return Ok(());
        }

        let stream = self.source.watch(namespace).await.map_err(|source| {
            InformerError::WatchEstablish {
                namespace: namespace.to_string(),
                source,
            }
        })?;

        let cache = Arc::new(RwLock::new(NamespaceCache::new()));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(consume_events(
            namespace.to_string(),
            stream,
            cache.clone(),
            cancel_rx,
        ));

        let mut entries = self.entries.write().await;
        if entries.contains_key(namespace) {
            // Lost a race with a concurrent add; the newcomer yields.
            task.abort();
            return Ok(());
        }
        info!(namespace, "watching namespace");
        entries.insert(
            namespace.to_string(),
            WatchEntry {
                cache,
                cancel: cancel_tx,
                task,
            },
        );
        Ok(())
    }

    /// Stops watching a namespace and discards its cache. Unknown namespaces
    /// are a no-op, mirroring add idempotence.
    pub async fn remove_namespace(&self, namespace: &str) {
        let entry = self.entries.write().await.remove(namespace);
        match entry {
            Some(entry) => {
                let _ = entry.cancel.send(true);
                if let Err(err) = entry.task.await {
                    if !err.is_cancelled() {
                        warn!(namespace, error = %err, "watch task ended abnormally");
                    }
                }
                info!(namespace, "stopped watching namespace");
            }
            None => debug!(namespace, "remove for unwatched namespace ignored"),
        }
    }

    /// Name-ordered copy of one namespace's deployments, or a typed error
    /// when the namespace is not watched. An empty vec from a watched
    /// namespace means "no deployments" (or "not yet synced"), never
    /// "unknown namespace".
    pub async fn snapshot(&self, namespace: &str) -> Result<Vec<DeploymentSummary>, InformerError> {
        let cache = self
            .entry_cache(namespace)
            .await
            .ok_or_else(|| InformerError::NamespaceNotWatched(namespace.to_string()))?;
        let cache = cache.read().await;
        Ok(cache.snapshot())
    }

    /// Snapshots of every watched namespace (ordered by namespace name) plus
    /// the total deployment count. Each namespace is internally consistent;
    /// the set as a whole is a union of per-namespace states.
    pub async fn snapshot_all(&self) -> (Vec<NamespaceSnapshot>, usize) {
        let mut caches: Vec<(String, Arc<RwLock<NamespaceCache>>)> = {
            let entries = self.entries.read().await;
            entries
                .iter()
                .map(|(ns, entry)| (ns.clone(), entry.cache.clone()))
                .collect()
        };
        caches.sort_by(|a, b| a.0.cmp(&b.0));

        let mut snapshots = Vec::with_capacity(caches.len());
        let mut total = 0;
        for (namespace, cache) in caches {
            let deployments = cache.read().await.snapshot();
            total += deployments.len();
            snapshots.push(NamespaceSnapshot {
                namespace,
                deployments,
            });
        }
        (snapshots, total)
    }

    /// Sorted names of the currently watched namespaces.
    pub async fn watched_namespaces(&self) -> Vec<String> {
        let mut namespaces: Vec<String> = self.entries.read().await.keys().cloned().collect();
        namespaces.sort();
        namespaces
    }

    /// True once the namespace has completed its initial listing.
    pub async fn has_synced(&self, namespace: &str) -> bool {
        match self.entry_cache(namespace).await {
            Some(cache) => cache.read().await.synced(),
            None => false,
        }
    }

    /// Cancels every watch task and waits for each to stop.
    pub async fn shutdown(&self) {
        let entries: Vec<(String, WatchEntry)> =
            self.entries.write().await.drain().collect();
        for (namespace, entry) in entries {
            let _ = entry.cancel.send(true);
            if let Err(err) = entry.task.await {
                if !err.is_cancelled() {
                    warn!(namespace, error = %err, "watch task ended abnormally");
                }
            }
            debug!(namespace, "watch task stopped");
        }
    }

    async fn entry_cache(&self, namespace: &str) -> Option<Arc<RwLock<NamespaceCache>>> {
        self.entries
            .read()
            .await
            .get(namespace)
            .map(|entry| entry.cache.clone())
    }
}

/// Per-namespace watch loop: applies events to the cache until cancelled.
async fn consume_events(
    namespace: String,
    mut stream: DeploymentEventStream,
    cache: Arc<RwLock<NamespaceCache>>,
    mut cancel: watch::Receiver<bool>,
) {
    loop {
        let item = tokio::select! {
            _ = cancel.changed() => {
                debug!(namespace, "watch task cancelled");
                return;
            }
            item = stream.next() => item,
        };
        let Some(item) = item else {
            debug!(namespace, "watch stream ended");
            return;
        };
        match item {
            Ok(event) => apply_event(&namespace, &cache, event).await,
            // The watcher resyncs on its own; this is diagnostic only.
            Err(err) => debug!(namespace, error = %err, "transient watch failure"),
        }
    }
}

async fn apply_event(
    namespace: &str,
    cache: &Arc<RwLock<NamespaceCache>>,
    event: DeploymentEvent,
) {
    match event {
        DeploymentEvent::Init => cache.write().await.begin_relist(),
        DeploymentEvent::InitApply(deployment) => {
            if let Some(summary) = DeploymentSummary::from_deployment(&deployment) {
                cache.write().await.buffer_listed(summary);
            }
        }
        DeploymentEvent::InitDone => {
            let count = {
                let mut cache = cache.write().await;
                cache.complete_relist();
                cache.len()
            };
            info!(namespace, deployments = count, "initial listing applied");
        }
        DeploymentEvent::Apply(deployment) => {
            let Some(summary) = DeploymentSummary::from_deployment(&deployment) else {
                return;
            };
            let prior = cache.write().await.apply(summary.clone());
            match prior {
                None => info!(
                    event = "ADDED",
                    namespace,
                    name = %summary.name,
                    replicas = summary.replicas_desired,
                    "deployment added"
                ),
                Some(prior) => info!(
                    event = "MODIFIED",
                    namespace,
                    name = %summary.name,
                    replicas = summary.replicas_desired,
                    change = change_kind(&prior, &summary),
                    "deployment updated"
                ),
            }
        }
        DeploymentEvent::Delete(deployment) => {
            let Some(name) = deployment.metadata.name else {
                warn!(namespace, "dropping delete event without a name");
                return;
            };
            if cache.write().await.remove(&name).is_some() {
                info!(event = "DELETED", namespace, name, "deployment deleted");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::client::mock::{deployment, MockWatchSource};
    use std::time::Duration;

    async fn wait_for_sync(manager: &InformerManager, namespace: &str) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !manager.has_synced(namespace).await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("namespace did not sync in time");
    }

    async fn wait_for_count(manager: &InformerManager, namespace: &str, count: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(snapshot) = manager.snapshot(namespace).await {
                    if snapshot.len() == count {
                        return;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("snapshot did not reach expected size in time");
    }

    #[tokio::test]
    async fn add_namespace_is_idempotent() {
        let source = Arc::new(MockWatchSource::new());
        let manager = InformerManager::new(source.clone());

        manager.add_namespace("team-a").await.unwrap();
        manager.add_namespace("team-a").await.unwrap();

        assert_eq!(manager.watched_namespaces().await, vec!["team-a"]);
    }

    #[tokio::test]
    async fn add_namespace_reports_establishment_failure() {
        let source = Arc::new(MockWatchSource::new());
        source.fail_namespace("locked-down");
        let manager = InformerManager::new(source.clone());

        let err = manager.add_namespace("locked-down").await.unwrap_err();
        assert!(matches!(err, InformerError::WatchEstablish { .. }));
        assert!(manager.watched_namespaces().await.is_empty());
    }

    #[tokio::test]
    async fn snapshot_distinguishes_unwatched_from_empty() {
        let source = Arc::new(MockWatchSource::new());
        let manager = InformerManager::new(source.clone());
        manager.add_namespace("team-a").await.unwrap();
        source.push_initial_listing("team-a", vec![]);
        wait_for_sync(&manager, "team-a").await;

        assert!(manager.snapshot("team-a").await.unwrap().is_empty());
        assert!(matches!(
            manager.snapshot("team-b").await,
            Err(InformerError::NamespaceNotWatched(ns)) if ns == "team-b"
        ));
    }

    #[tokio::test]
    async fn snapshot_before_sync_reads_empty_without_blocking() {
        let source = Arc::new(MockWatchSource::new());
        let manager = InformerManager::new(source.clone());
        manager.add_namespace("team-a").await.unwrap();

        // No listing delivered yet; the read must come back immediately.
        assert!(manager.snapshot("team-a").await.unwrap().is_empty());
        assert!(!manager.has_synced("team-a").await);
    }

    #[tokio::test]
    async fn events_flow_into_snapshots() {
        let source = Arc::new(MockWatchSource::new());
        let manager = InformerManager::new(source.clone());
        manager.add_namespace("team-a").await.unwrap();

        source.push_initial_listing(
            "team-a",
            vec![deployment("team-a", "web", 2, "nginx:1.27")],
        );
        wait_for_sync(&manager, "team-a").await;

        source.push(
            "team-a",
            DeploymentEvent::Apply(deployment("team-a", "api", 1, "api:v3")),
        );
        wait_for_count(&manager, "team-a", 2).await;

        let names: Vec<String> = manager
            .snapshot("team-a")
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["api", "web"]);

        source.push(
            "team-a",
            DeploymentEvent::Delete(deployment("team-a", "web", 2, "nginx:1.27")),
        );
        wait_for_count(&manager, "team-a", 1).await;
        assert_eq!(manager.snapshot("team-a").await.unwrap()[0].name, "api");
    }

    #[tokio::test]
    async fn snapshot_all_aggregates_and_orders_namespaces() {
        let source = Arc::new(MockWatchSource::new());
        let manager = InformerManager::new(source.clone());
        manager.add_namespace("ns-b").await.unwrap();
        manager.add_namespace("ns-a").await.unwrap();

        source.push_initial_listing(
            "ns-a",
            vec![
                deployment("ns-a", "d2", 1, "a:1"),
                deployment("ns-a", "d1", 1, "a:1"),
            ],
        );
        source.push_initial_listing("ns-b", vec![deployment("ns-b", "d3", 1, "b:1")]);
        wait_for_sync(&manager, "ns-a").await;
        wait_for_sync(&manager, "ns-b").await;

        let (snapshots, total) = manager.snapshot_all().await;
        assert_eq!(total, 3);
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].namespace, "ns-a");
        let ns_a_names: Vec<&str> = snapshots[0]
            .deployments
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(ns_a_names, vec!["d1", "d2"]);
        assert_eq!(snapshots[1].namespace, "ns-b");
        assert_eq!(snapshots[1].deployments[0].name, "d3");
    }

    #[tokio::test]
    async fn remove_namespace_stops_the_watch() {
        let source = Arc::new(MockWatchSource::new());
        let manager = InformerManager::new(source.clone());
        manager.add_namespace("team-a").await.unwrap();
        source.push_initial_listing("team-a", vec![deployment("team-a", "web", 1, "n:1")]);
        wait_for_sync(&manager, "team-a").await;

        manager.remove_namespace("team-a").await;
        assert!(manager.watched_namespaces().await.is_empty());
        assert!(matches!(
            manager.snapshot("team-a").await,
            Err(InformerError::NamespaceNotWatched(_))
        ));

        // Removing again is a no-op.
        manager.remove_namespace("team-a").await;
    }

    #[tokio::test]
    async fn relist_is_not_visible_until_complete() {
        let source = Arc::new(MockWatchSource::new());
        let manager = InformerManager::new(source.clone());
        manager.add_namespace("team-a").await.unwrap();

        source.push("team-a", DeploymentEvent::Init);
        source.push(
            "team-a",
            DeploymentEvent::InitApply(deployment("team-a", "web", 1, "n:1")),
        );
        // Give the watch task time to apply the buffered events.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(manager.snapshot("team-a").await.unwrap().is_empty());

        source.push("team-a", DeploymentEvent::InitDone);
        wait_for_count(&manager, "team-a", 1).await;
    }

    #[tokio::test]
    async fn shutdown_joins_all_watch_tasks() {
        let source = Arc::new(MockWatchSource::new());
        let manager = InformerManager::new(source.clone());
        manager.add_namespace("ns-a").await.unwrap();
        manager.add_namespace("ns-b").await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), manager.shutdown())
            .await
            .expect("shutdown did not complete in time");
        assert!(manager.watched_namespaces().await.is_empty());
    }
}
