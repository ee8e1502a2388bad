//! Leader-gated reconciliation over the watched namespaces.
//!
//! Each configured namespace gets its own trigger stream (an independent
//! watch subscription, so reconciliation never competes with the query
//! caches). Triggers collapse to (namespace, name) keys; a dispatcher
//! fetches the current object per key and decides the outcome from what it
//! finds, never from the triggering event.

pub mod backoff;
pub mod leader;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::core::client::deployments::DeploymentFetcher;
use crate::core::client::watch::{DeploymentEvent, DeploymentWatchSource};
use crate::core::informer::summary::DeploymentSummary;
use crate::reconciler::backoff::ExponentialBackoff;
use crate::reconciler::leader::LeadershipWatch;

const EVENT_BUFFER: usize = 64;
const REQUEUE_BASE: Duration = Duration::from_millis(500);
const REQUEUE_MAX: Duration = Duration::from_secs(60);

/// One unit of reconcile work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReconcileRequest {
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to fetch deployment {namespace}/{name}: {source}")]
    Fetch {
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },
}

impl ReconcileError {
    /// Permission denial is a deployment-environment problem; retrying
    /// cannot fix it.
    pub fn is_terminal(&self) -> bool {
        match self {
            ReconcileError::Fetch {
                source: kube::Error::Api(response),
                ..
            } => response.code == 403,
            _ => false,
        }
    }
}

type ReconcileOutcome = (ReconcileRequest, Result<(), ReconcileError>);

pub struct DeploymentReconciler {
    source: Arc<dyn DeploymentWatchSource>,
    fetcher: Arc<dyn DeploymentFetcher>,
    namespaces: Vec<String>,
    leadership: LeadershipWatch,
    concurrency: usize,
}

impl DeploymentReconciler {
    pub fn new(
        source: Arc<dyn DeploymentWatchSource>,
        fetcher: Arc<dyn DeploymentFetcher>,
        namespaces: Vec<String>,
        leadership: LeadershipWatch,
        concurrency: usize,
    ) -> Self {
        Self {
            source,
            fetcher,
            namespaces,
            leadership,
            concurrency: concurrency.max(1),
        }
    }

    /// Runs until `shutdown` fires; in-flight work is drained before
    /// returning.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            namespaces = ?self.namespaces,
            concurrency = self.concurrency,
            "reconciler started"
        );

        let (event_tx, mut event_rx) = mpsc::channel::<ReconcileRequest>(EVENT_BUFFER);
        let mut feeders = JoinSet::new();
        for namespace in &self.namespaces {
            feeders.spawn(feed_namespace(
                self.source.clone(),
                namespace.clone(),
                event_tx.clone(),
                shutdown.clone(),
            ));
        }
        drop(event_tx);

        let (requeue_tx, mut requeue_rx) = mpsc::unbounded_channel::<ReconcileRequest>();
        let mut in_flight: JoinSet<ReconcileOutcome> = JoinSet::new();
        let mut attempts: HashMap<ReconcileRequest, u32> = HashMap::new();

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                Some(request) = event_rx.recv() => {
                    self.admit(request, &mut in_flight, &mut attempts, &requeue_tx).await;
                }
                Some(request) = requeue_rx.recv() => {
                    self.admit(request, &mut in_flight, &mut attempts, &requeue_tx).await;
                }
                Some(outcome) = in_flight.join_next(), if !in_flight.is_empty() => {
                    record_outcome(outcome, &mut attempts, &requeue_tx);
                }
                else => break,
            }
        }

        // Leadership loss or shutdown never cancels work already running.
        while let Some(outcome) = in_flight.join_next().await {
            record_outcome(outcome, &mut attempts, &requeue_tx);
        }
        while feeders.join_next().await.is_some() {}
        info!("reconciler stopped");
    }

    /// Starts a reconcile for the request, first making room under the
    /// concurrency bound. Requests arriving while not leader are dropped;
    /// the next leadership term starts from fresh watch events.
    async fn admit(
        &self,
        request: ReconcileRequest,
        in_flight: &mut JoinSet<ReconcileOutcome>,
        attempts: &mut HashMap<ReconcileRequest, u32>,
        requeue_tx: &mpsc::UnboundedSender<ReconcileRequest>,
    ) {
        if !self.leadership.borrow().is_leader {
            debug!(
                namespace = %request.namespace,
                name = %request.name,
                "not leader, skipping reconcile"
            );
            return;
        }
        while in_flight.len() >= self.concurrency {
            match in_flight.join_next().await {
                Some(outcome) => record_outcome(outcome, attempts, requeue_tx),
                None => break,
            }
        }
        let fetcher = self.fetcher.clone();
        in_flight.spawn(async move {
            let result = reconcile_one(fetcher.as_ref(), &request).await;
            (request, result)
        });
    }
}

/// Per-namespace trigger loop: turns watch events into reconcile requests,
/// re-establishing the stream with backoff when it fails.
async fn feed_namespace(
    source: Arc<dyn DeploymentWatchSource>,
    namespace: String,
    events: mpsc::Sender<ReconcileRequest>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(60));
    loop {
        let established = tokio::select! {
            _ = shutdown.changed() => return,
            result = source.watch(&namespace) => result,
        };
        let mut stream = match established {
            Ok(stream) => stream,
            Err(err) => {
                let delay = backoff.next_delay();
                warn!(
                    namespace,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "trigger stream failed to establish, retrying"
                );
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = tokio::time::sleep(delay) => continue,
                }
            }
        };

        loop {
            let item = tokio::select! {
                _ = shutdown.changed() => return,
                item = stream.next() => item,
            };
            let Some(item) = item else {
                debug!(namespace, "trigger stream ended, re-establishing");
                break;
            };
            match item {
                Ok(event) => {
                    backoff.reset();
                    for request in requests_from_event(&namespace, event) {
                        if events.send(request).await.is_err() {
                            return;
                        }
                    }
                }
                Err(err) => debug!(namespace, error = %err, "transient trigger stream failure"),
            }
        }
    }
}

fn requests_from_event(namespace: &str, event: DeploymentEvent) -> Vec<ReconcileRequest> {
    let deployment = match event {
        DeploymentEvent::Apply(d) | DeploymentEvent::Delete(d) | DeploymentEvent::InitApply(d) => d,
        DeploymentEvent::Init | DeploymentEvent::InitDone => return Vec::new(),
    };
    match deployment.metadata.name {
        Some(name) => vec![ReconcileRequest {
            namespace: namespace.to_string(),
            name,
        }],
        None => Vec::new(),
    }
}

fn record_outcome(
    outcome: Result<ReconcileOutcome, JoinError>,
    attempts: &mut HashMap<ReconcileRequest, u32>,
    requeue_tx: &mpsc::UnboundedSender<ReconcileRequest>,
) {
    match outcome {
        Err(err) => error!(error = %err, "reconcile task failed to run"),
        Ok((request, Ok(()))) => {
            attempts.remove(&request);
        }
        Ok((request, Err(err))) if err.is_terminal() => {
            attempts.remove(&request);
            error!(
                namespace = %request.namespace,
                name = %request.name,
                error = %err,
                "terminal reconcile failure, not retrying"
            );
        }
        Ok((request, Err(err))) => {
            let attempt = attempts.entry(request.clone()).or_insert(0);
            *attempt += 1;
            let delay = backoff::delay_for_attempt(*attempt, REQUEUE_BASE, REQUEUE_MAX);
            warn!(
                namespace = %request.namespace,
                name = %request.name,
                error = %err,
                attempt = *attempt,
                delay_ms = delay.as_millis() as u64,
                "reconcile failed, requeueing"
            );
            let requeue_tx = requeue_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = requeue_tx.send(request);
            });
        }
    }
}

/// Reconciles one key against the current cluster state. Absence of the
/// object is a normal outcome (it was deleted after the trigger fired).
async fn reconcile_one(
    fetcher: &dyn DeploymentFetcher,
    request: &ReconcileRequest,
) -> Result<(), ReconcileError> {
    let deployment = fetcher
        .get(&request.namespace, &request.name)
        .await
        .map_err(|source| ReconcileError::Fetch {
            namespace: request.namespace.clone(),
            name: request.name.clone(),
            source,
        })?;

    match deployment {
        None => info!(
            namespace = %request.namespace,
            name = %request.name,
            "deployment gone, treating as deleted"
        ),
        Some(deployment) => match DeploymentSummary::from_deployment(&deployment) {
            Some(summary) => info!(
                namespace = %request.namespace,
                name = %request.name,
                replicas = summary.replicas_desired,
                ready = summary.replicas_ready,
                image = summary.images.first().map(String::as_str).unwrap_or(""),
                "reconciled deployment"
            ),
            None => warn!(
                namespace = %request.namespace,
                name = %request.name,
                "fetched deployment is malformed"
            ),
        },
    }
    Ok(())
}
