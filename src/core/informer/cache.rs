use std::collections::HashMap;

use crate::core::informer::summary::DeploymentSummary;

/// In-memory view of the Deployments in one namespace, keyed by name.
///
/// During a (re)listing the listed objects accumulate in `pending` and become
/// visible all at once when the listing completes, so readers never observe a
/// half-applied listing.
#[derive(Debug, Default)]
pub struct NamespaceCache {
    by_name: HashMap<String, DeploymentSummary>,
    pending: Option<HashMap<String, DeploymentSummary>>,
    synced: bool,
}

impl NamespaceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the start of a (re)listing. Readers keep seeing the previous
    /// state until [`complete_relist`](Self::complete_relist).
    pub fn begin_relist(&mut self) {
        self.pending = Some(HashMap::new());
    }

    /// Buffers one object delivered as part of the current listing.
    pub fn buffer_listed(&mut self, summary: DeploymentSummary) {
        match self.pending.as_mut() {
            Some(pending) => {
                pending.insert(summary.name.clone(), summary);
            }
            // Listed object outside a relist window; apply directly.
            None => {
                self.apply(summary);
            }
        }
    }

    /// Atomically replaces the visible state with the buffered listing and
    /// marks the cache synced.
    pub fn complete_relist(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.by_name = pending;
        }
        self.synced = true;
    }

    /// Inserts or replaces a summary wholesale, returning the prior value.
    pub fn apply(&mut self, summary: DeploymentSummary) -> Option<DeploymentSummary> {
        self.by_name.insert(summary.name.clone(), summary)
    }

    /// Removes by name, returning the removed value if it was present.
    pub fn remove(&mut self, name: &str) -> Option<DeploymentSummary> {
        self.by_name.remove(name)
    }

    pub fn synced(&self) -> bool {
        self.synced
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Copies the current state out, ordered by deployment name.
    pub fn snapshot(&self) -> Vec<DeploymentSummary> {
        let mut deployments: Vec<DeploymentSummary> = self.by_name.values().cloned().collect();
        deployments.sort_by(|a, b| a.name.cmp(&b.name));
        deployments
    }
}
