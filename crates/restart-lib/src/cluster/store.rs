//! Point-in-time pod index

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use k8s_openapi::api::core::v1::Pod;
use tokio::sync::watch;
use tracing::debug;

use crate::models::PodKey;

/// Latest known snapshot of every watched pod, keyed by `namespace/name`
///
/// Written by the watcher, read concurrently by reconcile workers.
pub struct PodStore {
    pods: DashMap<String, Arc<Pod>>,
    synced: watch::Sender<bool>,
}

impl PodStore {
    pub fn new() -> Self {
        let (synced, _) = watch::channel(false);
        Self {
            pods: DashMap::new(),
            synced,
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<Pod>> {
        self.pods.get(key).map(|r| Arc::clone(r.value()))
    }

    /// Insert or update a pod, returning the snapshot it replaced
    pub fn apply(&self, pod: Pod) -> (Option<Arc<Pod>>, Arc<Pod>) {
        let key = PodKey::from_pod(&pod).to_string();
        let new = Arc::new(pod);
        let old = self.pods.insert(key, Arc::clone(&new));
        (old, new)
    }

    pub fn delete(&self, pod: &Pod) -> Option<Arc<Pod>> {
        let key = PodKey::from_pod(pod).to_string();
        self.pods.remove(&key).map(|(_, v)| v)
    }

    /// Replace the whole index after a relist
    ///
    /// Returns `(old, new)` pairs for pods present before and after.
    pub fn replace(&self, pods: Vec<Pod>) -> Vec<(Arc<Pod>, Arc<Pod>)> {
        let mut seen = HashSet::with_capacity(pods.len());
        let mut pairs = Vec::new();

        for pod in pods {
            seen.insert(PodKey::from_pod(&pod).to_string());
            if let (Some(old), new) = self.apply(pod) {
                pairs.push((old, new));
            }
        }

        let before = self.pods.len();
        self.pods.retain(|key, _| seen.contains(key));
        debug!(
            pods = self.pods.len(),
            removed = before - self.pods.len(),
            "Pod index relisted"
        );
        pairs
    }

    /// Flag the initial list as complete
    pub fn mark_synced(&self) {
        self.synced.send_replace(true);
    }

    pub fn is_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Wait until [`PodStore::mark_synced`] has been called
    pub async fn wait_synced(&self) {
        let mut rx = self.synced.subscribe();
        // The sender lives as long as the store, so this only ends on sync
        let _ = rx.wait_for(|synced| *synced).await;
    }

    pub fn len(&self) -> usize {
        self.pods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pods.is_empty()
    }
}

impl Default for PodStore {
    fn default() -> Self {
        Self::new()
    }
}
