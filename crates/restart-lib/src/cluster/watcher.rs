//! Pod watch loop
//!
//! Feeds the watch stream into the [`PodStore`] and turns every `(old, new)`
//! pair that passes the [`ChangeFilter`] into a queued pod key.

use std::pin::pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::PodStore;
use crate::filter::ChangeFilter;
use crate::health::{components, HealthRegistry};
use crate::queue::WorkQueue;

/// Applies watch events to the index and enqueues restarted pods
pub struct PodEventHandler {
    store: Arc<PodStore>,
    filter: ChangeFilter,
    queue: WorkQueue,
}

impl PodEventHandler {
    pub fn new(store: Arc<PodStore>, filter: ChangeFilter, queue: WorkQueue) -> Self {
        Self {
            store,
            filter,
            queue,
        }
    }

    /// Apply one watch event, returning how many keys were enqueued
    ///
    /// Newly seen pods only populate the index; restarts are detected on
    /// updates of pods already known.
    pub fn handle(&self, event: watcher::Event<Pod>) -> usize {
        match event {
            watcher::Event::Applied(pod) => match self.store.apply(pod) {
                (Some(old), new) => usize::from(self.on_update(&old, &new)),
                (None, _) => 0,
            },
            watcher::Event::Deleted(pod) => {
                self.store.delete(&pod);
                0
            }
            watcher::Event::Restarted(pods) => {
                let pairs = self.store.replace(pods);
                let enqueued = pairs
                    .iter()
                    .filter(|(old, new)| self.on_update(old, new))
                    .count();
                if !self.store.is_synced() {
                    info!(pods = self.store.len(), "Pod index synced");
                }
                self.store.mark_synced();
                enqueued
            }
        }
    }

    fn on_update(&self, old: &Pod, new: &Pod) -> bool {
        match self.filter.evaluate(old, new) {
            Some(key) => {
                self.queue.add(&key.to_string());
                true
            }
            None => false,
        }
    }
}

/// Watches pods in every namespace until shutdown
pub struct PodWatcher {
    api: Api<Pod>,
    handler: PodEventHandler,
    health: HealthRegistry,
}

impl PodWatcher {
    pub fn new(client: Client, handler: PodEventHandler, health: HealthRegistry) -> Self {
        Self {
            api: Api::all(client),
            handler,
            health,
        }
    }

    /// Run the watch loop. Watch errors are retried with backoff.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!("Starting pod watcher");
        let mut stream =
            pin!(watcher(self.api.clone(), watcher::Config::default()).default_backoff());
        let mut healthy = true;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Pod watcher received shutdown signal");
                    break;
                }
                item = stream.next() => match item {
                    Some(Ok(event)) => {
                        let enqueued = self.handler.handle(event);
                        if enqueued > 0 {
                            debug!(enqueued, "Queued restarted pods");
                        }
                        if !healthy {
                            healthy = true;
                            self.health.set_healthy(components::WATCHER).await;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Pod watch failed, retrying");
                        healthy = false;
                        self.health
                            .set_degraded(components::WATCHER, format!("Watch error: {e}"))
                            .await;
                    }
                    None => {
                        error!("Pod watch stream ended");
                        self.health
                            .set_unhealthy(components::WATCHER, "Watch stream ended")
                            .await;
                        break;
                    }
                }
            }
        }

        info!("Pod watcher stopped");
    }
}
