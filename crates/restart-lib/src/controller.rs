//! Controller: watcher, work queue and reconcile workers
//!
//! The controller owns the retry policy. A failed key is requeued with
//! backoff up to [`MAX_REQUEUES`] times, then forgotten and reported.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cluster::{PodStore, PodWatcher};
use crate::error::Result;
use crate::health::{components, HealthRegistry};
use crate::observability::StructuredLogger;
use crate::queue::WorkQueue;
use crate::reconciler::Reconcile;

/// Retries after the first failed attempt
pub const MAX_REQUEUES: u32 = 3;

pub const DEFAULT_WORKERS: usize = 1;

/// What happened to a key after one reconcile attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Reconciled; retry history cleared
    Synced,
    /// Failed and scheduled for another attempt
    Requeued,
    /// Failed with the retry budget exhausted
    Dropped,
}

/// State shared by every worker
struct Shared {
    queue: WorkQueue,
    reconciler: Arc<dyn Reconcile>,
    health: HealthRegistry,
    logger: StructuredLogger,
}

impl Shared {
    fn handle_result(&self, key: &str, result: Result<()>) -> Outcome {
        let err = match result {
            Ok(()) => {
                self.queue.forget(key);
                return Outcome::Synced;
            }
            Err(err) => err,
        };

        let requeues = self.queue.num_requeues(key);
        if requeues < MAX_REQUEUES {
            let delay = self.queue.add_rate_limited(key);
            self.logger.log_retry(key, requeues + 1, delay, &err);
            Outcome::Requeued
        } else {
            self.queue.forget(key);
            self.logger.log_dropped(key, requeues + 1, &err);
            Outcome::Dropped
        }
    }

    async fn process_next(&self) -> Option<Outcome> {
        let lease = self.queue.get().await?;
        let key = lease.key().to_string();

        debug!(pod = %key, "Reconciling");
        let result = self.reconciler.reconcile(&key).await;
        let outcome = self.handle_result(&key, result);
        lease.done();

        match outcome {
            Outcome::Dropped => {
                self.health
                    .set_degraded(components::WORKERS, format!("Dropped alert for {key}"))
                    .await;
            }
            Outcome::Synced => self.health.set_healthy(components::WORKERS).await,
            Outcome::Requeued => {}
        }
        Some(outcome)
    }

    async fn worker(self: Arc<Self>, id: usize) {
        debug!(worker = id, "Worker started");
        while self.process_next().await.is_some() {}
        debug!(worker = id, "Worker stopped");
    }
}

/// Runs the pod watcher and a pool of reconcile workers until shutdown
pub struct Controller {
    shared: Arc<Shared>,
    store: Arc<PodStore>,
    watcher: Option<PodWatcher>,
    workers: usize,
}

impl Controller {
    pub fn new(
        queue: WorkQueue,
        store: Arc<PodStore>,
        reconciler: Arc<dyn Reconcile>,
        health: HealthRegistry,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue,
                reconciler,
                health,
                logger,
            }),
            store,
            watcher: None,
            workers: DEFAULT_WORKERS,
        }
    }

    pub fn with_watcher(mut self, watcher: PodWatcher) -> Self {
        self.watcher = Some(watcher);
        self
    }

    /// Number of concurrent workers, at least one
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.shared.queue
    }

    /// Apply the retry policy to one reconcile result
    pub fn handle_result(&self, key: &str, result: Result<()>) -> Outcome {
        self.shared.handle_result(key, result)
    }

    /// Run one worker iteration. Returns `None` once the queue is shut down.
    pub async fn process_next(&self) -> Option<Outcome> {
        self.shared.process_next().await
    }

    /// Run until a message arrives on `shutdown`
    ///
    /// Workers start after the pod index has synced. On shutdown the queue
    /// stops handing out keys and in-flight reconciles finish.
    pub async fn run(self, shutdown: broadcast::Sender<()>) {
        let mut shutdown_rx = shutdown.subscribe();
        let shared = self.shared;
        let watch_task = self
            .watcher
            .map(|watcher| tokio::spawn(watcher.run(shutdown.subscribe())));

        info!("Waiting for pod index to sync");
        let synced = tokio::select! {
            _ = self.store.wait_synced() => true,
            _ = shutdown_rx.recv() => false,
        };

        let mut workers = JoinSet::new();
        if synced {
            shared.health.set_ready(true).await;
            info!(workers = self.workers, pods = self.store.len(), "Starting workers");
            for id in 0..self.workers {
                workers.spawn(Arc::clone(&shared).worker(id));
            }

            let mut next_id = self.workers;
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    Some(joined) = workers.join_next() => {
                        let Err(e) = joined else { continue };
                        if shared.queue.is_shutting_down() {
                            continue;
                        }
                        error!(error = %e, "Worker exited unexpectedly, restarting");
                        shared
                            .health
                            .set_degraded(components::WORKERS, format!("Worker restarted: {e}"))
                            .await;
                        workers.spawn(Arc::clone(&shared).worker(next_id));
                        next_id += 1;
                    }
                }
            }
        } else {
            warn!("Shutdown requested before pod index synced");
        }

        info!(in_flight = shared.queue.in_flight(), "Stopping workers");
        shared.health.set_ready(false).await;
        shared.queue.shut_down();
        shared.queue.drain().await;
        while workers.join_next().await.is_some() {}

        if let Some(task) = watch_task {
            if let Err(e) = task.await {
                error!(error = %e, "Pod watcher task failed");
            }
        }
        info!("Controller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::queue::ExponentialBackoff;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::timeout;

    /// Counts attempts per key and fails for keys listed in `failing`
    #[derive(Default)]
    struct CountingReconciler {
        attempts: Mutex<HashMap<String, usize>>,
        failing: Vec<String>,
        total: AtomicUsize,
    }

    impl CountingReconciler {
        fn failing(keys: &[&str]) -> Self {
            Self {
                failing: keys.iter().map(|k| k.to_string()).collect(),
                ..Default::default()
            }
        }

        fn attempts(&self, key: &str) -> usize {
            self.attempts.lock().unwrap().get(key).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl Reconcile for CountingReconciler {
        async fn reconcile(&self, key: &str) -> Result<()> {
            *self.attempts.lock().unwrap().entry(key.to_string()).or_default() += 1;
            self.total.fetch_add(1, Ordering::SeqCst);
            if self.failing.iter().any(|k| k == key) {
                Err(Error::PodNotFound(key.to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn controller(queue: WorkQueue, reconciler: Arc<dyn Reconcile>) -> Controller {
        Controller::new(
            queue,
            Arc::new(PodStore::new()),
            reconciler,
            HealthRegistry::new(),
            StructuredLogger::new("test"),
        )
    }

    fn fast_queue() -> WorkQueue {
        WorkQueue::with_backoff(ExponentialBackoff::new(
            Duration::from_millis(1),
            Duration::from_millis(20),
        ))
    }

    #[tokio::test]
    async fn test_success_forgets_key() {
        let reconciler = Arc::new(CountingReconciler::default());
        let controller = controller(fast_queue(), reconciler.clone());
        controller.queue().add("ns/foo");

        assert_eq!(controller.process_next().await, Some(Outcome::Synced));
        assert_eq!(reconciler.attempts("ns/foo"), 1);
        assert_eq!(controller.queue().num_requeues("ns/foo"), 0);
    }

    #[tokio::test]
    async fn test_always_failing_key_is_dropped_after_four_attempts() {
        let reconciler = Arc::new(CountingReconciler::failing(&["ns/foo"]));
        let controller = controller(fast_queue(), reconciler.clone());
        controller.queue().add("ns/foo");

        let expected = [
            Outcome::Requeued,
            Outcome::Requeued,
            Outcome::Requeued,
            Outcome::Dropped,
        ];
        for outcome in expected {
            let got = timeout(Duration::from_secs(1), controller.process_next())
                .await
                .unwrap();
            assert_eq!(got, Some(outcome));
        }

        assert_eq!(reconciler.attempts("ns/foo"), 4);
        assert_eq!(controller.queue().num_requeues("ns/foo"), 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(controller.queue().is_empty());
    }

    #[tokio::test]
    async fn test_handle_result_policy() {
        let controller = controller(fast_queue(), Arc::new(CountingReconciler::default()));
        let fail = || Err(Error::Notify("boom".to_string()));

        assert_eq!(controller.handle_result("ns/a", fail()), Outcome::Requeued);
        assert_eq!(controller.queue().num_requeues("ns/a"), 1);
        assert_eq!(controller.handle_result("ns/a", Ok(())), Outcome::Synced);
        assert_eq!(controller.queue().num_requeues("ns/a"), 0);
    }

    #[tokio::test]
    async fn test_drop_marks_workers_degraded() {
        let health = HealthRegistry::new();
        health.register_all().await;
        let queue = fast_queue();
        let controller = Controller::new(
            queue.clone(),
            Arc::new(PodStore::new()),
            Arc::new(CountingReconciler::failing(&["ns/foo"])),
            health.clone(),
            StructuredLogger::new("test"),
        );

        for _ in 0..MAX_REQUEUES {
            controller.handle_result("ns/foo", Err(Error::Notify("boom".to_string())));
        }
        queue.add("ns/foo");
        let outcome = timeout(Duration::from_secs(1), controller.process_next())
            .await
            .unwrap();

        assert_eq!(outcome, Some(Outcome::Dropped));
        assert_eq!(
            health.status(components::WORKERS).await,
            Some(crate::health::ComponentStatus::Degraded)
        );
    }

    #[tokio::test]
    async fn test_run_processes_keys_and_stops_on_shutdown() {
        let store = Arc::new(PodStore::new());
        let reconciler = Arc::new(CountingReconciler::default());
        let health = HealthRegistry::new();
        let controller = Controller::new(
            fast_queue(),
            Arc::clone(&store),
            reconciler.clone(),
            health.clone(),
            StructuredLogger::new("test"),
        )
        .with_workers(2);
        let queue = controller.queue().clone();

        let (shutdown, _) = broadcast::channel(1);
        let run = tokio::spawn(controller.run(shutdown.clone()));

        queue.add("ns/a");
        queue.add("ns/b");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(reconciler.total.load(Ordering::SeqCst), 0, "workers wait for sync");

        store.mark_synced();
        timeout(Duration::from_secs(1), async {
            while reconciler.total.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(health.readiness().await.ready);

        shutdown.send(()).unwrap();
        timeout(Duration::from_secs(1), run).await.unwrap().unwrap();

        assert!(queue.is_shutting_down());
        assert!(!health.readiness().await.ready);
        assert_eq!(reconciler.attempts("ns/a"), 1);
        assert_eq!(reconciler.attempts("ns/b"), 1);
    }

    #[tokio::test]
    async fn test_shutdown_before_sync() {
        let controller = controller(fast_queue(), Arc::new(CountingReconciler::default()));
        let (shutdown, _) = broadcast::channel(1);
        let run = tokio::spawn(controller.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.send(()).unwrap();
        timeout(Duration::from_secs(1), run).await.unwrap().unwrap();
    }
}
