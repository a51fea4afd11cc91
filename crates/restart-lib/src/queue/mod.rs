//! Deduplicating, rate-limited work queue keyed by pod
//!
//! Guarantees:
//! - a key is pending at most once; re-adding a pending key is absorbed
//! - a key is never handed to two workers at the same time
//! - a key re-added while in flight is processed again after `done`
//! - failed keys are re-enqueued with per-key exponential backoff

mod rate_limit;

pub use rate_limit::{ExponentialBackoff, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY};

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug, Default)]
struct State {
    /// Keys ready to be handed out, in arrival order
    queue: VecDeque<String>,
    /// Keys that need processing (queued, or re-added while in flight)
    dirty: HashSet<String>,
    /// Keys currently held by a worker
    processing: HashSet<String>,
    shutting_down: bool,
}

struct Inner {
    state: Mutex<State>,
    /// Wakes workers blocked in `get`
    available: Notify,
    /// Wakes `drain` when nothing is in flight
    idle: Notify,
    limiter: ExponentialBackoff,
}

/// Cloneable handle to a shared work queue
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl WorkQueue {
    /// Create a queue with the default backoff (5ms doubling up to 1000s)
    pub fn new() -> Self {
        Self::with_backoff(ExponentialBackoff::default())
    }

    pub fn with_backoff(limiter: ExponentialBackoff) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                available: Notify::new(),
                idle: Notify::new(),
                limiter,
            }),
        }
    }

    /// Enqueue a key. No-op if it is already pending or the queue is shut down.
    pub fn add(&self, key: &str) {
        let mut state = self.lock();
        if state.shutting_down || state.dirty.contains(key) {
            return;
        }
        state.dirty.insert(key.to_string());
        if state.processing.contains(key) {
            // Re-queued by `done` once the current worker finishes
            return;
        }
        state.queue.push_back(key.to_string());
        drop(state);
        self.inner.available.notify_one();
    }

    /// Enqueue a key after `delay`
    pub fn add_after(&self, key: &str, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(&key);
        });
    }

    /// Re-enqueue a key after its backoff delay and bump its requeue count.
    /// Returns the delay applied.
    pub fn add_rate_limited(&self, key: &str) -> Duration {
        let delay = self.inner.limiter.when(key);
        debug!(key, delay_ms = delay.as_millis() as u64, "Requeue with backoff");
        self.add_after(key, delay);
        delay
    }

    /// Clear the retry history of a key
    pub fn forget(&self, key: &str) {
        self.inner.limiter.forget(key);
    }

    pub fn num_requeues(&self, key: &str) -> u32 {
        self.inner.limiter.num_requeues(key)
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<QueueLease> {
        loop {
            let notified = self.inner.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        self.inner.available.notify_one();
                    }
                    return Some(QueueLease {
                        key,
                        queue: self.clone(),
                        finished: false,
                    });
                }
            }

            notified.await;
        }
    }

    /// Mark processing of `key` finished
    pub fn done(&self, key: &str) {
        let mut state = self.lock();
        state.processing.remove(key);
        let requeue = state.dirty.contains(key) && !state.shutting_down;
        if requeue {
            state.queue.push_back(key.to_string());
        }
        let idle = state.processing.is_empty();
        drop(state);

        if requeue {
            self.inner.available.notify_one();
        }
        if idle {
            self.inner.idle.notify_waiters();
        }
    }

    /// Stop handing out keys. In-flight keys may still call `done`.
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.inner.available.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Wait until no key is in flight
    pub async fn drain(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.lock().processing.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Number of keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// Number of keys currently held by workers
    pub fn in_flight(&self) -> usize {
        self.lock().processing.len()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Completion handle for a key handed out by [`WorkQueue::get`]
///
/// Dropping the lease marks the key done.
pub struct QueueLease {
    key: String,
    queue: WorkQueue,
    finished: bool,
}

impl QueueLease {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn done(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.queue.done(&self.key);
        }
    }
}

impl Drop for QueueLease {
    fn drop(&mut self) {
        self.finish();
    }
}
