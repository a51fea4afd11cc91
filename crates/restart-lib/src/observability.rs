//! Structured logging for the restart collector
//!
//! Every lifecycle event of an alert is emitted as a `tracing` event with an
//! `event` field and the cluster name, so the JSON output can be filtered
//! per cluster and per pod.

use std::time::Duration;

use tracing::{error, info, warn};

use crate::error::Error;

/// Emits alert lifecycle events tagged with the cluster name
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    cluster: String,
}

impl StructuredLogger {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
        }
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Log collector startup
    pub fn log_startup(&self, version: &str, workers: usize, mute_secs: i64) {
        info!(
            event = "collector_started",
            cluster = %self.cluster,
            version = %version,
            workers = workers,
            mute_secs = mute_secs,
            "Pod restart collector started"
        );
    }

    /// Log collector shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "collector_shutdown",
            cluster = %self.cluster,
            reason = %reason,
            "Pod restart collector shutting down"
        );
    }

    /// Log a restart picked up for reporting
    pub fn log_restart(&self, pod: &str, container: &str, restart_count: i32) {
        info!(
            event = "restart_handled",
            cluster = %self.cluster,
            pod = %pod,
            container = %container,
            restart_count = restart_count,
            "Handle: pod restarted"
        );
    }

    /// Log an alert suppressed by the mute window
    pub fn log_muted(&self, pod: &str, since_last: &str) {
        info!(
            event = "alert_muted",
            cluster = %self.cluster,
            pod = %pod,
            since_last = %since_last,
            "Skip: alert already sent recently"
        );
    }

    /// Log a restart skipped by an ignore rule
    pub fn log_ignored(&self, pod: &str, container: &str, rule: &str) {
        info!(
            event = "restart_ignored",
            cluster = %self.cluster,
            pod = %pod,
            container = %container,
            rule = %rule,
            "Ignore: restart matches an ignore rule"
        );
    }

    /// Log a delivered alert
    pub fn log_alert_sent(&self, pod: &str, channel: &str, body_bytes: usize) {
        info!(
            event = "alert_sent",
            cluster = %self.cluster,
            pod = %pod,
            channel = %channel,
            body_bytes = body_bytes,
            "Restart alert sent"
        );
    }

    /// Log a failed attempt that will be retried
    pub fn log_retry(&self, pod: &str, attempt: u32, delay: Duration, err: &Error) {
        warn!(
            event = "alert_retry",
            cluster = %self.cluster,
            pod = %pod,
            attempt = attempt,
            delay_ms = delay.as_millis() as u64,
            transient = err.is_transient(),
            error = %err,
            "Error syncing pod, retrying"
        );
    }

    /// Log an alert given up after exhausting retries
    pub fn log_dropped(&self, pod: &str, attempts: u32, err: &Error) {
        error!(
            event = "alert_dropped",
            cluster = %self.cluster,
            pod = %pod,
            attempts = attempts,
            error = %err,
            "Dropping pod out of the queue"
        );
    }
}
