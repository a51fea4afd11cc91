//! Restart reconciliation
//!
//! Turns a queued pod key into at most one Slack alert: mute check, restarted
//! container selection, diagnostics, dispatch, then ledger update. Errors are
//! returned untouched; retry decisions belong to the controller.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ContainerStatus;

use crate::cluster::PodStore;
use crate::diagnostics::{format, logs, status, DiagnosticsAssembler};
use crate::error::{Error, Result};
use crate::health::{components, HealthRegistry};
use crate::ledger::MuteLedger;
use crate::models::{Clock, PodKey, SystemClock};
use crate::observability::StructuredLogger;
use crate::slack::{self, Notifier};

/// Pod name prefix with the log substrings that silence its restarts
pub type IgnoredErrors = Vec<(String, Vec<String>)>;

/// Parse a JSON object of `{"<pod name prefix>": ["<substring>", ...]}`
///
/// An empty string yields no rules.
pub fn parse_ignored_errors(raw: &str) -> Result<IgnoredErrors> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let rules: BTreeMap<String, Vec<String>> = serde_json::from_str(raw)
        .map_err(|e| Error::Config(format!("invalid ignored errors map: {e}")))?;
    Ok(rules.into_iter().collect())
}

/// Alert content and selection settings
#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub cluster_name: String,
    /// Skip containers whose last termination exited with code 0
    pub ignore_restarts_with_exit_code_zero: bool,
    pub ignored_errors: IgnoredErrors,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            cluster_name: slack::DEFAULT_CLUSTER_NAME.to_string(),
            ignore_restarts_with_exit_code_zero: false,
            ignored_errors: Vec::new(),
        }
    }
}

impl ReconcileSettings {
    /// The ignored substring found in `last_line`, if a rule for `pod_name` has one
    pub fn ignored_error(&self, pod_name: &str, last_line: &str) -> Option<&str> {
        self.ignored_errors
            .iter()
            .filter(|(prefix, _)| pod_name.starts_with(prefix.as_str()))
            .flat_map(|(_, substrings)| substrings.iter())
            .find(|s| last_line.contains(s.as_str()))
            .map(String::as_str)
    }

    fn skips_clean_exit(&self, status: &ContainerStatus) -> bool {
        self.ignore_restarts_with_exit_code_zero && status::exited_cleanly(status)
    }
}

/// Processes one queued key
#[async_trait]
pub trait Reconcile: Send + Sync {
    async fn reconcile(&self, key: &str) -> Result<()>;
}

/// Alerts on the first restarted container of a pod
pub struct Reconciler {
    store: Arc<PodStore>,
    ledger: Arc<MuteLedger>,
    assembler: DiagnosticsAssembler,
    notifier: Arc<dyn Notifier>,
    settings: ReconcileSettings,
    clock: Arc<dyn Clock>,
    logger: StructuredLogger,
    health: HealthRegistry,
}

impl Reconciler {
    pub fn new(
        store: Arc<PodStore>,
        ledger: Arc<MuteLedger>,
        assembler: DiagnosticsAssembler,
        notifier: Arc<dyn Notifier>,
        settings: ReconcileSettings,
    ) -> Self {
        let logger = StructuredLogger::new(settings.cluster_name.clone());
        Self {
            store,
            ledger,
            assembler,
            notifier,
            settings,
            clock: Arc::new(SystemClock),
            logger,
            health: HealthRegistry::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    pub fn ledger(&self) -> &MuteLedger {
        &self.ledger
    }

    async fn notify(&self, pod_key: &PodKey, body: String, channel: Option<&str>) -> Result<usize> {
        let notification = slack::restart_notification(&self.settings.cluster_name, pod_key, body);
        match self.notifier.send(&notification, channel).await {
            Ok(()) => {
                self.health.set_healthy(components::NOTIFIER).await;
                Ok(notification.body.len())
            }
            Err(e) => {
                self.health
                    .set_degraded(components::NOTIFIER, format!("Slack delivery failed: {e}"))
                    .await;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Reconcile for Reconciler {
    async fn reconcile(&self, key: &str) -> Result<()> {
        let pod = self
            .store
            .get(key)
            .ok_or_else(|| Error::PodNotFound(key.to_string()))?;
        let pod_key = PodKey::from_pod(&pod);
        let now = self.clock.now();

        if !self.ledger.should_alert(key, now) {
            let since = format::since(self.ledger.last_alert(key), now);
            self.logger.log_muted(key, &since);
            return Ok(());
        }

        let statuses = pod
            .status
            .as_ref()
            .and_then(|s| s.container_statuses.as_deref())
            .unwrap_or_default();

        for (index, container) in statuses.iter().enumerate() {
            if container.restart_count == 0 {
                continue;
            }
            if self.settings.skips_clean_exit(container) {
                self.logger.log_ignored(key, &container.name, "exit code 0");
                continue;
            }

            self.logger
                .log_restart(key, &container.name, container.restart_count);
            let bundle = self.assembler.assemble(&pod, index, now).await?;

            let last_line = logs::last_non_empty_line(&bundle.logs).unwrap_or_default();
            if let Some(ignored) = self.settings.ignored_error(&pod_key.name, last_line) {
                self.logger
                    .log_ignored(key, &container.name, &format!("ignored error {ignored:?}"));
                continue;
            }

            let channel = slack::channel_for_pod(&pod);
            let body_bytes = self.notify(&pod_key, bundle.body, channel.as_deref()).await?;
            self.logger
                .log_alert_sent(key, channel.as_deref().unwrap_or("default"), body_bytes);

            self.ledger.record(key, now);
            self.ledger.sweep(now);
            break;
        }

        Ok(())
    }
}
