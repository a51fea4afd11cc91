//! Restart diagnostics
//!
//! Builds the alert body for one restarted container: pod summary, last
//! termination reason, container state and resources, warning events of the
//! pod and its node, then the tail of the previous container log. The body
//! is kept under the Slack attachment limit by trimming the oldest log lines.

pub mod events;
pub mod format;
pub mod logs;
pub mod status;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use tracing::{debug, warn};

use crate::cluster::ClusterSource;
use crate::error::{Error, Result};
use crate::models::PodKey;

pub use status::PodSummary;

/// Default body cap, leaving headroom under Slack's 8000 character
/// attachment limit
pub const DEFAULT_BODY_CAP: usize = 7500;

/// Everything gathered for one alert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticBundle {
    pub container: String,
    pub summary: String,
    pub reason: String,
    pub container_state: String,
    pub resources: String,
    pub pod_events: String,
    pub node_block: String,
    /// Raw previous log text, before truncation
    pub logs: String,
    /// Final size-capped message body
    pub body: String,
}

/// Gathers diagnostics from the cluster for a restarted container
pub struct DiagnosticsAssembler {
    cluster: Arc<dyn ClusterSource>,
    body_cap: usize,
}

impl DiagnosticsAssembler {
    pub fn new(cluster: Arc<dyn ClusterSource>) -> Self {
        Self::with_body_cap(cluster, DEFAULT_BODY_CAP)
    }

    pub fn with_body_cap(cluster: Arc<dyn ClusterSource>, body_cap: usize) -> Self {
        Self { cluster, body_cap }
    }

    pub fn body_cap(&self) -> usize {
        self.body_cap
    }

    /// Assemble the bundle for `pod.status.container_statuses[container]`
    ///
    /// Any collaborator failure aborts the whole bundle.
    pub async fn assemble(
        &self,
        pod: &Pod,
        container: usize,
        now: DateTime<Utc>,
    ) -> Result<DiagnosticBundle> {
        let key = PodKey::from_pod(pod);
        let status = pod
            .status
            .as_ref()
            .and_then(|s| s.container_statuses.as_ref())
            .and_then(|statuses| statuses.get(container))
            .ok_or_else(|| Error::PodNotFound(format!("{key} container #{container}")))?;

        let summary = PodSummary::derive(pod).render(now);
        let reason = status::last_termination_reason(status);
        let container_state = format::describe_container_state(status);
        let resources = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.containers.iter().find(|c| c.name == status.name))
            .map(format::container_resources)
            .unwrap_or_default();

        let pod_events = {
            let events = self
                .cluster
                .list_events(&key.namespace, events::WARNING_EVENTS)
                .await?;
            events::render_pod_events(&events, &key.name)
        };

        let node_name = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.node_name.as_deref())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::NotScheduled(key.to_string()))?;
        let node_block = {
            let node = self.cluster.get_node(node_name).await?;
            let events = self
                .cluster
                .list_events(events::NODE_EVENTS_NAMESPACE, events::NODE_WARNING_EVENTS)
                .await?;
            events::render_node_block(&node, &events, now)
        };

        let logs = self
            .cluster
            .previous_container_log(&key.namespace, &key.name, &status.name, logs::TAIL_LINES)
            .await?;

        let head = format!(
            "```\n{summary}```\n• Reason: `{reason}`\n• Pod Status\n```\n{container_state}{resources}```\n{pod_events}{node_block}"
        );
        let body = self.fit_body(&key, head, &logs);

        Ok(DiagnosticBundle {
            container: status.name.clone(),
            summary,
            reason,
            container_state,
            resources,
            pod_events,
            node_block,
            logs,
            body,
        })
    }

    fn fit_body(&self, key: &PodKey, mut head: String, logs: &str) -> String {
        if head.len() > self.body_cap {
            warn!(
                pod = %key,
                head_bytes = head.len(),
                body_cap = self.body_cap,
                "Diagnostics exceed the body cap, dropping logs"
            );
            let mut end = self.body_cap;
            while !head.is_char_boundary(end) {
                end -= 1;
            }
            head.truncate(end);
            return head;
        }

        let budget = self.body_cap - head.len();
        let block = logs::render_log_block(logs, budget);
        debug!(
            pod = %key,
            log_bytes = logs.len(),
            block_bytes = block.len(),
            budget,
            "Rendered previous logs"
        );
        head.push_str(&block);
        head
    }
}
