//! Pod status derivation
//!
//! Mirrors the summary `kubectl get pod` prints: init containers are walked
//! first and short-circuit with an `Init:` reason, otherwise main containers
//! are walked in reverse to pick the most specific waiting/terminated reason.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};

use super::format;

/// Derived status line of a pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSummary {
    pub name: String,
    pub ready: usize,
    pub total: usize,
    pub reason: String,
    pub restarts: i32,
    pub last_restart: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
}

impl PodSummary {
    pub fn derive(pod: &Pod) -> Self {
        let status = pod.status.clone().unwrap_or_default();
        let spec = pod.spec.clone().unwrap_or_default();
        let init_total = spec.init_containers.as_ref().map_or(0, Vec::len);

        let mut reason = non_empty(&status.reason)
            .or_else(|| non_empty(&status.phase))
            .unwrap_or_default()
            .to_string();
        let mut restarts = 0;
        let mut ready = 0;
        let mut last_restart = None;
        let mut initializing = false;

        for (i, container) in status.init_container_statuses.iter().flatten().enumerate() {
            restarts += container.restart_count;
            track_last_termination(container, &mut last_restart);

            let state = container.state.clone().unwrap_or_default();
            match (state.terminated, state.waiting) {
                (Some(terminated), _) if terminated.exit_code == 0 => continue,
                (Some(terminated), _) => {
                    reason = match non_empty(&terminated.reason) {
                        Some(r) => format!("Init:{r}"),
                        None => match terminated.signal.filter(|s| *s != 0) {
                            Some(signal) => format!("Init:Signal:{signal}"),
                            None => format!("Init:ExitCode:{}", terminated.exit_code),
                        },
                    };
                }
                (None, Some(waiting))
                    if non_empty(&waiting.reason).is_some_and(|r| r != "PodInitializing") =>
                {
                    reason = format!("Init:{}", waiting.reason.unwrap_or_default());
                }
                _ => reason = format!("Init:{i}/{init_total}"),
            }
            initializing = true;
            break;
        }

        if !initializing {
            restarts = 0;
            let mut has_running = false;
            for container in status.container_statuses.iter().flatten().rev() {
                restarts += container.restart_count;
                track_last_termination(container, &mut last_restart);

                let state = container.state.clone().unwrap_or_default();
                let waiting_reason = state.waiting.as_ref().and_then(|w| non_empty(&w.reason));
                if let Some(r) = waiting_reason {
                    reason = r.to_string();
                } else if let Some(terminated) = state.terminated.as_ref() {
                    reason = match non_empty(&terminated.reason) {
                        Some(r) => r.to_string(),
                        None => match terminated.signal.filter(|s| *s != 0) {
                            Some(signal) => format!("Signal:{signal}"),
                            None => format!("ExitCode:{}", terminated.exit_code),
                        },
                    };
                } else if container.ready && state.running.is_some() {
                    has_running = true;
                    ready += 1;
                }
            }

            // A completed sidecar must not hide containers that still run
            if reason == "Completed" && has_running {
                reason = if pod_ready(pod) { "Running" } else { "NotReady" }.to_string();
            }
        }

        if pod.metadata.deletion_timestamp.is_some() {
            reason = if status.reason.as_deref() == Some("NodeLost") {
                "Unknown".to_string()
            } else {
                "Terminating".to_string()
            };
        }

        Self {
            name: pod.metadata.name.clone().unwrap_or_default(),
            ready,
            total: spec.containers.len(),
            reason,
            restarts,
            last_restart,
            created: pod.metadata.creation_timestamp.as_ref().map(|t| t.0),
        }
    }

    /// Render the `NAME READY STATUS RESTARTS AGE` table
    pub fn render(&self, now: DateTime<Utc>) -> String {
        let restarts = match self.last_restart {
            Some(at) => format!("{} ({} ago)", self.restarts, format::since(Some(at), now)),
            None => self.restarts.to_string(),
        };
        format::pod_table(
            &self.name,
            &format!("{}/{}", self.ready, self.total),
            &self.reason,
            &restarts,
            &format::since(self.created, now),
        )
    }
}

/// `<reason> (ExitCode <code>)` of the container's last termination
pub fn last_termination_reason(status: &ContainerStatus) -> String {
    let terminated = status.last_state.as_ref().and_then(|s| s.terminated.as_ref());
    let reason = terminated.and_then(|t| t.reason.clone()).unwrap_or_default();
    let exit_code = terminated.map_or(0, |t| t.exit_code);
    format!("{reason} (ExitCode {exit_code})")
}

/// True if the container's last termination exited with code 0
pub fn exited_cleanly(status: &ContainerStatus) -> bool {
    status
        .last_state
        .as_ref()
        .and_then(|s| s.terminated.as_ref())
        .is_some_and(|t| t.exit_code == 0)
}

fn pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

fn track_last_termination(container: &ContainerStatus, latest: &mut Option<DateTime<Utc>>) {
    let finished = container
        .last_state
        .as_ref()
        .and_then(|s| s.terminated.as_ref())
        .and_then(|t| t.finished_at.as_ref())
        .map(|t| t.0);
    if let Some(finished) = finished {
        if latest.map_or(true, |l| l < finished) {
            *latest = Some(finished);
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}
