//! Change filter for pod watch updates
//!
//! Decides which `(old, new)` pod transitions represent a freshly observed
//! container restart worth reconciling. Decisions are pure functions of the
//! two snapshots and the static [`FilterConfig`].

use k8s_openapi::api::core::v1::Pod;
use regex::Regex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::models::PodKey;

/// Default ceiling above which a pod is treated as already known to be noisy
pub const DEFAULT_IGNORE_RESTART_COUNT: i32 = 30;

/// Namespace and pod name patterns plus the restart ceiling
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub ignored_namespaces: Vec<Regex>,
    /// Empty means every namespace is watched
    pub watched_namespaces: Vec<Regex>,
    pub ignored_pod_prefixes: Vec<Regex>,
    /// Empty means every pod name is watched
    pub watched_pod_prefixes: Vec<Regex>,
    pub ignore_restart_count: i32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            ignored_namespaces: Vec::new(),
            watched_namespaces: Vec::new(),
            ignored_pod_prefixes: Vec::new(),
            watched_pod_prefixes: Vec::new(),
            ignore_restart_count: DEFAULT_IGNORE_RESTART_COUNT,
        }
    }
}

/// Parse a comma-separated list of regular expressions.
///
/// Blank entries are skipped. Each pattern is matched unanchored, so a plain
/// word matches as a substring.
pub fn parse_patterns(raw: &str) -> Result<Vec<Regex>> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| Regex::new(p).map_err(|e| Error::Config(format!("invalid pattern {p:?}: {e}"))))
        .collect()
}

/// Sum of restart counts across the pod's main containers
pub fn total_restarts(pod: &Pod) -> i32 {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| statuses.iter().map(|c| c.restart_count).sum())
        .unwrap_or(0)
}

/// Stateless filter applied to every pod update from the watch stream
#[derive(Debug, Clone, Default)]
pub struct ChangeFilter {
    config: FilterConfig,
}

impl ChangeFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    /// Returns the pod key when `new` shows more restarts than `old`.
    pub fn evaluate(&self, old: &Pod, new: &Pod) -> Option<PodKey> {
        let key = PodKey::from_pod(new);

        if !self.namespace_allowed(&key.namespace) || !self.pod_name_allowed(&key.name) {
            return None;
        }

        let new_restarts = total_restarts(new);
        if new_restarts > self.config.ignore_restart_count {
            info!(
                pod = %key,
                restart_count = new_restarts,
                ceiling = self.config.ignore_restart_count,
                "Ignore: restart count above ceiling"
            );
            return None;
        }

        let old_restarts = total_restarts(old);
        if new_restarts > old_restarts {
            info!(
                pod = %key,
                old_restart_count = old_restarts,
                new_restart_count = new_restarts,
                "Found: pod restarted"
            );
            Some(key)
        } else {
            None
        }
    }

    fn namespace_allowed(&self, namespace: &str) -> bool {
        if let Some(pattern) = first_match(&self.config.ignored_namespaces, namespace) {
            debug!(namespace, pattern = %pattern, "Ignore: namespace is in the ignored list");
            return false;
        }
        self.config.watched_namespaces.is_empty()
            || first_match(&self.config.watched_namespaces, namespace).is_some()
    }

    fn pod_name_allowed(&self, name: &str) -> bool {
        if let Some(pattern) = first_match(&self.config.ignored_pod_prefixes, name) {
            debug!(pod_name = name, pattern = %pattern, "Ignore: pod has an ignored name prefix");
            return false;
        }
        self.config.watched_pod_prefixes.is_empty()
            || first_match(&self.config.watched_pod_prefixes, name).is_some()
    }
}

fn first_match<'a>(patterns: &'a [Regex], subject: &str) -> Option<&'a Regex> {
    patterns.iter().find(|p| p.is_match(subject))
}
