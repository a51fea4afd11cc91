//! Agent configuration
//!
//! Every setting is read from an unprefixed environment variable, e.g.
//! `SLACK_WEBHOOK_URL` or `MUTE_SECONDS`. No setting ends in `_PORT` or
//! `_HOST`, so service links injected by Kubernetes are never picked up.

use std::net::SocketAddr;

use anyhow::{bail, Context, Result};
use restart_lib::filter::{self, FilterConfig, DEFAULT_IGNORE_RESTART_COUNT};
use restart_lib::ledger::DEFAULT_MUTE_SECS;
use restart_lib::reconciler::{self, ReconcileSettings};
use restart_lib::slack::{SlackConfig, DEFAULT_CHANNEL, DEFAULT_CLUSTER_NAME, DEFAULT_USERNAME};
use serde::Deserialize;

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Incoming webhook URL, required
    #[serde(default)]
    pub slack_webhook_url: String,

    #[serde(default = "default_channel")]
    pub slack_channel: String,

    #[serde(default = "default_username")]
    pub slack_username: String,

    /// Cluster label shown in alerts and logs
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    /// Minimum interval between two alerts for one pod
    #[serde(default = "default_mute_seconds")]
    pub mute_seconds: i64,

    #[serde(default = "default_ignore_restart_count")]
    pub ignore_restart_count: i32,

    /// Comma-separated patterns
    #[serde(default)]
    pub ignored_namespaces: String,

    #[serde(default)]
    pub watched_namespaces: String,

    #[serde(default)]
    pub ignored_pod_name_prefixes: String,

    #[serde(default)]
    pub watched_pod_name_prefixes: String,

    #[serde(default)]
    pub ignore_restarts_with_exit_code_zero: bool,

    /// JSON object of pod name prefix to log substrings
    #[serde(default)]
    pub ignored_errors_for_pod_name_prefixes: String,

    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Bind address of the liveness and readiness probes
    #[serde(default = "default_health_listen_address")]
    pub health_listen_address: SocketAddr,
}

fn default_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

fn default_username() -> String {
    DEFAULT_USERNAME.to_string()
}

fn default_cluster_name() -> String {
    DEFAULT_CLUSTER_NAME.to_string()
}

fn default_mute_seconds() -> i64 {
    DEFAULT_MUTE_SECS
}

fn default_ignore_restart_count() -> i32 {
    DEFAULT_IGNORE_RESTART_COUNT
}

fn default_workers() -> usize {
    1
}

fn default_health_listen_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

impl AgentConfig {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        Self::from_environment(config::Environment::default())
    }

    /// Load configuration from an explicit set of variables
    #[cfg(test)]
    pub fn from_vars(vars: &[(&str, &str)]) -> Result<Self> {
        let map: config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self::from_environment(config::Environment::default().source(Some(map)))
    }

    fn from_environment(source: config::Environment) -> Result<Self> {
        let config: AgentConfig = config::Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()
            .context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.slack_webhook_url.trim().is_empty() {
            bail!("SLACK_WEBHOOK_URL must be set");
        }
        if self.mute_seconds < 0 {
            bail!("MUTE_SECONDS must not be negative, got {}", self.mute_seconds);
        }
        if self.workers == 0 {
            bail!("WORKERS must be at least 1");
        }
        self.filter_config()?;
        self.reconcile_settings()?;
        Ok(())
    }

    pub fn filter_config(&self) -> Result<FilterConfig> {
        Ok(FilterConfig {
            ignored_namespaces: filter::parse_patterns(&self.ignored_namespaces)
                .context("IGNORED_NAMESPACES")?,
            watched_namespaces: filter::parse_patterns(&self.watched_namespaces)
                .context("WATCHED_NAMESPACES")?,
            ignored_pod_prefixes: filter::parse_patterns(&self.ignored_pod_name_prefixes)
                .context("IGNORED_POD_NAME_PREFIXES")?,
            watched_pod_prefixes: filter::parse_patterns(&self.watched_pod_name_prefixes)
                .context("WATCHED_POD_NAME_PREFIXES")?,
            ignore_restart_count: self.ignore_restart_count,
        })
    }

    pub fn reconcile_settings(&self) -> Result<ReconcileSettings> {
        Ok(ReconcileSettings {
            cluster_name: self.cluster_name.clone(),
            ignore_restarts_with_exit_code_zero: self.ignore_restarts_with_exit_code_zero,
            ignored_errors: reconciler::parse_ignored_errors(
                &self.ignored_errors_for_pod_name_prefixes,
            )
            .context("IGNORED_ERRORS_FOR_POD_NAME_PREFIXES")?,
        })
    }

    pub fn slack_config(&self) -> SlackConfig {
        SlackConfig {
            webhook_url: self.slack_webhook_url.clone(),
            default_channel: self.slack_channel.clone(),
            username: self.slack_username.clone(),
            cluster_name: self.cluster_name.clone(),
        }
    }

    pub fn mute_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.mute_seconds)
    }
}
