//! Cluster collaborators
//!
//! The restart pipeline reads cluster state through [`ClusterSource`] and
//! the point-in-time [`PodStore`] kept current by [`PodWatcher`].

mod kube_source;
mod store;
mod watcher;

pub use kube_source::KubeClusterSource;
pub use store::PodStore;
pub use watcher::{PodEventHandler, PodWatcher};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Event, Node};

use crate::error::Result;

/// Read access to events, nodes and container logs
#[async_trait]
pub trait ClusterSource: Send + Sync {
    /// List events in `namespace` matching a field selector
    async fn list_events(&self, namespace: &str, field_selector: &str) -> Result<Vec<Event>>;

    async fn get_node(&self, name: &str) -> Result<Node>;

    /// Last `tail` lines of the previous instance of a container, with timestamps
    async fn previous_container_log(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        tail: i64,
    ) -> Result<String>;
}
