//! [`ClusterSource`] backed by the Kubernetes API

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Event, Node, Pod};
use kube::api::{Api, ListParams, LogParams};
use kube::Client;
use tracing::{debug, error};

use super::ClusterSource;
use crate::error::{Error, Result};

/// Cluster reads through a shared `kube::Client`
#[derive(Clone)]
pub struct KubeClusterSource {
    client: Client,
}

impl KubeClusterSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterSource for KubeClusterSource {
    async fn list_events(&self, namespace: &str, field_selector: &str) -> Result<Vec<Event>> {
        let api: Api<Event> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().fields(field_selector);
        let events = api.list(&params).await.map_err(|source| {
            error!(namespace, field_selector, error = %source, "Failed to list events");
            Error::EventList {
                namespace: namespace.to_string(),
                source,
            }
        })?;
        debug!(namespace, field_selector, count = events.items.len(), "Listed events");
        Ok(events.items)
    }

    async fn get_node(&self, name: &str) -> Result<Node> {
        let api: Api<Node> = Api::all(self.client.clone());
        api.get(name).await.map_err(|source| {
            error!(node = name, error = %source, "Failed to get node, probably deleted");
            Error::NodeLookup {
                node: name.to_string(),
                source,
            }
        })
    }

    async fn previous_container_log(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        tail: i64,
    ) -> Result<String> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            container: Some(container.to_string()),
            previous: true,
            timestamps: true,
            tail_lines: Some(tail),
            ..Default::default()
        };
        api.logs(pod, &params).await.map_err(|source| {
            error!(namespace, pod, container, error = %source, "Failed to get previous logs");
            Error::LogFetch {
                pod: format!("{namespace}/{pod}"),
                container: container.to_string(),
                source,
            }
        })
    }
}
