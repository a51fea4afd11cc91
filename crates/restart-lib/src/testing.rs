//! Fixtures and fakes shared by unit tests

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use k8s_openapi::api::core::v1::{
    Container, ContainerState, ContainerStateRunning, ContainerStateTerminated,
    ContainerStateWaiting, ContainerStatus, Event, EventSource, Node, NodeCondition, NodeSpec,
    NodeStatus, NodeSystemInfo, ObjectReference, Pod, PodCondition, PodSpec, PodStatus,
    ResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::core::ErrorResponse;

use crate::cluster::ClusterSource;
use crate::error::{Error, Result};
use crate::models::{Clock, Notification};
use crate::slack::Notifier;

pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn running(since: DateTime<Utc>) -> ContainerState {
    ContainerState {
        running: Some(ContainerStateRunning {
            started_at: Some(Time(since)),
        }),
        ..Default::default()
    }
}

pub fn waiting(reason: &str) -> ContainerState {
    ContainerState {
        waiting: Some(ContainerStateWaiting {
            reason: Some(reason.to_string()),
            message: None,
        }),
        ..Default::default()
    }
}

pub fn terminated(reason: Option<&str>, exit_code: i32, finished: DateTime<Utc>) -> ContainerState {
    ContainerState {
        terminated: Some(ContainerStateTerminated {
            exit_code,
            reason: reason.map(str::to_string),
            started_at: Some(Time(finished - chrono::Duration::minutes(5))),
            finished_at: Some(Time(finished)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn status(name: &str, restarts: i32) -> ContainerStatus {
    ContainerStatus {
        name: name.to_string(),
        restart_count: restarts,
        ..Default::default()
    }
}

/// Builder for pod fixtures
pub struct PodBuilder {
    pod: Pod,
}

impl PodBuilder {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            pod: Pod {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    namespace: Some(namespace.to_string()),
                    creation_timestamp: Some(Time(ts(0))),
                    ..Default::default()
                },
                spec: Some(PodSpec {
                    node_name: Some("node-1".to_string()),
                    ..Default::default()
                }),
                status: Some(PodStatus {
                    phase: Some("Running".to_string()),
                    ..Default::default()
                }),
            },
        }
    }

    pub fn container(mut self, status: ContainerStatus) -> Self {
        let spec = self.pod.spec.get_or_insert_with(Default::default);
        spec.containers.push(Container {
            name: status.name.clone(),
            ..Default::default()
        });
        let pod_status = self.pod.status.get_or_insert_with(Default::default);
        pod_status
            .container_statuses
            .get_or_insert_with(Vec::new)
            .push(status);
        self
    }

    pub fn init_container(mut self, status: ContainerStatus) -> Self {
        let spec = self.pod.spec.get_or_insert_with(Default::default);
        spec.init_containers
            .get_or_insert_with(Vec::new)
            .push(Container {
                name: status.name.clone(),
                ..Default::default()
            });
        let pod_status = self.pod.status.get_or_insert_with(Default::default);
        pod_status
            .init_container_statuses
            .get_or_insert_with(Vec::new)
            .push(status);
        self
    }

    pub fn resources(mut self, container: &str, limits: &[(&str, &str)], requests: &[(&str, &str)]) -> Self {
        let to_map = |pairs: &[(&str, &str)]| {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
                .collect::<BTreeMap<_, _>>()
        };
        if let Some(spec) = self.pod.spec.as_mut() {
            if let Some(c) = spec.containers.iter_mut().find(|c| c.name == container) {
                c.resources = Some(ResourceRequirements {
                    limits: Some(to_map(limits)),
                    requests: Some(to_map(requests)),
                    ..Default::default()
                });
            }
        }
        self
    }

    pub fn ready_condition(mut self, ready: bool) -> Self {
        let pod_status = self.pod.status.get_or_insert_with(Default::default);
        pod_status.conditions.get_or_insert_with(Vec::new).push(PodCondition {
            type_: "Ready".to_string(),
            status: if ready { "True" } else { "False" }.to_string(),
            ..Default::default()
        });
        self
    }

    pub fn deleting(mut self, node_lost: bool) -> Self {
        self.pod.metadata.deletion_timestamp = Some(Time(ts(100)));
        if node_lost {
            let pod_status = self.pod.status.get_or_insert_with(Default::default);
            pod_status.reason = Some("NodeLost".to_string());
        }
        self
    }

    pub fn annotation(mut self, key: &str, value: &str) -> Self {
        self.pod
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.pod
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> Pod {
        self.pod
    }
}

/// A pod with a single container `app` that has restarted `restarts` times
pub fn restarted_pod(namespace: &str, name: &str, restarts: i32) -> Pod {
    let mut app = status("app", restarts);
    app.ready = true;
    app.state = Some(running(ts(3000)));
    if restarts > 0 {
        app.last_state = Some(terminated(Some("Error"), 137, ts(2990)));
    }
    PodBuilder::new(namespace, name).container(app).build()
}

pub fn node(name: &str, ready: bool, unschedulable: bool) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            creation_timestamp: Some(Time(ts(0))),
            ..Default::default()
        },
        spec: Some(NodeSpec {
            unschedulable: Some(unschedulable),
            ..Default::default()
        }),
        status: Some(NodeStatus {
            conditions: Some(vec![NodeCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            node_info: Some(NodeSystemInfo {
                kubelet_version: "v1.28.3".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
    }
}

pub fn event(kind: &str, object: &str, reason: &str, message: &str, last_seen: DateTime<Utc>) -> Event {
    Event {
        metadata: ObjectMeta {
            name: Some(format!("{object}.{}", last_seen.timestamp())),
            ..Default::default()
        },
        involved_object: ObjectReference {
            kind: Some(kind.to_string()),
            name: Some(object.to_string()),
            ..Default::default()
        },
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        type_: Some("Warning".to_string()),
        last_timestamp: Some(Time(last_seen)),
        source: Some(EventSource::default()),
        ..Default::default()
    }
}

/// In-memory [`ClusterSource`] with call recording
#[derive(Default)]
pub struct FakeCluster {
    /// Events per namespace
    pub events: HashMap<String, Vec<Event>>,
    pub nodes: HashMap<String, Node>,
    /// Previous logs keyed by `namespace/pod/container`
    pub logs: HashMap<String, String>,
    pub fail_events: bool,
    pub fail_logs: bool,
    pub calls: Mutex<Vec<String>>,
}

impl FakeCluster {
    pub fn with_node(mut self, node: Node) -> Self {
        let name = node.metadata.name.clone().unwrap_or_default();
        self.nodes.insert(name, node);
        self
    }

    pub fn with_event(mut self, namespace: &str, event: Event) -> Self {
        self.events.entry(namespace.to_string()).or_default().push(event);
        self
    }

    pub fn with_log(mut self, namespace: &str, pod: &str, container: &str, logs: &str) -> Self {
        self.logs
            .insert(format!("{namespace}/{pod}/{container}"), logs.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

pub fn not_found(what: &str) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{what} not found"),
        reason: "NotFound".to_string(),
        code: 404,
    })
}

#[async_trait]
impl ClusterSource for FakeCluster {
    async fn list_events(&self, namespace: &str, field_selector: &str) -> Result<Vec<Event>> {
        self.record(format!("events {namespace} {field_selector}"));
        if self.fail_events {
            return Err(Error::EventList {
                namespace: namespace.to_string(),
                source: not_found("events"),
            });
        }
        let node_only = field_selector.contains("involvedObject.kind=Node");
        Ok(self
            .events
            .get(namespace)
            .into_iter()
            .flatten()
            .filter(|e| !node_only || e.involved_object.kind.as_deref() == Some("Node"))
            .cloned()
            .collect())
    }

    async fn get_node(&self, name: &str) -> Result<Node> {
        self.record(format!("node {name}"));
        self.nodes.get(name).cloned().ok_or_else(|| Error::NodeLookup {
            node: name.to_string(),
            source: not_found("node"),
        })
    }

    async fn previous_container_log(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        tail: i64,
    ) -> Result<String> {
        self.record(format!("logs {namespace}/{pod}/{container} tail={tail}"));
        if self.fail_logs {
            return Err(Error::LogFetch {
                pod: format!("{namespace}/{pod}"),
                container: container.to_string(),
                source: not_found("log"),
            });
        }
        Ok(self
            .logs
            .get(&format!("{namespace}/{pod}/{container}"))
            .cloned()
            .unwrap_or_default())
    }
}

/// Manually advanced clock
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// [`Notifier`] recording every delivery; fails while `fail` is set
#[derive(Default)]
pub struct FakeNotifier {
    pub sent: Mutex<Vec<(Notification, Option<String>)>>,
    pub fail: AtomicBool,
}

impl FakeNotifier {
    pub fn sent(&self) -> Vec<(Notification, Option<String>)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn send(&self, notification: &Notification, channel: Option<&str>) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Notify("webhook returned 500 Internal Server Error".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((notification.clone(), channel.map(str::to_string)));
        Ok(())
    }
}
