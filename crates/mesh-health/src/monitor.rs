//! Node health monitor
//!
//! The tracked-node map is owned here exclusively; callers get cloned
//! snapshots. One slow node cannot stall a pass: probes are fanned out
//! concurrently and each carries its own deadline.

use chrono::{DateTime, Utc};
use mesh_common::{MonitorConfig, NodeEvent};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::probe::HealthProbe;

/// Node liveness classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeHealth {
    /// Not yet probed
    Unknown,
    /// Last probe succeeded
    Healthy,
    /// Node answered but reported failure
    Unhealthy,
    /// Node could not be reached
    Unreachable,
}

struct TrackedNode {
    address: String,
    status: NodeHealth,
    consecutive_failures: u32,
    latency_ms: u32,
    message: String,
    last_check: Option<DateTime<Utc>>,
    last_healthy: Option<DateTime<Utc>>,
}

impl TrackedNode {
    fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            status: NodeHealth::Unknown,
            consecutive_failures: 0,
            latency_ms: 0,
            message: String::new(),
            last_check: None,
            last_healthy: None,
        }
    }
}

/// Point-in-time view of a tracked node
#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    /// Node id
    pub id: String,
    /// Probe address
    pub address: String,
    /// Liveness classification from the most recent probe
    pub status: NodeHealth,
    /// Probes failed in a row
    pub consecutive_failures: u32,
    /// Round-trip time of the last probe
    pub latency_ms: u32,
    /// Human-readable outcome of the last probe
    pub message: String,
    /// When the node was last probed
    pub last_check: Option<DateTime<Utc>>,
    /// When the node was last seen healthy
    pub last_healthy: Option<DateTime<Utc>>,
}

struct MonitorInner {
    nodes: RwLock<HashMap<String, TrackedNode>>,
    probe: Arc<dyn HealthProbe>,
    config: MonitorConfig,
    events: broadcast::Sender<NodeEvent>,
    running: AtomicBool,
}

/// Periodic health monitor over a set of tracked nodes
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    /// Create a monitor over the given probe
    pub fn new(probe: Arc<dyn HealthProbe>, config: MonitorConfig) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(MonitorInner {
                nodes: RwLock::new(HashMap::new()),
                probe,
                config,
                events,
                running: AtomicBool::new(false),
            }),
            monitor_task: Mutex::new(None),
        }
    }

    /// Subscribe to node liveness events
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.inner.events.subscribe()
    }

    /// Track a node. Logged no-op if the id is already tracked.
    pub fn add_node(&self, id: &str, address: &str) {
        let mut nodes = self.inner.nodes.write();
        if nodes.contains_key(id) {
            tracing::debug!(id, "node already tracked");
            return;
        }
        nodes.insert(id.to_string(), TrackedNode::new(address));
        tracing::info!(id, address, "node added to health monitoring");
    }

    /// Stop tracking a node. Logged no-op if unknown.
    pub fn remove_node(&self, id: &str) {
        if self.inner.nodes.write().remove(id).is_none() {
            tracing::debug!(id, "cannot remove unknown node");
            return;
        }
        tracing::info!(id, "node removed from health monitoring");
    }

    /// Probe one node now and update its classification
    pub async fn check_node_health(&self, id: &str) {
        self.inner.check_node(id).await;
    }

    /// Probe every tracked node concurrently, joining before returning
    pub async fn monitor_nodes(&self) {
        monitor_pass(&self.inner).await;
    }

    /// Schedule `monitor_nodes` on the configured interval. A second call
    /// is a logged no-op.
    pub fn start_monitoring(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("health monitor already started");
            return;
        }
        tracing::info!(
            interval_ms = self.inner.config.check_interval_ms,
            "starting health monitor"
        );
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(inner.config.check_interval_ms));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                monitor_pass(&inner).await;
            }
        });
        *self.monitor_task.lock() = Some(handle);
    }

    /// Cancel the periodic monitoring task
    pub fn stop_monitoring(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            tracing::warn!("health monitor not running");
            return;
        }
        if let Some(task) = self.monitor_task.lock().take() {
            task.abort();
        }
        tracing::info!("health monitor stopped");
    }

    /// Snapshot of one tracked node
    pub fn get_node_status(&self, id: &str) -> Option<NodeSnapshot> {
        let nodes = self.inner.nodes.read();
        nodes.get(id).map(|n| snapshot(id, n))
    }

    /// Snapshot of every tracked node
    pub fn get_all_nodes_status(&self) -> Vec<NodeSnapshot> {
        self.inner
            .nodes
            .read()
            .iter()
            .map(|(id, n)| snapshot(id, n))
            .collect()
    }

    /// Nodes currently failing or unreachable
    pub fn get_unhealthy(&self) -> Vec<NodeSnapshot> {
        self.inner
            .nodes
            .read()
            .iter()
            .filter(|(_, n)| matches!(n.status, NodeHealth::Unhealthy | NodeHealth::Unreachable))
            .map(|(id, n)| snapshot(id, n))
            .collect()
    }
}

fn snapshot(id: &str, node: &TrackedNode) -> NodeSnapshot {
    NodeSnapshot {
        id: id.to_string(),
        address: node.address.clone(),
        status: node.status,
        consecutive_failures: node.consecutive_failures,
        latency_ms: node.latency_ms,
        message: node.message.clone(),
        last_check: node.last_check,
        last_healthy: node.last_healthy,
    }
}

async fn monitor_pass(inner: &Arc<MonitorInner>) {
    let ids: Vec<String> = inner.nodes.read().keys().cloned().collect();
    let mut tasks = Vec::new();
    for id in ids {
        let inner = Arc::clone(inner);
        tasks.push(tokio::spawn(async move { inner.check_node(&id).await }));
    }
    for task in tasks {
        let _ = task.await;
    }
}

impl MonitorInner {
    async fn check_node(&self, id: &str) {
        let address = {
            let nodes = self.nodes.read();
            match nodes.get(id) {
                None => return,
                Some(n) => n.address.clone(),
            }
        };

        let deadline = Duration::from_millis(self.config.probe_timeout_ms);
        let outcome = tokio::time::timeout(deadline, self.probe.probe(&address)).await;

        let event = {
            let mut nodes = self.nodes.write();
            let Some(node) = nodes.get_mut(id) else { return };
            node.last_check = Some(Utc::now());
            match outcome {
                Ok(Ok(o)) if o.ok => {
                    node.status = NodeHealth::Healthy;
                    node.consecutive_failures = 0;
                    node.latency_ms = o.latency_ms;
                    node.message = format!("probe ok ({})", o.status_code);
                    node.last_healthy = Some(Utc::now());
                    None
                }
                Ok(Ok(o)) => {
                    node.status = NodeHealth::Unhealthy;
                    node.consecutive_failures += 1;
                    node.latency_ms = o.latency_ms;
                    node.message = format!("probe failed ({})", o.status_code);
                    Some(NodeEvent::Unhealthy { id: id.to_string() })
                }
                Ok(Err(e)) => {
                    node.status = NodeHealth::Unreachable;
                    node.consecutive_failures += 1;
                    node.message = e.to_string();
                    Some(NodeEvent::Unreachable { id: id.to_string() })
                }
                Err(_) => {
                    node.status = NodeHealth::Unreachable;
                    node.consecutive_failures += 1;
                    node.message = format!("probe timed out after {} ms", self.config.probe_timeout_ms);
                    Some(NodeEvent::Unreachable { id: id.to_string() })
                }
            }
        };

        match &event {
            None => tracing::debug!(id, address = %address, "node healthy"),
            Some(NodeEvent::Unhealthy { .. }) => {
                tracing::warn!(id, address = %address, "node unhealthy");
            }
            Some(NodeEvent::Unreachable { .. }) => {
                tracing::warn!(id, address = %address, "node unreachable");
            }
        }
        if let Some(event) = event {
            let _ = self.events.send(event);
        }
    }
}
