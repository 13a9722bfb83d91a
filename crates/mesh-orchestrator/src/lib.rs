//! Meshguard Orchestrator - the composition root
//!
//! Wires the subsystems together: gossip discovery feeds the peer
//! connection manager and the health monitor, and node liveness events are
//! translated into issues for the remediation dispatcher. Each wiring is a
//! small pump task owned here; the subsystems themselves stay decoupled.

#![warn(missing_docs)]

use mesh_common::{MeshConfig, MeshResult, NodeEvent};
use mesh_gossip::GossipTransport;
use mesh_health::{HealthMonitor, HealthProbe, NodeHealth, NodeSnapshot};
use mesh_peering::{PeerConnectionManager, PeerSnapshot, PeerTransport};
use mesh_remediation::{
    CommandExecutor, Issue, IssueType, Notifier, NotifierSet, RemediationActions,
    RemediationDispatcher, RemediationOutcome,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Aggregate system health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OverallStatus {
    /// Every tracked node is healthy or not yet probed
    Healthy,
    /// At least one node is unhealthy or unreachable
    Degraded,
}

/// Point-in-time view of the whole mesh
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    /// Aggregate classification
    pub overall: OverallStatus,
    /// Peer connection snapshots
    pub peers: Vec<PeerSnapshot>,
    /// Tracked node snapshots
    pub nodes: Vec<NodeSnapshot>,
    /// Recent remediation outcomes, oldest first
    pub remediations: Vec<RemediationOutcome>,
}

/// Composition root over discovery, peering, monitoring and remediation
pub struct Orchestrator {
    /// Peer connection manager
    pub peers: Arc<PeerConnectionManager>,
    /// Node health monitor
    pub monitor: Arc<HealthMonitor>,
    /// Remediation dispatcher
    pub dispatcher: Arc<RemediationDispatcher>,
    /// Discovery transport
    pub gossip: Arc<GossipTransport>,
    pumps: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl Orchestrator {
    /// Build the full stack from one config and the injected collaborators
    pub fn new(
        config: MeshConfig,
        transport: Arc<dyn PeerTransport>,
        probe: Arc<dyn HealthProbe>,
        executor: Arc<dyn CommandExecutor>,
        notifiers: Vec<Arc<dyn Notifier>>,
    ) -> Self {
        let peers = Arc::new(PeerConnectionManager::new(transport, config.peering.clone()));
        let monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&probe),
            config.monitor.clone(),
        ));
        let actions = RemediationActions::new(
            executor,
            probe,
            Arc::new(NotifierSet::new(notifiers)),
            config.remediation.clone(),
        );
        let dispatcher = Arc::new(RemediationDispatcher::new(actions, &config.remediation));
        let gossip = Arc::new(GossipTransport::new(config.gossip.clone()));
        Self {
            peers,
            monitor,
            dispatcher,
            gossip,
            pumps: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Start every subsystem and the wiring pumps. A second call is a
    /// logged no-op.
    pub async fn start(&self) -> MeshResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("orchestrator already started");
            return Ok(());
        }
        let mut discovered = match self.gossip.start().await {
            Ok(rx) => rx,
            Err(e) => {
                // leave the orchestrator restartable
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        self.peers.start().await;
        self.monitor.start_monitoring();

        // gossip -> peering + monitoring
        let peers = Arc::clone(&self.peers);
        let monitor = Arc::clone(&self.monitor);
        let discovery_pump = tokio::spawn(async move {
            while let Some(peer) = discovered.recv().await {
                tracing::info!(
                    node_id = %peer.node_id,
                    address = %peer.address,
                    "tracking discovered peer"
                );
                peers.add_peer(&peer.address);
                monitor.add_node(&peer.node_id, &peer.address);
            }
        });

        // node events -> issues -> remediation
        let monitor = Arc::clone(&self.monitor);
        let dispatcher = Arc::clone(&self.dispatcher);
        let mut events = self.monitor.subscribe();
        let issue_pump = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let (issue_type, id) = match event {
                            NodeEvent::Unhealthy { id } => (IssueType::NodeFailure, id),
                            NodeEvent::Unreachable { id } => (IssueType::Unreachable, id),
                        };
                        // node may have been removed since the event fired
                        let Some(node) = monitor.get_node_status(&id) else {
                            continue;
                        };
                        let outcome = dispatcher
                            .handle_issue(Issue::new(issue_type, &id, &node.address))
                            .await;
                        tracing::info!(
                            node_id = %outcome.node_id,
                            action = ?outcome.action,
                            success = outcome.success,
                            "issue handled"
                        );
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "issue pump lagged behind node events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        *self.pumps.lock() = vec![discovery_pump, issue_pump];
        tracing::info!("orchestrator started");
        Ok(())
    }

    /// Stop the pumps and every subsystem
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            tracing::warn!("orchestrator not running");
            return;
        }
        for pump in self.pumps.lock().drain(..) {
            pump.abort();
        }
        self.gossip.stop();
        self.monitor.stop_monitoring();
        self.peers.stop().await;
        tracing::info!("orchestrator stopped");
    }

    /// Snapshot of peers, nodes and recent remediations
    pub fn system_status(&self) -> SystemStatus {
        let nodes = self.monitor.get_all_nodes_status();
        let degraded = nodes
            .iter()
            .any(|n| matches!(n.status, NodeHealth::Unhealthy | NodeHealth::Unreachable));
        SystemStatus {
            overall: if degraded {
                OverallStatus::Degraded
            } else {
                OverallStatus::Healthy
            },
            peers: self.peers.get_peer_status(),
            nodes,
            remediations: self.dispatcher.history(),
        }
    }
}
