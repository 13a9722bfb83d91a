//! Meshguard Gossip - UDP peer discovery
//!
//! Nodes announce themselves over UDP to their seed addresses plus a random
//! sample of peers they already know. A node that learns about a newcomer
//! replies with its full roster, so membership information spreads
//! epidemically. Newly learned peers are handed to the consumer over an
//! mpsc channel; feeding them into the peer connection manager is the
//! orchestrator's job, not this crate's.
//!
//! The wire format is one JSON datagram per message. Malformed datagrams
//! are logged and dropped; the receive loop never dies.

#![warn(missing_docs)]

use dashmap::DashMap;
use mesh_common::{GossipConfig, MeshError, MeshResult};
use parking_lot::{Mutex, RwLock};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Gossip wire messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GossipMessage {
    /// "I exist at this address"
    Announce {
        /// Announcing node id
        node_id: String,
        /// Address the node can be reached at
        address: String,
    },
    /// Roster reply sent to newly discovered nodes
    PeerList {
        /// Every peer the sender knows about, itself included
        peers: Vec<PeerInfo>,
    },
}

/// One known peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Peer node id
    pub node_id: String,
    /// Peer address
    pub address: String,
}

/// A peer learned from gossip, handed to the consumer exactly once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeer {
    /// Peer node id
    pub node_id: String,
    /// Peer address
    pub address: String,
}

struct GossipInner {
    config: GossipConfig,
    peers: DashMap<String, PeerInfo>,
    local_addr: RwLock<Option<SocketAddr>>,
    running: AtomicBool,
}

impl GossipInner {
    /// Record a peer; returns true only the first time the id is seen
    fn learn(&self, node_id: &str, address: &str) -> bool {
        match self.peers.entry(node_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(PeerInfo {
                    node_id: node_id.to_string(),
                    address: address.to_string(),
                });
                true
            }
        }
    }

    /// Address we announce. Falls back to the bound address when the
    /// config leaves `advertise_addr` empty.
    fn advertise(&self) -> String {
        if self.config.advertise_addr.is_empty() {
            self.local_addr
                .read()
                .map(|a| a.to_string())
                .unwrap_or_default()
        } else {
            self.config.advertise_addr.clone()
        }
    }

    /// Everything we know, ourselves included
    fn roster(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<PeerInfo> = self.peers.iter().map(|p| p.value().clone()).collect();
        peers.push(PeerInfo {
            node_id: self.config.node_id.clone(),
            address: self.advertise(),
        });
        peers
    }

    /// Seeds plus a random sample of known peers
    fn announce_targets(&self) -> Vec<SocketAddr> {
        let mut targets = Vec::new();
        for seed in &self.config.seeds {
            match seed.parse() {
                Ok(addr) => targets.push(addr),
                Err(e) => tracing::debug!(seed = %seed, error = %e, "unparseable seed address"),
            }
        }
        let known: Vec<SocketAddr> = self
            .peers
            .iter()
            .filter_map(|p| p.value().address.parse().ok())
            .collect();
        let mut rng = rand::thread_rng();
        targets.extend(
            known
                .choose_multiple(&mut rng, self.config.fanout)
                .copied(),
        );
        targets
    }
}

/// UDP discovery transport
pub struct GossipTransport {
    inner: Arc<GossipInner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl GossipTransport {
    /// Create a transport; nothing is bound until [`start`](Self::start)
    pub fn new(config: GossipConfig) -> Self {
        Self {
            inner: Arc::new(GossipInner {
                config,
                peers: DashMap::new(),
                local_addr: RwLock::new(None),
                running: AtomicBool::new(false),
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Bind the socket and start the announce and receive loops. The
    /// returned channel yields each newly discovered peer exactly once.
    pub async fn start(&self) -> MeshResult<mpsc::Receiver<DiscoveredPeer>> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(MeshError::Gossip("transport already running".into()));
        }
        let socket = UdpSocket::bind(&self.inner.config.bind_addr)
            .await
            .map_err(|e| {
                self.inner.running.store(false, Ordering::SeqCst);
                MeshError::Gossip(format!("bind {}: {e}", self.inner.config.bind_addr))
            })?;
        let socket = Arc::new(socket);
        let local = socket
            .local_addr()
            .map_err(|e| MeshError::Gossip(e.to_string()))?;
        *self.inner.local_addr.write() = Some(local);
        tracing::info!(
            %local,
            node_id = %self.inner.config.node_id,
            "gossip transport started"
        );

        let (tx, rx) = mpsc::channel(64);

        let recv_inner = Arc::clone(&self.inner);
        let recv_socket = Arc::clone(&socket);
        let recv_task = tokio::spawn(async move {
            recv_loop(recv_inner, recv_socket, tx).await;
        });

        let announce_inner = Arc::clone(&self.inner);
        let announce_task = tokio::spawn(async move {
            announce_loop(announce_inner, socket).await;
        });

        *self.tasks.lock() = vec![recv_task, announce_task];
        Ok(rx)
    }

    /// Stop both loops
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            tracing::warn!("gossip transport not running");
            return;
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        tracing::info!("gossip transport stopped");
    }

    /// Address the socket is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.read()
    }

    /// Snapshot of every peer learned so far
    pub fn known_peers(&self) -> Vec<PeerInfo> {
        self.inner.peers.iter().map(|p| p.value().clone()).collect()
    }
}

async fn recv_loop(
    inner: Arc<GossipInner>,
    socket: Arc<UdpSocket>,
    tx: mpsc::Sender<DiscoveredPeer>,
) {
    let mut buf = vec![0u8; 2048];
    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "gossip recv failed");
                continue;
            }
        };
        let message: GossipMessage = match serde_json::from_slice(&buf[..len]) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(%src, error = %e, "dropping malformed gossip datagram");
                continue;
            }
        };
        match message {
            GossipMessage::Announce { node_id, address } => {
                if node_id == inner.config.node_id {
                    continue;
                }
                if inner.learn(&node_id, &address) {
                    tracing::info!(node_id = %node_id, address = %address, %src, "discovered peer");
                    forward(&tx, node_id, address).await;
                    // help the newcomer converge
                    let reply = GossipMessage::PeerList {
                        peers: inner.roster(),
                    };
                    send_message(&socket, &reply, src).await;
                }
            }
            GossipMessage::PeerList { peers } => {
                for peer in peers {
                    if peer.node_id == inner.config.node_id {
                        continue;
                    }
                    if inner.learn(&peer.node_id, &peer.address) {
                        tracing::info!(node_id = %peer.node_id, address = %peer.address, "discovered peer via roster");
                        forward(&tx, peer.node_id, peer.address).await;
                    }
                }
            }
        }
    }
}

async fn forward(tx: &mpsc::Sender<DiscoveredPeer>, node_id: String, address: String) {
    if tx.send(DiscoveredPeer { node_id, address }).await.is_err() {
        tracing::debug!("discovery consumer dropped");
    }
}

async fn announce_loop(inner: Arc<GossipInner>, socket: Arc<UdpSocket>) {
    let mut interval =
        tokio::time::interval(Duration::from_millis(inner.config.announce_interval_ms));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let message = GossipMessage::Announce {
            node_id: inner.config.node_id.clone(),
            address: inner.advertise(),
        };
        for target in inner.announce_targets() {
            send_message(&socket, &message, target).await;
        }
    }
}

async fn send_message(socket: &UdpSocket, message: &GossipMessage, target: SocketAddr) {
    match serde_json::to_vec(message) {
        Ok(payload) => {
            if let Err(e) = socket.send_to(&payload, target).await {
                tracing::debug!(%target, error = %e, "gossip send failed");
            }
        }
        Err(e) => tracing::warn!(error = %e, "gossip encode failed"),
    }
}
