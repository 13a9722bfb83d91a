//! Peer connection manager
//!
//! Every mutable peer record lives in a single owned map; callers only see
//! cloned snapshots. Locks are never held across an await point.

use chrono::{DateTime, Utc};
use mesh_common::{MeshError, PeerEvent, PeeringConfig};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::transport::{ConnectionHandle, PeerTransport};

/// Peer connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerStatus {
    /// No connection held
    Disconnected,
    /// A connect attempt is in flight (including backoff between attempts)
    Connecting,
    /// Connection established
    Connected,
}

/// Tracked peer record
struct Peer {
    status: PeerStatus,
    retry_count: u32,
    connection: Option<ConnectionHandle>,
    connected_since: Option<DateTime<Utc>>,
    /// Retry budget spent; the peer stays disconnected until removed and
    /// re-added by an operator.
    exhausted: bool,
}

impl Peer {
    fn new() -> Self {
        Self {
            status: PeerStatus::Disconnected,
            retry_count: 0,
            connection: None,
            connected_since: None,
            exhausted: false,
        }
    }
}

/// Point-in-time view of a tracked peer
#[derive(Debug, Clone, Serialize)]
pub struct PeerSnapshot {
    /// Peer url
    pub url: String,
    /// Connection state
    pub status: PeerStatus,
    /// Failed attempts since the last successful connect
    pub retry_count: u32,
    /// When the current connection was established
    pub connected_since: Option<DateTime<Utc>>,
}

struct ManagerInner {
    peers: RwLock<HashMap<String, Peer>>,
    transport: Arc<dyn PeerTransport>,
    config: PeeringConfig,
    events: broadcast::Sender<PeerEvent>,
    running: AtomicBool,
}

/// Peer connection manager
pub struct PeerConnectionManager {
    inner: Arc<ManagerInner>,
    check_task: Mutex<Option<JoinHandle<()>>>,
}

impl PeerConnectionManager {
    /// Create a manager over the given transport
    pub fn new(transport: Arc<dyn PeerTransport>, config: PeeringConfig) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(ManagerInner {
                peers: RwLock::new(HashMap::new()),
                transport,
                config,
                events,
                running: AtomicBool::new(false),
            }),
            check_task: Mutex::new(None),
        }
    }

    /// Subscribe to peer lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.inner.events.subscribe()
    }

    /// Connect all known peers concurrently, then start the periodic
    /// transport health check. A second call is a logged no-op.
    pub async fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("peer connection manager already started");
            return;
        }
        tracing::info!(
            peers = self.inner.peers.read().len(),
            interval_ms = self.inner.config.health_check_interval_ms,
            "starting peer connection manager"
        );

        connect_all(&self.inner).await;

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(inner.config.health_check_interval_ms));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // Initial pass already ran in start()
            interval.tick().await;
            loop {
                interval.tick().await;
                check_all(&inner).await;
            }
        });
        *self.check_task.lock() = Some(handle);
    }

    /// Cancel the periodic check and disconnect all peers, best-effort
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            tracing::warn!("peer connection manager not running");
            return;
        }
        if let Some(task) = self.check_task.lock().take() {
            task.abort();
        }

        let urls: Vec<String> = self.inner.peers.read().keys().cloned().collect();
        let mut tasks = Vec::new();
        for url in urls {
            let inner = Arc::clone(&self.inner);
            tasks.push(tokio::spawn(async move { inner.disconnect_peer(&url).await }));
        }
        for task in tasks {
            let _ = task.await;
        }
        tracing::info!("peer connection manager stopped");
    }

    /// Register a new peer. If the manager is running the first connect
    /// attempt starts immediately. Logged no-op if already tracked.
    pub fn add_peer(&self, url: &str) {
        {
            let mut peers = self.inner.peers.write();
            if peers.contains_key(url) {
                tracing::debug!(url, "peer already tracked");
                return;
            }
            peers.insert(url.to_string(), Peer::new());
        }
        tracing::info!(url, "peer added");

        if self.inner.running.load(Ordering::SeqCst) {
            let inner = Arc::clone(&self.inner);
            let url = url.to_string();
            tokio::spawn(async move { inner.connect_peer(&url).await });
        }
    }

    /// Disconnect (if connected) and stop tracking the peer. Logged no-op
    /// if unknown.
    pub async fn remove_peer(&self, url: &str) {
        if !self.inner.peers.read().contains_key(url) {
            tracing::debug!(url, "cannot remove unknown peer");
            return;
        }
        self.inner.disconnect_peer(url).await;
        self.inner.peers.write().remove(url);
        tracing::info!(url, "peer removed");
    }

    /// Snapshot of every tracked peer
    pub fn get_peer_status(&self) -> Vec<PeerSnapshot> {
        self.inner
            .peers
            .read()
            .iter()
            .map(|(url, p)| PeerSnapshot {
                url: url.clone(),
                status: p.status,
                retry_count: p.retry_count,
                connected_since: p.connected_since,
            })
            .collect()
    }

    /// Urls currently connected
    pub fn get_connected_peers(&self) -> Vec<String> {
        self.inner
            .peers
            .read()
            .iter()
            .filter(|(_, p)| p.status == PeerStatus::Connected)
            .map(|(url, _)| url.clone())
            .collect()
    }
}

async fn connect_all(inner: &Arc<ManagerInner>) {
    let urls: Vec<String> = inner.peers.read().keys().cloned().collect();
    let mut tasks = Vec::new();
    for url in urls {
        let inner = Arc::clone(inner);
        tasks.push(tokio::spawn(async move { inner.connect_peer(&url).await }));
    }
    for task in tasks {
        let _ = task.await;
    }
}

async fn check_all(inner: &Arc<ManagerInner>) {
    let urls: Vec<String> = inner.peers.read().keys().cloned().collect();
    let mut tasks = Vec::new();
    for url in urls {
        let inner = Arc::clone(inner);
        tasks.push(tokio::spawn(async move { inner.check_peer(&url).await }));
    }
    for task in tasks {
        let _ = task.await;
    }
}

impl ManagerInner {
    fn emit(&self, event: PeerEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Connect loop for a single peer: one attempt per `retry_count` value
    /// from 0 through `max_retries`, with exponential backoff in between.
    /// Claiming the peer (moving it to `Connecting`) is atomic, so no two
    /// loops run for the same url.
    async fn connect_peer(&self, url: &str) {
        {
            let mut peers = self.peers.write();
            match peers.get_mut(url) {
                None => return,
                Some(p) if p.status != PeerStatus::Disconnected => return,
                Some(p) if p.exhausted => {
                    tracing::debug!(url, "retry budget exhausted, peer retired");
                    return;
                }
                Some(p) => p.status = PeerStatus::Connecting,
            }
        }

        loop {
            let attempt = {
                let peers = self.peers.read();
                match peers.get(url) {
                    None => return,
                    Some(p) => p.retry_count + 1,
                }
            };
            self.emit(PeerEvent::Connecting {
                url: url.to_string(),
                attempt,
            });
            tracing::debug!(url, attempt, "connecting to peer");

            let deadline = Duration::from_millis(self.config.connect_timeout_ms);
            let result = match tokio::time::timeout(deadline, self.transport.connect(url)).await {
                Ok(r) => r,
                Err(_) => Err(MeshError::Timeout(self.config.connect_timeout_ms)),
            };

            match result {
                Ok(handle) => {
                    {
                        let mut peers = self.peers.write();
                        let Some(peer) = peers.get_mut(url) else { return };
                        peer.status = PeerStatus::Connected;
                        peer.connection = Some(handle);
                        peer.connected_since = Some(Utc::now());
                        peer.retry_count = 0;
                        peer.exhausted = false;
                    }
                    tracing::info!(url, "peer connected");
                    self.emit(PeerEvent::Connected {
                        url: url.to_string(),
                    });
                    return;
                }
                Err(e) => {
                    tracing::warn!(url, attempt, error = %e, "peer connect attempt failed");
                    self.emit(PeerEvent::ConnectionFailed {
                        url: url.to_string(),
                        attempt,
                        error: e.to_string(),
                    });

                    let backoff = {
                        let mut peers = self.peers.write();
                        let Some(peer) = peers.get_mut(url) else { return };
                        if peer.retry_count >= self.config.max_retries {
                            peer.status = PeerStatus::Disconnected;
                            peer.connection = None;
                            peer.exhausted = true;
                            None
                        } else {
                            peer.retry_count += 1;
                            let exp = 2u32.saturating_pow(peer.retry_count - 1);
                            Some(Duration::from_millis(self.config.retry_base_delay_ms) * exp)
                        }
                    };

                    match backoff {
                        None => {
                            tracing::warn!(url, "peer retry budget exhausted, leaving disconnected");
                            return;
                        }
                        Some(delay) => tokio::time::sleep(delay).await,
                    }
                }
            }
        }
    }

    /// One periodic-pass step for a single peer: redial the disconnected,
    /// verify the connected, heal the dead.
    async fn check_peer(&self, url: &str) {
        let state = {
            let peers = self.peers.read();
            peers
                .get(url)
                .map(|p| (p.status, p.connection.clone(), p.exhausted))
        };
        let Some((status, connection, exhausted)) = state else { return };

        match status {
            PeerStatus::Connected => {
                let Some(handle) = connection else { return };
                let deadline = Duration::from_millis(self.config.connect_timeout_ms);
                let alive = tokio::time::timeout(deadline, self.transport.is_alive(url, &handle))
                    .await
                    .unwrap_or(false);
                if !alive {
                    tracing::warn!(url, "peer failed transport health check, reconnecting");
                    self.disconnect_peer(url).await;
                    self.connect_peer(url).await;
                }
            }
            // Attempt already in flight
            PeerStatus::Connecting => {}
            PeerStatus::Disconnected => {
                if exhausted {
                    tracing::debug!(url, "peer retired after exhausting retries");
                } else {
                    self.connect_peer(url).await;
                }
            }
        }
    }

    async fn disconnect_peer(&self, url: &str) {
        let was_connected = {
            let mut peers = self.peers.write();
            let Some(peer) = peers.get_mut(url) else { return };
            let was = peer.status == PeerStatus::Connected;
            peer.status = PeerStatus::Disconnected;
            peer.connection = None;
            peer.connected_since = None;
            peer.retry_count = 0;
            peer.exhausted = false;
            was
        };
        if !was_connected {
            return;
        }
        if let Err(e) = self.transport.disconnect(url).await {
            tracing::warn!(url, error = %e, "disconnect failed");
        }
        tracing::info!(url, "peer disconnected");
        self.emit(PeerEvent::Disconnected {
            url: url.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mesh_common::MeshResult;

    struct ScriptedTransport {
        fail_urls: Vec<String>,
        attempts: Mutex<HashMap<String, u32>>,
        alive: AtomicBool,
    }

    impl ScriptedTransport {
        fn new(fail_urls: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                fail_urls: fail_urls.iter().map(|s| s.to_string()).collect(),
                attempts: Mutex::new(HashMap::new()),
                alive: AtomicBool::new(true),
            })
        }

        fn attempts_for(&self, url: &str) -> u32 {
            self.attempts.lock().get(url).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl PeerTransport for ScriptedTransport {
        async fn connect(&self, url: &str) -> MeshResult<ConnectionHandle> {
            *self.attempts.lock().entry(url.to_string()).or_insert(0) += 1;
            if self.fail_urls.iter().any(|u| u == url) {
                Err(MeshError::Connection("connection refused".into()))
            } else {
                Ok(Arc::new(()) as ConnectionHandle)
            }
        }

        async fn disconnect(&self, _url: &str) -> MeshResult<()> {
            Ok(())
        }

        async fn is_alive(&self, _url: &str, _handle: &ConnectionHandle) -> bool {
            self.alive.load(Ordering::SeqCst)
        }
    }

    fn test_config() -> PeeringConfig {
        PeeringConfig {
            health_check_interval_ms: 1_000,
            max_retries: 2,
            retry_base_delay_ms: 100,
            connect_timeout_ms: 500,
        }
    }

    /// connection handle held iff status is Connected
    fn assert_invariant(manager: &PeerConnectionManager) {
        let peers = manager.inner.peers.read();
        for (url, p) in peers.iter() {
            assert_eq!(
                p.connection.is_some(),
                p.status == PeerStatus::Connected,
                "invariant violated for {url}: status={:?} connection={}",
                p.status,
                p.connection.is_some()
            );
        }
    }

    fn drain(rx: &mut broadcast::Receiver<PeerEvent>) -> Vec<PeerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_on_start() {
        let transport = ScriptedTransport::new(&[]);
        let manager = PeerConnectionManager::new(transport.clone(), test_config());
        let mut rx = manager.subscribe();

        manager.add_peer("p1:9000");
        manager.start().await;

        assert_eq!(manager.get_connected_peers(), vec!["p1:9000".to_string()]);
        let status = manager.get_peer_status();
        assert_eq!(status[0].status, PeerStatus::Connected);
        assert_eq!(status[0].retry_count, 0);
        assert!(status[0].connected_since.is_some());
        assert_invariant(&manager);

        let events = drain(&mut rx);
        assert!(events.contains(&PeerEvent::Connected {
            url: "p1:9000".into()
        }));

        manager.stop().await;
        assert!(manager.get_connected_peers().is_empty());
        assert_invariant(&manager);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound_and_backoff() {
        let transport = ScriptedTransport::new(&["bad:9000"]);
        let manager = PeerConnectionManager::new(transport.clone(), test_config());
        let mut rx = manager.subscribe();

        manager.add_peer("bad:9000");
        let before = tokio::time::Instant::now();
        manager.start().await;

        // max_retries + 1 total attempts
        assert_eq!(transport.attempts_for("bad:9000"), 3);
        let status = manager.get_peer_status();
        assert_eq!(status[0].status, PeerStatus::Disconnected);
        assert_eq!(status[0].retry_count, 2);
        assert_invariant(&manager);

        // backoff before the k-th retry is base * 2^(k-1): 100ms + 200ms
        assert!(before.elapsed() >= Duration::from_millis(300));

        let events = drain(&mut rx);
        let connecting = events
            .iter()
            .filter(|e| matches!(e, PeerEvent::Connecting { .. }))
            .count();
        let failed = events
            .iter()
            .filter(|e| matches!(e, PeerEvent::ConnectionFailed { .. }))
            .count();
        assert_eq!(connecting, 3);
        assert_eq!(failed, 3);
        assert!(events.contains(&PeerEvent::Connecting {
            url: "bad:9000".into(),
            attempt: 3
        }));

        manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retired_peer_not_redialed_by_periodic_check() {
        let transport = ScriptedTransport::new(&["bad:9000"]);
        let manager = PeerConnectionManager::new(transport.clone(), test_config());

        manager.add_peer("bad:9000");
        manager.start().await;
        assert_eq!(transport.attempts_for("bad:9000"), 3);

        // several periodic cycles later the budget is still spent
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(transport.attempts_for("bad:9000"), 3);

        // remove + re-add grants a fresh budget
        manager.remove_peer("bad:9000").await;
        manager.add_peer("bad:9000");
        let mut rx = manager.subscribe();
        let _ = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match rx.recv().await {
                    Ok(PeerEvent::ConnectionFailed { attempt: 3, .. }) => break,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        })
        .await;
        assert_eq!(transport.attempts_for("bad:9000"), 6);

        manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let transport = ScriptedTransport::new(&[]);
        let manager = PeerConnectionManager::new(transport.clone(), test_config());

        manager.add_peer("p1:9000");
        manager.start().await;
        let mut rx = manager.subscribe();
        manager.start().await;

        // no duplicate connect attempts for an already-connected peer
        assert_eq!(transport.attempts_for("p1:9000"), 1);
        assert!(drain(&mut rx).is_empty());

        manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_connect_scenario() {
        let transport = ScriptedTransport::new(&["p1:9000"]);
        let manager = PeerConnectionManager::new(transport.clone(), test_config());

        manager.add_peer("p1:9000");
        manager.add_peer("p2:9000");
        manager.start().await;

        assert_eq!(manager.get_connected_peers(), vec!["p2:9000".to_string()]);
        let status = manager.get_peer_status();
        let p1 = status.iter().find(|s| s.url == "p1:9000").unwrap();
        assert_eq!(p1.status, PeerStatus::Disconnected);
        assert_eq!(p1.retry_count, 2);
        assert_invariant(&manager);

        manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_self_heal_dead_connection() {
        let transport = ScriptedTransport::new(&[]);
        let manager = PeerConnectionManager::new(transport.clone(), test_config());

        manager.add_peer("p1:9000");
        manager.start().await;
        assert_eq!(transport.attempts_for("p1:9000"), 1);

        let mut rx = manager.subscribe();
        transport.alive.store(false, Ordering::SeqCst);

        // next periodic pass disconnects and redials
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        let events = drain(&mut rx);
        assert!(events.contains(&PeerEvent::Disconnected {
            url: "p1:9000".into()
        }));
        assert!(events.contains(&PeerEvent::Connected {
            url: "p1:9000".into()
        }));
        assert!(transport.attempts_for("p1:9000") >= 2);
        assert_invariant(&manager);

        manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_and_remove_are_noops_when_redundant() {
        let transport = ScriptedTransport::new(&[]);
        let manager = PeerConnectionManager::new(transport.clone(), test_config());

        manager.add_peer("p1:9000");
        manager.add_peer("p1:9000");
        assert_eq!(manager.get_peer_status().len(), 1);

        // unknown peer: logged no-op, nothing panics
        manager.remove_peer("ghost:9000").await;
        assert_eq!(manager.get_peer_status().len(), 1);

        manager.remove_peer("p1:9000").await;
        assert!(manager.get_peer_status().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_peer_while_running_connects() {
        let transport = ScriptedTransport::new(&[]);
        let manager = PeerConnectionManager::new(transport.clone(), test_config());
        manager.start().await;

        let mut rx = manager.subscribe();
        manager.add_peer("late:9000");

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event before deadline")
            .expect("channel closed");
        assert_eq!(
            event,
            PeerEvent::Connecting {
                url: "late:9000".into(),
                attempt: 1
            }
        );

        manager.stop().await;
    }
}
