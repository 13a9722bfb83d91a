//! Liveness probe abstraction

use async_trait::async_trait;
use mesh_common::{MeshError, MeshResult};
use std::time::Instant;

/// Result of a single liveness probe against a reachable node
#[derive(Debug, Clone, Copy)]
pub struct ProbeOutcome {
    /// Whether the node reported itself healthy (2xx-equivalent)
    pub ok: bool,
    /// Status code returned by the node's health endpoint
    pub status_code: u16,
    /// Round-trip time of the probe
    pub latency_ms: u32,
}

/// One out-of-band liveness check against a node address.
///
/// `Err` means the node could not be reached at all (timeout, connection
/// refused); `Ok` with `ok == false` means it answered but is failing.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Probe the node at `address`
    async fn probe(&self, address: &str) -> MeshResult<ProbeOutcome>;
}

/// TCP dial probe: reachable-and-accepting counts as healthy
pub struct TcpHealthProbe;

#[async_trait]
impl HealthProbe for TcpHealthProbe {
    async fn probe(&self, address: &str) -> MeshResult<ProbeOutcome> {
        let start = Instant::now();
        tokio::net::TcpStream::connect(address)
            .await
            .map_err(|e| MeshError::Probe(format!("tcp probe of {address}: {e}")))?;
        Ok(ProbeOutcome {
            ok: true,
            status_code: 200,
            latency_ms: start.elapsed().as_millis() as u32,
        })
    }
}
