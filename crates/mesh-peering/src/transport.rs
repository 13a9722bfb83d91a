//! Peer transport abstraction

use async_trait::async_trait;
use mesh_common::{MeshError, MeshResult};
use std::any::Any;
use std::sync::Arc;

/// Opaque connection handle returned by a transport.
///
/// The manager never inspects it; it only holds it while the peer is
/// connected and drops it on disconnect.
pub type ConnectionHandle = Arc<dyn Any + Send + Sync>;

/// Transport-specific connect/disconnect/liveness operations
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Open a connection to the peer
    async fn connect(&self, url: &str) -> MeshResult<ConnectionHandle>;

    /// Tear down the connection to the peer
    async fn disconnect(&self, url: &str) -> MeshResult<()>;

    /// Check whether the held connection is still usable
    async fn is_alive(&self, url: &str, handle: &ConnectionHandle) -> bool;
}

/// Plain TCP transport
pub struct TcpPeerTransport;

#[async_trait]
impl PeerTransport for TcpPeerTransport {
    async fn connect(&self, url: &str) -> MeshResult<ConnectionHandle> {
        let stream = tokio::net::TcpStream::connect(url)
            .await
            .map_err(|e| MeshError::Connection(format!("tcp connect to {url}: {e}")))?;
        Ok(Arc::new(stream) as ConnectionHandle)
    }

    async fn disconnect(&self, url: &str) -> MeshResult<()> {
        // Dropping the handle closes the stream
        tracing::debug!(url, "closing tcp connection");
        Ok(())
    }

    async fn is_alive(&self, url: &str, _handle: &ConnectionHandle) -> bool {
        tokio::net::TcpStream::connect(url).await.is_ok()
    }
}
