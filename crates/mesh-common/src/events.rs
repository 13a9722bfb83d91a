//! Event payloads emitted by the peer and node managers
//!
//! Events are delivered over `tokio::sync::broadcast` channels owned by the
//! emitting component; subscribers register at construction time via
//! `subscribe()`. Payload shapes are a contract and must stay stable.

use serde::{Deserialize, Serialize};

/// Peer connection lifecycle events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerEvent {
    /// A connect attempt is starting
    Connecting {
        /// Peer url
        url: String,
        /// Attempt number, starting at 1
        attempt: u32,
    },
    /// The peer transitioned to connected
    Connected {
        /// Peer url
        url: String,
    },
    /// A connect attempt failed
    ConnectionFailed {
        /// Peer url
        url: String,
        /// Attempt number that failed
        attempt: u32,
        /// Transport error description
        error: String,
    },
    /// The peer transitioned to disconnected
    Disconnected {
        /// Peer url
        url: String,
    },
}

/// Node liveness events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeEvent {
    /// The node answered its probe but reported failure
    Unhealthy {
        /// Node id
        id: String,
    },
    /// The probe could not reach the node at all
    Unreachable {
        /// Node id
        id: String,
    },
}
