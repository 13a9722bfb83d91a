//! Meshguard Peering - peer connection lifecycle management
//!
//! Owns the set of transport-level peer connections and keeps them alive:
//! concurrent connect on startup, exponential-backoff retries, and a
//! periodic transport health check that disconnects and redials dead
//! connections. The actual transport is injected behind [`PeerTransport`];
//! a TCP implementation is provided for deployments without a custom one.
//!
//! Node-level liveness (out-of-band probing of endpoints this process may
//! not hold a connection to) lives in `mesh-health`, not here.

#![warn(missing_docs)]

pub mod manager;
pub mod transport;

pub use manager::{PeerConnectionManager, PeerSnapshot, PeerStatus};
pub use transport::{ConnectionHandle, PeerTransport, TcpPeerTransport};
