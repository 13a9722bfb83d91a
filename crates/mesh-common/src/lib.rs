//! Meshguard Common - Shared types for the self-healing peer mesh
//!
//! This crate provides the pieces every other meshguard crate consumes:
//! - Configuration sections for peering, monitoring, remediation and gossip
//! - The workspace error type
//! - Event payloads emitted by the peer and node managers

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod events;

pub use config::{GossipConfig, MeshConfig, MonitorConfig, PeeringConfig, RemediationConfig};
pub use error::{MeshError, MeshResult};
pub use events::{NodeEvent, PeerEvent};
