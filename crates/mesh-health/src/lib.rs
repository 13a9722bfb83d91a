//! Meshguard Health - node liveness monitoring
//!
//! Tracks a set of nodes independently of any peer connection and probes
//! each one out-of-band on a timer. Probe outcomes are classified into
//! `Healthy`, `Unhealthy` (reachable but failing) and `Unreachable`
//! (transport failure), with events emitted on the two failure states.

#![warn(missing_docs)]

pub mod monitor;
pub mod probe;

pub use monitor::{HealthMonitor, NodeHealth, NodeSnapshot};
pub use probe::{HealthProbe, ProbeOutcome, TcpHealthProbe};
