//! Meshguard Configuration

use serde::{Deserialize, Serialize};

use crate::error::{MeshError, MeshResult};

/// Top-level meshguard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Peer connection management
    pub peering: PeeringConfig,
    /// Node liveness monitoring
    pub monitor: MonitorConfig,
    /// Remediation actions
    pub remediation: RemediationConfig,
    /// Discovery transport
    pub gossip: GossipConfig,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            peering: PeeringConfig::default(),
            monitor: MonitorConfig::default(),
            remediation: RemediationConfig::default(),
            gossip: GossipConfig::default(),
        }
    }
}

impl MeshConfig {
    /// Load from file
    pub fn load(path: &str) -> MeshResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)
            .map_err(|e| MeshError::ConfigError(format!("parse {path}: {e}")))?;
        tracing::info!(path, "configuration loaded");
        Ok(config)
    }

    /// Save to file
    pub fn save(&self, path: &str) -> MeshResult<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| MeshError::ConfigError(e.to_string()))?;
        std::fs::write(path, content)?;
        tracing::info!(path, "configuration saved");
        Ok(())
    }
}

/// Peer connection manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeeringConfig {
    /// Interval between transport-layer health check passes
    pub health_check_interval_ms: u64,
    /// Retry budget per peer before it is retired
    pub max_retries: u32,
    /// Base delay for exponential backoff between connect attempts
    pub retry_base_delay_ms: u64,
    /// Deadline applied to each connect / liveness call
    pub connect_timeout_ms: u64,
}

impl Default for PeeringConfig {
    fn default() -> Self {
        Self {
            health_check_interval_ms: 10_000,
            max_retries: 5,
            retry_base_delay_ms: 1_000,
            connect_timeout_ms: 5_000,
        }
    }
}

/// Node health monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Interval between monitor passes over the tracked set
    pub check_interval_ms: u64,
    /// Deadline applied to each probe
    pub probe_timeout_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 10_000,
            probe_timeout_ms: 5_000,
        }
    }
}

/// Remediation action configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationConfig {
    /// Attempts per action before escalating to notification
    pub retries: u32,
    /// Delay between action attempts
    pub retry_delay_ms: u64,
    /// Remediation outcomes retained for introspection
    pub history_limit: usize,
    /// Cores added when a scale-up issue carries no parameters
    pub default_scale_cores: u32,
    /// Memory (MB) added when a scale-up issue carries no parameters
    pub default_scale_memory_mb: u64,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            retry_delay_ms: 1_000,
            history_limit: 256,
            default_scale_cores: 2,
            default_scale_memory_mb: 4_096,
        }
    }
}

/// Gossip discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipConfig {
    /// Local UDP bind address
    pub bind_addr: String,
    /// Identity announced to the mesh
    pub node_id: String,
    /// Address other nodes should use to reach this one
    pub advertise_addr: String,
    /// Bootstrap addresses announced to on every cycle
    pub seeds: Vec<String>,
    /// Interval between announce cycles
    pub announce_interval_ms: u64,
    /// Known peers sampled per announce cycle
    pub fanout: usize,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7946".into(),
            node_id: String::new(),
            advertise_addr: String::new(),
            seeds: vec![],
            announce_interval_ms: 5_000,
            fanout: 3,
        }
    }
}
