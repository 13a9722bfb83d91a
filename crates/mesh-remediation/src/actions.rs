//! Remediation actions: restart and scale-up
//!
//! Both actions follow the same template: run the remote command through
//! the injected executor, verify recovery with a health probe, retry the
//! whole operation up to the configured budget, and escalate to admin
//! notification once the budget is spent. Escalation is the terminal
//! outcome; the action itself never returns an error.

use async_trait::async_trait;
use mesh_common::{MeshError, MeshResult, RemediationConfig};
use mesh_health::HealthProbe;
use std::sync::Arc;
use std::time::Duration;

use crate::notify::NotifierSet;

/// Remote command execution, abstracted so the core never embeds a
/// specific shell or SSH mechanism
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run one command, returning its stdout
    async fn execute(&self, command: &str) -> MeshResult<String>;
}

/// Local `sh -c` executor for deployments without an injected one
pub struct ShellExecutor;

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn execute(&self, command: &str) -> MeshResult<String> {
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .await
            .map_err(|e| MeshError::Remediation(format!("spawn failed: {e}")))?;
        if !output.status.success() {
            return Err(MeshError::Remediation(format!(
                "command exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Result of one remediation action
#[derive(Debug, Clone, Copy)]
pub struct ActionReport {
    /// Attempts made
    pub attempts: u32,
    /// Whether the node verified healthy afterwards
    pub success: bool,
    /// Whether the failure was escalated to notification
    pub escalated: bool,
}

/// The remediation action set
pub struct RemediationActions {
    executor: Arc<dyn CommandExecutor>,
    probe: Arc<dyn HealthProbe>,
    notifiers: Arc<NotifierSet>,
    config: RemediationConfig,
}

impl RemediationActions {
    /// Build the action set over the injected collaborators
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        probe: Arc<dyn HealthProbe>,
        notifiers: Arc<NotifierSet>,
        config: RemediationConfig,
    ) -> Self {
        Self {
            executor,
            probe,
            notifiers,
            config,
        }
    }

    /// Restart the node's service and verify it comes back healthy
    pub async fn restart(&self, node_id: &str, address: &str) -> ActionReport {
        let command = format!("systemctl restart meshguard-node@{node_id}");
        self.run_verified("restart", node_id, address, &command).await
    }

    /// Grow the node's resources and verify it recovers
    pub async fn scale_up(
        &self,
        node_id: &str,
        address: &str,
        cores: u32,
        memory_mb: u64,
    ) -> ActionReport {
        let command =
            format!("meshctl resize {node_id} --add-cores {cores} --add-memory {memory_mb}M");
        self.run_verified("scale-up", node_id, address, &command)
            .await
    }

    /// Notify every configured admin channel
    pub async fn notify_admin(&self, subject: &str, message: &str) {
        self.notifiers.notify_all(subject, message).await;
    }

    async fn run_verified(
        &self,
        action: &str,
        node_id: &str,
        address: &str,
        command: &str,
    ) -> ActionReport {
        let retries = self.config.retries.max(1);
        for attempt in 1..=retries {
            tracing::info!(action, node_id, attempt, "running remediation");
            match self.executor.execute(command).await {
                Ok(_) => match self.verify(address).await {
                    Ok(()) => {
                        tracing::info!(action, node_id, attempt, "remediation verified healthy");
                        return ActionReport {
                            attempts: attempt,
                            success: true,
                            escalated: false,
                        };
                    }
                    Err(e) => {
                        tracing::warn!(action, node_id, attempt, error = %e, "post-remediation probe failed");
                    }
                },
                Err(e) => {
                    tracing::warn!(action, node_id, attempt, error = %e, "remediation command failed");
                }
            }
            if attempt < retries {
                tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
            }
        }

        let subject = format!("{action} failed for node {node_id}");
        let message = format!(
            "{action} of node {node_id} did not restore health after {retries} attempts; manual intervention required"
        );
        tracing::error!(action, node_id, retries, "remediation exhausted, escalating");
        self.notify_admin(&subject, &message).await;
        ActionReport {
            attempts: retries,
            success: false,
            escalated: true,
        }
    }

    async fn verify(&self, address: &str) -> MeshResult<()> {
        let outcome = self.probe.probe(address).await?;
        if outcome.ok {
            Ok(())
        } else {
            Err(MeshError::Probe(format!(
                "node still failing ({})",
                outcome.status_code
            )))
        }
    }
}
