//! Issue-to-action dispatch

use chrono::{DateTime, Utc};
use mesh_common::RemediationConfig;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

use crate::actions::{ActionReport, RemediationActions};

/// Classification of a detected problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueType {
    /// Node service has crashed or is failing its health checks
    NodeFailure,
    /// Node is up but responding slowly
    HighLatency,
    /// Node is starved of CPU or memory
    ResourceExhaustion,
    /// Node cannot be reached at all
    Unreachable,
    /// Anything the monitor could not classify
    Unknown,
}

/// A detected problem, consumed once by the dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    /// Classification
    pub issue_type: IssueType,
    /// Affected node
    pub node_id: String,
    /// Address used to verify recovery
    pub address: String,
    /// Cores to add on scale-up, when known
    pub additional_cores: Option<u32>,
    /// Memory (MB) to add on scale-up, when known
    pub additional_memory_mb: Option<u64>,
    /// When the issue was detected
    pub detected_at: DateTime<Utc>,
}

impl Issue {
    /// Create an issue with no remediation parameters
    pub fn new(issue_type: IssueType, node_id: &str, address: &str) -> Self {
        Self {
            issue_type,
            node_id: node_id.to_string(),
            address: address.to_string(),
            additional_cores: None,
            additional_memory_mb: None,
            detected_at: Utc::now(),
        }
    }
}

/// Action the dispatcher selected for an issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    /// Service restart
    Restart,
    /// Resource scale-up
    ScaleUp,
    /// Admin notification only
    Notify,
}

/// Record of one handled issue
#[derive(Debug, Clone, Serialize)]
pub struct RemediationOutcome {
    /// Outcome id
    pub id: Uuid,
    /// Issue classification
    pub issue_type: IssueType,
    /// Affected node
    pub node_id: String,
    /// Action taken
    pub action: ActionKind,
    /// Attempts made by the action
    pub attempts: u32,
    /// Whether the node verified healthy afterwards
    pub success: bool,
    /// Whether the failure was escalated to notification
    pub escalated: bool,
    /// When handling started
    pub started_at: DateTime<Utc>,
    /// When handling finished
    pub completed_at: DateTime<Utc>,
}

/// Maps classified issues to remediation actions.
///
/// Stateless apart from a bounded outcome history kept for introspection.
pub struct RemediationDispatcher {
    actions: RemediationActions,
    history: RwLock<VecDeque<RemediationOutcome>>,
    history_limit: usize,
    default_cores: u32,
    default_memory_mb: u64,
}

impl RemediationDispatcher {
    /// Build a dispatcher over the action set
    pub fn new(actions: RemediationActions, config: &RemediationConfig) -> Self {
        Self {
            actions,
            history: RwLock::new(VecDeque::new()),
            history_limit: config.history_limit,
            default_cores: config.default_scale_cores,
            default_memory_mb: config.default_scale_memory_mb,
        }
    }

    /// Handle one issue. Never fails from the caller's perspective:
    /// action failures are caught and routed to admin notification.
    pub async fn handle_issue(&self, issue: Issue) -> RemediationOutcome {
        let started_at = Utc::now();
        tracing::info!(
            issue_type = ?issue.issue_type,
            node_id = %issue.node_id,
            "handling issue"
        );

        let (action, report) = match issue.issue_type {
            IssueType::NodeFailure => (
                ActionKind::Restart,
                self.actions.restart(&issue.node_id, &issue.address).await,
            ),
            IssueType::HighLatency | IssueType::ResourceExhaustion => {
                let cores = issue.additional_cores.unwrap_or(self.default_cores);
                let memory = issue.additional_memory_mb.unwrap_or(self.default_memory_mb);
                (
                    ActionKind::ScaleUp,
                    self.actions
                        .scale_up(&issue.node_id, &issue.address, cores, memory)
                        .await,
                )
            }
            _ => {
                self.actions
                    .notify_admin(
                        "Unknown Issue",
                        &format!(
                            "no automated remediation for {:?} on node {}",
                            issue.issue_type, issue.node_id
                        ),
                    )
                    .await;
                (
                    ActionKind::Notify,
                    ActionReport {
                        attempts: 0,
                        success: true,
                        escalated: false,
                    },
                )
            }
        };

        let outcome = RemediationOutcome {
            id: Uuid::new_v4(),
            issue_type: issue.issue_type,
            node_id: issue.node_id,
            action,
            attempts: report.attempts,
            success: report.success,
            escalated: report.escalated,
            started_at,
            completed_at: Utc::now(),
        };
        self.record(outcome.clone());
        outcome
    }

    /// Recent outcomes, oldest first
    pub fn history(&self) -> Vec<RemediationOutcome> {
        self.history.read().iter().cloned().collect()
    }

    fn record(&self, outcome: RemediationOutcome) {
        let mut history = self.history.write();
        if history.len() == self.history_limit {
            history.pop_front();
        }
        history.push_back(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::CommandExecutor;
    use crate::notify::{Notifier, NotifierSet};
    use async_trait::async_trait;
    use mesh_common::{MeshError, MeshResult};
    use mesh_health::{HealthProbe, ProbeOutcome};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct MockExecutor {
        commands: Mutex<Vec<String>>,
        fail: AtomicBool,
    }

    impl MockExecutor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                commands: Mutex::new(Vec::new()),
                fail: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl CommandExecutor for MockExecutor {
        async fn execute(&self, command: &str) -> MeshResult<String> {
            self.commands.lock().push(command.to_string());
            if self.fail.load(Ordering::SeqCst) {
                Err(MeshError::Remediation("command failed".into()))
            } else {
                Ok(String::new())
            }
        }
    }

    struct MockProbe {
        healthy: AtomicBool,
    }

    #[async_trait]
    impl HealthProbe for MockProbe {
        async fn probe(&self, _address: &str) -> MeshResult<ProbeOutcome> {
            Ok(ProbeOutcome {
                ok: self.healthy.load(Ordering::SeqCst),
                status_code: if self.healthy.load(Ordering::SeqCst) { 200 } else { 500 },
                latency_ms: 1,
            })
        }
    }

    struct MockNotifier {
        name: &'static str,
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    impl MockNotifier {
        fn new(name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                sent: Mutex::new(Vec::new()),
                fail,
            })
        }
    }

    #[async_trait]
    impl Notifier for MockNotifier {
        fn name(&self) -> &str {
            self.name
        }

        async fn send(&self, subject: &str, message: &str) -> MeshResult<()> {
            if self.fail {
                return Err(MeshError::Notification("channel down".into()));
            }
            self.sent.lock().push((subject.into(), message.into()));
            Ok(())
        }
    }

    fn test_config() -> RemediationConfig {
        RemediationConfig {
            retries: 3,
            retry_delay_ms: 10,
            history_limit: 4,
            default_scale_cores: 2,
            default_scale_memory_mb: 4_096,
        }
    }

    fn build(
        executor: Arc<MockExecutor>,
        healthy: bool,
        notifier: Arc<MockNotifier>,
    ) -> RemediationDispatcher {
        let probe = Arc::new(MockProbe {
            healthy: AtomicBool::new(healthy),
        });
        let actions = RemediationActions::new(
            executor,
            probe,
            Arc::new(NotifierSet::new(vec![notifier])),
            test_config(),
        );
        RemediationDispatcher::new(actions, &test_config())
    }

    #[tokio::test]
    async fn test_node_failure_dispatches_restart() {
        let executor = MockExecutor::new();
        let notifier = MockNotifier::new("email", false);
        let dispatcher = build(executor.clone(), true, notifier.clone());

        let outcome = dispatcher
            .handle_issue(Issue::new(IssueType::NodeFailure, "n1", "10.0.0.1:80"))
            .await;

        assert_eq!(outcome.action, ActionKind::Restart);
        assert!(outcome.success);
        let commands = executor.commands.lock();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].contains("restart"));
        assert!(commands[0].contains("n1"));
        assert!(notifier.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_resource_exhaustion_dispatches_scale_up_with_defaults() {
        let executor = MockExecutor::new();
        let notifier = MockNotifier::new("email", false);
        let dispatcher = build(executor.clone(), true, notifier.clone());

        let outcome = dispatcher
            .handle_issue(Issue::new(
                IssueType::ResourceExhaustion,
                "n2",
                "10.0.0.2:80",
            ))
            .await;

        assert_eq!(outcome.action, ActionKind::ScaleUp);
        let commands = executor.commands.lock();
        assert!(commands[0].contains("resize n2"));
        assert!(commands[0].contains("--add-cores 2"));
        assert!(commands[0].contains("--add-memory 4096M"));
    }

    #[tokio::test]
    async fn test_unknown_issue_only_notifies() {
        let executor = MockExecutor::new();
        let notifier = MockNotifier::new("email", false);
        let dispatcher = build(executor.clone(), true, notifier.clone());

        let outcome = dispatcher
            .handle_issue(Issue::new(IssueType::Unknown, "n3", "10.0.0.3:80"))
            .await;

        assert_eq!(outcome.action, ActionKind::Notify);
        assert!(executor.commands.lock().is_empty());
        let sent = notifier.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "Unknown Issue");
        assert!(sent[0].1.contains("n3"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_escalation_after_exhausted_retries() {
        let executor = MockExecutor::new();
        let notifier = MockNotifier::new("email", false);
        // probe never turns healthy, so every attempt fails verification
        let dispatcher = build(executor.clone(), false, notifier.clone());

        let outcome = dispatcher
            .handle_issue(Issue::new(IssueType::NodeFailure, "n1", "10.0.0.1:80"))
            .await;

        assert!(!outcome.success);
        assert!(outcome.escalated);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(executor.commands.lock().len(), 3);

        // exactly one escalation, naming the node and the attempt count
        let sent = notifier.sent.lock();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("n1"));
        assert!(sent[0].1.contains("3 attempts"));
    }

    #[tokio::test]
    async fn test_notification_fans_out_past_failing_channel() {
        let executor = MockExecutor::new();
        let bad = MockNotifier::new("webhook", true);
        let good = MockNotifier::new("email", false);
        let probe = Arc::new(MockProbe {
            healthy: AtomicBool::new(true),
        });
        let actions = RemediationActions::new(
            executor,
            probe,
            Arc::new(NotifierSet::new(vec![bad.clone(), good.clone()])),
            test_config(),
        );

        actions.notify_admin("subject", "message").await;

        assert!(bad.sent.lock().is_empty());
        assert_eq!(good.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let executor = MockExecutor::new();
        let notifier = MockNotifier::new("email", false);
        let dispatcher = build(executor, true, notifier);

        for i in 0..6 {
            dispatcher
                .handle_issue(Issue::new(
                    IssueType::NodeFailure,
                    &format!("n{i}"),
                    "10.0.0.1:80",
                ))
                .await;
        }

        let history = dispatcher.history();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].node_id, "n2");
    }
}
