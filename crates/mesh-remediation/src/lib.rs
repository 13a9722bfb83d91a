//! Meshguard Remediation - automated corrective actions
//!
//! Maps classified issues to remediation actions: restart for node
//! failures, scale-up for latency/resource pressure, admin notification
//! for everything else. Actions run a bounded verify-and-retry loop and
//! escalate to notification when the budget is spent; nothing in this
//! crate propagates a remediation failure as an error to the caller.

#![warn(missing_docs)]

pub mod actions;
pub mod dispatcher;
pub mod notify;

pub use actions::{ActionReport, CommandExecutor, RemediationActions, ShellExecutor};
pub use dispatcher::{
    ActionKind, Issue, IssueType, RemediationDispatcher, RemediationOutcome,
};
pub use notify::{LogNotifier, Notifier, NotifierSet};
