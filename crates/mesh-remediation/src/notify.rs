//! Admin notification fan-out

use async_trait::async_trait;
use mesh_common::MeshResult;
use std::sync::Arc;

/// One outbound notification channel (email, chat webhook, ...)
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel name for logging
    fn name(&self) -> &str;

    /// Deliver one notification
    async fn send(&self, subject: &str, message: &str) -> MeshResult<()>;
}

/// Channel that writes notifications to the log.
///
/// Always configured as a fallback so escalations are never silently lost.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, subject: &str, message: &str) -> MeshResult<()> {
        tracing::error!(subject, message, "ADMIN NOTIFICATION");
        Ok(())
    }
}

/// All configured notification channels
pub struct NotifierSet {
    channels: Vec<Arc<dyn Notifier>>,
}

impl NotifierSet {
    /// Build from the configured channels
    pub fn new(channels: Vec<Arc<dyn Notifier>>) -> Self {
        Self { channels }
    }

    /// Fan out to every channel independently; a failing channel is logged
    /// and does not prevent the others from being attempted.
    pub async fn notify_all(&self, subject: &str, message: &str) {
        for channel in &self.channels {
            if let Err(e) = channel.send(subject, message).await {
                tracing::warn!(
                    channel = channel.name(),
                    error = %e,
                    "notification channel failed"
                );
            }
        }
    }
}
