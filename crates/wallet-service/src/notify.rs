//! Notification dispatch.
//!
//! Delivery (SMS, email, push) belongs to an external service; the wallet
//! only hands it a recipient, a template name and a context. Sends are
//! fire-and-forget: the engine never waits on them.

use async_trait::async_trait;

/// One outbound notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Who to notify (the account's funding target).
    pub recipient: String,
    /// Template name.
    pub template: String,
    /// Template variables.
    pub context: serde_json::Value,
}

/// A notification sink.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a notification. Failures are the sink's to log.
    async fn send(&self, notification: Notification);
}

/// Default sink: writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send(&self, notification: Notification) {
        tracing::info!(
            recipient = %notification.recipient,
            template = %notification.template,
            context = %notification.context,
            "Notification dispatched"
        );
    }
}
