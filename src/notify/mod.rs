pub mod dispatcher;

pub use dispatcher::{format_notification, DispatchReport, Dispatcher};

use async_trait::async_trait;
use tracing::info;

use crate::models::Notification;

/// A single recipient could not be reached. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("rejected by messaging API: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Delivers one notification to one subscriber.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError>;
}

/// Dry-run sender: logs instead of delivering.
pub struct LogSender;

#[async_trait]
impl NotificationSender for LogSender {
    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError> {
        info!(
            "🟡 DRY RUN notify {}: {}",
            notification.subscriber_id, notification.message_text
        );
        Ok(())
    }
}
