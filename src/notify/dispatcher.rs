use futures_util::{FutureExt, StreamExt};
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::NotificationSender;
use crate::models::{ChangeKind, Notification, ScoreChange};
use crate::store::SubscriptionRegistry;

/// Per-cycle delivery tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub matched: usize,
    pub delivered: usize,
    pub failed: usize,
}

impl DispatchReport {
    fn absorb(&mut self, other: DispatchReport) {
        self.matched += other.matched;
        self.delivered += other.delivered;
        self.failed += other.failed;
    }
}

/// Sends in flight at once for a single change unless configured otherwise.
pub const DEFAULT_MAX_CONCURRENT_SENDS: usize = 8;

/// Fans score changes out to every subscriber following either team.
#[derive(Clone)]
pub struct Dispatcher {
    registry: SubscriptionRegistry,
    sender: Arc<dyn NotificationSender>,
    max_concurrent_sends: usize,
}

impl Dispatcher {
    pub fn new(registry: SubscriptionRegistry, sender: Arc<dyn NotificationSender>) -> Self {
        Dispatcher {
            registry,
            sender,
            max_concurrent_sends: DEFAULT_MAX_CONCURRENT_SENDS,
        }
    }

    /// Cap on sends in flight for one change. Zero is treated as one.
    pub fn with_concurrency(mut self, max_concurrent_sends: usize) -> Self {
        self.max_concurrent_sends = max_concurrent_sends.max(1);
        self
    }

    /// Deliver every change. A failed delivery is logged and counted; it
    /// never stops delivery to other subscribers or of other changes.
    pub async fn dispatch(&self, changes: &[ScoreChange]) -> DispatchReport {
        let mut report = DispatchReport::default();
        for change in changes {
            report.absorb(self.dispatch_one(change).await);
        }
        report
    }

    async fn dispatch_one(&self, change: &ScoreChange) -> DispatchReport {
        let mut subscribers: Vec<_> = self
            .registry
            .matches(&change.home_name, &change.away_name)
            .await
            .into_iter()
            .collect();
        subscribers.sort();

        let mut report = DispatchReport {
            matched: subscribers.len(),
            ..Default::default()
        };
        if subscribers.is_empty() {
            debug!("No subscribers for fixture {}", change.fixture_id);
            return report;
        }

        let message_text = format_notification(change);
        let sends = subscribers.into_iter().map(|subscriber_id| {
            let notification = Notification {
                subscriber_id,
                message_text: message_text.clone(),
            };
            let sender = Arc::clone(&self.sender);
            async move {
                // A panicking sender only costs its own recipient
                let res = AssertUnwindSafe(sender.send(&notification))
                    .catch_unwind()
                    .await;
                (notification.subscriber_id, res)
            }
        });

        let mut results =
            futures_util::stream::iter(sends).buffer_unordered(self.max_concurrent_sends);
        while let Some((subscriber_id, res)) = results.next().await {
            match res {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(
                        "Delivery to {} failed for fixture {}: {}",
                        subscriber_id, change.fixture_id, e
                    );
                }
                Err(_) => {
                    report.failed += 1;
                    error!(
                        "Sender panicked delivering to {} for fixture {}",
                        subscriber_id, change.fixture_id
                    );
                }
            }
        }
        report
    }
}

/// Message text for one score change.
pub fn format_notification(change: &ScoreChange) -> String {
    let prefix = match change.kind {
        ChangeKind::HomeGoal | ChangeKind::AwayGoal => "⚽ GOAL",
        ChangeKind::Correction => "📝 SCORE UPDATE",
    };
    format!(
        "{}: {} {}-{} {}",
        prefix, change.home_name, change.home_score, change.away_score, change.away_name
    )
}
