pub mod scores;
pub mod subscriptions;

pub use scores::{ScoreEntry, ScoreStore};
pub use subscriptions::SubscriptionRegistry;
