//! Who follows which team.
//!
//! Written by the chat handlers, read by the dispatcher on every detected
//! change. Team names are compared exactly (case-sensitive, no trimming) so
//! a follow only fires for the name the data provider actually reports.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::models::SubscriberId;

/// Thread-safe subscription registry with a team-name reverse index.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

#[derive(Default)]
struct RegistryInner {
    /// subscriber → followed team names
    by_subscriber: HashMap<SubscriberId, HashSet<String>>,
    /// team name → subscribers following it
    /// e.g. "Arsenal" → {42, 1337}
    by_team: HashMap<String, HashSet<SubscriberId>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriberTeams {
    pub subscriber_id: SubscriberId,
    pub teams: Vec<String>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow `team_name`. Returns `false` if the subscriber already followed it.
    pub async fn add(&self, subscriber: SubscriberId, team_name: &str) -> bool {
        let mut inner = self.inner.write().await;
        let inserted = inner
            .by_subscriber
            .entry(subscriber)
            .or_default()
            .insert(team_name.to_string());
        if inserted {
            inner
                .by_team
                .entry(team_name.to_string())
                .or_default()
                .insert(subscriber);
            debug!("Subscriber {} now follows '{}'", subscriber, team_name);
        }
        inserted
    }

    /// Stop following `team_name`. Returns `false` if it was not followed.
    pub async fn remove(&self, subscriber: SubscriberId, team_name: &str) -> bool {
        let mut inner = self.inner.write().await;
        let removed = match inner.by_subscriber.get_mut(&subscriber) {
            Some(teams) => teams.remove(team_name),
            None => false,
        };
        if !removed {
            return false;
        }

        if inner
            .by_subscriber
            .get(&subscriber)
            .is_some_and(|teams| teams.is_empty())
        {
            inner.by_subscriber.remove(&subscriber);
        }
        if let Some(followers) = inner.by_team.get_mut(team_name) {
            followers.remove(&subscriber);
            if followers.is_empty() {
                inner.by_team.remove(team_name);
            }
        }
        debug!("Subscriber {} unfollowed '{}'", subscriber, team_name);
        true
    }

    /// Teams followed by `subscriber`, sorted for display.
    pub async fn list(&self, subscriber: SubscriberId) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut teams: Vec<String> = inner
            .by_subscriber
            .get(&subscriber)
            .map(|t| t.iter().cloned().collect())
            .unwrap_or_default();
        teams.sort();
        teams
    }

    /// Subscribers following either participant.
    pub async fn matches(&self, home_name: &str, away_name: &str) -> HashSet<SubscriberId> {
        let inner = self.inner.read().await;
        [home_name, away_name]
            .iter()
            .filter_map(|team| inner.by_team.get(*team))
            .flatten()
            .copied()
            .collect()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.read().await.by_subscriber.len()
    }

    /// Every subscriber with their followed teams, ordered by subscriber id.
    pub async fn snapshot(&self) -> Vec<SubscriberTeams> {
        let inner = self.inner.read().await;
        let ordered: BTreeMap<SubscriberId, &HashSet<String>> =
            inner.by_subscriber.iter().map(|(id, t)| (*id, t)).collect();
        ordered
            .into_iter()
            .map(|(subscriber_id, teams)| {
                let mut teams: Vec<String> = teams.iter().cloned().collect();
                teams.sort();
                SubscriberTeams {
                    subscriber_id,
                    teams,
                }
            })
            .collect()
    }
}
