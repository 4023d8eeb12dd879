use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Chat identifier of a subscriber on the messaging platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(pub i64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Raw live event state as fetched from the live data provider
#[derive(Debug, Clone, PartialEq)]
pub struct LiveEvent {
    /// External fixture ID, unique within one snapshot
    pub id: String,
    pub home_name: String,
    pub away_name: String,
    pub home_score: u32,
    pub away_score: u32,
    pub status: Option<EventStatus>,
    /// Elapsed minutes, display only
    pub minute: Option<u32>,
}

impl LiveEvent {
    pub fn score(&self) -> (u32, u32) {
        (self.home_score, self.away_score)
    }

    pub fn involves(&self, team: &str) -> bool {
        self.home_name == team || self.away_name == team
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    NotStarted,
    InProgress,
    HalfTime,
    Finished,
}

/// What kind of scoreline movement a change represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    HomeGoal,
    AwayGoal,
    /// A side's score went down (VAR, provider fix-ups)
    Correction,
}

/// A detected score delta for a previously seen fixture
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreChange {
    pub fixture_id: String,
    pub home_name: String,
    pub away_name: String,
    pub home_score: u32,
    pub away_score: u32,
    pub prev_home_score: u32,
    pub prev_away_score: u32,
    pub kind: ChangeKind,
    pub detected_at: DateTime<Utc>,
}

/// One message bound for one subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subscriber_id: SubscriberId,
    pub message_text: String,
}
