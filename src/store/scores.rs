//! Last known score per tracked fixture.
//!
//! The poll loop is the only writer; the status API reads it. Entries are
//! seeded on first sighting, updated on score changes, and evicted once the
//! fixture is finished or has not been seen for a while so the table cannot
//! grow without bound over a long-running process.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::models::EventStatus;

/// One tracked fixture's baseline.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreEntry {
    pub home_name: String,
    pub away_name: String,
    pub home_score: u32,
    pub away_score: u32,
    pub status: Option<EventStatus>,
    pub last_seen: Instant,
}

impl ScoreEntry {
    pub fn score(&self) -> (u32, u32) {
        (self.home_score, self.away_score)
    }
}

/// Read-only view of an entry for the status API.
#[derive(Debug, Clone, Serialize)]
pub struct TrackedFixture {
    pub fixture_id: String,
    pub home_name: String,
    pub away_name: String,
    pub home_score: u32,
    pub away_score: u32,
    pub status: Option<EventStatus>,
    pub seen_secs_ago: u64,
}

/// Thread-safe fixture_id → score table.
#[derive(Clone, Default)]
pub struct ScoreStore {
    inner: Arc<RwLock<HashMap<String, ScoreEntry>>>,
}

impl ScoreStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored (home, away) score for a fixture, if it is being tracked.
    #[allow(dead_code)]
    pub async fn get(&self, fixture_id: &str) -> Option<(u32, u32)> {
        self.inner.read().await.get(fixture_id).map(ScoreEntry::score)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Run `f` with exclusive access to the table. Everything `f` does is
    /// observed atomically by other readers.
    pub async fn update<R>(&self, f: impl FnOnce(&mut HashMap<String, ScoreEntry>) -> R) -> R {
        let mut table = self.inner.write().await;
        f(&mut table)
    }

    /// Drop finished fixtures and fixtures unseen for longer than `stale_after`.
    /// Returns the number of evicted entries.
    pub async fn evict(&self, stale_after: Duration) -> usize {
        let mut table = self.inner.write().await;
        let before = table.len();
        table.retain(|id, entry| {
            let keep = entry.status != Some(EventStatus::Finished)
                && entry.last_seen.elapsed() <= stale_after;
            if !keep {
                debug!("Evicting fixture {} ({} vs {})", id, entry.home_name, entry.away_name);
            }
            keep
        });
        before - table.len()
    }

    pub async fn snapshot(&self) -> Vec<TrackedFixture> {
        let table = self.inner.read().await;
        let mut fixtures: Vec<TrackedFixture> = table
            .iter()
            .map(|(id, e)| TrackedFixture {
                fixture_id: id.clone(),
                home_name: e.home_name.clone(),
                away_name: e.away_name.clone(),
                home_score: e.home_score,
                away_score: e.away_score,
                status: e.status,
                seen_secs_ago: e.last_seen.elapsed().as_secs(),
            })
            .collect();
        fixtures.sort_by(|a, b| a.fixture_id.cmp(&b.fixture_id));
        fixtures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(home: u32, away: u32, status: Option<EventStatus>) -> ScoreEntry {
        ScoreEntry {
            home_name: "Arsenal".into(),
            away_name: "Chelsea".into(),
            home_score: home,
            away_score: away,
            status,
            last_seen: Instant::now(),
        }
    }

    #[tokio::test]
    async fn test_update_and_get() {
        let store = ScoreStore::new();
        assert_eq!(store.get("10").await, None);

        store
            .update(|t| t.insert("10".into(), entry(1, 0, None)))
            .await;
        assert_eq!(store.get("10").await, Some((1, 0)));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_evict_finished() {
        let store = ScoreStore::new();
        store
            .update(|t| {
                t.insert("live".into(), entry(0, 0, Some(EventStatus::InProgress)));
                t.insert("done".into(), entry(2, 1, Some(EventStatus::Finished)));
            })
            .await;

        let evicted = store.evict(Duration::from_secs(3600)).await;
        assert_eq!(evicted, 1);
        assert_eq!(store.get("done").await, None);
        assert_eq!(store.get("live").await, Some((0, 0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_stale() {
        let store = ScoreStore::new();
        store
            .update(|t| t.insert("old".into(), entry(0, 0, None)))
            .await;

        tokio::time::advance(Duration::from_secs(120)).await;
        store
            .update(|t| t.insert("fresh".into(), entry(0, 0, None)))
            .await;

        let evicted = store.evict(Duration::from_secs(60)).await;
        assert_eq!(evicted, 1);
        assert_eq!(store.get("old").await, None);
        assert_eq!(store.get("fresh").await, Some((0, 0)));
    }

    #[tokio::test]
    async fn test_snapshot_sorted() {
        let store = ScoreStore::new();
        store
            .update(|t| {
                t.insert("b".into(), entry(1, 1, None));
                t.insert("a".into(), entry(0, 2, None));
            })
            .await;
        let snap = store.snapshot().await;
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].fixture_id, "a");
        assert_eq!(snap[0].away_score, 2);
    }
}
