use chrono::Utc;
use std::collections::hash_map::Entry;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::models::{ChangeKind, LiveEvent, ScoreChange};
use crate::store::{ScoreEntry, ScoreStore};

/// Turns snapshots into score changes against the stored baselines.
///
/// A fixture's first sighting only seeds its baseline; matches already in
/// progress when the process starts therefore never produce an alert burst.
#[derive(Clone)]
pub struct ChangeDetector {
    store: ScoreStore,
}

impl ChangeDetector {
    pub fn new(store: ScoreStore) -> Self {
        ChangeDetector { store }
    }

    /// Apply one snapshot to the store and return the changes it implies.
    /// Applying the same snapshot twice yields nothing the second time.
    pub async fn detect(&self, snapshot: &[LiveEvent]) -> Vec<ScoreChange> {
        let now = Instant::now();
        let detected_at = Utc::now();

        self.store
            .update(|table| {
                let mut changes = Vec::new();
                for event in snapshot {
                    match table.entry(event.id.clone()) {
                        Entry::Vacant(slot) => {
                            debug!(
                                "Baseline {} {} {}-{} {}",
                                event.id,
                                event.home_name,
                                event.home_score,
                                event.away_score,
                                event.away_name
                            );
                            slot.insert(ScoreEntry {
                                home_name: event.home_name.clone(),
                                away_name: event.away_name.clone(),
                                home_score: event.home_score,
                                away_score: event.away_score,
                                status: event.status,
                                last_seen: now,
                            });
                        }
                        Entry::Occupied(mut slot) => {
                            let entry = slot.get_mut();
                            entry.last_seen = now;
                            if event.status.is_some() {
                                entry.status = event.status;
                            }
                            if let Some(change) = detect_score_change(entry, event, detected_at) {
                                entry.home_score = event.home_score;
                                entry.away_score = event.away_score;
                                entry.home_name = event.home_name.clone();
                                entry.away_name = event.away_name.clone();
                                info!(
                                    "Score change detected: {} {} {}-{} {} ({:?})",
                                    change.fixture_id,
                                    change.home_name,
                                    change.home_score,
                                    change.away_score,
                                    change.away_name,
                                    change.kind
                                );
                                changes.push(change);
                            }
                        }
                    }
                }
                changes
            })
            .await
    }
}

/// Compare a stored baseline with a fresh observation.
/// Returns `Some` if the scoreline differs.
pub fn detect_score_change(
    prev: &ScoreEntry,
    curr: &LiveEvent,
    detected_at: chrono::DateTime<Utc>,
) -> Option<ScoreChange> {
    if prev.score() == curr.score() {
        return None;
    }
    Some(ScoreChange {
        fixture_id: curr.id.clone(),
        home_name: curr.home_name.clone(),
        away_name: curr.away_name.clone(),
        home_score: curr.home_score,
        away_score: curr.away_score,
        prev_home_score: prev.home_score,
        prev_away_score: prev.away_score,
        kind: classify_score_change(prev.score(), curr.score()),
        detected_at,
    })
}

fn classify_score_change(prev: (u32, u32), curr: (u32, u32)) -> ChangeKind {
    if curr.0 < prev.0 || curr.1 < prev.1 {
        ChangeKind::Correction
    } else if curr.0 > prev.0 {
        ChangeKind::HomeGoal
    } else {
        ChangeKind::AwayGoal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventStatus;

    fn event(id: &str, home: u32, away: u32) -> LiveEvent {
        LiveEvent {
            id: id.into(),
            home_name: "Arsenal".into(),
            away_name: "Chelsea".into(),
            home_score: home,
            away_score: away,
            status: Some(EventStatus::InProgress),
            minute: Some(45),
        }
    }

    #[tokio::test]
    async fn test_first_sighting_seeds_without_change() {
        let store = ScoreStore::new();
        let detector = ChangeDetector::new(store.clone());

        let changes = detector.detect(&[event("10", 2, 1)]).await;
        assert!(changes.is_empty());
        assert_eq!(store.get("10").await, Some((2, 1)));
    }

    #[tokio::test]
    async fn test_change_after_baseline() {
        let store = ScoreStore::new();
        let detector = ChangeDetector::new(store.clone());

        detector.detect(&[event("10", 0, 0)]).await;
        let changes = detector.detect(&[event("10", 1, 0)]).await;

        assert_eq!(changes.len(), 1);
        let c = &changes[0];
        assert_eq!(c.fixture_id, "10");
        assert_eq!((c.home_score, c.away_score), (1, 0));
        assert_eq!((c.prev_home_score, c.prev_away_score), (0, 0));
        assert_eq!(c.kind, ChangeKind::HomeGoal);
        assert_eq!(store.get("10").await, Some((1, 0)));
    }

    #[tokio::test]
    async fn test_identical_snapshot_is_idempotent() {
        let store = ScoreStore::new();
        let detector = ChangeDetector::new(store);

        detector.detect(&[event("10", 0, 0)]).await;
        let snapshot = vec![event("10", 1, 0), event("11", 3, 3)];
        assert_eq!(detector.detect(&snapshot).await.len(), 1);
        assert!(detector.detect(&snapshot).await.is_empty());
    }

    #[tokio::test]
    async fn test_only_changed_fixtures_emit() {
        let store = ScoreStore::new();
        let detector = ChangeDetector::new(store);

        detector
            .detect(&[event("1", 0, 0), event("2", 0, 0), event("3", 1, 1)])
            .await;
        let changes = detector
            .detect(&[event("1", 0, 0), event("2", 0, 1), event("3", 1, 1), event("4", 5, 0)])
            .await;

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].fixture_id, "2");
        assert_eq!(changes[0].kind, ChangeKind::AwayGoal);
    }

    #[tokio::test]
    async fn test_absent_fixture_keeps_baseline() {
        let store = ScoreStore::new();
        let detector = ChangeDetector::new(store.clone());

        detector.detect(&[event("10", 0, 0)]).await;
        assert!(detector.detect(&[]).await.is_empty());
        let changes = detector.detect(&[event("10", 0, 1)]).await;
        assert_eq!(changes.len(), 1);
    }

    #[tokio::test]
    async fn test_status_refreshed_on_repeat_sighting() {
        let store = ScoreStore::new();
        let detector = ChangeDetector::new(store.clone());

        detector.detect(&[event("10", 1, 0)]).await;
        let mut finished = event("10", 1, 0);
        finished.status = Some(EventStatus::Finished);
        assert!(detector.detect(&[finished]).await.is_empty());

        let snap = store.snapshot().await;
        assert_eq!(snap[0].status, Some(EventStatus::Finished));
    }

    #[test]
    fn test_classify_score_change() {
        assert_eq!(classify_score_change((0, 0), (1, 0)), ChangeKind::HomeGoal);
        assert_eq!(classify_score_change((1, 0), (1, 1)), ChangeKind::AwayGoal);
        assert_eq!(classify_score_change((1, 1), (1, 0)), ChangeKind::Correction);
        assert_eq!(classify_score_change((0, 0), (1, 1)), ChangeKind::HomeGoal);
    }
}
