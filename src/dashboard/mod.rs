use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::monitor::{MonitorState, MonitorStats, StatsSnapshot};
use crate::store::{ScoreStore, SubscriptionRegistry};

#[derive(Clone)]
pub struct AppState {
    pub store: ScoreStore,
    pub registry: SubscriptionRegistry,
    pub stats: Arc<MonitorStats>,
    pub dry_run: bool,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    monitor: MonitorState,
    dry_run: bool,
}

#[derive(Serialize)]
struct Stats {
    #[serde(flatten)]
    monitor: StatsSnapshot,
    tracked_fixtures: usize,
    subscribers: usize,
}

/// Build the Axum router for the status API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/scores", get(scores_handler))
        .route("/api/subscriptions", get(subscriptions_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

/// GET /api/health
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(Health {
        status: "ok",
        monitor: state.stats.state(),
        dry_run: state.dry_run,
    })
}

/// GET /api/stats
async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(Stats {
        monitor: state.stats.snapshot(),
        tracked_fixtures: state.store.len().await,
        subscribers: state.registry.subscriber_count().await,
    })
}

/// GET /api/scores
async fn scores_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.snapshot().await)
}

/// GET /api/subscriptions
async fn subscriptions_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.registry.snapshot().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubscriberId;
    use crate::store::ScoreEntry;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn state() -> AppState {
        AppState {
            store: ScoreStore::new(),
            registry: SubscriptionRegistry::new(),
            stats: Arc::new(MonitorStats::default()),
            dry_run: true,
        }
    }

    async fn get_json(app: Router, uri: &str) -> serde_json::Value {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_stopped_monitor() {
        let json = get_json(router(state()), "/api/health").await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["monitor"], "stopped");
        assert_eq!(json["dry_run"], true);
    }

    #[tokio::test]
    async fn test_stats_counts() {
        let s = state();
        s.registry.add(SubscriberId(1), "Arsenal").await;
        let json = get_json(router(s), "/api/stats").await;
        assert_eq!(json["subscribers"], 1);
        assert_eq!(json["tracked_fixtures"], 0);
        assert_eq!(json["cycles_completed"], 0);
        assert!(json["last_cycle_at"].is_null());
    }

    #[tokio::test]
    async fn test_scores_and_subscriptions() {
        let s = state();
        s.store
            .update(|t| {
                t.insert(
                    "10".into(),
                    ScoreEntry {
                        home_name: "Arsenal".into(),
                        away_name: "Chelsea".into(),
                        home_score: 1,
                        away_score: 0,
                        status: None,
                        last_seen: tokio::time::Instant::now(),
                    },
                )
            })
            .await;
        s.registry.add(SubscriberId(5), "Chelsea").await;
        let app = router(s);

        let scores = get_json(app.clone(), "/api/scores").await;
        assert_eq!(scores[0]["fixture_id"], "10");
        assert_eq!(scores[0]["home_score"], 1);

        let subs = get_json(app, "/api/subscriptions").await;
        assert_eq!(subs[0]["subscriber_id"], 5);
        assert_eq!(subs[0]["teams"][0], "Chelsea");
    }
}
