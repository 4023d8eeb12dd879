//! The poll loop.
//!
//! ```text
//!  tick ──▶ SnapshotFetcher ──▶ ChangeDetector ──▶ Dispatcher ──▶ NotificationSender
//!              (cancellable)     (ScoreStore)     (SubscriptionRegistry)
//! ```
//!
//! One iteration never takes the loop down: fetch failures skip the cycle,
//! delivery failures are counted, and a panic while processing a snapshot is
//! caught and logged. The shutdown token is honoured while waiting for a tick
//! and while a fetch is in flight; once a snapshot is in hand it is processed
//! to completion so detected changes are never dropped half-way.

use chrono::{DateTime, TimeZone, Utc};
use futures_util::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::live_scores::{ChangeDetector, FetchError, SnapshotFetcher};
use crate::models::LiveEvent;
use crate::notify::{DispatchReport, Dispatcher};
use crate::store::ScoreStore;

#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    pub fetch_timeout: Duration,
    /// Fixtures unseen for this long are dropped from the score store
    pub stale_after: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(10),
            stale_after: Duration::from_secs(6 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    Running,
    Stopped,
}

/// Counters shared between the loop and the status API.
#[derive(Debug, Default)]
pub struct MonitorStats {
    running: AtomicBool,
    cycles_completed: AtomicU64,
    cycles_skipped: AtomicU64,
    cycles_failed: AtomicU64,
    changes_detected: AtomicU64,
    notifications_delivered: AtomicU64,
    delivery_failures: AtomicU64,
    /// Unix millis of the last completed cycle, 0 if none yet
    last_cycle_ms: AtomicI64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub state: MonitorState,
    pub cycles_completed: u64,
    pub cycles_skipped: u64,
    pub cycles_failed: u64,
    pub changes_detected: u64,
    pub notifications_delivered: u64,
    pub delivery_failures: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

impl MonitorStats {
    pub fn state(&self) -> MonitorState {
        if self.running.load(Ordering::Acquire) {
            MonitorState::Running
        } else {
            MonitorState::Stopped
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let last_ms = self.last_cycle_ms.load(Ordering::Relaxed);
        StatsSnapshot {
            state: self.state(),
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            cycles_skipped: self.cycles_skipped.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
            changes_detected: self.changes_detected.load(Ordering::Relaxed),
            notifications_delivered: self.notifications_delivered.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            last_cycle_at: if last_ms > 0 {
                Utc.timestamp_millis_opt(last_ms).single()
            } else {
                None
            },
        }
    }
}

/// What one poll iteration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The snapshot could not be fetched; nothing was touched.
    Skipped,
    Completed {
        events: usize,
        changes: usize,
        evicted: usize,
        report: DispatchReport,
    },
}

pub struct ScoreMonitor {
    fetcher: Arc<dyn SnapshotFetcher>,
    detector: ChangeDetector,
    dispatcher: Dispatcher,
    store: ScoreStore,
    config: MonitorConfig,
    stats: Arc<MonitorStats>,
}

impl ScoreMonitor {
    pub fn new(
        fetcher: Arc<dyn SnapshotFetcher>,
        store: ScoreStore,
        dispatcher: Dispatcher,
        config: MonitorConfig,
    ) -> Self {
        ScoreMonitor {
            fetcher,
            detector: ChangeDetector::new(store.clone()),
            dispatcher,
            store,
            config,
            stats: Arc::new(MonitorStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<MonitorStats> {
        Arc::clone(&self.stats)
    }

    /// Run a single fetch → detect → dispatch iteration.
    #[allow(dead_code)]
    pub async fn run_cycle(&self) -> CycleOutcome {
        match self.fetch_snapshot().await {
            Ok(events) => self.process_snapshot(events).await,
            Err(e) => self.skip_cycle(&e),
        }
    }

    async fn fetch_snapshot(&self) -> Result<Vec<LiveEvent>, FetchError> {
        let timeout = self.config.fetch_timeout;
        match tokio::time::timeout(timeout, self.fetcher.fetch_live_events()).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(timeout)),
        }
    }

    fn skip_cycle(&self, e: &FetchError) -> CycleOutcome {
        warn!("Provider '{}' failed, skipping cycle: {}", self.fetcher.name(), e);
        self.stats.cycles_skipped.fetch_add(1, Ordering::Relaxed);
        CycleOutcome::Skipped
    }

    async fn process_snapshot(&self, events: Vec<LiveEvent>) -> CycleOutcome {
        let changes = self.detector.detect(&events).await;
        let report = self.dispatcher.dispatch(&changes).await;
        let evicted = self.store.evict(self.config.stale_after).await;

        let stats = &self.stats;
        stats.cycles_completed.fetch_add(1, Ordering::Relaxed);
        stats
            .changes_detected
            .fetch_add(changes.len() as u64, Ordering::Relaxed);
        stats
            .notifications_delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        stats
            .delivery_failures
            .fetch_add(report.failed as u64, Ordering::Relaxed);
        stats
            .last_cycle_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);

        if !changes.is_empty() || report.failed > 0 {
            info!(
                "Cycle: {} live, {} change(s), {} delivered, {} failed, {} evicted",
                events.len(),
                changes.len(),
                report.delivered,
                report.failed,
                evicted
            );
        }

        CycleOutcome::Completed {
            events: events.len(),
            changes: changes.len(),
            evicted,
            report,
        }
    }

    /// Spawn the loop on its own task. Cancelling `shutdown` (or calling
    /// [`MonitorHandle::stop`]) ends it at the next iteration boundary.
    pub fn start(self, shutdown: CancellationToken) -> MonitorHandle {
        let cancel = shutdown.child_token();
        let stats = self.stats();
        stats.running.store(true, Ordering::Release);

        let task = tokio::spawn(self.run(cancel.clone()));
        MonitorHandle {
            cancel,
            task,
            stats,
        }
    }

    async fn run(self, cancel: CancellationToken) {
        info!(
            "Score monitor started (provider: {}, interval={:?}, timeout={:?})",
            self.fetcher.name(),
            self.config.poll_interval,
            self.config.fetch_timeout
        );

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                res = self.fetch_snapshot() => res,
            };

            match fetched {
                Ok(events) => {
                    let processed = AssertUnwindSafe(self.process_snapshot(events))
                        .catch_unwind()
                        .await;
                    if processed.is_err() {
                        error!("Poll cycle panicked while processing snapshot; continuing");
                        self.stats.cycles_failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Err(e) => {
                    self.skip_cycle(&e);
                }
            }
        }

        self.stats.running.store(false, Ordering::Release);
        info!("Score monitor stopped");
    }
}

/// Lifecycle control for a running [`ScoreMonitor`].
pub struct MonitorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    stats: Arc<MonitorStats>,
}

impl MonitorHandle {
    pub fn state(&self) -> MonitorState {
        self.stats.state()
    }

    pub fn stats(&self) -> Arc<MonitorStats> {
        Arc::clone(&self.stats)
    }

    /// Request shutdown and wait for the loop to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!("Score monitor task ended abnormally: {}", e);
            self.stats.running.store(false, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Notification, SubscriberId};
    use crate::notify::{DeliveryError, NotificationSender};
    use crate::store::SubscriptionRegistry;
    use async_trait::async_trait;
    use std::collections::{HashSet, VecDeque};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Mutex;

    /// Plays back a scripted sequence of fetch results, then empty snapshots.
    #[derive(Default)]
    struct ScriptedFetcher {
        script: Mutex<VecDeque<Result<Vec<LiveEvent>, FetchError>>>,
        calls: AtomicUsize,
        hang: bool,
    }

    impl ScriptedFetcher {
        fn new(script: Vec<Result<Vec<LiveEvent>, FetchError>>) -> Self {
            ScriptedFetcher {
                script: Mutex::new(script.into()),
                ..Default::default()
            }
        }

        fn hanging() -> Self {
            ScriptedFetcher {
                hang: true,
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SnapshotFetcher for ScriptedFetcher {
        async fn fetch_live_events(&self) -> Result<Vec<LiveEvent>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.script.lock().await.pop_front().unwrap_or(Ok(vec![]))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    #[derive(Default)]
    struct RecordingSender {
        failing: HashSet<SubscriberId>,
        panics: bool,
        sent: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl NotificationSender for RecordingSender {
        async fn send(&self, notification: &Notification) -> Result<(), DeliveryError> {
            if self.panics {
                panic!("sender blew up");
            }
            if self.failing.contains(&notification.subscriber_id) {
                return Err(DeliveryError::Transport("connection reset".into()));
            }
            self.sent.lock().await.push(notification.clone());
            Ok(())
        }
    }

    fn arsenal_chelsea(home: u32, away: u32) -> LiveEvent {
        LiveEvent {
            id: "10".into(),
            home_name: "Arsenal".into(),
            away_name: "Chelsea".into(),
            home_score: home,
            away_score: away,
            status: None,
            minute: None,
        }
    }

    struct Harness {
        monitor: ScoreMonitor,
        fetcher: Arc<ScriptedFetcher>,
        sender: Arc<RecordingSender>,
        store: ScoreStore,
        registry: SubscriptionRegistry,
    }

    fn harness(fetcher: ScriptedFetcher, sender: RecordingSender) -> Harness {
        let fetcher = Arc::new(fetcher);
        let sender = Arc::new(sender);
        let store = ScoreStore::new();
        let registry = SubscriptionRegistry::new();
        let dispatcher = Dispatcher::new(registry.clone(), sender.clone());
        let monitor = ScoreMonitor::new(
            fetcher.clone(),
            store.clone(),
            dispatcher,
            MonitorConfig::default(),
        );
        Harness {
            monitor,
            fetcher,
            sender,
            store,
            registry,
        }
    }

    #[tokio::test]
    async fn test_baseline_then_goal_notifies_follower() {
        let h = harness(
            ScriptedFetcher::new(vec![
                Ok(vec![arsenal_chelsea(0, 0)]),
                Ok(vec![arsenal_chelsea(1, 0)]),
            ]),
            RecordingSender::default(),
        );
        h.registry.add(SubscriberId(1), "Arsenal").await;

        let first = h.monitor.run_cycle().await;
        assert!(matches!(first, CycleOutcome::Completed { changes: 0, .. }));
        assert!(h.sender.sent.lock().await.is_empty());
        assert_eq!(h.store.get("10").await, Some((0, 0)));

        let second = h.monitor.run_cycle().await;
        assert!(matches!(second, CycleOutcome::Completed { changes: 1, .. }));
        let sent = h.sender.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subscriber_id, SubscriberId(1));
        assert!(sent[0].message_text.contains("1-0"));
    }

    #[tokio::test]
    async fn test_fetch_error_skips_cycle_without_mutation() {
        let h = harness(
            ScriptedFetcher::new(vec![
                Ok(vec![arsenal_chelsea(0, 0)]),
                Ok(vec![arsenal_chelsea(0, 0)]),
                Err(FetchError::Network("connection refused".into())),
                Ok(vec![arsenal_chelsea(0, 1)]),
            ]),
            RecordingSender::default(),
        );
        h.registry.add(SubscriberId(1), "Chelsea").await;

        h.monitor.run_cycle().await;
        h.monitor.run_cycle().await;

        assert_eq!(h.monitor.run_cycle().await, CycleOutcome::Skipped);
        assert_eq!(h.store.get("10").await, Some((0, 0)));
        assert_eq!(h.registry.list(SubscriberId(1)).await, vec!["Chelsea"]);
        assert!(h.sender.sent.lock().await.is_empty());

        let fourth = h.monitor.run_cycle().await;
        assert!(matches!(fourth, CycleOutcome::Completed { changes: 1, .. }));
        assert_eq!(h.sender.sent.lock().await.len(), 1);

        let stats = h.monitor.stats().snapshot();
        assert_eq!(stats.cycles_completed, 3);
        assert_eq!(stats.cycles_skipped, 1);
        assert_eq!(stats.notifications_delivered, 1);
    }

    #[tokio::test]
    async fn test_delivery_failure_is_counted_not_fatal() {
        let h = harness(
            ScriptedFetcher::new(vec![
                Ok(vec![arsenal_chelsea(0, 0)]),
                Ok(vec![arsenal_chelsea(0, 1)]),
            ]),
            RecordingSender {
                failing: HashSet::from([SubscriberId(1)]),
                ..Default::default()
            },
        );
        h.registry.add(SubscriberId(1), "Chelsea").await;
        h.registry.add(SubscriberId(2), "Chelsea").await;

        h.monitor.run_cycle().await;
        let outcome = h.monitor.run_cycle().await;

        match outcome {
            CycleOutcome::Completed { report, .. } => {
                assert_eq!(report.delivered, 1);
                assert_eq!(report.failed, 1);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        let sent = h.sender.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subscriber_id, SubscriberId(2));
    }

    #[tokio::test]
    async fn test_finished_fixture_evicted_after_final_change() {
        let mut finished = arsenal_chelsea(2, 0);
        finished.status = Some(crate::models::EventStatus::Finished);
        let h = harness(
            ScriptedFetcher::new(vec![Ok(vec![arsenal_chelsea(1, 0)]), Ok(vec![finished])]),
            RecordingSender::default(),
        );
        h.registry.add(SubscriberId(1), "Arsenal").await;

        h.monitor.run_cycle().await;
        let outcome = h.monitor.run_cycle().await;

        assert!(matches!(
            outcome,
            CycleOutcome::Completed {
                changes: 1,
                evicted: 1,
                ..
            }
        ));
        assert_eq!(h.sender.sent.lock().await.len(), 1);
        assert_eq!(h.store.get("10").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout_skips_cycle() {
        let h = harness(ScriptedFetcher::hanging(), RecordingSender::default());
        assert_eq!(h.monitor.run_cycle().await, CycleOutcome::Skipped);
        assert_eq!(h.monitor.stats().snapshot().cycles_skipped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_polls_on_interval_until_stopped() {
        let h = harness(
            ScriptedFetcher::new(vec![
                Ok(vec![arsenal_chelsea(0, 0)]),
                Err(FetchError::Status(500)),
                Ok(vec![arsenal_chelsea(1, 0)]),
            ]),
            RecordingSender::default(),
        );
        h.registry.add(SubscriberId(1), "Arsenal").await;
        let fetcher = h.fetcher.clone();
        let sender = h.sender.clone();

        let handle = h.monitor.start(CancellationToken::new());
        assert_eq!(handle.state(), MonitorState::Running);

        // Ticks at t=0, 60, 120
        tokio::time::sleep(Duration::from_secs(150)).await;
        assert_eq!(fetcher.calls(), 3);
        assert_eq!(sender.sent.lock().await.len(), 1);

        let stats = handle.stats();
        handle.stop().await;
        assert_eq!(stats.state(), MonitorState::Stopped);
        assert_eq!(stats.snapshot().cycles_skipped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_cycle_does_not_end_loop() {
        let h = harness(
            ScriptedFetcher::new(vec![
                Ok(vec![arsenal_chelsea(0, 0)]),
                Ok(vec![arsenal_chelsea(1, 0)]),
            ]),
            RecordingSender {
                panics: true,
                ..Default::default()
            },
        );
        h.registry.add(SubscriberId(1), "Arsenal").await;
        let fetcher = h.fetcher.clone();

        let handle = h.monitor.start(CancellationToken::new());
        tokio::time::sleep(Duration::from_secs(150)).await;

        assert_eq!(fetcher.calls(), 3);
        let stats = handle.stats();
        assert_eq!(stats.snapshot().cycles_failed, 1);
        assert_eq!(stats.state(), MonitorState::Running);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_inflight_fetch() {
        let mut h = harness(ScriptedFetcher::hanging(), RecordingSender::default());
        h.monitor.config.fetch_timeout = Duration::from_secs(3600);
        h.monitor.config.poll_interval = Duration::from_secs(7200);
        let fetcher = h.fetcher.clone();

        let shutdown = CancellationToken::new();
        let handle = h.monitor.start(shutdown.clone());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fetcher.calls(), 1);

        shutdown.cancel();
        let stats = handle.stats();
        handle.stop().await;
        assert_eq!(stats.state(), MonitorState::Stopped);
        assert_eq!(stats.snapshot().cycles_skipped, 0);
    }
}
