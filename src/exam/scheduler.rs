use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::session::{ExamSession, ExamStatus};
use super::store::ExamStore;
use crate::proctor::broadcaster::{iso_timestamp, OutboundEvent, RoomBroadcaster};

/// What one reconciliation cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub started: Vec<String>,
    pub ended: Vec<String>,
    /// Exams whose status write failed; they are picked up again next cycle
    pub failed: Vec<String>,
    /// Another cycle was still running, so this one did nothing
    pub skipped: bool,
}

#[derive(Debug, Clone, Copy)]
enum Transition {
    Start,
    End,
}

impl Transition {
    fn target(&self) -> ExamStatus {
        match self {
            Transition::Start => ExamStatus::InProgress,
            Transition::End => ExamStatus::Completed,
        }
    }

    fn event(&self) -> &'static str {
        match self {
            Transition::Start => "exam-started",
            Transition::End => "exam-ended",
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            Transition::Start => "started",
            Transition::End => "ended",
        }
    }
}

/// Moves exam sessions along `scheduled -> in-progress -> completed` by
/// comparing their windows against wall-clock time on a fixed period.
///
/// Each cycle re-queries storage from scratch, so a failed write or a missed
/// tick is corrected on the following cycle. Sessions already transitioned
/// fall out of the query filters and never fire twice.
pub struct ExamLifecycleScheduler {
    store: Arc<dyn ExamStore>,
    broadcaster: Arc<RoomBroadcaster>,
    interval: Duration,
    cycle_lock: Mutex<()>,
}

impl ExamLifecycleScheduler {
    pub fn new(
        store: Arc<dyn ExamStore>,
        broadcaster: Arc<RoomBroadcaster>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            broadcaster,
            interval,
            cycle_lock: Mutex::new(()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn run_cycle(&self, now: DateTime<Utc>) -> CycleReport {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            tracing::warn!("Previous exam schedule cycle still running, skipping");
            return CycleReport {
                skipped: true,
                ..CycleReport::default()
            };
        };

        let mut report = CycleReport::default();

        match self.store.find_sessions_needing_start(now).await {
            Ok(sessions) => {
                tracing::debug!(count = sessions.len(), "Exams due to start");
                for session in sessions {
                    self.apply(&session, Transition::Start, &mut report).await;
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to query exams due to start"),
        }

        match self.store.find_sessions_needing_end(now).await {
            Ok(sessions) => {
                tracing::debug!(count = sessions.len(), "Exams due to end");
                for session in sessions {
                    self.apply(&session, Transition::End, &mut report).await;
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to query exams due to end"),
        }

        if !report.started.is_empty() || !report.ended.is_empty() || !report.failed.is_empty() {
            tracing::info!(
                started = report.started.len(),
                ended = report.ended.len(),
                failed = report.failed.len(),
                "Exam schedule cycle complete"
            );
        }

        report
    }

    /// Persists first and only then notifies the room.
    async fn apply(&self, session: &ExamSession, transition: Transition, report: &mut CycleReport) {
        if let Err(e) = self.store.set_status(&session.id, transition.target()).await {
            tracing::error!(
                exam_id = %session.id,
                to_status = %transition.target(),
                error = %e,
                "Failed to persist exam status, will retry next cycle"
            );
            report.failed.push(session.id.clone());
            return;
        }

        let payload = json!({
            "examId": session.id,
            "title": session.title,
            "message": format!("The exam \"{}\" has {}!", session.title, transition.verb()),
            "timestamp": iso_timestamp(Utc::now()),
        });
        let notified = self
            .broadcaster
            .broadcast_to_room(&session.id, OutboundEvent::new(transition.event(), payload), None)
            .await;

        tracing::info!(
            exam_id = %session.id,
            title = %session.title,
            status = %transition.target(),
            notified,
            "Exam {}",
            transition.verb()
        );

        match transition {
            Transition::Start => report.started.push(session.id.clone()),
            Transition::End => report.ended.push(session.id.clone()),
        }
    }

    /// Runs a cycle immediately and then every `interval` until cancelled.
    /// Cycles run inline on one task, so they never overlap.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                interval_secs = self.interval.as_secs(),
                "Exam lifecycle scheduler started"
            );

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("Exam lifecycle scheduler shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.run_cycle(Utc::now()).await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProctorError, Result};
    use crate::exam::session::IncidentReport;
    use crate::exam::store::InMemoryExamStore;
    use crate::proctor::registry::{PresenceRegistry, Role};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use crate::proctor::broadcaster::OUTBOUND_QUEUE_CAPACITY;
    use tokio::sync::mpsc::{self, Receiver};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn session(id: &str, status: ExamStatus, start: i64, end: i64) -> ExamSession {
        ExamSession {
            id: id.to_string(),
            title: "Physics".to_string(),
            status,
            start_time: t0() + ChronoDuration::seconds(start),
            end_time: t0() + ChronoDuration::seconds(end),
        }
    }

    async fn watcher(
        registry: &PresenceRegistry,
        broadcaster: &RoomBroadcaster,
        exam_id: &str,
    ) -> Receiver<OutboundEvent> {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        registry.join("watcher", Role::Proctor, exam_id, None).await.unwrap();
        broadcaster.attach("watcher", tx).await;
        rx
    }

    fn drain(rx: &mut Receiver<OutboundEvent>) -> Vec<OutboundEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn build(store: Arc<dyn ExamStore>) -> (Arc<PresenceRegistry>, Arc<RoomBroadcaster>, ExamLifecycleScheduler) {
        let registry = Arc::new(PresenceRegistry::new());
        let broadcaster = Arc::new(RoomBroadcaster::new(registry.clone()));
        let scheduler =
            ExamLifecycleScheduler::new(store, broadcaster.clone(), Duration::from_secs(60));
        (registry, broadcaster, scheduler)
    }

    #[tokio::test]
    async fn test_start_fires_once_across_repeated_cycles() {
        let store = Arc::new(
            InMemoryExamStore::with_sessions(vec![session("e1", ExamStatus::Scheduled, 0, 60)]).await,
        );
        let (registry, broadcaster, scheduler) = build(store.clone());
        let mut rx = watcher(&registry, &broadcaster, "e1").await;

        let first = scheduler.run_cycle(t0()).await;
        let second = scheduler.run_cycle(t0()).await;

        assert_eq!(first.started, vec!["e1".to_string()]);
        assert!(second.started.is_empty());

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "exam-started");
        assert_eq!(events[0].data["examId"], "e1");
        assert_eq!(events[0].data["message"], "The exam \"Physics\" has started!");

        let stored = store.get_session("e1").await.unwrap().unwrap();
        assert_eq!(stored.status, ExamStatus::InProgress);
    }

    #[tokio::test]
    async fn test_zero_length_session_never_starts() {
        let store = Arc::new(
            InMemoryExamStore::with_sessions(vec![session("e1", ExamStatus::Scheduled, 0, 0)]).await,
        );
        let (_registry, _broadcaster, scheduler) = build(store.clone());

        for offset in [-1, 0, 1] {
            let report = scheduler.run_cycle(t0() + ChronoDuration::seconds(offset)).await;
            assert!(report.started.is_empty());
        }
        let stored = store.get_session("e1").await.unwrap().unwrap();
        assert_eq!(stored.status, ExamStatus::Scheduled);
    }

    #[tokio::test]
    async fn test_end_fires_exactly_once() {
        let store = Arc::new(
            InMemoryExamStore::with_sessions(vec![session("e1", ExamStatus::InProgress, -60, 0)]).await,
        );
        let (registry, broadcaster, scheduler) = build(store.clone());
        let mut rx = watcher(&registry, &broadcaster, "e1").await;

        let now = t0() + ChronoDuration::milliseconds(1);
        scheduler.run_cycle(now).await;
        scheduler.run_cycle(now).await;
        scheduler.run_cycle(now + ChronoDuration::seconds(60)).await;

        let ended: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| e.event == "exam-ended")
            .collect();
        assert_eq!(ended.len(), 1);
        let stored = store.get_session("e1").await.unwrap().unwrap();
        assert_eq!(stored.status, ExamStatus::Completed);
    }

    #[tokio::test]
    async fn test_late_cycle_fires_once_after_deadline() {
        let store = Arc::new(
            InMemoryExamStore::with_sessions(vec![session("e1", ExamStatus::Scheduled, 0, 60)]).await,
        );
        let (registry, broadcaster, scheduler) = build(store.clone());
        let mut rx = watcher(&registry, &broadcaster, "e1").await;

        // Ticks before the window do nothing; the first tick inside it starts the exam
        assert!(scheduler.run_cycle(t0() - ChronoDuration::seconds(1)).await.started.is_empty());
        let report = scheduler.run_cycle(t0() + ChronoDuration::seconds(45)).await;
        assert_eq!(report.started, vec!["e1".to_string()]);

        let report = scheduler.run_cycle(t0() + ChronoDuration::seconds(61)).await;
        assert_eq!(report.ended, vec!["e1".to_string()]);

        let names: Vec<_> = drain(&mut rx).into_iter().map(|e| e.event).collect();
        assert_eq!(names, vec!["exam-started", "exam-ended"]);
    }

    #[tokio::test]
    async fn test_missed_window_stays_scheduled() {
        let store = Arc::new(
            InMemoryExamStore::with_sessions(vec![session("e1", ExamStatus::Scheduled, 0, 60)]).await,
        );
        let (_registry, _broadcaster, scheduler) = build(store.clone());

        let report = scheduler.run_cycle(t0() + ChronoDuration::seconds(120)).await;
        assert!(report.started.is_empty());
        assert!(report.ended.is_empty());
        let stored = store.get_session("e1").await.unwrap().unwrap();
        assert_eq!(stored.status, ExamStatus::Scheduled);
    }

    #[tokio::test]
    async fn test_cancelled_session_is_left_alone() {
        let store = Arc::new(
            InMemoryExamStore::with_sessions(vec![session("e1", ExamStatus::Cancelled, 0, 60)]).await,
        );
        let (_registry, _broadcaster, scheduler) = build(store.clone());

        let report = scheduler.run_cycle(t0()).await;
        assert_eq!(report, CycleReport::default());
    }

    /// Fails the first `failures` status writes, then delegates
    struct FlakyStore {
        inner: InMemoryExamStore,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl ExamStore for FlakyStore {
        async fn find_sessions_needing_start(&self, now: DateTime<Utc>) -> Result<Vec<ExamSession>> {
            self.inner.find_sessions_needing_start(now).await
        }

        async fn find_sessions_needing_end(&self, now: DateTime<Utc>) -> Result<Vec<ExamSession>> {
            self.inner.find_sessions_needing_end(now).await
        }

        async fn set_status(&self, exam_id: &str, status: ExamStatus) -> Result<()> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(ProctorError::persistence("write timed out"));
            }
            self.inner.set_status(exam_id, status).await
        }

        async fn create_incident(&self, report: &IncidentReport) -> Result<String> {
            self.inner.create_incident(report).await
        }

        async fn get_session(&self, exam_id: &str) -> Result<Option<ExamSession>> {
            self.inner.get_session(exam_id).await
        }

        async fn insert_session(&self, session: ExamSession) -> Result<()> {
            self.inner.insert_session(session).await
        }
    }

    #[tokio::test]
    async fn test_persistence_failure_skips_broadcast_and_retries() {
        let store = Arc::new(FlakyStore {
            inner: InMemoryExamStore::with_sessions(vec![session("e1", ExamStatus::Scheduled, 0, 60)])
                .await,
            failures: AtomicUsize::new(1),
        });
        let (registry, broadcaster, scheduler) = build(store.clone());
        let mut rx = watcher(&registry, &broadcaster, "e1").await;

        let report = scheduler.run_cycle(t0()).await;
        assert_eq!(report.failed, vec!["e1".to_string()]);
        assert!(drain(&mut rx).is_empty());

        let report = scheduler.run_cycle(t0() + ChronoDuration::seconds(1)).await;
        assert_eq!(report.started, vec!["e1".to_string()]);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn test_overlapping_cycle_is_skipped() {
        let store = Arc::new(InMemoryExamStore::new());
        let (_registry, _broadcaster, scheduler) = build(store);

        let _held = scheduler.cycle_lock.lock().await;
        let report = scheduler.run_cycle(t0()).await;
        assert!(report.skipped);
    }

    #[tokio::test]
    async fn test_spawned_scheduler_runs_at_start_and_stops() {
        let store = Arc::new(
            InMemoryExamStore::with_sessions(vec![ExamSession {
                start_time: Utc::now() - ChronoDuration::seconds(5),
                end_time: Utc::now() + ChronoDuration::seconds(600),
                ..session("live", ExamStatus::Scheduled, 0, 0)
            }])
            .await,
        );
        let (_registry, _broadcaster, scheduler) = build(store.clone());
        let cancel = CancellationToken::new();
        let handle = Arc::new(scheduler).spawn(cancel.clone());

        let mut started = false;
        for _ in 0..50 {
            let status = store.get_session("live").await.unwrap().unwrap().status;
            if status == ExamStatus::InProgress {
                started = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(started, "startup cycle did not start the exam");

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }
}
