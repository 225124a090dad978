use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::broadcaster::{now_timestamp, OutboundEvent, RoomBroadcaster};
use super::registry::{PresenceRegistry, Role};
use crate::error::Result;

pub const HEARTBEAT_TIMEOUT_REASON: &str = "heartbeat timeout";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatOutcome {
    /// Metadata was missing or wrong and the connection was re-joined
    pub healed: bool,
    /// The connection had been marked stale by the expiry sweep
    pub recovered: bool,
    /// Number of room members the presence update reached
    pub notified: usize,
}

/// Handles liveness signals and keeps presence metadata self-healing.
pub struct HeartbeatMonitor {
    registry: Arc<PresenceRegistry>,
    broadcaster: Arc<RoomBroadcaster>,
}

impl HeartbeatMonitor {
    pub fn new(registry: Arc<PresenceRegistry>, broadcaster: Arc<RoomBroadcaster>) -> Self {
        Self {
            registry,
            broadcaster,
        }
    }

    pub async fn on_student_heartbeat(
        &self,
        connection_id: &str,
        exam_id: &str,
        student_id: &str,
    ) -> Result<HeartbeatOutcome> {
        let exam_id = exam_id.trim();
        let student_id = student_id.trim();
        let (healed, recovered) = self
            .reconcile(connection_id, Role::Student, exam_id, Some(student_id))
            .await?;
        let timestamp = now_timestamp();

        if recovered {
            tracing::info!(
                connection_id = %connection_id,
                exam_id = %exam_id,
                student_id = %student_id,
                "Stale student resumed heartbeats"
            );
        }

        let notified = self
            .broadcaster
            .broadcast_to_room(
                exam_id,
                OutboundEvent::new(
                    "student-online",
                    json!({
                        "studentId": student_id,
                        "socketId": connection_id,
                        "timestamp": timestamp,
                    }),
                ),
                Some(connection_id),
            )
            .await;

        tracing::debug!(
            connection_id = %connection_id,
            exam_id = %exam_id,
            student_id = %student_id,
            notified,
            "Student heartbeat"
        );

        self.acknowledge(connection_id, &timestamp).await;
        Ok(HeartbeatOutcome {
            healed,
            recovered,
            notified,
        })
    }

    pub async fn on_proctor_heartbeat(
        &self,
        connection_id: &str,
        exam_id: &str,
    ) -> Result<HeartbeatOutcome> {
        let exam_id = exam_id.trim();
        let (healed, recovered) = self
            .reconcile(connection_id, Role::Proctor, exam_id, None)
            .await?;
        let timestamp = now_timestamp();

        // Only worth announcing when there is a student to hear it
        let members = self.registry.members_of(exam_id).await;
        let notified = if members.students.is_empty() {
            0
        } else {
            self.broadcaster
                .broadcast_to_room(
                    exam_id,
                    OutboundEvent::new(
                        "proctor-status-update",
                        json!({
                            "examId": exam_id,
                            "connected": true,
                            "proctorId": connection_id,
                            "timestamp": timestamp,
                        }),
                    ),
                    None,
                )
                .await
        };

        tracing::debug!(
            connection_id = %connection_id,
            exam_id = %exam_id,
            students = members.students.len(),
            "Proctor heartbeat"
        );

        self.acknowledge(connection_id, &timestamp).await;
        Ok(HeartbeatOutcome {
            healed,
            recovered,
            notified,
        })
    }

    /// Re-joins the connection when its stored metadata disagrees with the
    /// heartbeat, otherwise just refreshes liveness.
    async fn reconcile(
        &self,
        connection_id: &str,
        role: Role,
        exam_id: &str,
        user_id: Option<&str>,
    ) -> Result<(bool, bool)> {
        let in_sync = self
            .registry
            .metadata_of(connection_id)
            .await
            .map(|meta| meta.matches(role, exam_id, user_id))
            .unwrap_or(false);

        if in_sync {
            if let Some(was_stale) = self.registry.touch(connection_id).await {
                return Ok((false, was_stale));
            }
        }

        let outcome = self
            .registry
            .join(connection_id, role, exam_id, user_id)
            .await?;

        tracing::info!(
            connection_id = %connection_id,
            role = role.as_str(),
            exam_id = %exam_id,
            "Heartbeat re-joined connection with updated metadata"
        );
        Ok((true, outcome.was_stale))
    }

    async fn acknowledge(&self, connection_id: &str, timestamp: &str) {
        self.broadcaster
            .send_to(
                connection_id,
                OutboundEvent::new(
                    "heartbeat-ack",
                    json!({
                        "success": true,
                        "received": true,
                        "timestamp": timestamp,
                    }),
                ),
            )
            .await;
    }

    /// Announces students that have gone quiet for `timeout`.
    /// Their metadata stays in place until the transport actually closes.
    pub async fn sweep_stale(&self, timeout: Duration) -> usize {
        let stale = self.registry.mark_stale_students(timeout).await;

        for meta in &stale {
            let (Some(exam_id), Some(student_id)) = (&meta.exam_id, &meta.user_id) else {
                continue;
            };

            tracing::warn!(
                connection_id = %meta.connection_id,
                exam_id = %exam_id,
                student_id = %student_id,
                timeout_secs = timeout.as_secs(),
                "Student missed heartbeats"
            );

            self.broadcaster
                .broadcast_to_room(
                    exam_id,
                    OutboundEvent::new(
                        "student-disconnected",
                        json!({
                            "studentId": student_id,
                            "socketId": meta.connection_id,
                            "reason": HEARTBEAT_TIMEOUT_REASON,
                            "timestamp": now_timestamp(),
                        }),
                    ),
                    Some(meta.connection_id.as_str()),
                )
                .await;
        }

        stale.len()
    }

    /// Runs `sweep_stale` at half the timeout until cancelled.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let period = (timeout / 2).max(Duration::from_secs(1));

        tokio::spawn(async move {
            tracing::info!(
                timeout_secs = timeout.as_secs(),
                period_secs = period.as_secs(),
                "Heartbeat expiry sweeper started"
            );

            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("Heartbeat expiry sweeper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.sweep_stale(timeout).await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proctor::broadcaster::OUTBOUND_QUEUE_CAPACITY;
    use tokio::sync::mpsc::{self, Receiver};

    struct Harness {
        registry: Arc<PresenceRegistry>,
        broadcaster: Arc<RoomBroadcaster>,
        monitor: HeartbeatMonitor,
    }

    impl Harness {
        fn new() -> Self {
            let registry = Arc::new(PresenceRegistry::new());
            let broadcaster = Arc::new(RoomBroadcaster::new(registry.clone()));
            let monitor = HeartbeatMonitor::new(registry.clone(), broadcaster.clone());
            Self {
                registry,
                broadcaster,
                monitor,
            }
        }

        async fn connect(&self, id: &str) -> Receiver<OutboundEvent> {
            let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
            self.registry.register(id).await;
            self.broadcaster.attach(id, tx).await;
            rx
        }
    }

    fn drain(rx: &mut Receiver<OutboundEvent>) -> Vec<OutboundEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_first_student_heartbeat_self_heals() {
        let h = Harness::new();
        let mut student = h.connect("s1").await;

        let outcome = h.monitor.on_student_heartbeat("s1", "e1", "alice").await.unwrap();

        assert!(outcome.healed);
        assert!(h.registry.members_of("e1").await.contains("s1"));
        let events = drain(&mut student);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "heartbeat-ack");
        assert_eq!(events[0].data["success"], true);
    }

    #[tokio::test]
    async fn test_padded_ids_reach_the_trimmed_room() {
        let h = Harness::new();
        let mut proctor = h.connect("p1").await;
        let _student = h.connect("s1").await;
        h.registry.join("p1", Role::Proctor, "e1", None).await.unwrap();

        let outcome = h.monitor.on_student_heartbeat("s1", " e1 ", " alice ").await.unwrap();

        assert_eq!(outcome.notified, 1);
        let events = drain(&mut proctor);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "student-online");
        assert_eq!(events[0].data["studentId"], "alice");

        // Padding alone must not count as a metadata change
        let outcome = h.monitor.on_student_heartbeat("s1", "e1 ", "alice").await.unwrap();
        assert!(!outcome.healed);

        let outcome = h.monitor.on_proctor_heartbeat("p1", "  e1").await.unwrap();
        assert!(!outcome.healed);
        assert_eq!(outcome.notified, 2);
    }

    #[tokio::test]
    async fn test_repeat_heartbeat_does_not_heal() {
        let h = Harness::new();
        let _student = h.connect("s1").await;

        h.monitor.on_student_heartbeat("s1", "e1", "alice").await.unwrap();
        let outcome = h.monitor.on_student_heartbeat("s1", "e1", "alice").await.unwrap();
        assert!(!outcome.healed);
    }

    #[tokio::test]
    async fn test_student_heartbeat_notifies_room_not_self() {
        let h = Harness::new();
        let mut proctor = h.connect("p1").await;
        let mut student = h.connect("s1").await;
        h.registry.join("p1", Role::Proctor, "e1", None).await.unwrap();

        let outcome = h.monitor.on_student_heartbeat("s1", "e1", "alice").await.unwrap();

        assert_eq!(outcome.notified, 1);
        let seen = drain(&mut proctor);
        assert_eq!(seen[0].event, "student-online");
        assert_eq!(seen[0].data["studentId"], "alice");
        assert!(drain(&mut student).iter().all(|e| e.event == "heartbeat-ack"));
    }

    #[tokio::test]
    async fn test_heartbeat_with_new_exam_migrates_membership() {
        let h = Harness::new();
        let _student = h.connect("s1").await;

        h.monitor.on_student_heartbeat("s1", "e1", "alice").await.unwrap();
        let outcome = h.monitor.on_student_heartbeat("s1", "e2", "alice").await.unwrap();

        assert!(outcome.healed);
        assert!(!h.registry.members_of("e1").await.contains("s1"));
        assert!(h.registry.members_of("e2").await.contains("s1"));
    }

    #[tokio::test]
    async fn test_proctor_heartbeat_quiet_without_students() {
        let h = Harness::new();
        let mut proctor = h.connect("p1").await;

        let outcome = h.monitor.on_proctor_heartbeat("p1", "e1").await.unwrap();

        assert_eq!(outcome.notified, 0);
        let events = drain(&mut proctor);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "heartbeat-ack");
    }

    #[tokio::test]
    async fn test_proctor_heartbeat_announces_to_whole_room() {
        let h = Harness::new();
        let mut proctor = h.connect("p1").await;
        let mut student = h.connect("s1").await;
        h.registry.join("s1", Role::Student, "e1", Some("alice")).await.unwrap();

        let outcome = h.monitor.on_proctor_heartbeat("p1", "e1").await.unwrap();

        assert_eq!(outcome.notified, 2);
        assert_eq!(drain(&mut student)[0].event, "proctor-status-update");
        let names: Vec<_> = drain(&mut proctor).into_iter().map(|e| e.event).collect();
        assert_eq!(names, vec!["proctor-status-update", "heartbeat-ack"]);
    }

    #[tokio::test]
    async fn test_invalid_heartbeat_is_rejected() {
        let h = Harness::new();
        let mut student = h.connect("s1").await;

        assert!(h.monitor.on_student_heartbeat("s1", "", "alice").await.is_err());
        assert!(h.monitor.on_student_heartbeat("s1", "e1", " ").await.is_err());
        assert!(drain(&mut student).is_empty());
    }

    #[tokio::test]
    async fn test_sweep_announces_stale_student_once() {
        let h = Harness::new();
        let mut proctor = h.connect("p1").await;
        let _student = h.connect("s1").await;
        h.registry.join("p1", Role::Proctor, "e1", None).await.unwrap();
        h.monitor.on_student_heartbeat("s1", "e1", "alice").await.unwrap();
        drain(&mut proctor);

        assert_eq!(h.monitor.sweep_stale(Duration::ZERO).await, 1);
        assert_eq!(h.monitor.sweep_stale(Duration::ZERO).await, 0);

        let events = drain(&mut proctor);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "student-disconnected");
        assert_eq!(events[0].data["reason"], HEARTBEAT_TIMEOUT_REASON);

        // Still a member until the transport closes
        assert!(h.registry.members_of("e1").await.contains("s1"));

        let outcome = h.monitor.on_student_heartbeat("s1", "e1", "alice").await.unwrap();
        assert!(outcome.recovered);
        assert_eq!(drain(&mut proctor)[0].event, "student-online");
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_cancel() {
        let h = Harness::new();
        let monitor = Arc::new(h.monitor);
        let cancel = CancellationToken::new();

        let handle = monitor.spawn_sweeper(Duration::from_secs(30), cancel.clone());
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
