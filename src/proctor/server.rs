use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::broadcaster::{iso_timestamp, now_timestamp, EventSender, OutboundEvent, RoomBroadcaster};
use super::heartbeat::HeartbeatMonitor;
use super::registry::{ConnectionMeta, PresenceRegistry, Role, RoomMembers};
use crate::config::Config;
use crate::error::{ProctorError, Result};
use crate::exam::{ExamLifecycleScheduler, ExamStore, IncidentReport};

/// Owns the real-time components and exposes one operation per inbound event.
pub struct ProctorServer {
    registry: Arc<PresenceRegistry>,
    broadcaster: Arc<RoomBroadcaster>,
    heartbeat: Arc<HeartbeatMonitor>,
    store: Arc<dyn ExamStore>,
    scheduler: Arc<ExamLifecycleScheduler>,
    heartbeat_timeout: Option<Duration>,
}

impl ProctorServer {
    pub fn new(
        store: Arc<dyn ExamStore>,
        scheduler_interval: Duration,
        heartbeat_timeout: Option<Duration>,
    ) -> Self {
        let registry = Arc::new(PresenceRegistry::new());
        let broadcaster = Arc::new(RoomBroadcaster::new(registry.clone()));
        let heartbeat = Arc::new(HeartbeatMonitor::new(registry.clone(), broadcaster.clone()));
        let scheduler = Arc::new(ExamLifecycleScheduler::new(
            store.clone(),
            broadcaster.clone(),
            scheduler_interval,
        ));

        Self {
            registry,
            broadcaster,
            heartbeat,
            store,
            scheduler,
            heartbeat_timeout,
        }
    }

    pub fn from_config(config: &Config, store: Arc<dyn ExamStore>) -> Self {
        Self::new(
            store,
            config.scheduler.interval,
            config.presence.heartbeat_timeout,
        )
    }

    pub fn registry(&self) -> Arc<PresenceRegistry> {
        self.registry.clone()
    }

    pub fn broadcaster(&self) -> Arc<RoomBroadcaster> {
        self.broadcaster.clone()
    }

    pub fn heartbeat(&self) -> Arc<HeartbeatMonitor> {
        self.heartbeat.clone()
    }

    pub fn scheduler(&self) -> Arc<ExamLifecycleScheduler> {
        self.scheduler.clone()
    }

    pub fn heartbeat_timeout(&self) -> Option<Duration> {
        self.heartbeat_timeout
    }

    /// Starts the lifecycle scheduler and, when configured, the expiry sweeper.
    pub fn start_background_tasks(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = vec![self.scheduler.clone().spawn(cancel.child_token())];

        if let Some(timeout) = self.heartbeat_timeout {
            handles.push(
                self.heartbeat
                    .clone()
                    .spawn_sweeper(timeout, cancel.child_token()),
            );
        } else {
            tracing::info!("Heartbeat expiry disabled, presence relies on transport disconnects");
        }

        handles
    }

    /// Registers a new transport session and returns its connection id
    pub async fn connect(&self, sender: EventSender) -> String {
        let connection_id = Uuid::new_v4().to_string();
        self.registry.register(&connection_id).await;
        self.broadcaster.attach(&connection_id, sender).await;
        tracing::info!(connection_id = %connection_id, "Client connected");
        connection_id
    }

    /// Tears down a connection. Must run exactly once per connection.
    pub async fn disconnect(&self, connection_id: &str, reason: &str) -> Option<ConnectionMeta> {
        let meta = self.registry.remove(connection_id).await;
        self.broadcaster.detach(connection_id).await;

        let Some(meta) = meta else {
            tracing::warn!(connection_id = %connection_id, "Disconnect for unknown connection");
            return None;
        };

        tracing::info!(
            connection_id = %connection_id,
            role = meta.role.as_str(),
            exam_id = ?meta.exam_id,
            reason = %reason,
            "Client disconnected"
        );

        match (meta.role, &meta.exam_id, &meta.user_id) {
            (Role::Student, Some(_), Some(_)) if meta.stale => {
                // The sweeper already announced this student as gone
                tracing::debug!(
                    connection_id = %connection_id,
                    "Stale student closed, departure already broadcast"
                );
            }
            (Role::Student, Some(exam_id), Some(student_id)) => {
                self.broadcaster
                    .broadcast_to_room(
                        exam_id,
                        OutboundEvent::new(
                            "student-disconnected",
                            json!({
                                "studentId": student_id,
                                "socketId": connection_id,
                                "reason": reason,
                                "timestamp": now_timestamp(),
                            }),
                        ),
                        Some(connection_id),
                    )
                    .await;
            }
            (Role::Proctor, Some(exam_id), _) => {
                let members = self.registry.members_of(exam_id).await;
                if members.proctors.is_empty() {
                    self.broadcaster
                        .broadcast_to_room(
                            exam_id,
                            OutboundEvent::new(
                                "proctor-status-update",
                                json!({
                                    "examId": exam_id,
                                    "connected": false,
                                    "proctorId": connection_id,
                                    "timestamp": now_timestamp(),
                                }),
                            ),
                            None,
                        )
                        .await;
                }
            }
            _ => {}
        }

        Some(meta)
    }

    pub async fn proctor_join(&self, connection_id: &str, exam_id: &str) -> Result<()> {
        self.registry
            .join(connection_id, Role::Proctor, exam_id, None)
            .await?;
        let timestamp = now_timestamp();

        tracing::info!(connection_id = %connection_id, exam_id = %exam_id, "Proctor joined exam");

        self.broadcaster
            .broadcast_to_room(
                exam_id,
                OutboundEvent::new(
                    "proctor-connected",
                    json!({ "socketId": connection_id, "timestamp": timestamp }),
                ),
                Some(connection_id),
            )
            .await;

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
            .await;

        Ok(())
    }

    pub async fn student_join(
        &self,
        connection_id: &str,
        exam_id: &str,
        student_id: &str,
    ) -> Result<()> {
        self.registry
            .join(connection_id, Role::Student, exam_id, Some(student_id))
            .await?;
        let timestamp = now_timestamp();

        let notified = self
            .broadcaster
            .broadcast_to_room(
                exam_id,
                OutboundEvent::new(
                    "student-connected",
                    json!({
                        "studentId": student_id,
                        "socketId": connection_id,
                        "timestamp": timestamp,
                        "reconnection": true,
                    }),
                ),
                Some(connection_id),
            )
            .await;

        self.broadcaster
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

        tracing::info!(
            connection_id = %connection_id,
            exam_id = %exam_id,
            student_id = %student_id,
            notified,
            "Student joined exam"
        );
        Ok(())
    }

    /// Relays an opaque video frame to the rest of the room
    pub async fn relay_video(
        &self,
        connection_id: &str,
        exam_id: &str,
        student_id: &str,
        video_data: Value,
    ) -> usize {
        self.broadcaster
            .broadcast_to_room(
                exam_id,
                OutboundEvent::new(
                    "student-video-update",
                    json!({
                        "studentId": student_id,
                        "videoData": video_data,
                        "timestamp": now_timestamp(),
                    }),
                ),
                Some(connection_id),
            )
            .await
    }

    /// Asks the student's own connections to verify their id
    pub async fn request_id_verification(
        &self,
        connection_id: &str,
        exam_id: &str,
        student_id: &str,
    ) -> Result<usize> {
        let delivered = self
            .broadcaster
            .send_to_student(
                exam_id,
                student_id,
                OutboundEvent::new(
                    "verify-id",
                    json!({
                        "studentId": student_id,
                        "requestedBy": connection_id,
                        "timestamp": now_timestamp(),
                    }),
                ),
            )
            .await;

        if delivered == 0 {
            tracing::warn!(
                exam_id = %exam_id,
                student_id = %student_id,
                "Verification requested for a student with no open connection"
            );
            return Err(ProctorError::ConnectionNotFound(student_id.to_string()));
        }

        tracing::info!(
            connection_id = %connection_id,
            exam_id = %exam_id,
            student_id = %student_id,
            "ID verification requested"
        );
        Ok(delivered)
    }

    /// Forwards a student's verification answer to the room's proctors
    pub async fn relay_verification_result(
        &self,
        connection_id: &str,
        exam_id: &str,
        student_id: &str,
        verified: bool,
    ) -> usize {
        tracing::info!(
            exam_id = %exam_id,
            student_id = %student_id,
            verified,
            "ID verification response received"
        );

        self.broadcaster
            .broadcast_to_role(
                exam_id,
                Role::Proctor,
                OutboundEvent::new(
                    "id-verification-result",
                    json!({
                        "studentId": student_id,
                        "verified": verified,
                        "timestamp": now_timestamp(),
                        "verifiedBy": connection_id,
                    }),
                ),
            )
            .await
    }

    /// Persists the incident, then tells the rest of the room.
    /// Nothing is broadcast when storage fails.
    pub async fn report_incident(&self, connection_id: &str, report: &IncidentReport) -> Result<String> {
        let incident_id = self.store.create_incident(report).await.map_err(|e| {
            tracing::error!(
                exam_id = %report.exam_id,
                student_id = %report.student_id,
                error = %e,
                "Failed to persist incident"
            );
            e
        })?;

        self.broadcaster
            .broadcast_to_room(
                &report.exam_id,
                OutboundEvent::new(
                    "suspicious-activity",
                    json!({
                        "incidentId": incident_id,
                        "studentId": report.student_id,
                        "type": report.incident_type,
                        "description": report.description,
                        "timestamp": iso_timestamp(report.timestamp),
                        "reportedBy": connection_id,
                    }),
                ),
                Some(connection_id),
            )
            .await;

        tracing::info!(
            incident_id = %incident_id,
            exam_id = %report.exam_id,
            student_id = %report.student_id,
            incident_type = report.incident_type.as_str(),
            "Suspicious activity reported"
        );
        Ok(incident_id)
    }

    /// Replays `student-online` for every student in the room to the requester
    pub async fn connection_status(&self, connection_id: &str, exam_id: &str) -> RoomMembers {
        let members = self.registry.members_of(exam_id).await;
        let timestamp = now_timestamp();

        for student in &members.students {
            self.broadcaster
                .send_to(
                    connection_id,
                    OutboundEvent::new(
                        "student-online",
                        json!({
                            "studentId": student.user_id,
                            "socketId": student.connection_id,
                            "timestamp": timestamp,
                        }),
                    ),
                )
                .await;
        }

        tracing::debug!(
            connection_id = %connection_id,
            exam_id = %exam_id,
            proctors = members.proctors.len(),
            students = members.students.len(),
            "Connection status requested"
        );
        members
    }

    pub async fn submit_exam(&self, connection_id: &str, exam_id: &str, student_id: &str) -> usize {
        tracing::info!(exam_id = %exam_id, student_id = %student_id, "Student submitted exam");

        self.broadcaster
            .broadcast_to_room(
                exam_id,
                OutboundEvent::new(
                    "student-submitted-exam",
                    json!({
                        "studentId": student_id,
                        "examId": exam_id,
                        "timestamp": now_timestamp(),
                    }),
                ),
                Some(connection_id),
            )
            .await
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.connection_count().await
    }

    pub async fn room_count(&self) -> usize {
        self.registry.room_count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exam::{IncidentType, InMemoryExamStore};
    use crate::proctor::broadcaster::OUTBOUND_QUEUE_CAPACITY;
    use tokio::sync::mpsc::{self, Receiver};

    fn server() -> (ProctorServer, Arc<InMemoryExamStore>) {
        let store = Arc::new(InMemoryExamStore::new());
        let server = ProctorServer::new(store.clone(), Duration::from_secs(60), None);
        (server, store)
    }

    async fn connect(server: &ProctorServer) -> (String, Receiver<OutboundEvent>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let id = server.connect(tx).await;
        (id, rx)
    }

    fn drain(rx: &mut Receiver<OutboundEvent>) -> Vec<OutboundEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_student_disconnect_notifies_room() {
        let (server, _store) = server();
        let (proctor, mut proctor_rx) = connect(&server).await;
        let (student, _student_rx) = connect(&server).await;
        server.proctor_join(&proctor, "e1").await.unwrap();
        server.student_join(&student, "e1", "alice").await.unwrap();
        drain(&mut proctor_rx);

        let removed = server.disconnect(&student, "transport close").await.unwrap();
        assert_eq!(removed.user_id.as_deref(), Some("alice"));

        let events = drain(&mut proctor_rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "student-disconnected");
        assert_eq!(events[0].data["reason"], "transport close");
        assert!(!server.registry().members_of("e1").await.contains(&student));
    }

    #[tokio::test]
    async fn test_stale_student_departure_announced_once() {
        let (server, _store) = server();
        let (proctor, mut proctor_rx) = connect(&server).await;
        let (student, _student_rx) = connect(&server).await;
        server.proctor_join(&proctor, "e1").await.unwrap();
        server.student_join(&student, "e1", "alice").await.unwrap();
        drain(&mut proctor_rx);

        assert_eq!(server.heartbeat().sweep_stale(Duration::ZERO).await, 1);
        let swept = drain(&mut proctor_rx);
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].event, "student-disconnected");

        server.disconnect(&student, "client disconnect").await.unwrap();

        let events = drain(&mut proctor_rx);
        assert!(events.iter().all(|e| e.event != "student-disconnected"));
        assert!(!server.registry().members_of("e1").await.contains(&student));
    }

    #[tokio::test]
    async fn test_disconnect_twice_is_harmless() {
        let (server, _store) = server();
        let (conn, _rx) = connect(&server).await;
        assert!(server.disconnect(&conn, "client disconnect").await.is_some());
        assert!(server.disconnect(&conn, "client disconnect").await.is_none());
    }

    #[tokio::test]
    async fn test_last_proctor_leaving_is_announced() {
        let (server, _store) = server();
        let (proctor, _proctor_rx) = connect(&server).await;
        let (student, mut student_rx) = connect(&server).await;
        server.student_join(&student, "e1", "alice").await.unwrap();
        server.proctor_join(&proctor, "e1").await.unwrap();
        drain(&mut student_rx);

        server.disconnect(&proctor, "client disconnect").await;

        let events = drain(&mut student_rx);
        assert_eq!(events[0].event, "proctor-status-update");
        assert_eq!(events[0].data["connected"], false);
    }

    #[tokio::test]
    async fn test_proctor_join_notifies_room() {
        let (server, _store) = server();
        let (student, mut student_rx) = connect(&server).await;
        let (proctor, mut proctor_rx) = connect(&server).await;
        server.student_join(&student, "e1", "alice").await.unwrap();

        server.proctor_join(&proctor, "e1").await.unwrap();

        let names: Vec<_> = drain(&mut student_rx).into_iter().map(|e| e.event).collect();
        assert_eq!(names, vec!["proctor-connected", "proctor-status-update"]);
        let names: Vec<_> = drain(&mut proctor_rx).into_iter().map(|e| e.event).collect();
        assert_eq!(names, vec!["proctor-status-update"]);
    }

    #[tokio::test]
    async fn test_id_verification_goes_to_student_only() {
        let (server, _store) = server();
        let (proctor, mut proctor_rx) = connect(&server).await;
        let (alice, mut alice_rx) = connect(&server).await;
        let (bob, mut bob_rx) = connect(&server).await;
        server.proctor_join(&proctor, "e1").await.unwrap();
        server.student_join(&alice, "e1", "alice").await.unwrap();
        server.student_join(&bob, "e1", "bob").await.unwrap();
        drain(&mut proctor_rx);
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        let delivered = server.request_id_verification(&proctor, "e1", "alice").await.unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(drain(&mut alice_rx)[0].event, "verify-id");
        assert!(drain(&mut bob_rx).is_empty());

        let err = server.request_id_verification(&proctor, "e1", "carol").await.unwrap_err();
        assert!(matches!(err, ProctorError::ConnectionNotFound(_)));
    }

    #[tokio::test]
    async fn test_verification_result_reaches_proctors() {
        let (server, _store) = server();
        let (proctor, mut proctor_rx) = connect(&server).await;
        let (alice, _alice_rx) = connect(&server).await;
        let (bob, mut bob_rx) = connect(&server).await;
        server.proctor_join(&proctor, "e1").await.unwrap();
        server.student_join(&alice, "e1", "alice").await.unwrap();
        server.student_join(&bob, "e1", "bob").await.unwrap();
        drain(&mut proctor_rx);
        drain(&mut bob_rx);

        let delivered = server.relay_verification_result(&alice, "e1", "alice", true).await;
        assert_eq!(delivered, 1);
        let events = drain(&mut proctor_rx);
        assert_eq!(events[0].event, "id-verification-result");
        assert_eq!(events[0].data["verified"], true);
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[tokio::test]
    async fn test_incident_defaults_and_broadcast_match_record() {
        let (server, store) = server();
        let (proctor, _proctor_rx) = connect(&server).await;
        let (other, mut other_rx) = connect(&server).await;
        server.proctor_join(&proctor, "e1").await.unwrap();
        server.proctor_join(&other, "e1").await.unwrap();
        drain(&mut other_rx);

        let report = IncidentReport::new("e1", "alice", proctor.clone(), IncidentType::MultipleFaces, None, None);
        let incident_id = server.report_incident(&proctor, &report).await.unwrap();

        let persisted = store.incidents().await;
        assert_eq!(persisted.len(), 1);
        let (stored_id, stored) = &persisted[0];
        assert_eq!(stored_id, &incident_id);
        assert_eq!(stored.description, "Multiple faces detected");

        let events = drain(&mut other_rx);
        assert_eq!(events[0].event, "suspicious-activity");
        assert_eq!(events[0].data["type"], "multiple_faces");
        assert_eq!(events[0].data["timestamp"], iso_timestamp(stored.timestamp));
        assert_eq!(events[0].data["incidentId"], incident_id.as_str());
    }

    #[tokio::test]
    async fn test_connection_status_replays_students() {
        let (server, _store) = server();
        let (proctor, mut proctor_rx) = connect(&server).await;
        let (alice, _a) = connect(&server).await;
        let (bob, _b) = connect(&server).await;
        server.student_join(&alice, "e1", "alice").await.unwrap();
        server.student_join(&bob, "e1", "bob").await.unwrap();
        server.proctor_join(&proctor, "e1").await.unwrap();
        drain(&mut proctor_rx);

        let members = server.connection_status(&proctor, "e1").await;
        assert_eq!(members.students.len(), 2);
        assert_eq!(members.proctors.len(), 1);

        let online: Vec<_> = drain(&mut proctor_rx)
            .into_iter()
            .filter(|e| e.event == "student-online")
            .collect();
        assert_eq!(online.len(), 2);
    }

    #[tokio::test]
    async fn test_background_tasks_stop_on_cancel() {
        let store = Arc::new(InMemoryExamStore::new());
        let server = ProctorServer::new(store, Duration::from_secs(60), Some(Duration::from_secs(30)));
        let cancel = CancellationToken::new();

        let handles = server.start_background_tasks(&cancel);
        assert_eq!(handles.len(), 2);

        cancel.cancel();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .expect("background task did not stop")
                .unwrap();
        }
    }
}
