use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;

use super::registry::{PresenceRegistry, Role};

/// One outbound frame: `{"type": <event>, "data": <payload>}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundEvent {
    #[serde(rename = "type")]
    pub event: String,
    pub data: Value,
}

impl OutboundEvent {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Frames a connection may have queued before further events to it are dropped
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

pub type EventSender = mpsc::Sender<OutboundEvent>;

/// Formats timestamps the way clients expect them (RFC 3339, millisecond precision, `Z`)
pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now_timestamp() -> String {
    iso_timestamp(Utc::now())
}

/// Fans events out to the members of exam rooms.
///
/// Delivery is best-effort: a closed or full channel for one recipient is
/// logged and skipped without affecting the others.
pub struct RoomBroadcaster {
    registry: Arc<PresenceRegistry>,
    senders: RwLock<HashMap<String, EventSender>>,
}

impl RoomBroadcaster {
    pub fn new(registry: Arc<PresenceRegistry>) -> Self {
        Self {
            registry,
            senders: RwLock::new(HashMap::new()),
        }
    }

    pub async fn attach(&self, connection_id: &str, sender: EventSender) {
        let mut senders = self.senders.write().await;
        senders.insert(connection_id.to_string(), sender);
    }

    pub async fn detach(&self, connection_id: &str) -> bool {
        let mut senders = self.senders.write().await;
        senders.remove(connection_id).is_some()
    }

    /// Unicast. Returns false when the connection is gone or its channel is closed or full.
    pub async fn send_to(&self, connection_id: &str, event: OutboundEvent) -> bool {
        let senders = self.senders.read().await;
        match senders.get(connection_id) {
            Some(sender) => deliver(connection_id, sender, event),
            None => {
                tracing::debug!(
                    connection_id = %connection_id,
                    event = %event.event,
                    "Target connection no longer exists, dropping event"
                );
                false
            }
        }
    }

    /// Sends to every room member except `exclude`. Returns the delivered count.
    pub async fn broadcast_to_room(
        &self,
        exam_id: &str,
        event: OutboundEvent,
        exclude: Option<&str>,
    ) -> usize {
        let members = self.registry.members_of(exam_id).await;
        let targets = members
            .proctors
            .iter()
            .chain(members.students.iter())
            .map(|m| m.connection_id.as_str())
            .filter(|id| Some(*id) != exclude);

        self.fan_out(exam_id, targets, &event).await
    }

    pub async fn broadcast_to_role(&self, exam_id: &str, role: Role, event: OutboundEvent) -> usize {
        let members = self.registry.members_of(exam_id).await;
        let group = match role {
            Role::Proctor => &members.proctors,
            Role::Student => &members.students,
            Role::Unset => return 0,
        };
        let targets = group.iter().map(|m| m.connection_id.as_str());

        self.fan_out(exam_id, targets, &event).await
    }

    /// Sends to every connection of one student in the room.
    pub async fn send_to_student(&self, exam_id: &str, student_id: &str, event: OutboundEvent) -> usize {
        let members = self.registry.members_of(exam_id).await;
        let targets = members
            .students
            .iter()
            .filter(|m| m.user_id.as_deref() == Some(student_id))
            .map(|m| m.connection_id.as_str());

        self.fan_out(exam_id, targets, &event).await
    }

    async fn fan_out<'a>(
        &self,
        exam_id: &str,
        targets: impl Iterator<Item = &'a str>,
        event: &OutboundEvent,
    ) -> usize {
        let senders = self.senders.read().await;
        let mut delivered = 0;

        for connection_id in targets {
            if let Some(sender) = senders.get(connection_id) {
                if deliver(connection_id, sender, event.clone()) {
                    delivered += 1;
                }
            }
        }

        tracing::debug!(
            exam_id = %exam_id,
            event = %event.event,
            delivered,
            "Broadcast complete"
        );
        delivered
    }
}

fn deliver(connection_id: &str, sender: &EventSender, event: OutboundEvent) -> bool {
    match sender.try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Full(event)) => {
            tracing::warn!(
                connection_id = %connection_id,
                event = %event.event,
                "Outbound queue full, dropping event"
            );
            false
        }
        Err(TrySendError::Closed(event)) => {
            tracing::warn!(
                connection_id = %connection_id,
                event = %event.event,
                "Failed to deliver event, connection channel closed"
            );
            false
        }
    }
}
