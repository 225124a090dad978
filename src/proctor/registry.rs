use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::error::{ProctorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Unset,
    Proctor,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Unset => "unset",
            Role::Proctor => "proctor",
            Role::Student => "student",
        }
    }
}

/// Presence metadata for one live connection
#[derive(Debug, Clone)]
pub struct ConnectionMeta {
    pub connection_id: String,
    pub role: Role,
    pub exam_id: Option<String>,
    pub user_id: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_seen: Instant,
    /// Set by the expiry sweep, cleared by the next join or heartbeat
    pub stale: bool,
}

impl ConnectionMeta {
    fn unset(connection_id: &str) -> Self {
        Self {
            connection_id: connection_id.to_string(),
            role: Role::Unset,
            exam_id: None,
            user_id: None,
            connected_at: Utc::now(),
            last_seen: Instant::now(),
            stale: false,
        }
    }

    /// True when the stored association already equals the declared one
    pub fn matches(&self, role: Role, exam_id: &str, user_id: Option<&str>) -> bool {
        self.role == role
            && self.exam_id.as_deref() == Some(exam_id)
            && self.user_id.as_deref() == user_id
    }
}

/// Snapshot of one room, partitioned by role
#[derive(Debug, Clone, Default)]
pub struct RoomMembers {
    pub proctors: Vec<ConnectionMeta>,
    pub students: Vec<ConnectionMeta>,
}

impl RoomMembers {
    pub fn total(&self) -> usize {
        self.proctors.len() + self.students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn contains(&self, connection_id: &str) -> bool {
        self.proctors
            .iter()
            .chain(self.students.iter())
            .any(|m| m.connection_id == connection_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Role, exam or user differed from what was stored
    pub changed: bool,
    /// Room the connection was moved out of, if any
    pub previous_exam: Option<String>,
    pub was_stale: bool,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<String, ConnectionMeta>,
    rooms: HashMap<String, HashSet<String>>,
}

impl RegistryState {
    fn leave_room(&mut self, exam_id: &str, connection_id: &str) {
        if let Some(members) = self.rooms.get_mut(exam_id) {
            members.remove(connection_id);
            if members.is_empty() {
                self.rooms.remove(exam_id);
            }
        }
    }
}

/// Keyed store of connection metadata plus an exam id -> members index.
///
/// Both maps live behind one lock, so a reader never sees a connection
/// indexed under a room its metadata no longer names.
pub struct PresenceRegistry {
    state: RwLock<RegistryState>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Records a freshly accepted connection with no role or room
    pub async fn register(&self, connection_id: &str) {
        let mut state = self.state.write().await;
        state
            .connections
            .entry(connection_id.to_string())
            .or_insert_with(|| ConnectionMeta::unset(connection_id));
    }

    pub async fn join(
        &self,
        connection_id: &str,
        role: Role,
        exam_id: &str,
        user_id: Option<&str>,
    ) -> Result<JoinOutcome> {
        let exam_id = exam_id.trim();
        if exam_id.is_empty() {
            return Err(ProctorError::validation("examId is required"));
        }

        let user_id = match role {
            Role::Unset => return Err(ProctorError::validation("cannot join without a role")),
            Role::Proctor => None,
            Role::Student => match user_id.map(str::trim).filter(|u| !u.is_empty()) {
                Some(user) => Some(user.to_string()),
                None => return Err(ProctorError::validation("studentId is required")),
            },
        };

        let mut state = self.state.write().await;

        let meta = state
            .connections
            .entry(connection_id.to_string())
            .or_insert_with(|| ConnectionMeta::unset(connection_id));

        let changed = !meta.matches(role, exam_id, user_id.as_deref());
        let was_stale = meta.stale;
        let previous_exam = meta.exam_id.clone().filter(|old| old != exam_id);

        meta.role = role;
        meta.exam_id = Some(exam_id.to_string());
        meta.user_id = user_id;
        meta.last_seen = Instant::now();
        meta.stale = false;

        if let Some(old) = &previous_exam {
            state.leave_room(old, connection_id);
        }
        state
            .rooms
            .entry(exam_id.to_string())
            .or_default()
            .insert(connection_id.to_string());

        if let Some(old) = &previous_exam {
            tracing::info!(
                connection_id = %connection_id,
                from_exam = %old,
                to_exam = %exam_id,
                "Connection moved between exam rooms"
            );
        }

        Ok(JoinOutcome {
            changed,
            previous_exam,
            was_stale,
        })
    }

    /// Refreshes liveness; returns whether the connection had been marked stale
    pub async fn touch(&self, connection_id: &str) -> Option<bool> {
        let mut state = self.state.write().await;
        let meta = state.connections.get_mut(connection_id)?;
        let was_stale = meta.stale;
        meta.last_seen = Instant::now();
        meta.stale = false;
        Some(was_stale)
    }

    pub async fn metadata_of(&self, connection_id: &str) -> Option<ConnectionMeta> {
        self.state.read().await.connections.get(connection_id).cloned()
    }

    pub async fn members_of(&self, exam_id: &str) -> RoomMembers {
        let state = self.state.read().await;
        let mut members = RoomMembers::default();

        let Some(ids) = state.rooms.get(exam_id) else {
            return members;
        };

        for meta in ids.iter().filter_map(|id| state.connections.get(id)) {
            match meta.role {
                Role::Proctor => members.proctors.push(meta.clone()),
                Role::Student => members.students.push(meta.clone()),
                Role::Unset => {}
            }
        }

        members
    }

    /// Drops the connection and its room membership, returning what was stored
    pub async fn remove(&self, connection_id: &str) -> Option<ConnectionMeta> {
        let mut state = self.state.write().await;
        let meta = state.connections.remove(connection_id)?;
        if let Some(exam_id) = &meta.exam_id {
            state.leave_room(exam_id, connection_id);
        }
        Some(meta)
    }

    /// Marks students silent for longer than `timeout` as stale.
    /// Only connections not already stale are returned.
    pub async fn mark_stale_students(&self, timeout: Duration) -> Vec<ConnectionMeta> {
        let mut state = self.state.write().await;
        let now = Instant::now();

        state
            .connections
            .values_mut()
            .filter(|m| m.role == Role::Student && !m.stale)
            .filter(|m| now.duration_since(m.last_seen) >= timeout)
            .map(|m| {
                m.stale = true;
                m.clone()
            })
            .collect()
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    pub async fn room_count(&self) -> usize {
        self.state.read().await.rooms.len()
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
