use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::session::{ExamSession, ExamStatus, IncidentReport};
use crate::error::{ProctorError, Result};

/// Storage collaborator for exam sessions and incidents.
///
/// The scheduler only ever reads sessions and conditionally writes `status`;
/// the gateway only creates incidents.
#[async_trait]
pub trait ExamStore: Send + Sync {
    /// Scheduled sessions whose `[start, end)` window contains `now`
    async fn find_sessions_needing_start(&self, now: DateTime<Utc>) -> Result<Vec<ExamSession>>;

    /// In-progress sessions whose end time is at or before `now`
    async fn find_sessions_needing_end(&self, now: DateTime<Utc>) -> Result<Vec<ExamSession>>;

    async fn set_status(&self, exam_id: &str, status: ExamStatus) -> Result<()>;

    /// Persists the report and returns its id
    async fn create_incident(&self, report: &IncidentReport) -> Result<String>;

    async fn get_session(&self, exam_id: &str) -> Result<Option<ExamSession>>;

    async fn insert_session(&self, session: ExamSession) -> Result<()>;
}

#[derive(Default)]
struct StoreState {
    sessions: HashMap<String, ExamSession>,
    incidents: Vec<(String, IncidentReport)>,
}

/// Process-local store used by the server binary and tests.
#[derive(Default)]
pub struct InMemoryExamStore {
    state: RwLock<StoreState>,
}

impl InMemoryExamStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_sessions(sessions: Vec<ExamSession>) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.write().await;
            for session in sessions {
                state.sessions.insert(session.id.clone(), session);
            }
        }
        store
    }

    /// Loads a JSON array of sessions from disk
    pub async fn from_seed_file(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        let sessions: Vec<ExamSession> = serde_json::from_str(&raw)?;
        tracing::info!(
            path = %path.display(),
            session_count = sessions.len(),
            "Seeded exam store"
        );
        Ok(Self::with_sessions(sessions).await)
    }

    pub async fn incidents(&self) -> Vec<(String, IncidentReport)> {
        self.state.read().await.incidents.clone()
    }
}

#[async_trait]
impl ExamStore for InMemoryExamStore {
    async fn find_sessions_needing_start(&self, now: DateTime<Utc>) -> Result<Vec<ExamSession>> {
        let state = self.state.read().await;
        Ok(state
            .sessions
            .values()
            .filter(|s| s.needs_start(now))
            .cloned()
            .collect())
    }

    async fn find_sessions_needing_end(&self, now: DateTime<Utc>) -> Result<Vec<ExamSession>> {
        let state = self.state.read().await;
        Ok(state
            .sessions
            .values()
            .filter(|s| s.needs_end(now))
            .cloned()
            .collect())
    }

    async fn set_status(&self, exam_id: &str, status: ExamStatus) -> Result<()> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get_mut(exam_id)
            .ok_or_else(|| ProctorError::ExamNotFound(exam_id.to_string()))?;

        if !session.status.can_transition_to(status) {
            return Err(ProctorError::InvalidTransition {
                exam_id: exam_id.to_string(),
                from: session.status.to_string(),
                to: status.to_string(),
            });
        }

        session.status = status;
        Ok(())
    }

    async fn create_incident(&self, report: &IncidentReport) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let mut state = self.state.write().await;
        state.incidents.push((id.clone(), report.clone()));
        Ok(id)
    }

    async fn get_session(&self, exam_id: &str) -> Result<Option<ExamSession>> {
        Ok(self.state.read().await.sessions.get(exam_id).cloned())
    }

    async fn insert_session(&self, session: ExamSession) -> Result<()> {
        let mut state = self.state.write().await;
        state.sessions.insert(session.id.clone(), session);
        Ok(())
    }
}
