use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ProctorError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExamStatus {
    #[default]
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl ExamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Status only moves forward along scheduled -> in-progress -> completed.
    /// Cancellation is allowed from any non-terminal state.
    pub fn can_transition_to(&self, next: ExamStatus) -> bool {
        match (self, next) {
            (Self::Scheduled, Self::InProgress) => true,
            (Self::InProgress, Self::Completed) => true,
            (Self::Scheduled | Self::InProgress, Self::Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ExamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle-relevant projection of an exam.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamSession {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub status: ExamStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl ExamSession {
    /// Scheduled and `now` falls inside the half-open window `[start, end)`.
    /// A zero-length window never qualifies.
    pub fn needs_start(&self, now: DateTime<Utc>) -> bool {
        self.status == ExamStatus::Scheduled && self.start_time <= now && now < self.end_time
    }

    pub fn needs_end(&self, now: DateTime<Utc>) -> bool {
        self.status == ExamStatus::InProgress && self.end_time <= now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    NoFaceVisible,
    MultipleFaces,
    LookingAway,
    UnusualMovement,
    Other,
}

impl IncidentType {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim() {
            "no_face_visible" => Ok(Self::NoFaceVisible),
            "multiple_faces" => Ok(Self::MultipleFaces),
            "looking_away" => Ok(Self::LookingAway),
            "unusual_movement" => Ok(Self::UnusualMovement),
            "other" => Ok(Self::Other),
            _ => Err(ProctorError::UnknownIncidentType(raw.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoFaceVisible => "no_face_visible",
            Self::MultipleFaces => "multiple_faces",
            Self::LookingAway => "looking_away",
            Self::UnusualMovement => "unusual_movement",
            Self::Other => "other",
        }
    }

    /// Canonical label used when the reporter leaves the description empty
    pub fn default_description(&self) -> &'static str {
        match self {
            Self::NoFaceVisible => "No face visible in camera",
            Self::MultipleFaces => "Multiple faces detected",
            Self::LookingAway => "Looking away from screen",
            Self::UnusualMovement => "Unusual movement detected",
            Self::Other => "Suspicious activity detected",
        }
    }
}

/// Suspicious-activity record handed to storage. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentReport {
    pub exam_id: String,
    pub student_id: String,
    pub reported_by: String,
    #[serde(rename = "type")]
    pub incident_type: IncidentType,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

impl IncidentReport {
    pub fn new(
        exam_id: impl Into<String>,
        student_id: impl Into<String>,
        reported_by: impl Into<String>,
        incident_type: IncidentType,
        description: Option<String>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        let description = description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| incident_type.default_description().to_string());

        Self {
            exam_id: exam_id.into(),
            student_id: student_id.into(),
            reported_by: reported_by.into(),
            incident_type,
            description,
            timestamp: timestamp.unwrap_or_else(Utc::now),
        }
    }
}
