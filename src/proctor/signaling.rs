use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::broadcaster::{now_timestamp, EventSender, OutboundEvent};
use super::server::ProctorServer;
use crate::error::{ProctorError, Result};
use crate::exam::{IncidentReport, IncidentType};

/// Identifier as sent by clients: either a string or a bare JSON number.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WireId {
    Text(String),
    Number(serde_json::Number),
}

impl WireId {
    /// Trimmed string form; `None` when blank
    pub fn normalize(&self) -> Option<String> {
        let value = match self {
            WireId::Text(text) => text.trim().to_string(),
            WireId::Number(number) => number.to_string(),
        };
        (!value.is_empty()).then_some(value)
    }
}

/// `{examId}` or the bare exam id
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ExamRef {
    Object {
        #[serde(rename = "examId", default)]
        exam_id: Option<WireId>,
    },
    Bare(WireId),
}

impl ExamRef {
    pub fn exam_id(&self) -> Option<String> {
        match self {
            ExamRef::Object { exam_id } => exam_id.as_ref().and_then(WireId::normalize),
            ExamRef::Bare(id) => id.normalize(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StudentExamPayload {
    pub exam_id: Option<WireId>,
    pub student_id: Option<WireId>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StudentVideoPayload {
    pub exam_id: Option<WireId>,
    pub student_id: Option<WireId>,
    pub video_data: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VerificationResponsePayload {
    pub exam_id: Option<WireId>,
    pub student_id: Option<WireId>,
    pub verified: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IncidentPayload {
    pub exam_id: Option<WireId>,
    pub student_id: Option<WireId>,
    #[serde(rename = "type")]
    pub incident_type: Option<String>,
    pub description: Option<String>,
    pub timestamp: Option<String>,
}

/// Inbound frames: `{"type": "<event>", "data": <payload>}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ProctorMessage {
    ProctorJoin(ExamRef),
    StudentJoin(StudentExamPayload),
    StudentHeartbeat(StudentExamPayload),
    ProctorHeartbeat(ExamRef),
    StudentVideo(StudentVideoPayload),
    RequestIdVerification(StudentExamPayload),
    IdVerificationResponse(VerificationResponsePayload),
    ReportSuspiciousActivity(IncidentPayload),
    RequestConnectionStatus(ExamRef),
    StudentSubmitExam(StudentExamPayload),
    Ping,
}

impl ProctorMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            ProctorMessage::ProctorJoin(_) => "proctor-join",
            ProctorMessage::StudentJoin(_) => "student-join",
            ProctorMessage::StudentHeartbeat(_) => "student-heartbeat",
            ProctorMessage::ProctorHeartbeat(_) => "proctor-heartbeat",
            ProctorMessage::StudentVideo(_) => "student-video",
            ProctorMessage::RequestIdVerification(_) => "request-id-verification",
            ProctorMessage::IdVerificationResponse(_) => "id-verification-response",
            ProctorMessage::ReportSuspiciousActivity(_) => "report-suspicious-activity",
            ProctorMessage::RequestConnectionStatus(_) => "request-connection-status",
            ProctorMessage::StudentSubmitExam(_) => "student-submit-exam",
            ProctorMessage::Ping => "ping",
        }
    }
}

fn required(id: &Option<WireId>, field: &str) -> Result<String> {
    id.as_ref()
        .and_then(WireId::normalize)
        .ok_or_else(|| ProctorError::validation(format!("{} is required", field)))
}

fn required_exam(exam: &ExamRef) -> Result<String> {
    exam.exam_id()
        .ok_or_else(|| ProctorError::validation("examId is required"))
}

fn parse_timestamp(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    match raw.map(str::trim).filter(|t| !t.is_empty()) {
        None => Ok(None),
        Some(text) => DateTime::parse_from_rfc3339(text)
            .map(|at| Some(at.with_timezone(&Utc)))
            .map_err(|e| ProctorError::validation(format!("invalid timestamp {}: {}", text, e))),
    }
}

/// Builds an acknowledgment body. Successful acks merge `fields`;
/// failures carry only `success`, `error` and `timestamp`.
fn ack_body(result: std::result::Result<Value, String>) -> Value {
    let mut body = Map::new();
    match result {
        Ok(Value::Object(fields)) => {
            body.extend(fields);
            body.insert("success".to_string(), Value::Bool(true));
        }
        Ok(_) => {
            body.insert("success".to_string(), Value::Bool(true));
        }
        Err(error) => {
            body.insert("success".to_string(), Value::Bool(false));
            body.insert("error".to_string(), Value::String(error));
        }
    }
    body.insert("timestamp".to_string(), Value::String(now_timestamp()));
    Value::Object(body)
}

/// Per-connection dispatcher between parsed frames and the server.
pub struct ProctorSignalingHandler {
    connection_id: String,
    server: Arc<ProctorServer>,
}

impl ProctorSignalingHandler {
    pub async fn new(server: Arc<ProctorServer>, sender: EventSender) -> Self {
        let connection_id = server.connect(sender).await;
        Self {
            connection_id,
            server,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Parses one text frame. Malformed frames are logged and dropped.
    pub async fn handle_text(&self, text: &str) -> bool {
        match serde_json::from_str::<ProctorMessage>(text) {
            Ok(message) => {
                self.handle_message(message).await;
                true
            }
            Err(e) => {
                tracing::warn!(
                    connection_id = %self.connection_id,
                    error = %e,
                    raw_message = %text,
                    "Failed to parse proctoring message"
                );
                false
            }
        }
    }

    pub async fn handle_message(&self, message: ProctorMessage) {
        let event = message.event_name();
        tracing::debug!(connection_id = %self.connection_id, event, "Handling message");

        match message {
            ProctorMessage::ProctorJoin(exam) => {
                let result = self.proctor_join(&exam).await;
                self.reply("proctor-join-ack", result).await;
            }
            ProctorMessage::StudentJoin(payload) => {
                let result = self.student_join(&payload).await;
                self.reply("student-join-ack", result).await;
            }
            ProctorMessage::StudentHeartbeat(payload) => {
                if let Err(e) = self.student_heartbeat(&payload).await {
                    self.reject(event, &e);
                    self.reply("heartbeat-ack", Err(e.to_string())).await;
                }
            }
            ProctorMessage::ProctorHeartbeat(exam) => {
                if let Err(e) = self.proctor_heartbeat(&exam).await {
                    self.reject(event, &e);
                    self.reply("heartbeat-ack", Err(e.to_string())).await;
                }
            }
            ProctorMessage::StudentVideo(payload) => {
                if let Err(e) = self.student_video(payload).await {
                    self.reject(event, &e);
                }
            }
            ProctorMessage::RequestIdVerification(payload) => {
                let result = self.request_id_verification(&payload).await;
                self.reply("verification-request-sent", result).await;
            }
            ProctorMessage::IdVerificationResponse(payload) => {
                let result = self.id_verification_response(&payload).await;
                self.reply("verification-response-received", result).await;
            }
            ProctorMessage::ReportSuspiciousActivity(payload) => {
                let result = self.report_suspicious_activity(&payload).await;
                self.reply("incident-report-sent", result).await;
            }
            ProctorMessage::RequestConnectionStatus(exam) => {
                let result = self.connection_status(&exam).await;
                self.reply("connection-status-response", result).await;
            }
            ProctorMessage::StudentSubmitExam(payload) => {
                let result = self.submit_exam(&payload).await;
                self.reply("exam-submission-received", result).await;
            }
            ProctorMessage::Ping => {
                self.server
                    .broadcaster()
                    .send_to(
                        &self.connection_id,
                        OutboundEvent::new(
                            "pong",
                            json!({
                                "status": "ok",
                                "socketId": self.connection_id,
                                "timestamp": now_timestamp(),
                            }),
                        ),
                    )
                    .await;
            }
        }
    }

    async fn proctor_join(&self, exam: &ExamRef) -> std::result::Result<Value, String> {
        let exam_id = required_exam(exam).map_err(|e| self.rejected("proctor-join", e))?;
        self.server
            .proctor_join(&self.connection_id, &exam_id)
            .await
            .map_err(|e| self.rejected("proctor-join", e))?;

        Ok(json!({ "examId": exam_id, "socketId": self.connection_id }))
    }

    async fn student_join(&self, payload: &StudentExamPayload) -> std::result::Result<Value, String> {
        let (exam_id, student_id) = student_ids(payload).map_err(|e| self.rejected("student-join", e))?;
        self.server
            .student_join(&self.connection_id, &exam_id, &student_id)
            .await
            .map_err(|e| self.rejected("student-join", e))?;

        Ok(json!({
            "examId": exam_id,
            "studentId": student_id,
            "socketId": self.connection_id,
        }))
    }

    async fn student_heartbeat(&self, payload: &StudentExamPayload) -> Result<()> {
        let (exam_id, student_id) = student_ids(payload)?;
        self.server
            .heartbeat()
            .on_student_heartbeat(&self.connection_id, &exam_id, &student_id)
            .await?;
        Ok(())
    }

    async fn proctor_heartbeat(&self, exam: &ExamRef) -> Result<()> {
        let exam_id = required_exam(exam)?;
        self.server
            .heartbeat()
            .on_proctor_heartbeat(&self.connection_id, &exam_id)
            .await?;
        Ok(())
    }

    async fn student_video(&self, payload: StudentVideoPayload) -> Result<()> {
        let exam_id = required(&payload.exam_id, "examId")?;
        let student_id = required(&payload.student_id, "studentId")?;
        let video_data = payload.video_data.unwrap_or(Value::Null);

        self.server
            .relay_video(&self.connection_id, &exam_id, &student_id, video_data)
            .await;
        Ok(())
    }

    async fn request_id_verification(
        &self,
        payload: &StudentExamPayload,
    ) -> std::result::Result<Value, String> {
        let event = "request-id-verification";
        let (exam_id, student_id) = student_ids(payload).map_err(|e| self.rejected(event, e))?;

        match self
            .server
            .request_id_verification(&self.connection_id, &exam_id, &student_id)
            .await
        {
            Ok(_) => Ok(json!({ "examId": exam_id, "studentId": student_id })),
            Err(ProctorError::ConnectionNotFound(_)) => {
                Err("Student is not connected to this exam".to_string())
            }
            Err(e) => Err(self.rejected(event, e)),
        }
    }

    async fn id_verification_response(
        &self,
        payload: &VerificationResponsePayload,
    ) -> std::result::Result<Value, String> {
        let event = "id-verification-response";
        let exam_id = required(&payload.exam_id, "examId").map_err(|e| self.rejected(event, e))?;
        let student_id =
            required(&payload.student_id, "studentId").map_err(|e| self.rejected(event, e))?;
        let verified = payload
            .verified
            .ok_or_else(|| self.rejected(event, ProctorError::validation("verified is required")))?;

        self.server
            .relay_verification_result(&self.connection_id, &exam_id, &student_id, verified)
            .await;
        Ok(json!({ "verified": verified }))
    }

    async fn report_suspicious_activity(
        &self,
        payload: &IncidentPayload,
    ) -> std::result::Result<Value, String> {
        let event = "report-suspicious-activity";
        let report = self
            .incident_from(payload)
            .map_err(|e| self.rejected(event, e))?;

        let incident_id = self
            .server
            .report_incident(&self.connection_id, &report)
            .await
            .map_err(|e| e.to_string())?;

        Ok(json!({
            "incidentId": incident_id,
            "examId": report.exam_id,
            "studentId": report.student_id,
            "type": report.incident_type,
        }))
    }

    fn incident_from(&self, payload: &IncidentPayload) -> Result<IncidentReport> {
        let exam_id = required(&payload.exam_id, "examId")?;
        let student_id = required(&payload.student_id, "studentId")?;
        let incident_type = payload
            .incident_type
            .as_deref()
            .ok_or_else(|| ProctorError::validation("type is required"))
            .and_then(IncidentType::parse)?;
        let timestamp = parse_timestamp(payload.timestamp.as_deref())?;

        Ok(IncidentReport::new(
            exam_id,
            student_id,
            self.connection_id.clone(),
            incident_type,
            payload.description.clone(),
            timestamp,
        ))
    }

    async fn connection_status(&self, exam: &ExamRef) -> std::result::Result<Value, String> {
        let exam_id = required_exam(exam).map_err(|e| self.rejected("request-connection-status", e))?;
        let members = self
            .server
            .connection_status(&self.connection_id, &exam_id)
            .await;

        Ok(json!({
            "examId": exam_id,
            "connectedStudents": members.students.len(),
            "connectedProctors": members.proctors.len(),
        }))
    }

    async fn submit_exam(&self, payload: &StudentExamPayload) -> std::result::Result<Value, String> {
        let (exam_id, student_id) =
            student_ids(payload).map_err(|e| self.rejected("student-submit-exam", e))?;
        self.server
            .submit_exam(&self.connection_id, &exam_id, &student_id)
            .await;
        Ok(json!({ "examId": exam_id }))
    }

    async fn reply(&self, event: &str, result: std::result::Result<Value, String>) {
        self.server
            .broadcaster()
            .send_to(&self.connection_id, OutboundEvent::new(event, ack_body(result)))
            .await;
    }

    fn reject(&self, event: &str, error: &ProctorError) {
        tracing::warn!(
            connection_id = %self.connection_id,
            event,
            error = %error,
            "Rejected event"
        );
    }

    fn rejected(&self, event: &str, error: ProctorError) -> String {
        self.reject(event, &error);
        error.to_string()
    }

    /// Tears the connection down. Consumes the handler so it runs once.
    pub async fn cleanup(self, reason: &str) {
        self.server.disconnect(&self.connection_id, reason).await;
    }
}

fn student_ids(payload: &StudentExamPayload) -> Result<(String, String)> {
    Ok((
        required(&payload.exam_id, "examId")?,
        required(&payload.student_id, "studentId")?,
    ))
}
