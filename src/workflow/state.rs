use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::workflow::step::StepName;

pub type JsonMap = serde_json::Map<String, Value>;

/// Run status. Starts at `Processing` and moves to exactly one terminal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Processing,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, WorkflowStatus::Processing)
    }
}

/// Output of the classifier: an open map with a few well-known keys.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Classification(JsonMap);

impl Classification {
    pub fn new(fields: JsonMap) -> Self {
        Self(fields)
    }

    pub fn is_bug(&self) -> bool {
        self.0.get("is_bug").and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn confidence(&self) -> f64 {
        self.0
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &JsonMap {
        &self.0
    }
}

impl From<Value> for Classification {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }
}

/// Validated input for one analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub tenant_id: String,
    pub ticket_id: String,
    pub ticket_data: JsonMap,
    pub assignee_id: String,
}

impl AnalysisRequest {
    pub fn new(
        tenant_id: impl Into<String>,
        ticket_id: impl Into<String>,
        ticket_data: JsonMap,
        assignee_id: impl Into<String>,
    ) -> Result<Self> {
        let request = Self {
            tenant_id: tenant_id.into(),
            ticket_id: ticket_id.into(),
            ticket_data,
            assignee_id: assignee_id.into(),
        };
        request.validate()?;
        Ok(request)
    }

    /// Parse a raw `{tenant_id, ticket_id, ticket_data, assignee_id}` object.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut input) = value else {
            return Err(AppError::InvalidInput(
                "analysis input must be a JSON object".to_string(),
            ));
        };

        let mut take_string = |key: &str| -> Result<String> {
            match input.remove(key) {
                Some(Value::String(s)) => Ok(s),
                Some(_) => Err(AppError::InvalidInput(format!("{key} must be a string"))),
                None => Err(AppError::InvalidInput(format!("missing required field: {key}"))),
            }
        };
        let tenant_id = take_string("tenant_id")?;
        let ticket_id = take_string("ticket_id")?;
        let assignee_id = take_string("assignee_id")?;

        let ticket_data = match input.remove("ticket_data") {
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(AppError::InvalidInput(
                    "ticket_data must be a JSON object".to_string(),
                ))
            }
            None => {
                return Err(AppError::InvalidInput(
                    "missing required field: ticket_data".to_string(),
                ))
            }
        };

        Self::new(tenant_id, ticket_id, ticket_data, assignee_id)
    }

    fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("tenant_id", &self.tenant_id),
            ("ticket_id", &self.ticket_id),
            ("assignee_id", &self.assignee_id),
        ] {
            if value.trim().is_empty() {
                return Err(AppError::InvalidInput(format!("{key} must not be empty")));
            }
        }
        Ok(())
    }

    pub fn ticket_key(&self) -> Option<&str> {
        self.ticket_data.get("key").and_then(Value::as_str)
    }
}

/// The record threaded through every step of one run.
///
/// Input fields are fixed at construction. Each output field is owned by a
/// single step and only changes through [`StateUpdate`]s produced by that step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    // Input
    pub tenant_id: String,
    pub ticket_id: String,
    pub ticket_data: JsonMap,
    pub assignee_id: String,

    // Step outputs
    pub classification: Option<Classification>,
    pub similar_tickets: Vec<Value>,
    pub relevant_docs: Vec<Value>,
    pub repository_info: Option<JsonMap>,
    pub code_analysis: Option<JsonMap>,
    pub suggested_fix: Option<String>,
    pub confidence_score: f64,

    // Control
    pub current_step: StepName,
    pub error_message: Option<String>,
    pub workflow_status: WorkflowStatus,

    // Notification
    pub notification_sent: bool,
    pub message_id: Option<String>,

    // Timing
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processing_time_seconds: Option<f64>,
}

impl WorkflowState {
    pub fn new(request: AnalysisRequest) -> Self {
        Self {
            tenant_id: request.tenant_id,
            ticket_id: request.ticket_id,
            ticket_data: request.ticket_data,
            assignee_id: request.assignee_id,
            classification: None,
            similar_tickets: Vec::new(),
            relevant_docs: Vec::new(),
            repository_info: None,
            code_analysis: None,
            suggested_fix: None,
            confidence_score: 0.0,
            current_step: StepName::Classifier,
            error_message: None,
            workflow_status: WorkflowStatus::Processing,
            notification_sent: false,
            message_id: None,
            started_at: Utc::now(),
            completed_at: None,
            processing_time_seconds: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.workflow_status.is_terminal()
    }

    pub fn ticket_key(&self) -> Option<&str> {
        self.ticket_data.get("key").and_then(Value::as_str)
    }

    pub fn apply(&mut self, update: StateUpdate) {
        for write in update.writes {
            self.apply_write(write);
        }
    }

    fn apply_write(&mut self, write: FieldWrite) {
        match write {
            FieldWrite::Classification(value) => self.classification = value,
            FieldWrite::SimilarTickets(value) => self.similar_tickets = value,
            FieldWrite::RelevantDocs(value) => self.relevant_docs = value,
            FieldWrite::RepositoryInfo(value) => self.repository_info = value,
            FieldWrite::CodeAnalysis(value) => self.code_analysis = value,
            FieldWrite::SuggestedFix(value) => self.suggested_fix = value,
            FieldWrite::ConfidenceScore(value) => self.confidence_score = value,
            FieldWrite::ErrorMessage(value) => self.error_message = Some(value),
            FieldWrite::Status(status) => self.set_status(status),
            FieldWrite::CompletedAt(at) => self.set_completed_at(at),
            FieldWrite::NotificationSent(value) => self.notification_sent = value,
            FieldWrite::MessageId(value) => self.message_id = value,
        }
    }

    fn set_status(&mut self, status: WorkflowStatus) {
        if self.workflow_status.is_terminal() && self.workflow_status != status {
            tracing::warn!(
                ticket_id = %self.ticket_id,
                current = ?self.workflow_status,
                requested = ?status,
                "Ignoring status change after terminal status"
            );
            return;
        }
        self.workflow_status = status;
    }

    fn set_completed_at(&mut self, at: DateTime<Utc>) {
        if self.completed_at.is_some() {
            tracing::warn!(ticket_id = %self.ticket_id, "completed_at already set, keeping first value");
            return;
        }
        self.completed_at = Some(at);
    }

    /// Force the run into `failed`, recording why.
    pub(crate) fn fail(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
        self.set_status(WorkflowStatus::Failed);
        self.set_completed_at(Utc::now());
    }

    /// Derive `processing_time_seconds` from the recorded timestamps.
    pub(crate) fn finalize_timing(&mut self) {
        if let Some(completed_at) = self.completed_at {
            let elapsed = (completed_at - self.started_at)
                .to_std()
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0);
            self.processing_time_seconds = Some(elapsed);
        }
    }
}

/// Identifies an output or control field a step may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Classification,
    SimilarTickets,
    RelevantDocs,
    RepositoryInfo,
    CodeAnalysis,
    SuggestedFix,
    ConfidenceScore,
    ErrorMessage,
    WorkflowStatus,
    CompletedAt,
    NotificationSent,
    MessageId,
}

/// A single field assignment carried by a [`StateUpdate`].
#[derive(Debug, Clone)]
pub enum FieldWrite {
    Classification(Option<Classification>),
    SimilarTickets(Vec<Value>),
    RelevantDocs(Vec<Value>),
    RepositoryInfo(Option<JsonMap>),
    CodeAnalysis(Option<JsonMap>),
    SuggestedFix(Option<String>),
    ConfidenceScore(f64),
    ErrorMessage(String),
    Status(WorkflowStatus),
    CompletedAt(DateTime<Utc>),
    NotificationSent(bool),
    MessageId(Option<String>),
}

impl FieldWrite {
    pub fn field(&self) -> Field {
        match self {
            FieldWrite::Classification(_) => Field::Classification,
            FieldWrite::SimilarTickets(_) => Field::SimilarTickets,
            FieldWrite::RelevantDocs(_) => Field::RelevantDocs,
            FieldWrite::RepositoryInfo(_) => Field::RepositoryInfo,
            FieldWrite::CodeAnalysis(_) => Field::CodeAnalysis,
            FieldWrite::SuggestedFix(_) => Field::SuggestedFix,
            FieldWrite::ConfidenceScore(_) => Field::ConfidenceScore,
            FieldWrite::ErrorMessage(_) => Field::ErrorMessage,
            FieldWrite::Status(_) => Field::WorkflowStatus,
            FieldWrite::CompletedAt(_) => Field::CompletedAt,
            FieldWrite::NotificationSent(_) => Field::NotificationSent,
            FieldWrite::MessageId(_) => Field::MessageId,
        }
    }
}

/// The set of writes one step produced, applied by the executor.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    writes: Vec<FieldWrite>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, write: FieldWrite) -> Self {
        self.writes.push(write);
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.writes.iter().map(FieldWrite::field)
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub(crate) fn extend(&mut self, other: StateUpdate) {
        self.writes.extend(other.writes);
    }
}
