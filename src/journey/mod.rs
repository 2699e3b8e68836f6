//! Journey data model.
//!
//! A [`Journey`] is the end-to-end trace of one request through the routing
//! pipeline. Stages are appended in call order and never removed; the
//! terminal [`StageKind::JourneyCompleted`] event is always last.


use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Stage-specific fields of a [`StageEvent`].
pub type Payload = Map<String, Value>;

/// Lifecycle status of a journey.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JourneyStatus {
    /// Started and still accepting stages.
    #[default]
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully.
    Failed,
}

impl JourneyStatus {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JourneyStatus::InProgress => "IN_PROGRESS",
            JourneyStatus::Completed => "COMPLETED",
            JourneyStatus::Failed => "FAILED",
        }
    }

    /// Whether the journey has received its completion call.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JourneyStatus::InProgress)
    }
}

impl std::fmt::Display for JourneyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JourneyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "IN_PROGRESS" => Ok(JourneyStatus::InProgress),
            "COMPLETED" => Ok(JourneyStatus::Completed),
            "FAILED" => Ok(JourneyStatus::Failed),
            _ => Err(format!("Unknown journey status: {}", s)),
        }
    }
}

/// Kind of a recorded stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageKind {
    /// Intent classified by the router.
    IntentDetected,
    /// Candidate tool descriptions retrieved.
    RagRetrieval,
    /// JSON action plan generated.
    ActionPlan,
    /// Tool dispatch started.
    ToolExecutionStart,
    /// Tool dispatch finished.
    ToolExecutionResult,
    /// Error reported by the caller or by the recorder itself.
    Error,
    /// Terminal event.
    JourneyCompleted,
}

impl StageKind {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::IntentDetected => "INTENT_DETECTED",
            StageKind::RagRetrieval => "RAG_RETRIEVAL",
            StageKind::ActionPlan => "ACTION_PLAN",
            StageKind::ToolExecutionStart => "TOOL_EXECUTION_START",
            StageKind::ToolExecutionResult => "TOOL_EXECUTION_RESULT",
            StageKind::Error => "ERROR",
            StageKind::JourneyCompleted => "JOURNEY_COMPLETED",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "INTENT_DETECTED" => Ok(StageKind::IntentDetected),
            "RAG_RETRIEVAL" => Ok(StageKind::RagRetrieval),
            "ACTION_PLAN" => Ok(StageKind::ActionPlan),
            "TOOL_EXECUTION_START" => Ok(StageKind::ToolExecutionStart),
            "TOOL_EXECUTION_RESULT" => Ok(StageKind::ToolExecutionResult),
            "ERROR" => Ok(StageKind::Error),
            "JOURNEY_COMPLETED" => Ok(StageKind::JourneyCompleted),
            _ => Err(format!("Unknown stage kind: {}", s)),
        }
    }
}

/// One recorded occurrence within a journey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEvent {
    /// What happened.
    pub kind: StageKind,
    /// When the stage was reported.
    pub timestamp: DateTime<Utc>,
    /// Stage-specific fields.
    #[serde(default)]
    pub payload: Payload,
}

impl StageEvent {
    /// Create a stage event stamped with the current time.
    pub fn new(kind: StageKind, payload: Payload) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Look up a payload field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Look up a payload field as a string slice.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

/// One request's end-to-end trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Journey {
    /// Correlation ID.
    pub id: String,
    /// Original input text.
    pub query: String,
    /// When the journey was started.
    pub started_at: DateTime<Utc>,
    /// When the journey was completed; absent while in progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// When the last stage was appended.
    pub updated_at: DateTime<Utc>,
    /// Lifecycle status.
    pub status: JourneyStatus,
    /// Stage events in call order.
    #[serde(default)]
    pub stages: Vec<StageEvent>,
    /// Caller-reported duration in seconds, set at completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_time: Option<f64>,
}

impl Journey {
    /// Create a new in-progress journey with no stages.
    pub fn new(id: impl Into<String>, query: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            query: query.into(),
            started_at: now,
            ended_at: None,
            updated_at: now,
            status: JourneyStatus::InProgress,
            stages: Vec::new(),
            total_time: None,
        }
    }

    /// Append a stage and bump `updated_at`.
    pub fn push_stage(&mut self, stage: StageEvent) {
        self.updated_at = stage.timestamp;
        self.stages.push(stage);
    }

    /// Append the terminal event and close the journey.
    pub fn complete(&mut self, stage: StageEvent, total_time: f64, success: bool) {
        let ended_at = stage.timestamp;
        self.push_stage(stage);
        self.ended_at = Some(ended_at);
        self.total_time = Some(total_time);
        self.status = if success {
            JourneyStatus::Completed
        } else {
            JourneyStatus::Failed
        };
    }

    /// Number of stages of the given kind.
    pub fn count_kind(&self, kind: StageKind) -> usize {
        self.stages.iter().filter(|s| s.kind == kind).count()
    }

    /// Error records in stage order.
    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.stages
            .iter()
            .filter_map(|stage| ErrorRecord::from_stage(&self.id, stage))
            .collect()
    }

    /// Listing view of this journey.
    pub fn summary(&self) -> JourneySummary {
        JourneySummary {
            id: self.id.clone(),
            query: self.query.clone(),
            started_at: self.started_at,
            status: self.status,
        }
    }
}

/// Listing view of a journey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JourneySummary {
    pub id: String,
    pub query: String,
    pub started_at: DateTime<Utc>,
    pub status: JourneyStatus,
}

/// An `ERROR` stage, typed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Journey the error belongs to.
    pub journey_id: String,
    /// When the error was reported.
    pub timestamp: DateTime<Utc>,
    /// Error class, e.g. `ToolError`.
    pub error_type: String,
    /// Human-readable message.
    pub error_message: String,
    /// Stage during which the error occurred.
    pub stage: String,
    /// Optional stack trace.
    #[serde(default)]
    pub stack_trace: Option<String>,
}

impl ErrorRecord {
    /// Create a record stamped with the current time.
    pub fn new(
        journey_id: impl Into<String>,
        error_type: impl Into<String>,
        error_message: impl Into<String>,
        stage: impl Into<String>,
    ) -> Self {
        Self {
            journey_id: journey_id.into(),
            timestamp: Utc::now(),
            error_type: error_type.into(),
            error_message: error_message.into(),
            stage: stage.into(),
            stack_trace: None,
        }
    }

    /// Attach a stack trace.
    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    /// Payload stored in the `ERROR` stage.
    pub fn to_payload(&self) -> Payload {
        let mut payload = Payload::new();
        payload.insert("error_type".into(), Value::from(self.error_type.clone()));
        payload.insert(
            "error_message".into(),
            Value::from(self.error_message.clone()),
        );
        payload.insert("stage".into(), Value::from(self.stage.clone()));
        payload.insert(
            "stack_trace".into(),
            self.stack_trace.clone().map(Value::from).unwrap_or(Value::Null),
        );
        payload
    }

    /// Rebuild a record from an `ERROR` stage; `None` for any other kind.
    ///
    /// Fields replaced by a truncation marker are rendered as JSON text.
    pub fn from_stage(journey_id: &str, stage: &StageEvent) -> Option<Self> {
        if stage.kind != StageKind::Error {
            return None;
        }
        let text = |key: &str| match stage.field(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        Some(Self {
            journey_id: journey_id.to_string(),
            timestamp: stage.timestamp,
            error_type: text("error_type"),
            error_message: text("error_message"),
            stage: text("stage"),
            stack_trace: stage
                .str_field("stack_trace")
                .map(str::to_string),
        })
    }
}
