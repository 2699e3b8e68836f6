//! Journey recorder: the write path.
//!
//! The recorder allocates correlation IDs, keeps in-flight journeys in a
//! registry and persists the full journey after every stage. It is an
//! ordinary value built around an injected [`JourneyStore`]; clones share
//! the same registry.
//!
//! # Failure policy
//!
//! Logging is a side channel of the caller's request handling, so no
//! `log_*` call returns an error. Each returns a [`RecordOutcome`]
//! describing what reached disk. When a persist fails, the in-memory
//! journey is kept and gains an `ERROR` stage of type `PersistenceError`,
//! which is written out with the next successful persist.
//!
//! # Concurrency
//!
//! The registry sits behind an `RwLock` that is never held across I/O.
//! Each journey has its own `Mutex`, held for the whole append/persist/audit
//! sequence, so stages of one journey are serialized even when the caller
//! reports them from parallel tasks.

mod id;

pub use id::{IdAllocator, JOURNEY_ID_PREFIX};

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::config::RecorderConfig;
use crate::journey::{ErrorRecord, Journey, Payload, StageEvent, StageKind};
use crate::storage::{
    sanitize_component, validate_journey_id, ArtifactKind, AuditEntry, AuditLevel, JourneyStore,
};

const QUERY_PREVIEW_CHARS: usize = 100;

/// What happened to a stage report.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Appended and durably written.
    Persisted,
    /// Appended in memory, but the on-disk trace may be incomplete.
    PersistFailed { reason: String },
    /// No journey with this ID is known.
    UnknownJourney,
    /// The journey already received its completion call.
    JourneyClosed,
    /// The journey holds its maximum number of stages.
    StageLimitReached { limit: usize },
}

impl RecordOutcome {
    /// Whether everything reached disk.
    pub fn is_persisted(&self) -> bool {
        matches!(self, RecordOutcome::Persisted)
    }

    /// Keep the first non-`Persisted` outcome.
    pub fn and(self, other: RecordOutcome) -> RecordOutcome {
        match self {
            RecordOutcome::Persisted => other,
            _ => self,
        }
    }
}

/// A journey returned by [`JourneyRecorder::start_journey`].
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedJourney {
    /// Correlation ID for every later `log_*` call.
    pub journey_id: String,
    /// Whether the initial record and audit line reached disk.
    pub outcome: RecordOutcome,
}

/// Result of a tool execution as reported by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Success(Value),
    Failure(String),
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutcome::Success(_))
    }

    fn result(&self) -> Value {
        match self {
            ToolOutcome::Success(value) => value.clone(),
            ToolOutcome::Failure(_) => Value::Null,
        }
    }

    fn error(&self) -> Option<&str> {
        match self {
            ToolOutcome::Success(_) => None,
            ToolOutcome::Failure(message) => Some(message),
        }
    }
}

type JourneyCell = Arc<Mutex<Journey>>;

#[derive(Default)]
struct Registry {
    live: HashMap<String, JourneyCell>,
    /// Registration order, oldest first.
    order: VecDeque<String>,
}

impl Registry {
    fn evict_over(&mut self, max: usize) -> Vec<String> {
        let mut evicted = Vec::new();
        while self.live.len() > max {
            match self.order.pop_front() {
                Some(id) => {
                    if self.live.remove(&id).is_some() {
                        evicted.push(id);
                    }
                }
                None => break,
            }
        }
        evicted
    }

    fn remove(&mut self, id: &str) {
        if self.live.remove(id).is_some() {
            self.order.retain(|existing| existing != id);
        }
    }
}

struct RecorderInner {
    store: Arc<dyn JourneyStore>,
    config: RecorderConfig,
    ids: IdAllocator,
    /// Disambiguates error documents written within one clock tick.
    error_seq: AtomicU64,
    registry: RwLock<Registry>,
}

struct Appended {
    outcome: RecordOutcome,
    /// Count of stages of the appended kind, including the new one.
    ordinal: usize,
}

/// Journey recorder backed by a [`JourneyStore`].
#[derive(Clone)]
pub struct JourneyRecorder {
    inner: Arc<RecorderInner>,
}

impl JourneyRecorder {
    /// Create a recorder with an empty registry.
    pub fn new(store: Arc<dyn JourneyStore>, config: RecorderConfig) -> Self {
        Self {
            inner: Arc::new(RecorderInner {
                store,
                config,
                ids: IdAllocator::new(),
                error_seq: AtomicU64::new(0),
                registry: RwLock::new(Registry::default()),
            }),
        }
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn JourneyStore> {
        &self.inner.store
    }

    /// Recorder bounds.
    pub fn config(&self) -> &RecorderConfig {
        &self.inner.config
    }

    /// Number of journeys held in memory.
    pub async fn in_flight_count(&self) -> usize {
        self.inner.registry.read().await.live.len()
    }

    /// Start a new journey.
    ///
    /// The ID is usable even when the initial write fails; in that case the
    /// in-memory journey carries a `PersistenceError` stage and the outcome
    /// is `PersistFailed`.
    pub async fn start_journey(&self, query: impl Into<String>) -> StartedJourney {
        let query = query.into();

        let (journey_id, cell, evicted) = {
            let mut registry = self.inner.registry.write().await;
            let mut journey_id = self.inner.ids.next_id();
            while registry.live.contains_key(&journey_id) {
                journey_id = self.inner.ids.next_id();
            }
            let cell = Arc::new(Mutex::new(Journey::new(journey_id.clone(), query.clone())));
            registry.live.insert(journey_id.clone(), Arc::clone(&cell));
            registry.order.push_back(journey_id.clone());
            let evicted = registry.evict_over(self.inner.config.max_in_flight);
            (journey_id, cell, evicted)
        };

        for id in evicted {
            warn!(
                journey_id = %id,
                max_in_flight = self.inner.config.max_in_flight,
                "Evicted in-progress journey from registry; on-disk record stays IN_PROGRESS"
            );
        }

        let preview = preview(&query);
        let mut journey = cell.lock().await;
        let outcome = self.persist_stage(&mut journey, "JOURNEY_START").await.and(
            self.audit(AuditEntry::new(
                AuditLevel::Info,
                "JOURNEY_START",
                &journey_id,
                format!("Query: {}", preview),
            ))
            .await,
        );
        drop(journey);

        info!(
            journey_id = %journey_id,
            query = %preview,
            persisted = outcome.is_persisted(),
            "Journey started"
        );
        StartedJourney {
            journey_id,
            outcome,
        }
    }

    /// Record the intent detected by the router.
    pub async fn log_intent_detection(
        &self,
        journey_id: &str,
        intent: &str,
        confidence: Option<f64>,
    ) -> RecordOutcome {
        let audit = AuditEntry::new(
            AuditLevel::Info,
            "INTENT_DETECTED",
            journey_id,
            format!("Intent={} | Confidence={}", intent, display_opt(confidence)),
        );
        let payload = object(json!({
            "intent": intent,
            "confidence": confidence,
        }));

        let outcome = settle(
            self.append(journey_id, StageKind::IntentDetected, payload, audit)
                .await,
        );
        info!(journey_id, intent, confidence, "Intent detected");
        outcome
    }

    /// Record the documents retrieved for the query.
    pub async fn log_rag_retrieval(
        &self,
        journey_id: &str,
        query: &str,
        documents: Vec<Value>,
        retrieval_time: f64,
    ) -> RecordOutcome {
        let count = documents.len();
        let audit = AuditEntry::new(
            AuditLevel::Info,
            "RAG_RETRIEVAL",
            journey_id,
            format!("Docs={} | Time={:.2}s", count, retrieval_time),
        );
        let payload = object(json!({
            "query": query,
            "retrieved_docs_count": count,
            "retrieval_time_seconds": retrieval_time,
            "documents": documents,
        }));

        let outcome = settle(
            self.append(journey_id, StageKind::RagRetrieval, payload, audit)
                .await,
        );
        info!(journey_id, docs = count, retrieval_time, "RAG retrieval recorded");
        outcome
    }

    /// Record the generated action plan and write it to `action_plans/`.
    pub async fn log_action_plan(
        &self,
        journey_id: &str,
        plan: &Value,
        generation_time: Option<f64>,
    ) -> RecordOutcome {
        let tool = plan_field(plan, "tool");
        let method = plan_field(plan, "method");
        let audit = AuditEntry::new(
            AuditLevel::Info,
            "ACTION_PLAN",
            journey_id,
            format!(
                "Tool={} | Method={} | Time={}",
                tool,
                method,
                display_opt(generation_time)
            ),
        );
        let payload = object(json!({
            "action_plan": plan,
            "generation_time_seconds": generation_time,
        }));

        let appended = match self
            .append(journey_id, StageKind::ActionPlan, payload, audit)
            .await
        {
            Ok(appended) => appended,
            Err(outcome) => return outcome,
        };

        let artifact = self
            .save_artifact(
                journey_id,
                ArtifactKind::ActionPlan,
                &format!("{}_plan", journey_id),
                plan,
            )
            .await;

        info!(journey_id, tool = %tool, method = %method, generation_time, "Action plan recorded");
        appended.outcome.and(artifact)
    }

    /// Record the start of a tool execution.
    pub async fn log_tool_execution_start(
        &self,
        journey_id: &str,
        tool_name: &str,
        arguments: &Value,
    ) -> RecordOutcome {
        let audit = AuditEntry::new(
            AuditLevel::Info,
            "TOOL_EXEC_START",
            journey_id,
            format!("Tool={}", tool_name),
        );
        let payload = object(json!({
            "tool_name": tool_name,
            "arguments": arguments,
        }));

        let outcome = settle(
            self.append(journey_id, StageKind::ToolExecutionStart, payload, audit)
                .await,
        );
        info!(journey_id, tool = tool_name, "Tool execution started");
        outcome
    }

    /// Record a tool result and write it to `tool_calls/`.
    pub async fn log_tool_execution_result(
        &self,
        journey_id: &str,
        tool_name: &str,
        result: &ToolOutcome,
        execution_time: f64,
    ) -> RecordOutcome {
        let success = result.is_success();
        let (level, status) = if success {
            (AuditLevel::Info, "SUCCESS")
        } else {
            (AuditLevel::Error, "FAILED")
        };
        let mut details = format!(
            "Tool={} | Status={} | Time={:.2}s",
            tool_name, status, execution_time
        );
        if let Some(error) = result.error() {
            details.push_str(&format!(" | Error={}", error));
        }
        let audit = AuditEntry::new(level, "TOOL_EXEC_RESULT", journey_id, details);
        let payload = object(json!({
            "tool_name": tool_name,
            "success": success,
            "execution_time_seconds": execution_time,
            "result": result.result(),
            "error": result.error(),
        }));

        let appended = match self
            .append(journey_id, StageKind::ToolExecutionResult, payload, audit)
            .await
        {
            Ok(appended) => appended,
            Err(outcome) => return outcome,
        };

        let body = json!({
            "tool_name": tool_name,
            "success": success,
            "execution_time": execution_time,
            "result": result.result(),
            "error": result.error(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        let name = format!(
            "{}_{:02}_{}",
            journey_id,
            appended.ordinal,
            sanitize_component(tool_name)
        );
        let artifact = self
            .save_artifact(journey_id, ArtifactKind::ToolCall, &name, &body)
            .await;

        if success {
            info!(journey_id, tool = tool_name, execution_time, "Tool execution succeeded");
        } else {
            warn!(
                journey_id,
                tool = tool_name,
                execution_time,
                error = result.error().unwrap_or_default(),
                "Tool execution failed"
            );
        }
        appended.outcome.and(artifact)
    }

    /// Record an error reported by the caller.
    ///
    /// The error document under `errors/` and the audit line are written for
    /// every call with a well-formed ID, including when the journey is
    /// unknown, closed or at its stage limit. Only the `ERROR` stage itself
    /// can be refused: at the limit the outcome is `StageLimitReached`, since
    /// the last slot belongs to the completion event.
    pub async fn log_error(
        &self,
        journey_id: &str,
        error_type: &str,
        error_message: &str,
        stage: &str,
        stack_trace: Option<&str>,
    ) -> RecordOutcome {
        let mut record = ErrorRecord::new(journey_id, error_type, error_message, stage);
        if let Some(trace) = stack_trace {
            record = record.with_stack_trace(trace);
        }

        error!(
            journey_id,
            error_type,
            stage,
            message = error_message,
            "Journey error reported"
        );

        let audit = AuditEntry::new(
            AuditLevel::Error,
            "ERROR",
            journey_id,
            format!(
                "Type={} | Stage={} | Message={}",
                error_type, stage, error_message
            ),
        );
        let stage_outcome = settle(
            self.append(journey_id, StageKind::Error, record.to_payload(), audit)
                .await,
        );

        let artifact = if validate_journey_id(journey_id).is_ok() {
            let seq = self.inner.error_seq.fetch_add(1, Ordering::Relaxed) % 1_000_000;
            let name = format!(
                "{}_{}_{}_{:06}_error",
                journey_id,
                sanitize_component(stage),
                record.timestamp.format("%Y%m%dT%H%M%S%6f"),
                seq
            );
            match serde_json::to_value(&record) {
                Ok(body) => {
                    self.save_artifact(journey_id, ArtifactKind::Error, &name, &body)
                        .await
                }
                Err(e) => RecordOutcome::PersistFailed {
                    reason: e.to_string(),
                },
            }
        } else {
            RecordOutcome::UnknownJourney
        };

        stage_outcome.and(artifact)
    }

    /// Append the terminal event, close the journey and hand it to the store.
    ///
    /// The journey leaves the registry once the final write succeeds; if it
    /// fails the closed journey stays in memory for [`Self::get_journey_log`].
    pub async fn log_journey_completion(
        &self,
        journey_id: &str,
        final_response: &Value,
        total_time: f64,
        success: bool,
    ) -> RecordOutcome {
        let status = if success { "completed" } else { "failed" };
        let audit = AuditEntry::new(
            if success {
                AuditLevel::Info
            } else {
                AuditLevel::Error
            },
            "JOURNEY_COMPLETE",
            journey_id,
            format!(
                "Status={} | TotalTime={:.2}s",
                status.to_uppercase(),
                total_time
            ),
        );

        let Some(cell) = self.live(journey_id).await else {
            return self.reject_missing(journey_id, audit).await;
        };

        let mut journey = cell.lock().await;
        if journey.status.is_terminal() {
            let _ = self.audit(audit.dropped("journey closed")).await;
            return RecordOutcome::JourneyClosed;
        }

        let payload = self.bound_payload(object(json!({
            "status": status,
            "success": success,
            "final_response": final_response,
            "total_time_seconds": total_time,
        })));
        journey.complete(
            StageEvent::new(StageKind::JourneyCompleted, payload),
            total_time,
            success,
        );

        let persisted = self.persist(&journey).await;
        let outcome = persisted.clone().and(self.audit(audit).await);
        let stages = journey.stages.len();
        drop(journey);

        if persisted.is_persisted() {
            self.inner.registry.write().await.remove(journey_id);
        }

        info!(
            journey_id,
            status,
            total_time,
            stages,
            "Journey completed"
        );
        outcome
    }

    /// Current state of a journey: in-flight record first, then the store.
    pub async fn get_journey_log(&self, journey_id: &str) -> Option<Journey> {
        if let Some(cell) = self.live(journey_id).await {
            return Some(cell.lock().await.clone());
        }
        match self.inner.store.load_journey(journey_id).await {
            Ok(journey) => journey,
            Err(e) => {
                warn!(journey_id, error = %e, "Failed to read journey log");
                None
            }
        }
    }

    async fn live(&self, journey_id: &str) -> Option<JourneyCell> {
        self.inner
            .registry
            .read()
            .await
            .live
            .get(journey_id)
            .cloned()
    }

    async fn append(
        &self,
        journey_id: &str,
        kind: StageKind,
        payload: Payload,
        audit: AuditEntry,
    ) -> Result<Appended, RecordOutcome> {
        let Some(cell) = self.live(journey_id).await else {
            return Err(self.reject_missing(journey_id, audit).await);
        };

        let mut journey = cell.lock().await;
        if journey.status.is_terminal() {
            let _ = self.audit(audit.dropped("journey closed")).await;
            return Err(RecordOutcome::JourneyClosed);
        }

        let limit = self.inner.config.max_stages_per_journey;
        if !self.has_room(&journey) {
            warn!(journey_id, stage = %kind, limit, "Stage limit reached; stage dropped");
            let _ = self.audit(audit.dropped("stage limit reached")).await;
            return Err(RecordOutcome::StageLimitReached { limit });
        }

        journey.push_stage(StageEvent::new(kind, self.bound_payload(payload)));
        let ordinal = journey.count_kind(kind);

        let outcome = self.persist_stage(&mut journey, kind.as_str()).await;
        let outcome = outcome.and(self.audit(audit).await);
        Ok(Appended { outcome, ordinal })
    }

    /// Non-terminal stages leave the last slot free for completion.
    fn has_room(&self, journey: &Journey) -> bool {
        journey.stages.len() + 1 < self.inner.config.max_stages_per_journey
    }

    async fn reject_missing(&self, journey_id: &str, audit: AuditEntry) -> RecordOutcome {
        let closed = matches!(
            self.inner.store.load_journey(journey_id).await,
            Ok(Some(ref journey)) if journey.status.is_terminal()
        );
        let (outcome, reason) = if closed {
            (RecordOutcome::JourneyClosed, "journey closed")
        } else {
            (RecordOutcome::UnknownJourney, "unknown journey")
        };

        warn!(journey_id, event = %audit.event, reason, "Stage dropped");
        let _ = self.audit(audit.dropped(reason)).await;
        outcome
    }

    async fn persist(&self, journey: &Journey) -> RecordOutcome {
        match self.inner.store.save_journey(journey).await {
            Ok(()) => RecordOutcome::Persisted,
            Err(e) => {
                warn!(
                    journey_id = %journey.id,
                    error = %e,
                    "Journey persistence failed; on-disk trace may be incomplete"
                );
                RecordOutcome::PersistFailed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Persist, and on failure note the fault in the journey itself.
    async fn persist_stage(&self, journey: &mut Journey, stage: &str) -> RecordOutcome {
        let outcome = self.persist(journey).await;
        if let RecordOutcome::PersistFailed { ref reason } = outcome {
            if self.has_room(journey) {
                let record =
                    ErrorRecord::new(&journey.id, "PersistenceError", reason.clone(), stage);
                journey.push_stage(StageEvent::new(StageKind::Error, record.to_payload()));
            }
        }
        outcome
    }

    async fn audit(&self, entry: AuditEntry) -> RecordOutcome {
        match self.inner.store.append_audit(&entry).await {
            Ok(()) => RecordOutcome::Persisted,
            Err(e) => {
                warn!(journey_id = %entry.journey_id, error = %e, "Audit append failed");
                RecordOutcome::PersistFailed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn save_artifact(
        &self,
        journey_id: &str,
        kind: ArtifactKind,
        name: &str,
        body: &Value,
    ) -> RecordOutcome {
        match self.inner.store.save_artifact(kind, name, body).await {
            Ok(()) => RecordOutcome::Persisted,
            Err(e) => {
                warn!(journey_id, artifact = kind.dir_name(), error = %e, "Artifact write failed");
                RecordOutcome::PersistFailed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Replace oversized fields, or the whole payload, with truncation markers.
    fn bound_payload(&self, payload: Payload) -> Payload {
        let limit = self.inner.config.max_payload_bytes;
        let size = encoded_len(&payload);
        if size <= limit {
            return payload;
        }

        let field_limit = (limit / 8).max(1);
        let mut bounded: Payload = payload
            .into_iter()
            .map(|(key, value)| {
                let len = encoded_len(&value);
                if len > field_limit {
                    (key, json!({ "truncated": true, "original_size_bytes": len }))
                } else {
                    (key, value)
                }
            })
            .collect();

        if encoded_len(&bounded) > limit {
            bounded = object(json!({
                "payload_truncated": true,
                "original_size_bytes": size,
            }));
        }

        warn!(size, limit, "Stage payload exceeded limit and was truncated");
        bounded
    }
}

fn settle(result: Result<Appended, RecordOutcome>) -> RecordOutcome {
    match result {
        Ok(appended) => appended.outcome,
        Err(outcome) => outcome,
    }
}

fn object(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}

fn encoded_len<T: Serialize + ?Sized>(value: &T) -> usize {
    serde_json::to_vec(value)
        .map(|bytes| bytes.len())
        .unwrap_or(usize::MAX)
}

fn plan_field(plan: &Value, key: &str) -> String {
    match plan.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "N/A".to_string(),
    }
}

fn display_opt(value: Option<f64>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "None".to_string())
}

fn preview(query: &str) -> String {
    query.chars().take(QUERY_PREVIEW_CHARS).collect()
}
