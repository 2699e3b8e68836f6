//! Storage layer for journey persistence.
//!
//! The [`JourneyStore`] trait describes the on-disk layout shared by the
//! recorder (the only writer) and the analyzer (read-only). The filesystem
//! implementation lays it out as:
//!
//! ```text
//! <root>/
//! ├── audit.log                          one line per event, all journeys
//! ├── requests/<id>.json                 full journey document
//! ├── action_plans/<id>_plan.json        latest action plan
//! ├── tool_calls/<id>_<nn>_<tool>.json   one per tool result
//! └── errors/<id>_<stage>_<ts>_error.json
//! ```

mod fs;

pub use fs::FileJourneyStore;
pub(crate) use fs::write_atomic;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{StorageError, StorageResult};
use crate::journey::Journey;

/// Longest accepted journey ID.
pub const MAX_JOURNEY_ID_LEN: usize = 128;

/// Auxiliary per-journey documents written next to the full trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Generated action plan.
    ActionPlan,
    /// One tool execution result.
    ToolCall,
    /// One reported error.
    Error,
}

impl ArtifactKind {
    /// All artifact kinds.
    pub const ALL: [ArtifactKind; 3] = [
        ArtifactKind::ActionPlan,
        ArtifactKind::ToolCall,
        ArtifactKind::Error,
    ];

    /// Directory holding artifacts of this kind.
    pub fn dir_name(&self) -> &'static str {
        match self {
            ArtifactKind::ActionPlan => "action_plans",
            ArtifactKind::ToolCall => "tool_calls",
            ArtifactKind::Error => "errors",
        }
    }
}

/// Severity of an audit line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuditLevel {
    Info,
    Warning,
    Error,
}

impl AuditLevel {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditLevel::Info => "INFO",
            AuditLevel::Warning => "WARNING",
            AuditLevel::Error => "ERROR",
        }
    }
}

/// One line of the shared audit trail.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub level: AuditLevel,
    /// Event tag, e.g. `JOURNEY_START` or `TOOL_EXEC_RESULT`.
    pub event: String,
    pub journey_id: String,
    pub details: String,
}

impl AuditEntry {
    /// Create an entry stamped with the current time.
    pub fn new(
        level: AuditLevel,
        event: impl Into<String>,
        journey_id: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            event: event.into(),
            journey_id: journey_id.into(),
            details: details.into(),
        }
    }

    /// Mark the entry as describing a stage that was not recorded.
    pub fn dropped(mut self, reason: &str) -> Self {
        self.level = self.level.max(AuditLevel::Warning);
        self.details = format!("{} | Dropped={}", self.details, reason);
        self
    }

    /// Render as a single line, without the trailing newline.
    ///
    /// Embedded line breaks are escaped so one entry is always one line.
    pub fn to_line(&self) -> String {
        let line = format!(
            "[{}] [{}] [{}] Journey={} | {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.level.as_str(),
            self.event,
            self.journey_id,
            self.details
        );
        line.replace('\r', "\\r").replace('\n', "\\n")
    }
}

/// Persistence backend for journeys.
#[async_trait]
pub trait JourneyStore: Send + Sync {
    /// Create the storage layout. Idempotent and safe to race.
    async fn initialize(&self) -> StorageResult<()>;

    /// Overwrite the full journey document.
    async fn save_journey(&self, journey: &Journey) -> StorageResult<()>;

    /// Read a journey document; `Ok(None)` when it does not exist.
    async fn load_journey(&self, id: &str) -> StorageResult<Option<Journey>>;

    /// IDs of every persisted journey document, sorted.
    async fn journey_ids(&self) -> StorageResult<Vec<String>>;

    /// Write an auxiliary document named after its journey.
    async fn save_artifact(
        &self,
        kind: ArtifactKind,
        name: &str,
        body: &serde_json::Value,
    ) -> StorageResult<()>;

    /// Append one line to the shared audit trail.
    async fn append_audit(&self, entry: &AuditEntry) -> StorageResult<()>;

    /// Delete finished journeys started before `cutoff`, with their artifacts.
    ///
    /// Returns the number of journeys removed.
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> StorageResult<usize>;
}

/// Reject IDs that could escape the storage root or are not IDs at all.
pub fn validate_journey_id(id: &str) -> StorageResult<()> {
    let valid = !id.is_empty()
        && id.len() <= MAX_JOURNEY_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidJourneyId {
            journey_id: id.to_string(),
        })
    }
}

/// Longest caller-supplied fragment kept in an artifact name.
pub const MAX_COMPONENT_LEN: usize = 64;

/// Replace every character outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitize_file_stem(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

/// Make a caller-supplied fragment (tool name, stage) safe and short.
pub fn sanitize_component(name: &str) -> String {
    sanitize_file_stem(name)
        .chars()
        .take(MAX_COMPONENT_LEN)
        .collect()
}
